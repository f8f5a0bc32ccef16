use std::cell::Cell;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::{ArchiveFileId, ArchivedFileRef};
use crate::error::TierError;
use crate::report::StatusReporter;

/// Consecutive connectivity failures that trip the breaker.
pub const FAILURE_THRESHOLD: u32 = 3;

/// Outage length of the first trip; the Nth trip lasts N times this.
pub const BASE_DISABLE_MINUTES: i64 = 15;

/// Minimum spacing between "still disabled" notices.
pub const DISABLED_NOTICE_INTERVAL_SECS: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveQuery {
    pub file_name_pattern: String,
    pub subdirectory: Option<String>,
    pub dataset: String,
    pub recurse: bool,
}

pub trait ArchiveService {
    fn search(&self, query: &ArchiveQuery) -> Result<Vec<ArchivedFileRef>, TierError>;
    fn download(&self, file: &ArchivedFileRef, destination: &Path) -> Result<(), TierError>;
}

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    consecutive_failures: u32,
    disable_count: u32,
    disabled_until: Option<DateTime<Utc>>,
    last_notice: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn disable_count(&self) -> u32 {
        self.disable_count
    }

    pub fn disabled_until(&self) -> Option<DateTime<Utc>> {
        self.disabled_until
    }

    pub fn is_tripped(&self, now: DateTime<Utc>) -> bool {
        self.disabled_until.is_some_and(|until| now < until)
    }

    /// Clears an elapsed outage. Returns true when the breaker was re-enabled by this call.
    fn reenable_if_elapsed(&mut self, now: DateTime<Utc>) -> bool {
        match self.disabled_until {
            Some(until) if now >= until => {
                self.disabled_until = None;
                self.last_notice = None;
                true
            }
            _ => false,
        }
    }

    fn take_notice_slot(&mut self, now: DateTime<Utc>) -> bool {
        let due = self.last_notice.is_none_or(|last| {
            now - last >= TimeDelta::seconds(DISABLED_NOTICE_INTERVAL_SECS)
        });
        if due {
            self.last_notice = Some(now);
        }
        due
    }

    /// Counts a connectivity failure; returns the outage length if this one tripped the breaker.
    fn record_failure(&mut self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.consecutive_failures += 1;
        if self.consecutive_failures < FAILURE_THRESHOLD {
            return None;
        }
        self.disable_count += 1;
        let outage = TimeDelta::minutes(BASE_DISABLE_MINUTES * i64::from(self.disable_count));
        self.disabled_until = Some(now + outage);
        self.consecutive_failures = 0;
        Some(outage)
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.disable_count = 0;
    }
}

/// Archive query front end: guards the service with a circuit breaker and keeps the
/// references it has seen.
pub struct ArchiveClient<S: ArchiveService, R: StatusReporter, C: Clock = SystemClock> {
    service: S,
    reporter: R,
    clock: C,
    breaker: CircuitBreaker,
    found: Vec<ArchivedFileRef>,
    found_ids: HashSet<ArchiveFileId>,
    recent: Vec<ArchivedFileRef>,
}

impl<S: ArchiveService, R: StatusReporter> ArchiveClient<S, R, SystemClock> {
    pub fn new(service: S, reporter: R) -> Self {
        Self::with_clock(service, reporter, SystemClock)
    }
}

impl<S: ArchiveService, R: StatusReporter, C: Clock> ArchiveClient<S, R, C> {
    pub fn with_clock(service: S, reporter: R, clock: C) -> Self {
        Self {
            service,
            reporter,
            clock,
            breaker: CircuitBreaker::default(),
            found: Vec::new(),
            found_ids: HashSet::new(),
            recent: Vec::new(),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Files matching the filter. A tripped breaker or a failed call yields an empty list.
    pub fn query(
        &mut self,
        file_name_pattern: &str,
        subdirectory: Option<&str>,
        dataset: &str,
        recurse: bool,
    ) -> Vec<ArchivedFileRef> {
        let now = self.clock.now();
        if self.breaker.reenable_if_elapsed(now) {
            self.reporter
                .status("archive querying re-enabled after outage".to_string());
        }
        if self.breaker.is_tripped(now) {
            if self.breaker.take_notice_slot(now) {
                let until = self
                    .breaker
                    .disabled_until
                    .map(|until| until.to_rfc3339())
                    .unwrap_or_default();
                self.reporter.debug(format!(
                    "archive querying still disabled until {until}; skipping {file_name_pattern}"
                ));
            }
            self.recent.clear();
            return Vec::new();
        }

        let query = ArchiveQuery {
            file_name_pattern: file_name_pattern.to_string(),
            subdirectory: subdirectory
                .map(str::trim)
                .filter(|sub| !sub.is_empty())
                .map(str::to_string),
            dataset: dataset.to_string(),
            recurse,
        };

        match self.service.search(&query) {
            Ok(files) => {
                self.breaker.record_success();
                for file in &files {
                    if self.found_ids.insert(file.file_id) {
                        self.found.push(file.clone());
                    }
                }
                self.recent = files.clone();
                files
            }
            Err(err) if err.is_connectivity() => {
                self.recent.clear();
                self.reporter
                    .warning(format!("archive query for {file_name_pattern} failed: {err}"));
                if let Some(outage) = self.breaker.record_failure(now) {
                    self.reporter.error(format!(
                        "disabling archive querying for {} minutes after {FAILURE_THRESHOLD} consecutive connection failures",
                        outage.num_minutes()
                    ));
                }
                Vec::new()
            }
            Err(err) => {
                self.recent.clear();
                self.reporter
                    .error(format!("archive query for {file_name_pattern} failed: {err}"));
                Vec::new()
            }
        }
    }

    /// Every reference returned since construction or the last clear, deduplicated by id.
    pub fn found_files(&self) -> &[ArchivedFileRef] {
        &self.found
    }

    /// References returned by the most recent query.
    pub fn recent_files(&self) -> &[ArchivedFileRef] {
        &self.recent
    }

    /// Look up a reference, preferring the most recent query's results.
    pub fn lookup(&self, file_id: ArchiveFileId) -> Option<&ArchivedFileRef> {
        self.recent
            .iter()
            .chain(self.found.iter())
            .find(|file| file.file_id == file_id)
    }

    pub fn clear_found_files(&mut self) {
        self.found.clear();
        self.found_ids.clear();
        self.recent.clear();
    }

    pub fn download(&self, file: &ArchivedFileRef, destination: &Path) -> Result<(), TierError> {
        self.service.download(file, destination)
    }
}

/// Stand-in service for jobs that run without archive access. Every search comes back empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoArchive;

impl ArchiveService for NoArchive {
    fn search(&self, _query: &ArchiveQuery) -> Result<Vec<ArchivedFileRef>, TierError> {
        Ok(Vec::new())
    }

    fn download(&self, file: &ArchivedFileRef, _destination: &Path) -> Result<(), TierError> {
        Err(TierError::Download(format!(
            "archive access is disabled; cannot fetch {}",
            file.relative_path
        )))
    }
}

#[derive(Clone)]
pub struct ArchiveHttpClient {
    client: Client,
    base_url: String,
}

impl ArchiveHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TierError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("tierfetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TierError::ArchiveHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| TierError::ArchiveHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn search_url(&self) -> String {
        format!("{}/files/search", self.base_url)
    }

    fn content_url(&self, file_id: ArchiveFileId) -> String {
        format!("{}/files/{}/content", self.base_url, file_id)
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, TierError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "archive request failed".to_string());
        Err(TierError::ArchiveStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, TierError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && err.is_timeout() {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(classify_error(err));
                }
            }
        }
    }
}

impl ArchiveService for ArchiveHttpClient {
    fn search(&self, query: &ArchiveQuery) -> Result<Vec<ArchivedFileRef>, TierError> {
        let url = self.search_url();
        let mut params = vec![
            ("filename", query.file_name_pattern.clone()),
            ("dataset", query.dataset.clone()),
            ("recurse", query.recurse.to_string()),
        ];
        if let Some(sub) = &query.subdirectory {
            params.push(("subdir", sub.clone()));
        }
        // A single attempt: repeated connection failures belong to the circuit breaker.
        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .map_err(classify_error)?;
        let response = Self::handle_status(response)?;
        response
            .json::<Vec<ArchivedFileRef>>()
            .map_err(|err| TierError::ArchiveHttp(err.to_string()))
    }

    fn download(&self, file: &ArchivedFileRef, destination: &Path) -> Result<(), TierError> {
        let url = self.content_url(file.file_id);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let mut response = Self::handle_status(response)?;
        let mut out =
            File::create(destination).map_err(|err| TierError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut out)
            .map_err(|err| TierError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn classify_error(err: reqwest::Error) -> TierError {
    if err.is_connect() || err.is_timeout() {
        TierError::ArchiveConnectivity(err.to_string())
    } else {
        TierError::ArchiveHttp(err.to_string())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}
