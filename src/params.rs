use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

pub const DATASET_NAME: &str = "DatasetName";
pub const INPUT_FOLDER_NAME: &str = "InputFolderName";
pub const SHARED_RESULTS_FOLDERS: &str = "SharedResultsFolders";
pub const TRANSFER_FOLDER_PATH: &str = "TransferFolderPath";
pub const DATASET_STORAGE_PATH: &str = "DatasetStoragePath";
pub const DATASET_ARCHIVE_PATH: &str = "DatasetArchivePath";

/// Read access to the job's parameters plus the one write the engine performs.
pub trait JobParams {
    /// Value of `name`, or an empty string when unset.
    fn get_param(&self, name: &str) -> String;

    fn add_result_file_to_skip(&self, file_name: &str);

    fn get_job_parameter<T: FromStr>(&self, name: &str, default: T) -> T
    where
        Self: Sized,
    {
        let raw = self.get_param(name);
        if raw.trim().is_empty() {
            return default;
        }
        raw.trim().parse().unwrap_or(default)
    }
}

#[derive(Debug, Default)]
pub struct JobParameters {
    values: HashMap<String, String>,
    skipped: RefCell<BTreeSet<String>>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn result_files_to_skip(&self) -> Vec<String> {
        self.skipped.borrow().iter().cloned().collect()
    }
}

impl JobParams for JobParameters {
    fn get_param(&self, name: &str) -> String {
        self.values.get(name).cloned().unwrap_or_default()
    }

    fn add_result_file_to_skip(&self, file_name: &str) {
        self.skipped.borrow_mut().insert(file_name.to_string());
    }
}

/// Split a comma-separated directory list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
