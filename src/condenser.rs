use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::Builder;

use crate::error::TierError;
use crate::fs_util::{remove_file_if_exists, replace_with_backup};
use crate::report::StatusReporter;

/// Spectra with fewer data lines than this are dropped.
pub const MIN_DATA_LINES: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CondenseStats {
    pub spectra_read: usize,
    pub spectra_removed: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CondenseOutcome {
    pub stats: CondenseStats,
    /// True when the original was swapped for the rewritten file.
    pub replaced: bool,
    pub backup: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextLine {
    ParentIon,
    Data,
}

/// Single-pass rewriter for concatenated DTA text (`_dta.txt`) files.
#[derive(Debug, Clone, Copy, Default)]
pub struct LargeTextCondenser {
    keep_backup: bool,
}

impl LargeTextCondenser {
    pub fn new(keep_backup: bool) -> Self {
        Self { keep_backup }
    }

    /// Copy `input` to `output`, dropping spectra with fewer than [`MIN_DATA_LINES`] data
    /// lines. Lines are copied byte for byte, line endings included.
    ///
    /// The first spectrum is written even when sparse so the output never starts with a gap
    /// that downstream readers would see as a malformed file. That exception applies only
    /// when a following header flushes it; a sparse spectrum at end of stream is dropped even
    /// if it is the only one.
    pub fn filter_sparse<R: BufRead, W: Write>(
        &self,
        mut input: R,
        output: &mut W,
    ) -> io::Result<CondenseStats> {
        let mut stats = CondenseStats::default();
        let mut line = Vec::new();
        let mut spectrum = Vec::new();
        let mut data_lines = 0usize;
        let mut in_spectrum = false;
        let mut flushed = 0usize;
        let mut next = NextLine::Data;

        loop {
            line.clear();
            let read = input.read_until(b'\n', &mut line)?;
            if read == 0 {
                break;
            }
            stats.bytes_in += read as u64;

            if line.first() == Some(&b'=') {
                if in_spectrum {
                    if data_lines >= MIN_DATA_LINES || flushed == 0 {
                        output.write_all(&spectrum)?;
                        stats.bytes_out += spectrum.len() as u64;
                    } else {
                        stats.spectra_removed += 1;
                    }
                    flushed += 1;
                }
                spectrum.clear();
                spectrum.extend_from_slice(&line);
                data_lines = 0;
                in_spectrum = true;
                stats.spectra_read += 1;
                next = NextLine::ParentIon;
                continue;
            }

            if !in_spectrum {
                output.write_all(&line)?;
                stats.bytes_out += line.len() as u64;
                continue;
            }

            spectrum.extend_from_slice(&line);
            match next {
                NextLine::ParentIon => next = NextLine::Data,
                NextLine::Data => {
                    if !is_blank(&line) {
                        data_lines += 1;
                    }
                }
            }
        }

        // No first-spectrum exception here: a sparse first spectrum kept by an earlier pass
        // is dropped by the next pass once nothing follows it.
        if in_spectrum {
            if data_lines >= MIN_DATA_LINES {
                output.write_all(&spectrum)?;
                stats.bytes_out += spectrum.len() as u64;
            } else {
                stats.spectra_removed += 1;
            }
        }
        output.flush()?;
        Ok(stats)
    }

    /// Remove sparse spectra from `path` in place. The file is only replaced when at least one
    /// spectrum was dropped; otherwise it is left untouched.
    pub fn remove_sparse_spectra(
        &self,
        path: &Path,
        reporter: &dyn StatusReporter,
    ) -> Result<CondenseOutcome, TierError> {
        let stats = self.rewrite(path, |input, output| self.filter_sparse(input, output))?;
        let changed = stats.0.spectra_removed > 0;
        let outcome = self.finish(path, stats, changed)?;
        if outcome.replaced {
            reporter.status(format!(
                "removed {} of {} spectra with fewer than {MIN_DATA_LINES} ions from {}",
                outcome.stats.spectra_removed,
                outcome.stats.spectra_read,
                path.display()
            ));
        } else {
            reporter.debug(format!("no sparse spectra in {}", path.display()));
        }
        Ok(outcome)
    }

    /// Shorten numbers in `path` when the file is larger than `threshold_bytes`.
    pub fn condense_if_oversized(
        &self,
        path: &Path,
        threshold_bytes: u64,
        reporter: &dyn StatusReporter,
    ) -> Result<CondenseOutcome, TierError> {
        let size = fs::metadata(path)
            .map_err(|err| TierError::Filesystem(format!("stat {}: {err}", path.display())))?
            .len();
        if size <= threshold_bytes {
            return Ok(CondenseOutcome::default());
        }
        reporter.status(format!(
            "{} is {size} bytes, over the {threshold_bytes} byte limit; condensing",
            path.display()
        ));
        let stats = self.rewrite(path, |input, output| condense_numbers(input, output))?;
        let changed = stats.0.bytes_out < stats.0.bytes_in;
        let outcome = self.finish(path, stats, changed)?;
        if outcome.replaced {
            reporter.status(format!(
                "condensed {} from {} to {} bytes",
                path.display(),
                outcome.stats.bytes_in,
                outcome.stats.bytes_out
            ));
        }
        Ok(outcome)
    }

    /// Run `transform` from `path` into a temp file in the same directory.
    fn rewrite<F>(&self, path: &Path, transform: F) -> Result<(CondenseStats, PathBuf), TierError>
    where
        F: FnOnce(BufReader<fs::File>, &mut BufWriter<&fs::File>) -> io::Result<CondenseStats>,
    {
        let dir = path
            .parent()
            .ok_or_else(|| TierError::Filesystem(format!("no parent for {}", path.display())))?;
        let input = fs::File::open(path)
            .map_err(|err| TierError::Filesystem(format!("open {}: {err}", path.display())))?;
        let temp = Builder::new()
            .prefix("tierfetch-condense")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|err| TierError::Filesystem(err.to_string()))?;
        let stats = {
            let mut writer = BufWriter::new(temp.as_file());
            transform(BufReader::new(input), &mut writer)
                .map_err(|err| TierError::Filesystem(format!("rewrite {}: {err}", path.display())))?
        };
        let temp_path = temp
            .into_temp_path()
            .keep()
            .map_err(|err| TierError::Filesystem(err.to_string()))?;
        Ok((stats, temp_path))
    }

    fn finish(
        &self,
        path: &Path,
        (stats, temp_path): (CondenseStats, PathBuf),
        changed: bool,
    ) -> Result<CondenseOutcome, TierError> {
        if !changed {
            remove_file_if_exists(&temp_path)?;
            return Ok(CondenseOutcome {
                stats,
                replaced: false,
                backup: None,
            });
        }
        let backup = match replace_with_backup(path, &temp_path, self.keep_backup) {
            Ok(backup) => backup,
            Err(err) => {
                // The original is still in place; only the rewritten copy is left over.
                let _ = remove_file_if_exists(&temp_path);
                return Err(err);
            }
        };
        Ok(CondenseOutcome {
            stats,
            replaced: true,
            backup,
        })
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Rewrite numeric tokens on non-header lines without trailing zeros (`120.5000` -> `120.5`).
fn condense_numbers<R: BufRead, W: Write>(mut input: R, output: &mut W) -> io::Result<CondenseStats> {
    let mut stats = CondenseStats::default();
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = input.read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
        stats.bytes_in += read as u64;
        if line.first() == Some(&b'=') {
            stats.spectra_read += 1;
            output.write_all(&line)?;
            stats.bytes_out += line.len() as u64;
            continue;
        }
        let rewritten = condense_line(&line);
        output.write_all(&rewritten)?;
        stats.bytes_out += rewritten.len() as u64;
    }
    output.flush()?;
    Ok(stats)
}

fn condense_line(line: &[u8]) -> Vec<u8> {
    let body_end = line
        .iter()
        .rposition(|byte| !matches!(byte, b'\r' | b'\n'))
        .map(|pos| pos + 1)
        .unwrap_or(0);
    let (body, ending) = line.split_at(body_end);
    let Ok(text) = std::str::from_utf8(body) else {
        return line.to_vec();
    };
    if text.trim().is_empty() {
        return line.to_vec();
    }
    let condensed = text
        .split_whitespace()
        .map(trim_decimal)
        .collect::<Vec<_>>()
        .join(" ");
    let mut out = condensed.into_bytes();
    out.extend_from_slice(ending);
    out
}

fn trim_decimal(token: &str) -> &str {
    let is_decimal = token.contains('.')
        && !token.contains(['e', 'E'])
        && token.parse::<f64>().is_ok();
    if !is_decimal {
        return token;
    }
    let trimmed = token.trim_end_matches('0').trim_end_matches('.');
    // Signed zeros such as `-0.00` collapse to a bare `0`.
    if trimmed.trim_start_matches(['-', '+']).chars().all(|c| c == '0') {
        return "0";
    }
    trimmed
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CdtaSummary {
    pub spectra: usize,
    /// 1-based line numbers of headers that do not close with `=`.
    pub malformed_headers: Vec<usize>,
}

/// Check that `path` starts with a spectrum header and that headers are closed.
pub fn validate_cdta(path: &Path) -> Result<CdtaSummary, TierError> {
    let file = fs::File::open(path)
        .map_err(|err| TierError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut summary = CdtaSummary::default();
    let mut seen_content = false;
    for (index, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line = line.map_err(|err| TierError::Filesystem(err.to_string()))?;
        if is_blank(&line) {
            continue;
        }
        let is_header = line.first() == Some(&b'=');
        if !seen_content && !is_header {
            return Err(TierError::MalformedCdta(format!(
                "{} does not start with a spectrum header",
                path.display()
            )));
        }
        seen_content = true;
        if is_header {
            summary.spectra += 1;
            let closed = line
                .iter()
                .rev()
                .find(|byte| !byte.is_ascii_whitespace())
                .is_some_and(|byte| *byte == b'=');
            if line.len() < 2 || !closed {
                summary.malformed_headers.push(index + 1);
            }
        }
    }
    if summary.spectra == 0 {
        return Err(TierError::MalformedCdta(format!(
            "{} contains no spectra",
            path.display()
        )));
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum(index: usize, data_lines: usize) -> String {
        let mut text = format!("=\"Job.{index}.{index}.2.dta\"==================================\n");
        text.push_str("1234.5678 2\n");
        for ion in 0..data_lines {
            text.push_str(&format!("{}.1 {}\n", 100 + ion, 10 * (ion + 1)));
        }
        text
    }

    fn filter(input: &str) -> (String, CondenseStats) {
        let mut out = Vec::new();
        let stats = LargeTextCondenser::default()
            .filter_sparse(input.as_bytes(), &mut out)
            .unwrap();
        (String::from_utf8(out).unwrap(), stats)
    }

    #[test]
    fn two_lines_removed_three_kept() {
        let input = [spectrum(1, 5), spectrum(2, 2), spectrum(3, 3)].concat();
        let (output, stats) = filter(&input);
        assert_eq!(output, [spectrum(1, 5), spectrum(3, 3)].concat());
        assert_eq!(stats.spectra_read, 3);
        assert_eq!(stats.spectra_removed, 1);
    }

    #[test]
    fn first_spectrum_always_kept() {
        let input = [spectrum(1, 0), spectrum(2, 4)].concat();
        let (output, stats) = filter(&input);
        assert_eq!(output, input);
        assert_eq!(stats.spectra_removed, 0);
    }

    #[test]
    fn sparse_final_spectrum_dropped() {
        let input = spectrum(1, 1);
        let (output, stats) = filter(&input);
        assert!(output.is_empty());
        assert_eq!(stats.spectra_removed, 1);
    }

    #[test]
    fn sparse_first_spectrum_is_dropped_once_it_is_last() {
        let input = [spectrum(1, 1), spectrum(2, 2)].concat();
        let (first_pass, stats) = filter(&input);
        assert_eq!(first_pass, spectrum(1, 1));
        assert_eq!(stats.spectra_removed, 1);

        let (second_pass, stats) = filter(&first_pass);
        assert!(second_pass.is_empty());
        assert_eq!(stats.spectra_removed, 1);
    }

    #[test]
    fn failed_replace_removes_the_rewritten_copy() {
        let temp = tempfile::tempdir().unwrap();
        let rewritten = temp.path().join("Job_dta.txt.tmp");
        fs::write(&rewritten, spectrum(1, 3)).unwrap();
        let stats = CondenseStats {
            spectra_read: 1,
            ..CondenseStats::default()
        };

        let result = LargeTextCondenser::default().finish(
            &temp.path().join("Job_dta.txt"),
            (stats, rewritten.clone()),
            true,
        );
        assert!(matches!(result, Err(TierError::Filesystem(_))));
        assert!(!rewritten.exists());
    }

    #[test]
    fn blank_separators_are_not_ions() {
        let sparse = spectrum(2, 2).replace("101.1 20\n", "101.1 20\n\n");
        let input = format!("{}\n{}", spectrum(1, 3), sparse);
        let (output, stats) = filter(&input);
        assert_eq!(stats.spectra_removed, 1);
        assert!(!output.contains("Job.2.2"));
    }

    #[test]
    fn decimals_lose_trailing_zeros() {
        assert_eq!(condense_line(b"120.5000 0.000\r\n"), b"120.5 0\r\n".to_vec());
        assert_eq!(condense_line(b"1234.5678 2\n"), b"1234.5678 2\n".to_vec());
        assert_eq!(trim_decimal("-0.00"), "0");
        assert_eq!(trim_decimal("+00.0"), "0");
        assert_eq!(trim_decimal("-10.50"), "-10.5");
        assert_eq!(trim_decimal("1e-5"), "1e-5");
    }
}
