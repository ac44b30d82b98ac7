//! Attempt log (one line per tick) and captured output log (last run only).

use chrono::{DateTime, Local};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::StateError;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const RULE: &str = "----------------------------------------";

pub fn format_time(time: DateTime<Local>) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// Formats an epoch second in local time, falling back to the raw number.
pub fn format_epoch(epoch: i64) -> String {
    DateTime::from_timestamp(epoch, 0)
        .map(|t| format_time(t.with_timezone(&Local)))
        .unwrap_or_else(|| epoch.to_string())
}

/// Append-only log: `<timestamp> <outcome>` per line.
pub struct AttemptLog {
    path: PathBuf,
}

impl AttemptLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, outcome: &str) -> Result<(), StateError> {
        let entry = format!("{} {}\n", format_time(Local::now()), outcome);
        append_to(&self.path, &entry)
    }

    pub fn success(&self, elapsed_secs: i64) -> Result<(), StateError> {
        self.append(&format!("OK ({elapsed_secs} s)"))
    }

    pub fn failure(&self) -> Result<(), StateError> {
        self.append("fail")
    }

    /// Last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Result<Vec<String>, StateError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StateError::io(&self.path, e)),
        };
        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        let skip = lines.len().saturating_sub(n);
        Ok(lines.into_iter().skip(skip).collect())
    }
}

/// Captured output of the most recent client run, overwritten every run.
pub struct OutputLog {
    path: PathBuf,
}

impl OutputLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncates the log and writes the run header.
    pub fn begin(&self, started: DateTime<Local>, settings: &[(&str, String)]) -> Result<(), StateError> {
        let mut header = format!("run started: {}\n", format_time(started));
        for (name, value) in settings {
            header.push_str(&format!("{name}: {value}\n"));
        }
        header.push_str(RULE);
        header.push('\n');
        fs::write(&self.path, header).map_err(|e| StateError::io(&self.path, e))
    }

    /// Appends the captured output and the trailer.
    pub fn finish(
        &self,
        output: &str,
        elapsed_secs: i64,
        finished: DateTime<Local>,
    ) -> Result<(), StateError> {
        let mut body = String::from(output);
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        body.push_str(RULE);
        body.push('\n');
        body.push_str(&format!("elapsed: {elapsed_secs} s\n"));
        body.push_str(&format!("finished: {}\n", format_time(finished)));

        append_to(&self.path, &body)
    }
}

fn append_to(path: &Path, text: &str) -> Result<(), StateError> {
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(text.as_bytes()))
        .map_err(|e| StateError::io(path, e))
}
