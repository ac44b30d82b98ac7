//! Outcome classification from the sync client's exit status and output.
//!
//! The client reports problems only as human-readable text, so configuration
//! problems are recognized by matching its known diagnostics:
//! - unresolvable host
//! - remote path answering "404 Not Found"
//! - rejected authentication (401, "Authentication required", ...)
//!
//! Everything else that exits nonzero is an opaque failure.

use regex::Regex;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use crate::state::CONFIG_ERROR_MARKER;

static BAD_HOST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)host (\S+ )?not found|could not resolve host|name or service not known|unknown host")
        .unwrap()
});

static BAD_CREDENTIALS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)authentication (required|failed|rejected)|401 unauthori[sz]ed|server replied "?401|wrong (user ?name|login) or password|invalid credentials"#,
    )
    .unwrap()
});

static BAD_PATH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)404 not found|server replied \x22?404").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFault {
    BadHost,
    BadPath,
    BadCredentials,
}

impl fmt::Display for ConfigFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let detail = match self {
            ConfigFault::BadHost => "host not found",
            ConfigFault::BadPath => "remote path not found",
            ConfigFault::BadCredentials => "bad credentials",
        };
        write!(f, "{}", detail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Config(ConfigFault),
    Other(String),
}

impl FailureReason {
    pub fn is_config_error(&self) -> bool {
        matches!(self, FailureReason::Config(_))
    }
}

/// The persisted form: `configuration error: <detail>` or the opaque detail.
impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Config(fault) => write!(f, "{}: {}", CONFIG_ERROR_MARKER, fault),
            FailureReason::Other(detail) => write!(f, "{}", detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(FailureReason),
}

/// Classify a finished client run. `exit_code` is `None` when the client was
/// killed by a signal or never started; `output_log` is where the full output
/// can be read.
pub fn classify(success: bool, exit_code: Option<i32>, output: &str, output_log: &Path) -> Outcome {
    if success {
        return Outcome::Success;
    }

    if let Some(fault) = config_fault(output) {
        return Outcome::Failure(FailureReason::Config(fault));
    }

    let status = match exit_code {
        Some(code) => format!("exited with status {code}"),
        None => "did not exit normally".to_string(),
    };
    Outcome::Failure(FailureReason::Other(format!(
        "sync client {}, see {}",
        status,
        output_log.display()
    )))
}

fn config_fault(output: &str) -> Option<ConfigFault> {
    if BAD_HOST_REGEX.is_match(output) {
        Some(ConfigFault::BadHost)
    } else if BAD_CREDENTIALS_REGEX.is_match(output) {
        Some(ConfigFault::BadCredentials)
    } else if BAD_PATH_REGEX.is_match(output) {
        Some(ConfigFault::BadPath)
    } else {
        None
    }
}
