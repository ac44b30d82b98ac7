//! Process exit statuses, a stable contract for schedulers and wrappers.

use crate::errors::{StateError, TickError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    Ok = 0,
    GenericError = 1,
    UsageError = 2,
    InternalError = 3,
    AlreadyRunning = 4,
    SkippingBackoff = 5,
    ConfigError = 6,
    ConfigNotFixed = 7,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn for_error(err: &TickError) -> Self {
        match err {
            TickError::Config(_) => ExitStatus::ConfigError,
            TickError::State(StateError::CorruptState { .. })
            | TickError::State(StateError::BadLockFile { .. })
            | TickError::State(StateError::Io { .. }) => ExitStatus::GenericError,
            TickError::Other(_) => ExitStatus::InternalError,
        }
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status.code())
    }
}
