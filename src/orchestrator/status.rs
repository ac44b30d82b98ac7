//! Read-only view of a target's persisted state, for `synctick status`.

use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;

use super::runner::{HistoryDecision, Orchestrator, decide};
use crate::backoff;
use crate::client::SyncClient;
use crate::errors::TickError;
use crate::state::{FailureRecord, FailureStore, Liveness};

const RECENT_LINES: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub config_file: PathBuf,
    pub local_dir: PathBuf,
    pub remote_url: String,
    pub lock_owner: Option<u32>,
    pub lock_owner_alive: Option<bool>,
    pub failure: Option<FailureRecord>,
    /// Delay imposed by the current failure count, in seconds.
    pub backoff_secs: Option<u64>,
    /// When the next tick may run the client; `None` when it may run now
    /// or only after a config change.
    pub next_retry_epoch: Option<i64>,
    /// A configuration error is latched and the config has not changed since.
    pub blocked: bool,
    pub recent: Vec<String>,
}

impl<S, C, L> Orchestrator<S, C, L>
where
    S: FailureStore,
    C: SyncClient,
    L: Liveness,
{
    pub fn status(&self) -> Result<TargetStatus, TickError> {
        let config = self.config();
        let lock_owner = self.lock().owner()?;
        let failure = self.store().load()?;
        let now = Utc::now().timestamp();

        let decision = decide(failure.as_ref(), now, || config.fingerprint())?;
        let next_retry_epoch = match decision {
            HistoryDecision::SkipBackoff { retry_at } => Some(retry_at),
            _ => None,
        };

        Ok(TargetStatus {
            config_file: config.config_file.clone(),
            local_dir: config.local_dir.clone(),
            remote_url: config.remote_url.clone(),
            lock_owner,
            lock_owner_alive: lock_owner.map(|pid| self.lock().is_owner_alive(pid)),
            backoff_secs: failure
                .as_ref()
                .filter(|f| !f.is_config_error())
                .map(|f| backoff::compute_delay(f.count)),
            failure,
            next_retry_epoch,
            blocked: decision == HistoryDecision::Blocked,
            recent: self.attempt_log().tail(RECENT_LINES)?,
        })
    }
}
