use chrono::{Local, Utc};

use crate::backoff;
use crate::classify::{FailureReason, Outcome, classify};
use crate::client::{ClientRun, SyncClient};
use crate::config::SyncConfig;
use crate::errors::{ConfigError, TickError};
use crate::exit::ExitStatus;
use crate::state::{
    Acquire, AttemptLog, FailureRecord, FailureStore, InstanceLock, Liveness, OutputLog,
    StatePaths,
};

/// Per-tick record of one client invocation. Never persisted.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub start_epoch: i64,
    pub end_epoch: i64,
    pub exit_succeeded: bool,
    pub exit_code: Option<i32>,
    pub captured_output: String,
}

impl AttemptContext {
    pub fn elapsed_secs(&self) -> i64 {
        (self.end_epoch - self.start_epoch).max(0)
    }
}

/// Decision taken from the failure history before invoking the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryDecision {
    Proceed { failure_count: u32 },
    SkipBackoff { retry_at: i64 },
    /// A configuration error is latched and nothing suggests it was fixed.
    Blocked,
}

/// Final state of a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Succeeded { elapsed_secs: i64 },
    Failed { reason: FailureReason, count: u32 },
    SkippedBackoff { retry_at: i64 },
    Blocked { reason: String },
    AlreadyRunning { owner: Option<u32> },
}

impl TickOutcome {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            TickOutcome::Succeeded { .. } => ExitStatus::Ok,
            TickOutcome::Failed { reason, .. } if reason.is_config_error() => {
                ExitStatus::ConfigError
            }
            TickOutcome::Failed { .. } => ExitStatus::GenericError,
            TickOutcome::SkippedBackoff { .. } => ExitStatus::SkippingBackoff,
            TickOutcome::Blocked { .. } => ExitStatus::ConfigNotFixed,
            TickOutcome::AlreadyRunning { .. } => ExitStatus::AlreadyRunning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    Cleared(Option<FailureRecord>),
    AlreadyRunning { owner: Option<u32> },
}

/// Decide whether to run, given the stored failure and the current time.
///
/// `fingerprint` is only consulted for latched configuration errors.
pub fn decide(
    record: Option<&FailureRecord>,
    now: i64,
    fingerprint: impl FnOnce() -> Result<i64, ConfigError>,
) -> Result<HistoryDecision, ConfigError> {
    let Some(record) = record else {
        return Ok(HistoryDecision::Proceed { failure_count: 0 });
    };

    if record.is_config_error() {
        // No backoff once the config changed: the failure may be fixed.
        return if fingerprint()? > record.last_failure_epoch {
            Ok(HistoryDecision::Proceed {
                failure_count: record.count,
            })
        } else {
            Ok(HistoryDecision::Blocked)
        };
    }

    if backoff::should_retry_now(record.last_failure_epoch, record.count, now) {
        Ok(HistoryDecision::Proceed {
            failure_count: record.count,
        })
    } else {
        Ok(HistoryDecision::SkipBackoff {
            retry_at: backoff::retry_at(record.last_failure_epoch, record.count),
        })
    }
}

/// Runs ticks for one target directory.
pub struct Orchestrator<S, C, L> {
    config: SyncConfig,
    store: S,
    client: C,
    lock: InstanceLock<L>,
    attempt_log: AttemptLog,
    output_log: OutputLog,
    pid: u32,
}

impl<S, C, L> Orchestrator<S, C, L>
where
    S: FailureStore,
    C: SyncClient,
    L: Liveness,
{
    pub fn new(config: SyncConfig, paths: &StatePaths, store: S, client: C, liveness: L) -> Self {
        Self {
            config,
            store,
            client,
            lock: InstanceLock::new(paths.lock.clone(), liveness),
            attempt_log: AttemptLog::new(paths.attempt_log.clone()),
            output_log: OutputLog::new(paths.output_log.clone()),
            pid: std::process::id(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn lock(&self) -> &InstanceLock<L> {
        &self.lock
    }

    pub fn attempt_log(&self) -> &AttemptLog {
        &self.attempt_log
    }

    /// One complete tick: lock, history check, run, classify, record, unlock.
    pub async fn tick(&self) -> Result<TickOutcome, TickError> {
        let guard = match self.lock.try_acquire(self.pid)? {
            Acquire::Acquired(guard) => guard,
            Acquire::AlreadyRunning { owner } => {
                tracing::info!(?owner, "another sync is running, nothing to do");
                return Ok(TickOutcome::AlreadyRunning { owner });
            }
        };

        let result = self.attempt().await;
        let released = guard.release();
        let outcome = result?;
        released?;
        Ok(outcome)
    }

    async fn attempt(&self) -> Result<TickOutcome, TickError> {
        let history = self.store.load()?;
        let now = Utc::now().timestamp();

        let failure_count = match decide(history.as_ref(), now, || self.config.fingerprint())? {
            HistoryDecision::Proceed { failure_count } => failure_count,
            HistoryDecision::SkipBackoff { retry_at } => {
                let until = crate::state::log::format_epoch(retry_at);
                tracing::info!(retry_at = %until, "backing off after earlier failure");
                self.attempt_log.append(&format!("skip (backoff until {until})"))?;
                return Ok(TickOutcome::SkippedBackoff { retry_at });
            }
            HistoryDecision::Blocked => {
                let reason = history.map(|r| r.reason).unwrap_or_default();
                tracing::info!(%reason, "configuration error not fixed, not retrying");
                self.attempt_log
                    .append(&format!("blocked ({reason}, config unchanged)"))?;
                return Ok(TickOutcome::Blocked { reason });
            }
        };

        let ctx = self.run_client().await?;
        let outcome = classify(
            ctx.exit_succeeded,
            ctx.exit_code,
            &ctx.captured_output,
            self.output_log.path(),
        );

        match outcome {
            Outcome::Success => {
                if history.is_some() {
                    self.store.clear()?;
                }
                self.attempt_log.success(ctx.elapsed_secs())?;
                tracing::info!(elapsed_secs = ctx.elapsed_secs(), "sync succeeded");
                Ok(TickOutcome::Succeeded {
                    elapsed_secs: ctx.elapsed_secs(),
                })
            }
            Outcome::Failure(reason) => {
                let count = failure_count.saturating_add(1);
                self.store
                    .save(&reason.to_string(), count, ctx.start_epoch)?;
                self.attempt_log.failure()?;
                tracing::info!(count, %reason, "sync failed");
                Ok(TickOutcome::Failed { reason, count })
            }
        }
    }

    async fn run_client(&self) -> Result<AttemptContext, TickError> {
        let started = Local::now();
        self.output_log.begin(started, &self.config.describe())?;

        let run = match self.client.run().await {
            Ok(run) => run,
            Err(e) => ClientRun {
                success: false,
                exit_code: None,
                output: format!("synctick: {e:#}\n"),
            },
        };

        let finished = Local::now();
        let ctx = AttemptContext {
            start_epoch: started.timestamp(),
            end_epoch: finished.timestamp(),
            exit_succeeded: run.success,
            exit_code: run.exit_code,
            captured_output: run.output,
        };
        self.output_log
            .finish(&ctx.captured_output, ctx.elapsed_secs(), finished)?;
        Ok(ctx)
    }

    /// Clears the failure record under the lock, for when the user has fixed
    /// whatever made the sync fail. A corrupt record is removed as well.
    pub fn reset(&self) -> Result<ResetOutcome, TickError> {
        let guard = match self.lock.try_acquire(self.pid)? {
            Acquire::Acquired(guard) => guard,
            Acquire::AlreadyRunning { owner } => {
                return Ok(ResetOutcome::AlreadyRunning { owner });
            }
        };

        let result = self.clear_history();
        let released = guard.release();
        let previous = result?;
        released?;
        Ok(ResetOutcome::Cleared(previous))
    }

    fn clear_history(&self) -> Result<Option<FailureRecord>, TickError> {
        let previous = self.store.load().ok().flatten();
        self.store.clear()?;
        self.attempt_log.append("reset")?;
        tracing::info!(had_record = previous.is_some(), "failure history cleared");
        Ok(previous)
    }
}
