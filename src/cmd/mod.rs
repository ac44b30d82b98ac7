//! CLI command implementations.
//!
//! | Module   | Commands handled     |
//! |----------|----------------------|
//! | `run`    | `Run`                |
//! | `target` | `Status`, `Reset`    |
//! | `config` | `Check`              |

pub mod config;
pub mod run;
pub mod target;

pub use config::cmd_check;
pub use run::cmd_run;
pub use target::{cmd_reset, cmd_status};

use std::path::Path;

use synctick::client::ExternalSyncClient;
use synctick::config::SyncConfig;
use synctick::errors::TickError;
use synctick::orchestrator::Orchestrator;
use synctick::state::{FileFailureStore, ProcessLiveness, StatePaths};

pub type TargetOrchestrator = Orchestrator<FileFailureStore, ExternalSyncClient, ProcessLiveness>;

/// Load the config and wire up the real collaborators for its target.
pub fn open_target(config_path: &Path) -> Result<(TargetOrchestrator, StatePaths), TickError> {
    let config = SyncConfig::load(config_path)?;
    let paths = StatePaths::for_config(&config);
    let client = ExternalSyncClient::from_config(&config);
    let store = FileFailureStore::new(&paths.failures);
    let orchestrator = Orchestrator::new(config, &paths, store, client, ProcessLiveness);
    Ok((orchestrator, paths))
}
