//! One scheduled tick: `synctick run <config>`.

use std::path::Path;

use synctick::errors::TickError;
use synctick::exit::ExitStatus;

use super::open_target;

pub async fn cmd_run(config_path: &Path) -> Result<ExitStatus, TickError> {
    let (orchestrator, paths) = open_target(config_path)?;
    paths.ensure_dir()?;

    let outcome = orchestrator.tick().await?;
    tracing::debug!(?outcome, "tick finished");
    Ok(outcome.exit_status())
}
