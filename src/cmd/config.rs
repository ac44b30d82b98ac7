//! Config validation: `synctick check <config>`.

use std::path::Path;

use synctick::config::Credentials;
use synctick::errors::TickError;
use synctick::exit::ExitStatus;

use super::open_target;

pub fn cmd_check(config_path: &Path) -> Result<ExitStatus, TickError> {
    let (orchestrator, paths) = open_target(config_path)?;
    let config = orchestrator.config();

    println!();
    println!("Config OK: {}", config.config_file.display());
    println!();
    for (name, value) in config.describe() {
        println!("  {:<18} {}", format!("{name}:"), value);
    }
    let credentials = match &config.credentials {
        Credentials::Password { user, source, .. } => match source {
            Some(file) => format!("user {user}, password from {}", file.display()),
            None => format!("user {user}, password in config"),
        },
        Credentials::Netrc { path } => format!("netrc ({})", path.display()),
    };
    println!("  {:<18} {}", "credentials:", credentials);
    if let Some(timeout) = config.timeout {
        println!("  {:<18} {} s", "timeout:", timeout.as_secs());
    }
    println!();
    println!("State files:");
    println!("  {:<18} {}", "lock:", paths.lock.display());
    println!("  {:<18} {}", "failures:", paths.failures.display());
    println!("  {:<18} {}", "attempt log:", paths.attempt_log.display());
    println!("  {:<18} {}", "output log:", paths.output_log.display());
    println!();
    println!("Client command:");
    println!("  {}", config.display_command());
    println!();
    Ok(ExitStatus::Ok)
}
