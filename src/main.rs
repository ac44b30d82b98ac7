use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use synctick::exit::ExitStatus;

mod cmd;

#[derive(Parser)]
#[command(name = "synctick")]
#[command(
    version,
    about = "Run a file sync client from a scheduler, with locking, failure classification and backoff"
)]
pub struct Cli {
    /// Echo outcomes to stderr (-vv for debug detail)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Attempt one sync of the target described by CONFIG (run this from cron)
    Run {
        /// Path to the target's `key: value` config file
        config: PathBuf,
    },
    /// Show lock, failure and backoff state of a target
    Status {
        config: PathBuf,
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Forget recorded failures so the next run syncs immediately
    Reset { config: PathBuf },
    /// Validate a config file and show the client command line
    Check { config: PathBuf },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    synctick::logging::init(cli.verbose);

    // The lock may be left behind; the next tick reclaims it as stale.
    std::panic::set_hook(Box::new(|info| {
        eprintln!("synctick: internal error: {info}");
        std::process::exit(i32::from(ExitStatus::InternalError.code()));
    }));

    let result = match &cli.command {
        Commands::Run { config } => cmd::cmd_run(config).await,
        Commands::Status { config, json } => cmd::cmd_status(config, *json),
        Commands::Reset { config } => cmd::cmd_reset(config),
        Commands::Check { config } => cmd::cmd_check(config),
    };

    match result {
        Ok(status) => status.into(),
        Err(err) => {
            eprintln!("synctick: {err:#}");
            ExitStatus::for_error(&err).into()
        }
    }
}
