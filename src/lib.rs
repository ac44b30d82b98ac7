pub mod backoff;
pub mod classify;
pub mod client;
pub mod config;
pub mod errors;
pub mod exit;
pub mod logging;
pub mod orchestrator;
pub mod record;
pub mod state;
