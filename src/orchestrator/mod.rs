pub mod runner;
pub mod status;

pub use runner::{
    AttemptContext, HistoryDecision, Orchestrator, ResetOutcome, TickOutcome, decide,
};
pub use status::TargetStatus;
