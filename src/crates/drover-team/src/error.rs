//! Team error types

use drover_bus::BusError;
use drover_core::CoreError;
use thiserror::Error;

/// Convenience result type using [`TeamError`].
pub type Result<T> = std::result::Result<T, TeamError>;

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(agent, message)| format!("{}: {}", agent, message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced by team execution.
#[derive(Error, Debug)]
pub enum TeamError {
    /// The team has no members.
    #[error("team has no agents")]
    NoAgents,

    /// An operation referenced an agent that is not a team member.
    #[error("agent '{0}' is not a member of this team")]
    UnknownAgent(String),

    /// The coordinator's plan was not parseable JSON.
    #[error("coordinator plan could not be parsed: {0}")]
    PlanParse(String),

    /// A delegated task came back unsuccessful.
    #[error("delegated task to '{agent}' failed: {message}")]
    TaskFailed { agent: String, message: String },

    /// Collected per-agent failures from a parallel run.
    #[error("parallel execution failed ({}): {}", .0.len(), format_failures(.0))]
    Aggregate(Vec<(String, String)>),

    /// Bus operation failed.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Agent execution failed.
    #[error("agent error: {0}")]
    Agent(#[from] CoreError),

    /// The caller's cancellation token fired.
    #[error("team execution cancelled")]
    Cancelled,

    /// Inconsistent team configuration.
    #[error("team configuration error: {0}")]
    Configuration(String),
}
