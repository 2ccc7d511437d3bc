//! # drover-team
//!
//! Team orchestration over the bus: a [`Team`] owns an insertion-ordered set
//! of agents, a shared context, and one of four coordination strategies -
//! sequential pipeline, bounded-parallel fan-out, router dispatch, or
//! LLM-driven coordinator decomposition. Joining a team registers the agent
//! on the bus with a default peer handler that serves task delegations,
//! questions, and broadcasts.

pub mod error;
mod coordinator;
mod handler;
mod merge;
mod parallel;
mod router;
mod sequential;
pub mod team;

pub use error::{Result, TeamError};
pub use merge::default_merge;
pub use team::{ErrorStrategy, MergeFn, StaticRouter, Strategy, Team, TeamBuilder};
