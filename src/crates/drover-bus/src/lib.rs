//! # drover-bus
//!
//! In-process routing of [`Envelope`]s between registered peers with bounded
//! memory and back-pressure. Each peer gets a bounded FIFO inbox; peers with
//! handlers process deliveries on detached tasks and their replies are
//! correlated back to the requester. A bounded history ring keeps recent
//! traffic for inspection, and dedicated direct channels offer low-latency
//! point-to-point exchange that bypasses the router.
//!
//! The bus is strictly in-process; distribution across processes is an
//! explicit non-goal.

pub mod bus;
pub mod envelope;
pub mod error;

pub use bus::{Bus, BusConfig, PeerHandler, PeerSpec};
pub use envelope::{
    AnswerPayload, Envelope, EnvelopeType, QuestionPayload, ResultPayload, TaskPayload, BROADCAST,
};
pub use error::{BusError, Result};
