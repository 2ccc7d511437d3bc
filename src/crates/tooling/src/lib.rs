//! Cross-cutting async utilities shared by the drover crates.
//!
//! Nothing in here knows about agents, graphs, or buses. The modules are the
//! small mechanical pieces the rest of the workspace leans on:
//!
//! - [`cancel`] - cooperative cancellation tokens
//! - [`rate_limit`] - token-bucket rate limiting with interruptible waits
//! - [`retry`] - exponential backoff policy with jitter
//! - [`timeout`] - deadline wrappers for async operations
//! - [`logging`] - timing instrumentation helpers

pub mod cancel;
pub mod logging;
pub mod rate_limit;
pub mod retry;
pub mod timeout;

pub use cancel::CancelToken;
pub use rate_limit::TokenBucket;
pub use retry::BackoffPolicy;
pub use timeout::{with_timeout, TimeoutError};
