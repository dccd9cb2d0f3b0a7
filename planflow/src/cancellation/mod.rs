//! Cooperative cancellation.
//!
//! Synchronous step work cannot be preempted, so it polls a
//! [`CancellationToken`]; background loops such as the expiry monitor await
//! [`CancellationToken::cancelled`].

mod registry;
mod token;

pub use registry::ExecutionTokens;
pub use token::{CancelCause, CancellationToken};
