//! Remote task dispatch toward an off-process worker pool.
//!
//! The dispatcher offers two submission paths: a blocking one that waits for
//! the response, and a register-and-resume one that returns once the worker
//! transport acknowledges the enqueue. Completions are correlated by task id
//! only; the dispatcher keeps no per-call state besides a timeout
//! registration.

mod dispatcher;
mod memory;
mod task;
mod transport;

pub use dispatcher::TaskDispatcher;
pub use memory::InMemoryWorkerTransport;
pub use task::{EnqueueAck, TaskMode, TaskResponse, TaskResponseStatus, TaskSpec};
pub use transport::WorkerTransport;

#[cfg(test)]
pub use transport::MockWorkerTransport;
