mod core;
mod event;
mod handler;
mod options;

pub use event::NodeEvent;
pub use options::NodeOptions;

use crate::pool::WorkerPool;

/// The per-node actor that owns the worker pool. All pool state is
/// mutated from this actor's event loop; asynchronous collaborators
/// re-enter the loop by sending [NodeEvent]s.
pub struct NodeActor {
    pub(crate) worker_pool: WorkerPool,
}
