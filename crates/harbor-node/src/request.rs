use std::sync::Arc;
use std::time::Duration;

use crate::error::{NodeResult, PopWorkerError};
use crate::id::{ActorId, JobId, WorkerId};
use crate::runtime_env::{RuntimeEnvHash, RuntimeEnvInfo};
use crate::worker::{Language, WorkerClient, WorkerType};

/// The view of a worker handed to a pop continuation. The record itself
/// stays owned by the pool; consumers interact with the worker through its
/// id and the RPC client.
#[derive(Clone)]
pub struct WorkerLease {
    pub worker_id: WorkerId,
    pub language: Language,
    pub worker_type: WorkerType,
    pub job_id: Option<JobId>,
    pub root_detached_actor_id: Option<ActorId>,
    pub runtime_env_hash: RuntimeEnvHash,
    pub client: Arc<dyn WorkerClient>,
}

impl std::fmt::Debug for WorkerLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLease")
            .field("worker_id", &self.worker_id)
            .field("language", &self.language)
            .field("worker_type", &self.worker_type)
            .field("job_id", &self.job_id)
            .field("root_detached_actor_id", &self.root_detached_actor_id)
            .field("runtime_env_hash", &self.runtime_env_hash)
            .finish()
    }
}

/// The continuation of a pop worker request. It is invoked exactly once
/// with either a leased worker or the failure status. The return value
/// reports whether the caller dispatched the worker; returning false hands
/// the worker straight back to the idle pool.
pub type PopWorkerCallback = Box<dyn FnOnce(Result<WorkerLease, PopWorkerError>) -> bool + Send>;

pub type IoWorkerCallback = Box<dyn FnOnce(WorkerLease) + Send>;

pub type RegistrationCallback = Box<dyn FnOnce(NodeResult<()>) + Send>;

/// One request for a worker lease. Immutable once created.
pub struct PopWorkerRequest {
    pub language: Language,
    pub worker_type: WorkerType,
    pub job_id: JobId,
    pub root_detached_actor_id: Option<ActorId>,
    pub gpu: Option<bool>,
    pub actor_worker: Option<bool>,
    pub runtime_env: RuntimeEnvInfo,
    pub runtime_env_hash: RuntimeEnvHash,
    pub dynamic_options: Vec<String>,
    /// A minimum duration during which the launched worker is exempt from
    /// idle reclamation, measured from the launch.
    pub keep_alive: Option<Duration>,
    pub callback: PopWorkerCallback,
}

/// A request to warm up workers for an anticipated batch of tasks.
pub struct PrestartRequest {
    pub language: Language,
    pub job_id: JobId,
    pub runtime_env: RuntimeEnvInfo,
    pub num_needed: usize,
}
