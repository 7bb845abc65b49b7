use std::sync::Arc;

use tokio::time::Instant;

use crate::error::NodeResult;
use crate::id::{ActorId, ConnectionId, JobId, StartupToken, WorkerId};
use crate::launcher::ProcessHandle;
use crate::runtime_env::RuntimeEnvHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    Java,
}

impl Language {
    /// The language tag passed on worker command lines.
    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "PYTHON",
            Language::Java => "JAVA",
        }
    }

    /// The key used for this language in configuration files.
    pub fn config_key(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Java => "java",
        }
    }

    pub fn from_config_key(key: &str) -> Option<Self> {
        match key {
            "python" => Some(Language::Python),
            "java" => Some(Language::Java),
            _ => None,
        }
    }

    pub const ALL: [Language; 2] = [Language::Python, Language::Java];

    /// Whether the first driver of this language must wait for a warm
    /// worker before its registration is acknowledged. JVM-style runtimes
    /// execute tasks in the driver process eagerly and are acknowledged
    /// right away.
    pub(crate) fn defers_first_driver_ack(&self) -> bool {
        matches!(self, Language::Python)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerType {
    Worker,
    SpillWorker,
    RestoreWorker,
    DeleteWorker,
    Driver,
}

impl WorkerType {
    pub fn is_io_worker(&self) -> bool {
        matches!(
            self,
            WorkerType::SpillWorker | WorkerType::RestoreWorker | WorkerType::DeleteWorker
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExitType {
    IntendedUserExit,
    IntendedSystemExit,
    UserError,
    SystemError,
}

/// The lifecycle of a registered worker. The phases before registration
/// (process spawned, awaiting the register call) are tracked in the
/// per-language starting-process table rather than on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerLifecycle {
    /// Registered, but the worker has not announced its port yet.
    PendingAnnounce,
    Idle,
    Leased,
    /// An `Exit` request is in flight. The worker cannot be leased and a
    /// second `Exit` must not be issued until the reply arrives.
    PendingExit,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitRequest {
    pub force_exit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReply {
    /// Whether the worker agreed to exit. A worker typically refuses when
    /// it still owns objects that other tasks depend on.
    pub success: bool,
}

pub type ExitCallback = Box<dyn FnOnce(NodeResult<ExitReply>) + Send>;

/// The client used to issue requests to a worker process. The continuation
/// is invoked exactly once, from outside the pool event loop; it should
/// capture only ids and re-enter the loop with a message.
pub trait WorkerClient: Send + Sync {
    fn exit(&self, request: ExitRequest, callback: ExitCallback);
}

/// The in-memory record of one live worker process. Records are owned by
/// the pool and keyed by worker id; everything else holds ids only.
pub struct WorkerRecord {
    pub worker_id: WorkerId,
    pub language: Language,
    pub worker_type: WorkerType,
    /// Set on launch when the originating request carried a job, or on the
    /// first lease otherwise. Never changes once set.
    pub job_id: Option<JobId>,
    /// Copied from the first leased request that carried one. A worker
    /// scoped to a detached actor only serves that actor's tasks or plain
    /// tasks of the same job.
    pub root_detached_actor_id: Option<ActorId>,
    pub runtime_env_hash: RuntimeEnvHash,
    pub serialized_runtime_env: String,
    pub dynamic_options: Vec<String>,
    pub gpu: Option<bool>,
    pub actor_worker: Option<bool>,
    pub startup_token: StartupToken,
    pub process: ProcessHandle,
    pub connection: ConnectionId,
    pub client: Arc<dyn WorkerClient>,
    pub state: WorkerLifecycle,
    pub port: Option<u16>,
    pub last_idle_time: Option<Instant>,
    /// Workers launched with a keep-alive duration are exempt from
    /// soft-limit reclamation until this deadline.
    pub keep_alive_deadline: Option<Instant>,
}

/// The payload of a worker's register call.
pub struct WorkerRegistration {
    pub worker_id: WorkerId,
    pub connection: ConnectionId,
    pub pid: u32,
    pub startup_token: StartupToken,
    pub language: Language,
    pub worker_type: WorkerType,
    pub runtime_env_hash: RuntimeEnvHash,
    pub client: Arc<dyn WorkerClient>,
}

pub struct DriverRegistration {
    pub worker_id: WorkerId,
    pub pid: u32,
    pub language: Language,
    pub job_id: JobId,
}

pub(crate) struct DriverRecord {
    pub worker_id: WorkerId,
    pub language: Language,
    pub job_id: JobId,
}
