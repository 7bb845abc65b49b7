use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexSet;
use tokio::time::Instant;

use crate::id::{JobId, RequestId, StartupToken, WorkerId};
use crate::launcher::ProcessHandle;
use crate::request::{IoWorkerCallback, PopWorkerRequest, RegistrationCallback};
use crate::runtime_env::{RuntimeEnvHash, RuntimeEnvInfo};
use crate::worker::{Language, WorkerType};

/// A worker process that has been spawned but has not announced its port.
/// The entry is removed when the worker announces or disconnects.
pub(crate) struct StartingWorkerProcess {
    pub handle: ProcessHandle,
    pub worker_type: WorkerType,
    pub job_id: Option<JobId>,
    pub serialized_runtime_env: String,
    pub runtime_env_hash: RuntimeEnvHash,
    pub dynamic_options: Vec<String>,
    pub gpu: Option<bool>,
    pub actor_worker: Option<bool>,
    pub keep_alive_deadline: Option<Instant>,
}

pub(crate) struct PendingPopWorkerRequest {
    pub request_id: RequestId,
    pub request: PopWorkerRequest,
}

/// Everything the pool needs to spawn one worker process. Built from a pop
/// request, a prestart request, or an I/O sub-pool demand.
#[derive(Clone)]
pub(crate) struct WorkerSpawnSpec {
    pub language: Language,
    pub worker_type: WorkerType,
    pub job_id: Option<JobId>,
    pub runtime_env: RuntimeEnvInfo,
    pub runtime_env_hash: RuntimeEnvHash,
    pub dynamic_options: Vec<String>,
    pub gpu: Option<bool>,
    pub actor_worker: Option<bool>,
    pub keep_alive: Option<std::time::Duration>,
}

impl WorkerSpawnSpec {
    pub fn from_request(request: &PopWorkerRequest) -> Self {
        Self {
            language: request.language,
            worker_type: request.worker_type,
            job_id: Some(request.job_id),
            runtime_env: request.runtime_env.clone(),
            runtime_env_hash: request.runtime_env_hash,
            dynamic_options: request.dynamic_options.clone(),
            gpu: request.gpu,
            actor_worker: request.actor_worker,
            keep_alive: request.keep_alive,
        }
    }

    pub fn for_io_worker(language: Language, worker_type: WorkerType) -> Self {
        Self {
            language,
            worker_type,
            job_id: None,
            runtime_env: RuntimeEnvInfo::default(),
            runtime_env_hash: RuntimeEnvHash::default(),
            dynamic_options: vec![],
            gpu: None,
            actor_worker: None,
            keep_alive: None,
        }
    }
}

/// A runtime environment creation that is in flight. The entry is resolved
/// when the creation completes.
pub(crate) enum PendingEnvCreation {
    ForRequest(PendingPopWorkerRequest),
    ForSpawn(WorkerSpawnSpec),
}

impl PendingEnvCreation {
    pub fn language(&self) -> Language {
        match self {
            PendingEnvCreation::ForRequest(pending) => pending.request.language,
            PendingEnvCreation::ForSpawn(spec) => spec.language,
        }
    }
}

/// One bounded sub-pool of auxiliary I/O workers.
#[derive(Default)]
pub(crate) struct IoWorkerState {
    /// Processes spawned for this sub-pool that have not announced yet.
    pub num_starting: usize,
    /// All announced, live workers of this sub-pool, idle or leased.
    pub started: HashSet<WorkerId>,
    pub idle: Vec<WorkerId>,
    /// Callbacks waiting for a worker, served FIFO.
    pub pending_requests: VecDeque<IoWorkerCallback>,
}

pub(crate) struct LanguagePoolState {
    pub starting: HashMap<StartupToken, StartingWorkerProcess>,
    /// The number of runtime environment creations in flight for launches
    /// of this language. These reserve startup slots so that the startup
    /// concurrency cap holds across the suspension point.
    pub num_resolving: usize,
    /// Idle workers in the order they became idle (oldest first). Leases
    /// search newest-first; reclamation evicts oldest-first.
    pub idle: IndexSet<WorkerId>,
    /// Requests waiting for a startup slot.
    pub pending_start_requests: VecDeque<PendingPopWorkerRequest>,
    /// Requests whose launch is in flight, waiting for a worker to
    /// register and announce.
    pub pending_registration_requests: VecDeque<PendingPopWorkerRequest>,
    pub spill_io: IoWorkerState,
    pub restore_io: IoWorkerState,
    pub first_driver_registered: bool,
    pub first_worker_announced: bool,
    /// Registration acks of first drivers waiting for the first worker of
    /// this language to announce.
    pub deferred_driver_callbacks: Vec<RegistrationCallback>,
}

impl Default for LanguagePoolState {
    fn default() -> Self {
        Self {
            starting: HashMap::new(),
            num_resolving: 0,
            idle: IndexSet::new(),
            pending_start_requests: VecDeque::new(),
            pending_registration_requests: VecDeque::new(),
            spill_io: IoWorkerState::default(),
            restore_io: IoWorkerState::default(),
            first_driver_registered: false,
            first_worker_announced: false,
            deferred_driver_callbacks: vec![],
        }
    }
}

impl LanguagePoolState {
    /// The number of startup slots in use, including launches that are
    /// still resolving their runtime environment.
    pub fn num_startup_slots_in_use(&self) -> usize {
        self.starting.len() + self.num_resolving
    }

    pub fn io_state(&self, worker_type: WorkerType) -> &IoWorkerState {
        match worker_type {
            WorkerType::RestoreWorker => &self.restore_io,
            // Delete workers are served by the spill and restore pools.
            _ => &self.spill_io,
        }
    }

    pub fn io_state_mut(&mut self, worker_type: WorkerType) -> &mut IoWorkerState {
        match worker_type {
            WorkerType::RestoreWorker => &mut self.restore_io,
            _ => &mut self.spill_io,
        }
    }
}
