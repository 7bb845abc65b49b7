mod core;
mod observer;
mod options;
mod state;

use std::collections::HashMap;
use std::sync::Arc;

pub use observer::WorkerSnapshot;
pub use options::WorkerPoolOptions;

use crate::id::{ConnectionId, IdGenerator, RequestId, WorkerId};
use crate::job::JobTable;
use crate::launcher::ProcessLauncher;
use crate::pool::state::{LanguagePoolState, PendingEnvCreation};
use crate::runtime_env::{RuntimeEnvClient, RuntimeEnvRefTable};
use crate::worker::{DriverRecord, Language, WorkerRecord};

/// The node-local pool of worker processes. It owns the lifecycle of every
/// worker on the node, matches pop requests to compatible idle workers,
/// and enforces the startup concurrency budget, the idle soft limit, and
/// runtime environment reference counting.
///
/// All methods must be called from the node actor's event loop; the pool
/// performs no locking of its own.
pub struct WorkerPool {
    options: WorkerPoolOptions,
    launcher: Arc<dyn ProcessLauncher>,
    runtime_env_client: Arc<dyn RuntimeEnvClient>,
    states_by_language: HashMap<Language, LanguagePoolState>,
    /// All registered workers, keyed by worker id. Everything else in the
    /// pool refers to workers by id and resolves through this map.
    workers: HashMap<WorkerId, WorkerRecord>,
    registered_by_connection: HashMap<ConnectionId, WorkerId>,
    drivers: HashMap<WorkerId, DriverRecord>,
    jobs: JobTable,
    runtime_env_refs: RuntimeEnvRefTable,
    pending_env_creations: HashMap<RequestId, PendingEnvCreation>,
    request_id_generator: IdGenerator<RequestId>,
    next_startup_token: u64,
    /// The soft limit on idle workers, refreshed by the resource tracker.
    num_available_cpus: usize,
}

impl WorkerPool {
    pub fn new(
        options: WorkerPoolOptions,
        launcher: Arc<dyn ProcessLauncher>,
        runtime_env_client: Arc<dyn RuntimeEnvClient>,
    ) -> Self {
        let states_by_language = Language::ALL
            .iter()
            .map(|language| (*language, LanguagePoolState::default()))
            .collect();
        let num_available_cpus = options.num_available_cpus;
        Self {
            options,
            launcher,
            runtime_env_client,
            states_by_language,
            workers: HashMap::new(),
            registered_by_connection: HashMap::new(),
            drivers: HashMap::new(),
            jobs: JobTable::default(),
            runtime_env_refs: RuntimeEnvRefTable::default(),
            pending_env_creations: HashMap::new(),
            request_id_generator: IdGenerator::new(),
            next_startup_token: 0,
            num_available_cpus,
        }
    }

    pub fn options(&self) -> &WorkerPoolOptions {
        &self.options
    }
}
