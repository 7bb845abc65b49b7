use std::collections::HashMap;

use crate::id::{JobId, WorkerId};
use crate::pool::WorkerPool;
use crate::worker::{Language, WorkerLifecycle, WorkerType};

/// A read-only view of one worker, for node-level introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub worker_id: WorkerId,
    pub language: Language,
    pub worker_type: WorkerType,
    pub state: WorkerLifecycle,
    pub job_id: Option<JobId>,
    pub port: Option<u16>,
}

impl WorkerPool {
    pub fn observe_worker_snapshots(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .values()
            .map(|worker| WorkerSnapshot {
                worker_id: worker.worker_id,
                language: worker.language,
                worker_type: worker.worker_type,
                state: worker.state,
                job_id: worker.job_id,
                port: worker.port,
            })
            .collect()
    }

    pub fn observe_runtime_env_references(&self) -> HashMap<String, u32> {
        self.runtime_env_refs.counts().clone()
    }

    /// The number of worker processes that have been spawned but have not
    /// announced their port yet, across all languages.
    pub fn num_workers_starting(&self) -> usize {
        self.states_by_language
            .values()
            .map(|state| state.starting.len())
            .sum()
    }

    /// The number of pop requests waiting for a startup slot.
    pub fn num_pending_start_requests(&self) -> usize {
        self.states_by_language
            .values()
            .map(|state| state.pending_start_requests.len())
            .sum()
    }

    /// The number of pop requests whose worker launch is in flight.
    pub fn num_pending_registration_requests(&self) -> usize {
        self.states_by_language
            .values()
            .map(|state| state.pending_registration_requests.len())
            .sum()
    }

    pub fn num_idle_workers(&self) -> usize {
        self.states_by_language
            .values()
            .map(|state| state.idle.len())
            .sum()
    }

    /// Idle workers of one language in eviction order (oldest first).
    pub fn idle_workers(&self, language: Language) -> Vec<WorkerId> {
        self.states_by_language
            .get(&language)
            .map(|state| state.idle.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Workers with an outstanding `Exit` request.
    pub fn num_pending_exit_workers(&self) -> usize {
        self.workers
            .values()
            .filter(|worker| worker.state == WorkerLifecycle::PendingExit)
            .count()
    }

    pub fn num_registered_workers(&self) -> usize {
        self.workers.len()
    }
}
