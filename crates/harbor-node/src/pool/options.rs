//! A dedicated module for worker pool options to ensure readonly access.
use std::collections::HashMap;
use std::time::Duration;

use crate::actor::NodeOptions;
use crate::id::NodeId;
use crate::worker::Language;

#[readonly::make]
pub struct WorkerPoolOptions {
    pub node_id: NodeId,
    pub maximum_startup_concurrency: usize,
    pub num_available_cpus: usize,
    pub worker_register_timeout: Duration,
    /// How long a worker must have been idle before soft-limit
    /// reclamation may evict it.
    pub idle_worker_grace_period: Duration,
    /// The period of the reclamation timer; zero disables the timer.
    pub kill_idle_workers_interval: Duration,
    pub max_io_workers: usize,
    pub enable_worker_prestart: bool,
    pub object_spilling_config: String,
    pub worker_commands: HashMap<Language, Vec<String>>,
}

impl WorkerPoolOptions {
    pub fn new(options: &NodeOptions) -> Self {
        Self {
            node_id: options.node_id,
            maximum_startup_concurrency: options.maximum_startup_concurrency,
            num_available_cpus: options.num_available_cpus,
            worker_register_timeout: options.worker_register_timeout,
            idle_worker_grace_period: options.idle_worker_grace_period,
            kill_idle_workers_interval: options.kill_idle_workers_interval,
            max_io_workers: options.max_io_workers,
            enable_worker_prestart: options.enable_worker_prestart,
            object_spilling_config: options.object_spilling_config.clone(),
            worker_commands: options.worker_commands.clone(),
        }
    }
}
