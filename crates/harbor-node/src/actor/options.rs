use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use harbor_common::config::AppConfig;

use crate::error::{NodeError, NodeResult};
use crate::id::NodeId;
use crate::launcher::ProcessLauncher;
use crate::runtime_env::RuntimeEnvClient;
use crate::worker::Language;

pub struct NodeOptions {
    pub node_id: NodeId,
    pub maximum_startup_concurrency: usize,
    pub num_available_cpus: usize,
    pub worker_register_timeout: Duration,
    pub idle_worker_grace_period: Duration,
    pub kill_idle_workers_interval: Duration,
    pub max_io_workers: usize,
    pub enable_worker_prestart: bool,
    pub object_spilling_config: String,
    pub worker_commands: HashMap<Language, Vec<String>>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub runtime_env_client: Arc<dyn RuntimeEnvClient>,
}

impl NodeOptions {
    pub fn new(
        config: &AppConfig,
        node_id: NodeId,
        launcher: Arc<dyn ProcessLauncher>,
        runtime_env_client: Arc<dyn RuntimeEnvClient>,
    ) -> NodeResult<Self> {
        let mut worker_commands = HashMap::new();
        for (key, command) in &config.worker_commands {
            let Some(language) = Language::from_config_key(key) else {
                return Err(NodeError::invalid(format!(
                    "unknown language in worker command configuration: {key}"
                )));
            };
            worker_commands.insert(language, command.clone());
        }
        let num_available_cpus = if config.num_available_cpus > 0 {
            config.num_available_cpus
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };
        Ok(Self {
            node_id,
            maximum_startup_concurrency: config.maximum_startup_concurrency,
            num_available_cpus,
            worker_register_timeout: Duration::from_secs(config.worker_register_timeout_seconds),
            idle_worker_grace_period: Duration::from_millis(
                config.idle_worker_killing_time_threshold_ms,
            ),
            kill_idle_workers_interval: Duration::from_millis(config.kill_idle_workers_interval_ms),
            max_io_workers: config.max_io_workers,
            enable_worker_prestart: config.enable_worker_prestart,
            object_spilling_config: config.object_spilling_config.clone(),
            worker_commands,
            launcher,
            runtime_env_client,
        })
    }
}
