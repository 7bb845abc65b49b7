use std::collections::HashMap;

use figment::providers::{Env, Format, Json, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// The node-level application configuration.
///
/// The keys are flat so that they can be overridden one by one via
/// environment variables or a JSON snippet, which is how embedders
/// (and the test harness) tune individual options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// How long a launched worker process may take to register itself
    /// before the pop request that is waiting for it is failed.
    pub worker_register_timeout_seconds: u64,
    /// An opaque blob forwarded to I/O workers on their command line.
    pub object_spilling_config: String,
    /// The cap on each of the spill and restore worker sub-pools.
    pub max_io_workers: usize,
    /// The period of the idle reclamation timer. Zero disables the timer;
    /// reclamation then only runs on job-finished edges or on demand.
    pub kill_idle_workers_interval_ms: u64,
    /// How long a worker must have been idle before it can be reclaimed
    /// to satisfy the soft limit.
    pub idle_worker_killing_time_threshold_ms: u64,
    pub enable_worker_prestart: bool,
    /// The cap on worker processes that may be starting concurrently,
    /// per language.
    pub maximum_startup_concurrency: usize,
    /// The soft limit on idle workers. Zero means "detect at startup".
    pub num_available_cpus: usize,
    /// Worker command templates keyed by language name.
    pub worker_commands: HashMap<String, Vec<String>>,
    pub maximum_gcs_destroyed_actor_cached_count: usize,
    pub maximum_gcs_dead_node_cached_count: usize,
    pub gcs_storage: MetadataStorage,
    pub enable_cluster_auth: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataStorage {
    Memory,
    Redis,
}

impl AppConfig {
    pub fn load() -> CommonResult<Self> {
        Self::figment().extract().map_err(Self::invalid)
    }

    /// Loads the configuration with a JSON snippet taking precedence over
    /// both the defaults and the environment.
    pub fn load_with_overrides(overrides: &str) -> CommonResult<Self> {
        Self::figment()
            .merge(Json::string(overrides))
            .extract()
            .map_err(Self::invalid)
    }

    fn figment() -> Figment {
        Figment::from(Toml::string(DEFAULT_CONFIG)).merge(Env::prefixed("HARBOR_"))
    }

    fn invalid(e: figment::Error) -> CommonError {
        CommonError::invalid(e.to_string())
    }
}
