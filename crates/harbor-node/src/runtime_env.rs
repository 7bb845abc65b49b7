use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::id::JobId;

/// A 32-bit digest of a serialized runtime environment descriptor.
/// Workers launched under different descriptors never serve each other's
/// requests, so the hash partitions the worker cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RuntimeEnvHash(u32);

impl RuntimeEnvHash {
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for RuntimeEnvHash {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for RuntimeEnvHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn calculate_runtime_env_hash(serialized_runtime_env: &str) -> RuntimeEnvHash {
    if is_runtime_env_empty(serialized_runtime_env) {
        return RuntimeEnvHash::default();
    }
    let mut hasher = DefaultHasher::new();
    serialized_runtime_env.hash(&mut hasher);
    RuntimeEnvHash(hasher.finish() as u32)
}

pub fn is_runtime_env_empty(serialized_runtime_env: &str) -> bool {
    serialized_runtime_env.is_empty() || serialized_runtime_env == "{}"
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeEnvConfig {
    /// Whether the environment should be materialised when the job starts,
    /// before any worker needs it.
    pub eager_install: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeEnvInfo {
    pub serialized_runtime_env: String,
    pub uris: Vec<String>,
    pub config: RuntimeEnvConfig,
}

impl RuntimeEnvInfo {
    pub fn from_serialized(serialized_runtime_env: impl Into<String>) -> Self {
        Self {
            serialized_runtime_env: serialized_runtime_env.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        is_runtime_env_empty(&self.serialized_runtime_env)
    }

    pub fn hash(&self) -> RuntimeEnvHash {
        calculate_runtime_env_hash(&self.serialized_runtime_env)
    }
}

pub type GetOrCreateRuntimeEnvCallback = Box<dyn FnOnce(Result<String, String>) + Send>;
pub type DeleteRuntimeEnvCallback = Box<dyn FnOnce(bool) + Send>;

/// The client for the external service that materialises and releases
/// runtime environments. Both operations are asynchronous and invoke their
/// continuation exactly once.
pub trait RuntimeEnvClient: Send + Sync {
    /// Materialise the environment described by `serialized_runtime_env`
    /// and take a reference on it. Idempotent per descriptor. The
    /// continuation receives the serialized environment context on
    /// success, or an error message on failure.
    fn get_or_create_runtime_env(
        &self,
        job_id: JobId,
        serialized_runtime_env: &str,
        config: &RuntimeEnvConfig,
        callback: GetOrCreateRuntimeEnvCallback,
    );

    /// Drop one reference on the environment. The service decides whether
    /// the environment can actually be deleted.
    fn delete_runtime_env_if_possible(
        &self,
        serialized_runtime_env: &str,
        callback: DeleteRuntimeEnvCallback,
    );
}

/// The pool-side view of runtime environment references. One reference is
/// held per referring worker process plus one per eagerly-installed job.
/// The count mirrors the references the pool has taken on the external
/// service, so it must never go negative.
#[derive(Debug, Default)]
pub(crate) struct RuntimeEnvRefTable {
    counts: HashMap<String, u32>,
}

impl RuntimeEnvRefTable {
    pub fn add(&mut self, serialized_runtime_env: &str) {
        *self
            .counts
            .entry(serialized_runtime_env.to_string())
            .or_insert(0) += 1;
    }

    /// Drops one reference and reports whether the count reached zero.
    pub fn remove(&mut self, serialized_runtime_env: &str) -> bool {
        let Some(count) = self.counts.get_mut(serialized_runtime_env) else {
            panic!("runtime environment reference count went negative: {serialized_runtime_env}");
        };
        *count -= 1;
        if *count == 0 {
            self.counts.remove(serialized_runtime_env);
            true
        } else {
            false
        }
    }

    pub fn count(&self, serialized_runtime_env: &str) -> u32 {
        self.counts
            .get(serialized_runtime_env)
            .copied()
            .unwrap_or(0)
    }

    pub fn counts(&self) -> &HashMap<String, u32> {
        &self.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_env_hash_is_stable() {
        let a = calculate_runtime_env_hash(r#"{"env_vars": {"FOO": "bar"}}"#);
        let b = calculate_runtime_env_hash(r#"{"env_vars": {"FOO": "bar"}}"#);
        assert_eq!(a, b);
    }

    #[test]
    fn test_runtime_env_hash_distinguishes_descriptors() {
        let a = calculate_runtime_env_hash("mock_runtime_env_1");
        let b = calculate_runtime_env_hash("mock_runtime_env_2");
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_runtime_env_hash_is_zero() {
        assert_eq!(calculate_runtime_env_hash(""), RuntimeEnvHash::default());
        assert_eq!(calculate_runtime_env_hash("{}"), RuntimeEnvHash::default());
    }

    #[test]
    fn test_reference_table_counts() {
        let mut table = RuntimeEnvRefTable::default();
        table.add("a");
        table.add("a");
        table.add("b");
        assert_eq!(table.count("a"), 2);
        assert_eq!(table.count("b"), 1);
        assert!(!table.remove("a"));
        assert!(table.remove("b"));
        assert!(table.remove("a"));
        assert_eq!(table.count("a"), 0);
    }

    #[test]
    #[should_panic(expected = "reference count went negative")]
    fn test_reference_table_rejects_negative_counts() {
        let mut table = RuntimeEnvRefTable::default();
        table.remove("missing");
    }
}
