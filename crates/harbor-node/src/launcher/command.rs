use crate::id::{NodeId, StartupToken};
use crate::job::JobConfig;
use crate::runtime_env::RuntimeEnvHash;
use crate::worker::{Language, WorkerType};

/// The marker in a JVM worker command template that is replaced with the
/// per-job and per-process options.
pub const WORKER_DYNAMIC_OPTION_PLACEHOLDER: &str = "WORKER_DYNAMIC_OPTION_PLACEHOLDER";

pub(crate) struct WorkerCommandContext<'a> {
    pub node_id: NodeId,
    pub language: Language,
    pub worker_type: WorkerType,
    pub startup_token: StartupToken,
    pub runtime_env_hash: RuntimeEnvHash,
    pub dynamic_options: &'a [String],
    pub job_config: Option<&'a JobConfig>,
    pub object_spilling_config: &'a str,
}

/// Builds the argv for one worker process from the configured template.
///
/// For JVM workers the option order is part of the launch contract and
/// must not change: per-job system options, per-job user options, per-
/// process system options, per-process user options, then the entry class
/// from the template, with the language tag trailing.
pub(crate) fn build_worker_command(
    template: &[String],
    context: &WorkerCommandContext<'_>,
) -> Vec<String> {
    let mut command = Vec::with_capacity(template.len() + context.dynamic_options.len() + 4);
    match context.language {
        Language::Java => {
            for arg in template {
                if arg == WORKER_DYNAMIC_OPTION_PLACEHOLDER {
                    if let Some(job_config) = context.job_config {
                        if !job_config.code_search_path.is_empty() {
                            command.push(format!(
                                "-Dray.job.code-search-path={}",
                                job_config.code_search_path.join(":")
                            ));
                        }
                        command.extend(job_config.jvm_options.iter().cloned());
                    }
                    command.push(format!(
                        "-Dray.raylet.startup-token={}",
                        context.startup_token
                    ));
                    command.push(format!(
                        "-Dray.internal.runtime-env-hash={}",
                        context.runtime_env_hash
                    ));
                    command.extend(context.dynamic_options.iter().cloned());
                } else {
                    command.push(arg.clone());
                }
            }
            command.push(format!("--language={}", context.language.name()));
        }
        Language::Python => {
            command.extend(template.iter().cloned());
            command.push(format!("--node-id={}", context.node_id));
            command.push(format!("--startup-token={}", context.startup_token));
            command.push(format!("--runtime-env-hash={}", context.runtime_env_hash));
            command.extend(context.dynamic_options.iter().cloned());
        }
    }
    if context.worker_type.is_io_worker() && !context.object_spilling_config.is_empty() {
        command.push(format!(
            "--object-spilling-config={}",
            context.object_spilling_config
        ));
    }
    command
}
