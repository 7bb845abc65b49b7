use std::collections::HashMap;

use crate::id::JobId;
use crate::runtime_env::RuntimeEnvInfo;

#[derive(Debug, Clone, Default)]
pub struct JobConfig {
    pub code_search_path: Vec<String>,
    pub jvm_options: Vec<String>,
    pub runtime_env: RuntimeEnvInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    /// Terminal. A job id never transitions back to running.
    Finished,
}

pub(crate) struct JobRecord {
    pub config: JobConfig,
    pub state: JobState,
    /// Whether the job took a runtime environment reference at start time
    /// (eager install) that must be released when it finishes.
    pub holds_eager_env_ref: bool,
}

/// The local view of job lifecycles, fed by the cluster metadata service
/// and by driver registrations.
#[derive(Default)]
pub(crate) struct JobTable {
    jobs: HashMap<JobId, JobRecord>,
}

impl JobTable {
    /// Records a job if it is not known yet. Returns false if the job was
    /// already present (its existing config is kept).
    pub fn insert(&mut self, job_id: JobId, config: JobConfig) -> bool {
        if self.jobs.contains_key(&job_id) {
            return false;
        }
        self.jobs.insert(
            job_id,
            JobRecord {
                config,
                state: JobState::Running,
                holds_eager_env_ref: false,
            },
        );
        true
    }

    pub fn get_mut(&mut self, job_id: JobId) -> Option<&mut JobRecord> {
        self.jobs.get_mut(&job_id)
    }

    pub fn config(&self, job_id: JobId) -> Option<&JobConfig> {
        self.jobs.get(&job_id).map(|record| &record.config)
    }

    pub fn state(&self, job_id: JobId) -> Option<JobState> {
        self.jobs.get(&job_id).map(|record| record.state)
    }

    pub fn is_finished(&self, job_id: JobId) -> bool {
        self.state(job_id) == Some(JobState::Finished)
    }

    /// Marks a running job as finished and returns its record.
    /// Returns None if the job is unknown or already finished.
    pub fn finish(&mut self, job_id: JobId) -> Option<&mut JobRecord> {
        let record = self.jobs.get_mut(&job_id)?;
        if record.state == JobState::Finished {
            return None;
        }
        record.state = JobState::Finished;
        Some(record)
    }
}
