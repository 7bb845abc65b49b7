use crate::error::NodeResult;
use crate::id::{JobId, RequestId, WorkerId};
use crate::job::JobConfig;
use crate::request::{IoWorkerCallback, PopWorkerRequest, PrestartRequest, RegistrationCallback};
use crate::worker::{DriverRegistration, ExitReply, WorkerExitType, WorkerRegistration};

pub enum NodeEvent {
    PopWorker {
        request: PopWorkerRequest,
    },
    PushWorker {
        worker_id: WorkerId,
    },
    RegisterWorker {
        registration: WorkerRegistration,
        callback: RegistrationCallback,
    },
    RegisterDriver {
        registration: DriverRegistration,
        job_config: JobConfig,
        callback: RegistrationCallback,
    },
    AnnounceWorkerPort {
        worker_id: WorkerId,
        port: u16,
    },
    DisconnectWorker {
        worker_id: WorkerId,
        exit_type: WorkerExitType,
    },
    JobStarted {
        job_id: JobId,
        config: JobConfig,
    },
    JobFinished {
        job_id: JobId,
    },
    PrestartWorkers {
        request: PrestartRequest,
    },
    PopSpillWorker {
        callback: IoWorkerCallback,
    },
    PopRestoreWorker {
        callback: IoWorkerCallback,
    },
    PopDeleteWorker {
        callback: IoWorkerCallback,
    },
    PushSpillWorker {
        worker_id: WorkerId,
    },
    PushRestoreWorker {
        worker_id: WorkerId,
    },
    PushDeleteWorker {
        worker_id: WorkerId,
    },
    /// The resource tracker reports a new soft limit for idle workers.
    UpdateAvailableCpus {
        num_cpus: usize,
    },
    /// The periodic reclamation tick.
    KillIdleWorkers,
    /// A runtime environment creation for a worker launch completed.
    RuntimeEnvCreated {
        request_id: RequestId,
        result: Result<String, String>,
    },
    /// An eager runtime environment install for a job completed.
    JobRuntimeEnvPrepared {
        job_id: JobId,
        result: Result<String, String>,
    },
    /// A pop worker request waited too long for its worker to register.
    RegistrationTimeout {
        request_id: RequestId,
    },
    /// An `Exit` request issued to a worker got a reply.
    WorkerExitReplied {
        worker_id: WorkerId,
        reply: NodeResult<ExitReply>,
    },
    Shutdown,
}
