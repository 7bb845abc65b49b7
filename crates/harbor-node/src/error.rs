use harbor_common::error::CommonError;
use thiserror::Error;

pub type NodeResult<T> = Result<T, NodeError>;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error("configuration error: {0}")]
    ConfigError(#[from] CommonError),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("the worker connection is lost: {0}")]
    ConnectionLost(String),
}

impl NodeError {
    pub fn invalid(message: impl Into<String>) -> Self {
        NodeError::InvalidArgument(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        NodeError::InternalError(message.into())
    }
}

/// The outcome reported to a pop worker continuation when no worker could
/// be leased for the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PopWorkerError {
    #[error("the job config is missing")]
    JobConfigMissing,
    #[error("the job has finished")]
    JobFinished,
    #[error("failed to create the runtime environment: {0}")]
    RuntimeEnvCreationFailed(String),
    #[error("the worker process is still pending registration")]
    WorkerPendingRegistration,
    #[error("too many worker processes are starting")]
    TooManyStartingWorkerProcesses,
}
