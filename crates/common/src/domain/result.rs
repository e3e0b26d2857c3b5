use lorawan::LorawanError;
use payload_codec::CodecError;
use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Application not found: {0}")]
    ApplicationNotFound(String),

    #[error("Device profile not found: {0}")]
    DeviceProfileNotFound(String),

    #[error("Network server not found: {0}")]
    NetworkServerNotFound(String),

    #[error("Multicast group not found: {0}")]
    MulticastGroupNotFound(String),

    #[error("FUOTA deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("FUOTA deployment device not found: {0}")]
    DeploymentDeviceNotFound(String),

    #[error("Remote session not found: {0}")]
    RemoteSessionNotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    #[error(transparent)]
    Lorawan(#[from] LorawanError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network server error: {0}")]
    NetworkServerError(String),

    #[error("Invalid or expired token: {0}")]
    InvalidToken(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}
