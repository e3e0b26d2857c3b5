use tonic::Status;

use crate::domain::DomainError;

/// Convert domain error to gRPC Status
pub fn domain_error_to_status(error: DomainError) -> Status {
    match error {
        DomainError::DeviceNotFound(msg)
        | DomainError::ApplicationNotFound(msg)
        | DomainError::DeviceProfileNotFound(msg)
        | DomainError::NetworkServerNotFound(msg)
        | DomainError::MulticastGroupNotFound(msg)
        | DomainError::DeploymentNotFound(msg)
        | DomainError::DeploymentDeviceNotFound(msg)
        | DomainError::RemoteSessionNotFound(msg) => Status::not_found(msg),

        DomainError::AlreadyExists(msg) => Status::already_exists(msg),

        DomainError::InvalidArgument(msg) => Status::invalid_argument(msg),

        DomainError::Lorawan(err) => Status::invalid_argument(err.to_string()),

        DomainError::Codec(err) => Status::invalid_argument(format!("Codec error: {}", err)),

        DomainError::FailedPrecondition(msg) => Status::failed_precondition(msg),

        DomainError::NetworkServerError(msg) => {
            Status::internal(format!("Network server error: {}", msg))
        }

        DomainError::InvalidToken(msg) => {
            Status::unauthenticated(format!("Invalid token: {}", msg))
        }

        DomainError::PermissionDenied(msg) => Status::permission_denied(msg),

        DomainError::RepositoryError(err) => Status::internal(format!("Internal error: {}", err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_not_found_variants() {
        let errors = [
            DomainError::DeviceNotFound("0102".to_string()),
            DomainError::ApplicationNotFound("7".to_string()),
            DomainError::DeviceProfileNotFound("dp".to_string()),
            DomainError::NetworkServerNotFound("ns".to_string()),
            DomainError::MulticastGroupNotFound("mg".to_string()),
            DomainError::DeploymentNotFound("d".to_string()),
            DomainError::DeploymentDeviceNotFound("x".to_string()),
            DomainError::RemoteSessionNotFound("r".to_string()),
        ];
        for error in errors {
            let status = domain_error_to_status(error);
            assert_eq!(status.code(), Code::NotFound);
        }
    }

    #[test]
    fn test_failed_precondition() {
        let status = domain_error_to_status(DomainError::FailedPrecondition(
            "frame counter exhausted".to_string(),
        ));
        assert_eq!(status.code(), Code::FailedPrecondition);
        assert_eq!(status.message(), "frame counter exhausted");
    }

    #[test]
    fn test_internal_errors_hide_nothing_but_code() {
        let status =
            domain_error_to_status(DomainError::RepositoryError(anyhow::anyhow!("db down")));
        assert_eq!(status.code(), Code::Internal);

        let status =
            domain_error_to_status(DomainError::NetworkServerError("unavailable".to_string()));
        assert_eq!(status.code(), Code::Internal);
    }

    #[test]
    fn test_auth_errors() {
        assert_eq!(
            domain_error_to_status(DomainError::InvalidToken("expired".to_string())).code(),
            Code::Unauthenticated
        );
        assert_eq!(
            domain_error_to_status(DomainError::PermissionDenied("no".to_string())).code(),
            Code::PermissionDenied
        );
    }
}
