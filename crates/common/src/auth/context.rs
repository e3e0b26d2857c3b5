use tonic::{Request, Status};

use super::traits::AuthTokenProvider;
use crate::grpc::domain_error_to_status;

/// Authenticated caller of a gRPC request
#[derive(Debug, Clone, Copy)]
pub struct UserContext {
    pub user_id: i64,
}

/// Reads the `authorization: Bearer <token>` metadata and validates the token.
pub fn extract_user_context<T>(
    request: &Request<T>,
    auth_token_provider: &dyn AuthTokenProvider,
) -> Result<UserContext, Status> {
    let auth_header = request
        .metadata()
        .get("authorization")
        .ok_or_else(|| Status::unauthenticated("Missing authorization header"))?
        .to_str()
        .map_err(|_| Status::unauthenticated("Invalid authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .ok_or_else(|| {
            Status::unauthenticated("Invalid authorization format, expected 'Bearer <token>'")
        })?;

    let user_id = auth_token_provider
        .validate_token(token)
        .map_err(domain_error_to_status)?;

    Ok(UserContext { user_id })
}
