use std::fmt;

use async_trait::async_trait;
use lorawan::Eui64;
use uuid::Uuid;

use crate::domain::{DomainError, DomainResult};

/// Validates API access tokens.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait AuthTokenProvider: Send + Sync {
    /// Issue an access token for a user
    fn generate_token(&self, user_id: i64, username: &str) -> DomainResult<String>;

    /// Validate an access token and return the user ID it was issued for
    fn validate_token(&self, token: &str) -> DomainResult<i64>;
}

/// What the caller wants to do with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    List,
}

/// A resource an operation is checked against. Access is granted through
/// the organization that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Device(Eui64),
    MulticastGroup(Uuid),
    FuotaDeployment(Uuid),
    Application(i64),
    /// Unscoped listings. Only global admins pass.
    Global,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Device(dev_eui) => write!(f, "device {}", dev_eui),
            Resource::MulticastGroup(id) => write!(f, "multicast group {}", id),
            Resource::FuotaDeployment(id) => write!(f, "fuota deployment {}", id),
            Resource::Application(id) => write!(f, "application {}", id),
            Resource::Global => write!(f, "all resources"),
        }
    }
}

/// Decides whether a user may perform an operation on a resource.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AccessValidator: Send + Sync {
    async fn validate(
        &self,
        user_id: i64,
        operation: Operation,
        resource: Resource,
    ) -> DomainResult<bool>;
}

/// Like [`AccessValidator::validate`], but denial is an error.
pub async fn require_access(
    validator: &dyn AccessValidator,
    user_id: i64,
    operation: Operation,
    resource: Resource,
) -> DomainResult<()> {
    if validator.validate(user_id, operation, resource).await? {
        Ok(())
    } else {
        Err(DomainError::PermissionDenied(format!(
            "user {} may not {:?} {}",
            user_id, operation, resource
        )))
    }
}
