use async_trait::async_trait;
use lorawan::Eui64;
use payload_codec::Codec;
use uuid::Uuid;

use crate::domain::result::DomainResult;

#[derive(Debug, Clone, PartialEq)]
pub struct Application {
    pub id: i64,
    pub name: String,
    pub organization_id: i64,
    pub service_profile_id: Uuid,
    pub codec: Codec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProfile {
    pub id: Uuid,
    pub name: String,
    pub organization_id: i64,
    pub network_server_id: i64,
    pub codec: Codec,
}

impl DeviceProfile {
    /// The profile codec, falling back to the application codec when unset.
    pub fn resolve_codec(&self, application: &Application) -> Codec {
        self.codec.clone().or(application.codec.clone())
    }
}

/// A network server, reachable over gRPC at `server`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkServer {
    pub id: i64,
    pub name: String,
    pub server: String,
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn get_application(&self, id: i64) -> DomainResult<Option<Application>>;

    async fn get_device_profile(&self, id: Uuid) -> DomainResult<Option<DeviceProfile>>;
}

/// Resolves the network server that owns an entity, through
/// application and service profile.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait NetworkServerRepository: Send + Sync {
    async fn get_network_server_for_dev_eui(
        &self,
        dev_eui: Eui64,
    ) -> DomainResult<Option<NetworkServer>>;

    async fn get_network_server_for_service_profile(
        &self,
        service_profile_id: Uuid,
    ) -> DomainResult<Option<NetworkServer>>;
}
