use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tonic::transport::Channel;
use tracing::{debug, instrument};

use super::{GrpcNetworkServerClient, NetworkServerClient, NetworkServerPool};
use crate::domain::{DomainError, DomainResult};

/// Caches one lazily connected client per network-server address.
pub struct GrpcNetworkServerPool {
    connect_timeout: Duration,
    clients: RwLock<HashMap<String, Arc<dyn NetworkServerClient>>>,
}

impl GrpcNetworkServerPool {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            clients: RwLock::new(HashMap::new()),
        }
    }

    fn endpoint_uri(server: &str) -> String {
        if server.contains("://") {
            server.to_string()
        } else {
            format!("http://{}", server)
        }
    }
}

impl NetworkServerPool for GrpcNetworkServerPool {
    #[instrument(skip(self))]
    fn get(&self, server: &str) -> DomainResult<Arc<dyn NetworkServerClient>> {
        {
            let clients = self
                .clients
                .read()
                .map_err(|_| DomainError::NetworkServerError("client pool poisoned".to_string()))?;
            if let Some(client) = clients.get(server) {
                return Ok(client.clone());
            }
        }

        let channel = Channel::from_shared(Self::endpoint_uri(server))
            .map_err(|e| {
                DomainError::NetworkServerError(format!("invalid server address {}: {}", server, e))
            })?
            .connect_timeout(self.connect_timeout)
            .connect_lazy();

        let mut clients = self
            .clients
            .write()
            .map_err(|_| DomainError::NetworkServerError("client pool poisoned".to_string()))?;
        let client = clients
            .entry(server.to_string())
            .or_insert_with(|| Arc::new(GrpcNetworkServerClient::new(server, channel)))
            .clone();

        debug!(server = %server, "network server client created");
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_uri() {
        assert_eq!(
            GrpcNetworkServerPool::endpoint_uri("ns.local:8000"),
            "http://ns.local:8000"
        );
        assert_eq!(
            GrpcNetworkServerPool::endpoint_uri("https://ns.example.com"),
            "https://ns.example.com"
        );
    }

    #[tokio::test]
    async fn test_get_reuses_client() {
        let pool = GrpcNetworkServerPool::new(Duration::from_secs(1));
        let a = pool.get("127.0.0.1:8000").unwrap();
        let b = pool.get("127.0.0.1:8000").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = pool.get("127.0.0.1:8001").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_get_rejects_bad_address() {
        let pool = GrpcNetworkServerPool::new(Duration::from_secs(1));
        assert!(matches!(
            pool.get("not a uri"),
            Err(DomainError::NetworkServerError(_))
        ));
    }
}
