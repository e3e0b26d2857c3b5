use std::sync::Arc;

use common::domain::{
    ApplicationRepository, DeviceRepository, DomainError, DomainResult, MulticastGroup,
    MulticastGroupRepository, MulticastGroupTransaction, MulticastQueueItem,
    NetworkServerRepository,
};
use common::network_server::{NetworkServerClient, NetworkServerPool};
use lorawan::{encrypt_frm_payload, Eui64};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{delivered_before, validate_f_port};

/// A pending multicast downlink with its payload decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastQueueEntry {
    pub multicast_group_id: Uuid,
    pub f_cnt: u32,
    pub f_port: u8,
    pub data: Vec<u8>,
}

/// Multicast group queue and membership.
///
/// Every mutation holds the group row lock until the network server has
/// confirmed the mirrored change.
pub struct MulticastService {
    multicast_group_repository: Arc<dyn MulticastGroupRepository>,
    device_repository: Arc<dyn DeviceRepository>,
    application_repository: Arc<dyn ApplicationRepository>,
    network_server_repository: Arc<dyn NetworkServerRepository>,
    network_server_pool: Arc<dyn NetworkServerPool>,
}

impl MulticastService {
    pub fn new(
        multicast_group_repository: Arc<dyn MulticastGroupRepository>,
        device_repository: Arc<dyn DeviceRepository>,
        application_repository: Arc<dyn ApplicationRepository>,
        network_server_repository: Arc<dyn NetworkServerRepository>,
        network_server_pool: Arc<dyn NetworkServerPool>,
    ) -> Self {
        Self {
            multicast_group_repository,
            device_repository,
            application_repository,
            network_server_repository,
            network_server_pool,
        }
    }

    async fn network_server_for(
        &self,
        group: &MulticastGroup,
    ) -> DomainResult<Arc<dyn NetworkServerClient>> {
        let network_server = self
            .network_server_repository
            .get_network_server_for_service_profile(group.service_profile_id)
            .await?
            .ok_or_else(|| {
                DomainError::NetworkServerNotFound(format!(
                    "no network server for service profile {}",
                    group.service_profile_id
                ))
            })?;
        self.network_server_pool.get(&network_server.server)
    }

    async fn lock(&self, id: Uuid) -> DomainResult<Box<dyn MulticastGroupTransaction>> {
        self.multicast_group_repository
            .lock_multicast_group(id)
            .await?
            .ok_or_else(|| DomainError::MulticastGroupNotFound(id.to_string()))
    }

    async fn get(&self, id: Uuid) -> DomainResult<MulticastGroup> {
        self.multicast_group_repository
            .get_multicast_group(id)
            .await?
            .ok_or_else(|| DomainError::MulticastGroupNotFound(id.to_string()))
    }

    /// Drops local rows the network server has delivered. Failures are only
    /// logged; the rows are pruned on a later call.
    async fn prune_delivered(&self, id: Uuid, counter: u32, pending: &[MulticastQueueItem]) {
        let before = delivered_before(counter, pending.iter().map(|item| item.f_cnt));
        if let Err(e) = self
            .multicast_group_repository
            .delete_multicast_queue_items_before(id, before)
            .await
        {
            warn!(error = %e, before, "pruning delivered multicast queue items failed");
        }
    }

    /// Enqueues one payload. Returns the group frame counter used.
    #[instrument(skip(self, data), fields(multicast_group_id = %id))]
    pub async fn enqueue(&self, id: Uuid, f_port: u32, data: Vec<u8>) -> DomainResult<u32> {
        let f_cnts = self.enqueue_multiple(id, f_port, vec![data]).await?;
        f_cnts
            .first()
            .copied()
            .ok_or_else(|| DomainError::InvalidArgument("nothing to enqueue".to_string()))
    }

    /// Enqueues the payloads in order under a single group lock. Counters are
    /// consecutive.
    #[instrument(skip(self, payloads), fields(multicast_group_id = %id, count = payloads.len()))]
    pub async fn enqueue_multiple(
        &self,
        id: Uuid,
        f_port: u32,
        payloads: Vec<Vec<u8>>,
    ) -> DomainResult<Vec<u32>> {
        let f_port = validate_f_port(f_port)?;
        if payloads.is_empty() {
            return Err(DomainError::InvalidArgument(
                "at least one payload is required".to_string(),
            ));
        }

        let mut tx = self.lock(id).await?;
        let group = tx.group().clone();
        let network_server = self.network_server_for(&group).await?;

        let mut items = Vec::with_capacity(payloads.len());
        for data in payloads {
            let f_cnt = tx.allocate_frame_counter().await?;
            let item = MulticastQueueItem {
                multicast_group_id: group.id,
                f_port,
                frm_payload: encrypt_frm_payload(
                    &group.mc_app_s_key,
                    false,
                    group.mc_addr,
                    f_cnt,
                    &data,
                ),
                f_cnt,
            };
            tx.insert_queue_item(&item).await?;
            items.push(item);
        }

        for (accepted, item) in items.iter().enumerate() {
            if let Err(e) = network_server.enqueue_multicast_queue_item(item).await {
                // The rollback rewinds the group counter, so the items the
                // network server already holds must not survive it.
                if accepted > 0 {
                    warn!(accepted, f_cnt = item.f_cnt, error = %e, "multicast enqueue failed part way, flushing network server queue");
                    if let Err(flush_err) = network_server.flush_multicast_queue(group.id).await {
                        error!(error = %flush_err, "failed to flush partially enqueued multicast items");
                    }
                }
                return Err(e);
            }
        }
        tx.commit().await?;

        let f_cnts: Vec<u32> = items.iter().map(|item| item.f_cnt).collect();
        info!(first_f_cnt = f_cnts[0], count = f_cnts.len(), "multicast queue items enqueued");

        let counter = f_cnts.last().map_or(group.f_cnt, |f_cnt| f_cnt.saturating_add(1));
        match network_server.get_multicast_queue_items(group.id).await {
            Ok(pending) => self.prune_delivered(group.id, counter, &pending).await,
            Err(e) => warn!(error = %e, "listing network server queue for pruning failed"),
        }

        Ok(f_cnts)
    }

    #[instrument(skip(self), fields(multicast_group_id = %id))]
    pub async fn flush_queue(&self, id: Uuid) -> DomainResult<()> {
        let group = self.get(id).await?;
        let network_server = self.network_server_for(&group).await?;
        network_server.flush_multicast_queue(id).await?;

        let deleted = self
            .multicast_group_repository
            .delete_multicast_queue_items(id)
            .await?;
        info!(deleted, "multicast queue flushed");
        Ok(())
    }

    /// Pending items as reported by the network server, decrypted. Local
    /// rows the network server no longer reports are pruned.
    #[instrument(skip(self), fields(multicast_group_id = %id))]
    pub async fn list_queue(&self, id: Uuid) -> DomainResult<Vec<MulticastQueueEntry>> {
        let group = self.get(id).await?;
        let network_server = self.network_server_for(&group).await?;

        let items = network_server.get_multicast_queue_items(id).await?;
        self.prune_delivered(id, group.f_cnt, &items).await;

        let entries: Vec<MulticastQueueEntry> = items
            .into_iter()
            .map(|item| MulticastQueueEntry {
                multicast_group_id: item.multicast_group_id,
                f_cnt: item.f_cnt,
                f_port: item.f_port,
                data: encrypt_frm_payload(
                    &group.mc_app_s_key,
                    false,
                    group.mc_addr,
                    item.f_cnt,
                    &item.frm_payload,
                ),
            })
            .collect();

        debug!(count = entries.len(), "multicast queue listed");
        Ok(entries)
    }

    /// Adds a device to the group. The device's application must use the
    /// group's service profile.
    #[instrument(skip(self), fields(multicast_group_id = %id, dev_eui = %dev_eui))]
    pub async fn add_device(&self, id: Uuid, dev_eui: Eui64) -> DomainResult<()> {
        let mut tx = self.lock(id).await?;
        let group = tx.group().clone();

        let device = self
            .device_repository
            .get_device(dev_eui)
            .await?
            .ok_or_else(|| DomainError::DeviceNotFound(dev_eui.to_string()))?;
        let application = self
            .application_repository
            .get_application(device.application_id)
            .await?
            .ok_or_else(|| DomainError::ApplicationNotFound(device.application_id.to_string()))?;

        if application.service_profile_id != group.service_profile_id {
            return Err(DomainError::FailedPrecondition(format!(
                "service profile of device {} does not match multicast group {}",
                dev_eui, id
            )));
        }

        let network_server = self.network_server_for(&group).await?;

        tx.add_device(dev_eui).await?;
        network_server.add_device_to_multicast_group(dev_eui, id).await?;
        tx.commit().await?;

        info!("device added to multicast group");
        Ok(())
    }

    #[instrument(skip(self), fields(multicast_group_id = %id, dev_eui = %dev_eui))]
    pub async fn remove_device(&self, id: Uuid, dev_eui: Eui64) -> DomainResult<()> {
        let mut tx = self.lock(id).await?;
        let group = tx.group().clone();
        let network_server = self.network_server_for(&group).await?;

        if !tx.remove_device(dev_eui).await? {
            return Err(DomainError::DeviceNotFound(format!(
                "device {} is not a member of multicast group {}",
                dev_eui, id
            )));
        }
        network_server
            .remove_device_from_multicast_group(dev_eui, id)
            .await?;
        tx.commit().await?;

        info!("device removed from multicast group");
        Ok(())
    }

    /// Creates the group locally and at the network server.
    #[instrument(skip(self, group), fields(multicast_group_id = %group.id))]
    pub async fn create_group(&self, group: MulticastGroup) -> DomainResult<MulticastGroup> {
        let network_server = self.network_server_for(&group).await?;

        let mut tx = self
            .multicast_group_repository
            .insert_multicast_group(&group)
            .await?;
        network_server.create_multicast_group(&group).await?;
        let created = tx.group().clone();
        tx.commit().await?;

        info!("multicast group created");
        Ok(created)
    }

    /// Deletes the group locally and at the network server.
    #[instrument(skip(self), fields(multicast_group_id = %id))]
    pub async fn delete_group(&self, id: Uuid) -> DomainResult<()> {
        let mut tx = self.lock(id).await?;
        let group = tx.group().clone();
        let network_server = self.network_server_for(&group).await?;

        tx.delete_group().await?;
        network_server.delete_multicast_group(id).await?;
        tx.commit().await?;

        info!("multicast group deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{
        Application, Device, MockApplicationRepository, MockDeviceRepository,
        MockMulticastGroupRepository, MockMulticastGroupTransaction, MockNetworkServerRepository,
        MulticastGroupType, NetworkServer,
    };
    use common::network_server::{MockNetworkServerClient, MockNetworkServerPool};
    use lorawan::{Aes128Key, DevAddr};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn service_profile_id() -> Uuid {
        Uuid::from_u128(0x5e5e)
    }

    fn test_group(f_cnt: u32) -> MulticastGroup {
        MulticastGroup {
            id: Uuid::from_u128(1),
            name: "group".to_string(),
            service_profile_id: service_profile_id(),
            mc_addr: DevAddr([1, 2, 3, 4]),
            mc_nwk_s_key: Aes128Key([2; 16]),
            mc_app_s_key: Aes128Key([3; 16]),
            mc_key: Aes128Key([4; 16]),
            f_cnt,
            group_type: MulticastGroupType::ClassC,
            dr: 0,
            frequency: 869_525_000,
            ping_slot_period: 0,
            created_at: None,
            updated_at: None,
        }
    }

    fn test_device(dev_eui: Eui64) -> Device {
        Device {
            dev_eui,
            name: "device".to_string(),
            application_id: 9,
            device_profile_id: Uuid::nil(),
            dev_addr: DevAddr([0; 4]),
            app_s_key: Aes128Key([0; 16]),
            f_cnt_down: 0,
            variables: HashMap::new(),
            created_at: None,
            updated_at: None,
        }
    }

    fn network_server_repo() -> MockNetworkServerRepository {
        let mut repo = MockNetworkServerRepository::new();
        repo.expect_get_network_server_for_service_profile()
            .returning(|_| {
                Ok(Some(NetworkServer {
                    id: 1,
                    name: "ns".to_string(),
                    server: "ns.local:8000".to_string(),
                }))
            });
        repo
    }

    fn pool_with(client: MockNetworkServerClient) -> MockNetworkServerPool {
        let client: Arc<dyn NetworkServerClient> = Arc::new(client);
        let mut pool = MockNetworkServerPool::new();
        pool.expect_get().returning(move |_| Ok(client.clone()));
        pool
    }

    fn service(
        group_repo: MockMulticastGroupRepository,
        device_repo: MockDeviceRepository,
        app_repo: MockApplicationRepository,
        client: MockNetworkServerClient,
    ) -> MulticastService {
        MulticastService::new(
            Arc::new(group_repo),
            Arc::new(device_repo),
            Arc::new(app_repo),
            Arc::new(network_server_repo()),
            Arc::new(pool_with(client)),
        )
    }

    #[tokio::test]
    async fn test_enqueue_multiple_allocates_consecutive_counters() {
        let counter = Arc::new(AtomicU32::new(20));
        let mut tx = MockMulticastGroupTransaction::new();
        tx.expect_group().return_const(test_group(20));
        let c = counter.clone();
        tx.expect_allocate_frame_counter()
            .times(3)
            .returning(move || Ok(c.fetch_add(1, Ordering::SeqCst)));
        tx.expect_insert_queue_item().times(3).returning(|_| Ok(()));
        tx.expect_commit().times(1).return_once(|| Ok(()));

        let mut group_repo = MockMulticastGroupRepository::new();
        group_repo
            .expect_lock_multicast_group()
            .return_once(move |_| Ok(Some(Box::new(tx))));
        // 20 left the network server queue before the listing.
        group_repo
            .expect_delete_multicast_queue_items_before()
            .withf(|id, f_cnt| *id == Uuid::from_u128(1) && *f_cnt == 21)
            .times(1)
            .return_once(|_, _| Ok(1));

        let mut client = MockNetworkServerClient::new();
        client
            .expect_enqueue_multicast_queue_item()
            .times(3)
            .returning(|_| Ok(()));
        client
            .expect_get_multicast_queue_items()
            .times(1)
            .return_once(|id| {
                Ok([21, 22]
                    .into_iter()
                    .map(|f_cnt| MulticastQueueItem {
                        multicast_group_id: id,
                        f_port: 201,
                        frm_payload: vec![0],
                        f_cnt,
                    })
                    .collect())
            });

        let service = service(
            group_repo,
            MockDeviceRepository::new(),
            MockApplicationRepository::new(),
            client,
        );

        let f_cnts = service
            .enqueue_multiple(Uuid::from_u128(1), 201, vec![vec![1], vec![2], vec![3]])
            .await
            .unwrap();
        assert_eq!(f_cnts, vec![20, 21, 22]);
    }

    #[tokio::test]
    async fn test_enqueue_multiple_partial_failure_flushes_network_server() {
        let counter = Arc::new(AtomicU32::new(10));
        let mut tx = MockMulticastGroupTransaction::new();
        tx.expect_group().return_const(test_group(10));
        let c = counter.clone();
        tx.expect_allocate_frame_counter()
            .times(3)
            .returning(move || Ok(c.fetch_add(1, Ordering::SeqCst)));
        tx.expect_insert_queue_item().times(3).returning(|_| Ok(()));
        tx.expect_commit().never();

        let mut group_repo = MockMulticastGroupRepository::new();
        group_repo
            .expect_lock_multicast_group()
            .return_once(move |_| Ok(Some(Box::new(tx))));

        let mut client = MockNetworkServerClient::new();
        client
            .expect_enqueue_multicast_queue_item()
            .withf(|item| item.f_cnt == 10)
            .times(1)
            .returning(|_| Ok(()));
        client
            .expect_enqueue_multicast_queue_item()
            .withf(|item| item.f_cnt == 11)
            .times(1)
            .returning(|_| Err(DomainError::NetworkServerError("queue full".to_string())));
        client
            .expect_flush_multicast_queue()
            .withf(|id| *id == Uuid::from_u128(1))
            .times(1)
            .returning(|_| Ok(()));

        let service = service(
            group_repo,
            MockDeviceRepository::new(),
            MockApplicationRepository::new(),
            client,
        );

        let result = service
            .enqueue_multiple(Uuid::from_u128(1), 201, vec![vec![1], vec![2], vec![3]])
            .await;
        assert!(matches!(result, Err(DomainError::NetworkServerError(_))));
    }

    #[tokio::test]
    async fn test_enqueue_multiple_first_failure_skips_flush() {
        let mut tx = MockMulticastGroupTransaction::new();
        tx.expect_group().return_const(test_group(10));
        tx.expect_allocate_frame_counter().times(2).returning(|| Ok(10));
        tx.expect_insert_queue_item().times(2).returning(|_| Ok(()));
        tx.expect_commit().never();

        let mut group_repo = MockMulticastGroupRepository::new();
        group_repo
            .expect_lock_multicast_group()
            .return_once(move |_| Ok(Some(Box::new(tx))));

        let mut client = MockNetworkServerClient::new();
        client
            .expect_enqueue_multicast_queue_item()
            .times(1)
            .returning(|_| Err(DomainError::NetworkServerError("unavailable".to_string())));
        client.expect_flush_multicast_queue().never();

        let service = service(
            group_repo,
            MockDeviceRepository::new(),
            MockApplicationRepository::new(),
            client,
        );

        let result = service
            .enqueue_multiple(Uuid::from_u128(1), 201, vec![vec![1], vec![2]])
            .await;
        assert!(matches!(result, Err(DomainError::NetworkServerError(_))));
    }

    #[tokio::test]
    async fn test_enqueue_port_zero() {
        let mut group_repo = MockMulticastGroupRepository::new();
        group_repo.expect_lock_multicast_group().never();

        let service = service(
            group_repo,
            MockDeviceRepository::new(),
            MockApplicationRepository::new(),
            MockNetworkServerClient::new(),
        );

        let result = service.enqueue(Uuid::from_u128(1), 0, vec![1]).await;
        assert!(matches!(result, Err(DomainError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_enqueue_group_not_found() {
        let mut group_repo = MockMulticastGroupRepository::new();
        group_repo
            .expect_lock_multicast_group()
            .return_once(|_| Ok(None));

        let service = service(
            group_repo,
            MockDeviceRepository::new(),
            MockApplicationRepository::new(),
            MockNetworkServerClient::new(),
        );

        let result = service.enqueue(Uuid::from_u128(1), 10, vec![1]).await;
        assert!(matches!(result, Err(DomainError::MulticastGroupNotFound(_))));
    }

    #[tokio::test]
    async fn test_add_device_service_profile_mismatch() {
        let dev_eui: Eui64 = "0102030405060708".parse().unwrap();

        let mut tx = MockMulticastGroupTransaction::new();
        tx.expect_group().return_const(test_group(0));
        tx.expect_add_device().never();
        tx.expect_commit().never();

        let mut group_repo = MockMulticastGroupRepository::new();
        group_repo
            .expect_lock_multicast_group()
            .return_once(move |_| Ok(Some(Box::new(tx))));

        let mut device_repo = MockDeviceRepository::new();
        device_repo
            .expect_get_device()
            .return_once(move |eui| Ok(Some(test_device(eui))));

        let mut app_repo = MockApplicationRepository::new();
        app_repo.expect_get_application().return_once(|_| {
            Ok(Some(Application {
                id: 9,
                name: "other".to_string(),
                organization_id: 1,
                service_profile_id: Uuid::from_u128(0xdead),
                codec: payload_codec::Codec::None,
            }))
        });

        let mut client = MockNetworkServerClient::new();
        client.expect_add_device_to_multicast_group().never();

        let service = service(group_repo, device_repo, app_repo, client);

        let result = service.add_device(Uuid::from_u128(1), dev_eui).await;
        assert!(matches!(result, Err(DomainError::FailedPrecondition(_))));
    }

    #[tokio::test]
    async fn test_add_device_success() {
        let dev_eui: Eui64 = "0102030405060708".parse().unwrap();

        let mut tx = MockMulticastGroupTransaction::new();
        tx.expect_group().return_const(test_group(0));
        tx.expect_add_device()
            .withf(move |eui| *eui == dev_eui)
            .times(1)
            .return_once(|_| Ok(()));
        tx.expect_commit().times(1).return_once(|| Ok(()));

        let mut group_repo = MockMulticastGroupRepository::new();
        group_repo
            .expect_lock_multicast_group()
            .return_once(move |_| Ok(Some(Box::new(tx))));

        let mut device_repo = MockDeviceRepository::new();
        device_repo
            .expect_get_device()
            .return_once(move |eui| Ok(Some(test_device(eui))));

        let mut app_repo = MockApplicationRepository::new();
        app_repo.expect_get_application().return_once(|_| {
            Ok(Some(Application {
                id: 9,
                name: "app".to_string(),
                organization_id: 1,
                service_profile_id: service_profile_id(),
                codec: payload_codec::Codec::None,
            }))
        });

        let mut client = MockNetworkServerClient::new();
        client
            .expect_add_device_to_multicast_group()
            .times(1)
            .return_once(|_, _| Ok(()));

        let service = service(group_repo, device_repo, app_repo, client);
        service.add_device(Uuid::from_u128(1), dev_eui).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_device_not_member() {
        let dev_eui: Eui64 = "0102030405060708".parse().unwrap();

        let mut tx = MockMulticastGroupTransaction::new();
        tx.expect_group().return_const(test_group(0));
        tx.expect_remove_device().return_once(|_| Ok(false));
        tx.expect_commit().never();

        let mut group_repo = MockMulticastGroupRepository::new();
        group_repo
            .expect_lock_multicast_group()
            .return_once(move |_| Ok(Some(Box::new(tx))));

        let mut client = MockNetworkServerClient::new();
        client.expect_remove_device_from_multicast_group().never();

        let service = service(
            group_repo,
            MockDeviceRepository::new(),
            MockApplicationRepository::new(),
            client,
        );

        let result = service.remove_device(Uuid::from_u128(1), dev_eui).await;
        assert!(matches!(result, Err(DomainError::DeviceNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_queue_decrypts() {
        let group = test_group(5);
        let encrypted = encrypt_frm_payload(&group.mc_app_s_key, false, group.mc_addr, 4, b"frag");

        let mut group_repo = MockMulticastGroupRepository::new();
        group_repo
            .expect_get_multicast_group()
            .return_once(move |_| Ok(Some(group)));
        group_repo
            .expect_delete_multicast_queue_items_before()
            .withf(|_, f_cnt| *f_cnt == 4)
            .times(1)
            .return_once(|_, _| Ok(0));

        let mut client = MockNetworkServerClient::new();
        client.expect_get_multicast_queue_items().return_once(move |id| {
            Ok(vec![MulticastQueueItem {
                multicast_group_id: id,
                f_port: 201,
                frm_payload: encrypted,
                f_cnt: 4,
            }])
        });

        let service = service(
            group_repo,
            MockDeviceRepository::new(),
            MockApplicationRepository::new(),
            client,
        );

        let entries = service.list_queue(Uuid::from_u128(1)).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data, b"frag".to_vec());
    }

    #[tokio::test]
    async fn test_list_queue_prunes_everything_when_network_server_queue_is_empty() {
        let mut group_repo = MockMulticastGroupRepository::new();
        group_repo
            .expect_get_multicast_group()
            .return_once(|_| Ok(Some(test_group(9))));
        group_repo
            .expect_delete_multicast_queue_items_before()
            .withf(|id, f_cnt| *id == Uuid::from_u128(1) && *f_cnt == 9)
            .times(1)
            .return_once(|_, _| Ok(9));

        let mut client = MockNetworkServerClient::new();
        client
            .expect_get_multicast_queue_items()
            .return_once(|_| Ok(Vec::new()));

        let service = service(
            group_repo,
            MockDeviceRepository::new(),
            MockApplicationRepository::new(),
            client,
        );

        let entries = service.list_queue(Uuid::from_u128(1)).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_delete_group_mirrors_to_network_server() {
        let mut tx = MockMulticastGroupTransaction::new();
        tx.expect_group().return_const(test_group(0));
        tx.expect_delete_group().times(1).return_once(|| Ok(()));
        tx.expect_commit().times(1).return_once(|| Ok(()));

        let mut group_repo = MockMulticastGroupRepository::new();
        group_repo
            .expect_lock_multicast_group()
            .return_once(move |_| Ok(Some(Box::new(tx))));

        let mut client = MockNetworkServerClient::new();
        client
            .expect_delete_multicast_group()
            .times(1)
            .return_once(|_| Ok(()));

        let service = service(
            group_repo,
            MockDeviceRepository::new(),
            MockApplicationRepository::new(),
            client,
        );

        service.delete_group(Uuid::from_u128(1)).await.unwrap();
    }
}
