#![cfg(feature = "integration-tests")]

use std::collections::HashSet;
use std::sync::Arc;

use common::domain::{
    DeviceQueueItem, DeviceRepository, DomainError, MulticastGroup, MulticastGroupRepository,
    MulticastGroupType, MulticastQueueItem,
};
use common::postgres::{PostgresClient, PostgresDeviceRepository, PostgresMulticastGroupRepository};
use goose::MigrationRunner;
use lorawan::{Aes128Key, DevAddr, Eui64};
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

const DEV_EUI: Eui64 = Eui64([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
const OTHER_DEV_EUI: Eui64 = Eui64([0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);

struct TestDb {
    _container: ContainerAsync<Postgres>,
    client: PostgresClient,
    service_profile_id: Uuid,
}

async fn setup_test_db() -> TestDb {
    let postgres = Postgres::default().start().await.unwrap();
    let host = postgres.get_host().await.unwrap();
    let port = postgres.get_host_port_ipv4(5432).await.unwrap();

    let migrations_dir = format!(
        "{}/../lpwan_all_in_one/migrations/postgres",
        env!("CARGO_MANIFEST_DIR")
    );
    let dsn = format!(
        "postgres://postgres:postgres@{}:{}/postgres?sslmode=disable",
        host, port
    );
    let goose_path = which::which("goose").expect("goose binary not found");

    MigrationRunner::postgres(goose_path.to_string_lossy().to_string(), migrations_dir, dsn)
        .run_migrations()
        .await
        .expect("Migrations failed");

    let client = PostgresClient::new(
        &host.to_string(),
        port,
        "postgres",
        "postgres",
        "postgres",
        10,
    )
    .expect("Failed to create client");

    let service_profile_id = Uuid::new_v4();
    let conn = client.get_connection().await.unwrap();
    conn.batch_execute(&format!(
        "INSERT INTO organization (id, name) VALUES (1, 'test-org');
         INSERT INTO network_server (id, name, server) VALUES (1, 'ns', 'http://localhost:8000');
         INSERT INTO service_profile (id, organization_id, network_server_id)
             VALUES ('{sp}', 1, 1);
         INSERT INTO device_profile (id, name, organization_id, network_server_id)
             VALUES ('{dp}', 'dp', 1, 1);
         INSERT INTO application (id, name, organization_id, service_profile_id)
             VALUES (1, 'app', 1, '{sp}');",
        sp = service_profile_id,
        dp = Uuid::new_v4(),
    ))
    .await
    .unwrap();

    for dev_eui in [DEV_EUI, OTHER_DEV_EUI] {
        conn.execute(
            "INSERT INTO device (dev_eui, name, application_id, device_profile_id, dev_addr, app_s_key, f_cnt_down)
             SELECT $1, 'device', 1, id, $2, $3, 10 FROM device_profile LIMIT 1",
            &[
                &dev_eui.as_bytes().as_slice(),
                &[0x01u8, 0x02, 0x03, 0x04].as_slice(),
                &[0x11u8; 16].as_slice(),
            ],
        )
        .await
        .unwrap();
    }

    TestDb {
        _container: postgres,
        client,
        service_profile_id,
    }
}

fn multicast_group(service_profile_id: Uuid) -> MulticastGroup {
    MulticastGroup {
        id: Uuid::new_v4(),
        name: "firmware-group".to_string(),
        service_profile_id,
        mc_addr: DevAddr([0xaa, 0xbb, 0xcc, 0xdd]),
        mc_nwk_s_key: Aes128Key([0x01; 16]),
        mc_app_s_key: Aes128Key([0x02; 16]),
        mc_key: Aes128Key([0x03; 16]),
        f_cnt: 5,
        group_type: MulticastGroupType::ClassC,
        dr: 3,
        frequency: 869_525_000,
        ping_slot_period: 0,
        created_at: None,
        updated_at: None,
    }
}

async fn enqueue_one(repo: &PostgresDeviceRepository, dev_eui: Eui64) -> u32 {
    let mut tx = repo.lock_device(dev_eui).await.unwrap().unwrap();
    let f_cnt = tx.allocate_frame_counter().await.unwrap();
    let item = DeviceQueueItem {
        dev_eui,
        dev_addr: tx.device().dev_addr,
        f_port: 10,
        confirmed: false,
        frm_payload: vec![0x01, 0x02],
        f_cnt,
    };
    tx.insert_queue_item(&item).await.unwrap();
    tx.commit().await.unwrap();
    f_cnt
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_concurrent_device_enqueue_allocates_unique_counters() {
    let db = setup_test_db().await;
    let repo = Arc::new(PostgresDeviceRepository::new(db.client.clone()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move { enqueue_one(&repo, DEV_EUI).await })
        })
        .collect();

    let mut counters = HashSet::new();
    for handle in handles {
        counters.insert(handle.await.unwrap());
    }

    assert_eq!(counters, (10..18).collect::<HashSet<u32>>());

    let device = repo.get_device(DEV_EUI).await.unwrap().unwrap();
    assert_eq!(device.f_cnt_down, 18);
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_flush_device_queue_keeps_frame_counter() {
    let db = setup_test_db().await;
    let repo = PostgresDeviceRepository::new(db.client.clone());

    enqueue_one(&repo, DEV_EUI).await;
    enqueue_one(&repo, DEV_EUI).await;
    enqueue_one(&repo, OTHER_DEV_EUI).await;

    let deleted = repo.delete_device_queue_items(DEV_EUI).await.unwrap();
    assert_eq!(deleted, 2);

    let device = repo.get_device(DEV_EUI).await.unwrap().unwrap();
    assert_eq!(device.f_cnt_down, 12);

    // The next enqueue continues from the persisted counter.
    assert_eq!(enqueue_one(&repo, DEV_EUI).await, 12);
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_prune_delivered_device_queue_items() {
    let db = setup_test_db().await;
    let repo = PostgresDeviceRepository::new(db.client.clone());

    for _ in 0..3 {
        enqueue_one(&repo, DEV_EUI).await;
    }
    enqueue_one(&repo, OTHER_DEV_EUI).await;

    let pruned = repo
        .delete_device_queue_items_before(DEV_EUI, 12)
        .await
        .unwrap();
    assert_eq!(pruned, 2);

    // Only the row the network server still holds is left.
    let deleted = repo.delete_device_queue_items(DEV_EUI).await.unwrap();
    assert_eq!(deleted, 1);
    let deleted = repo.delete_device_queue_items(OTHER_DEV_EUI).await.unwrap();
    assert_eq!(deleted, 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_rolled_back_enqueue_does_not_consume_counter() {
    let db = setup_test_db().await;
    let repo = PostgresDeviceRepository::new(db.client.clone());

    {
        let mut tx = repo.lock_device(DEV_EUI).await.unwrap().unwrap();
        assert_eq!(tx.allocate_frame_counter().await.unwrap(), 10);
    }

    let device = repo.get_device(DEV_EUI).await.unwrap().unwrap();
    assert_eq!(device.f_cnt_down, 10);
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_lock_unknown_device_returns_none() {
    let db = setup_test_db().await;
    let repo = PostgresDeviceRepository::new(db.client.clone());

    let tx = repo.lock_device(Eui64([0xff; 8])).await.unwrap();
    assert!(tx.is_none());
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_multicast_group_lifecycle() {
    let db = setup_test_db().await;
    let repo = PostgresMulticastGroupRepository::new(db.client.clone());
    let group = multicast_group(db.service_profile_id);

    let mut tx = repo.insert_multicast_group(&group).await.unwrap();
    tx.commit().await.unwrap();

    let stored = repo.get_multicast_group(group.id).await.unwrap().unwrap();
    assert_eq!(stored.mc_addr, group.mc_addr);
    assert_eq!(stored.mc_key, group.mc_key);
    assert_eq!(stored.f_cnt, 5);
    assert_eq!(stored.group_type, MulticastGroupType::ClassC);

    let mut tx = repo.lock_multicast_group(group.id).await.unwrap().unwrap();
    tx.add_device(DEV_EUI).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = repo.lock_multicast_group(group.id).await.unwrap().unwrap();
    let result = tx.add_device(DEV_EUI).await;
    assert!(matches!(result, Err(DomainError::AlreadyExists(_))));
    drop(tx);

    let mut tx = repo.lock_multicast_group(group.id).await.unwrap().unwrap();
    assert!(tx.remove_device(DEV_EUI).await.unwrap());
    assert!(!tx.remove_device(OTHER_DEV_EUI).await.unwrap());
    tx.commit().await.unwrap();

    let mut tx = repo.lock_multicast_group(group.id).await.unwrap().unwrap();
    tx.delete_group().await.unwrap();
    tx.commit().await.unwrap();

    assert!(repo.get_multicast_group(group.id).await.unwrap().is_none());
    assert!(repo.lock_multicast_group(group.id).await.unwrap().is_none());
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_uncommitted_group_insert_is_rolled_back() {
    let db = setup_test_db().await;
    let repo = PostgresMulticastGroupRepository::new(db.client.clone());
    let group = multicast_group(db.service_profile_id);

    let tx = repo.insert_multicast_group(&group).await.unwrap();
    drop(tx);

    assert!(repo.get_multicast_group(group.id).await.unwrap().is_none());
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_multicast_enqueue_and_flush() {
    let db = setup_test_db().await;
    let repo = PostgresMulticastGroupRepository::new(db.client.clone());
    let group = multicast_group(db.service_profile_id);

    let mut tx = repo.insert_multicast_group(&group).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = repo.lock_multicast_group(group.id).await.unwrap().unwrap();
    let mut counters = Vec::new();
    for payload in [vec![0x01], vec![0x02], vec![0x03]] {
        let f_cnt = tx.allocate_frame_counter().await.unwrap();
        tx.insert_queue_item(&MulticastQueueItem {
            multicast_group_id: group.id,
            f_port: 201,
            frm_payload: payload,
            f_cnt,
        })
        .await
        .unwrap();
        counters.push(f_cnt);
    }
    tx.commit().await.unwrap();
    assert_eq!(counters, vec![5, 6, 7]);

    let pruned = repo
        .delete_multicast_queue_items_before(group.id, 6)
        .await
        .unwrap();
    assert_eq!(pruned, 1);

    let deleted = repo.delete_multicast_queue_items(group.id).await.unwrap();
    assert_eq!(deleted, 2);

    let stored = repo.get_multicast_group(group.id).await.unwrap().unwrap();
    assert_eq!(stored.f_cnt, 8);
}
