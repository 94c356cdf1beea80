//! Queue manager lifecycle tests.

use std::time::Duration;

use tokio::sync::broadcast;

use ferriq_common::{QueueError, Signal};
use ferriq_queue::{
    ConfigPatch, EngineSettings, PopOptions, QueueManager, ServiceDescriptor, ServiceType, keys,
    records,
};
use ferriq_store::{Database, WriteBehind};

fn open_manager(
    path: &std::path::Path,
    shutdown: &broadcast::Sender<Signal>,
) -> QueueManager {
    let db = Database::open(path, 1024 * 1024).expect("open database");
    let store = WriteBehind::new(db);
    QueueManager::open(store, EngineSettings::default(), shutdown.clone()).expect("open manager")
}

/// Let closed update tasks observe the shutdown signal and drop their
/// engine handles, releasing the store.
async fn settle(shutdown: &broadcast::Sender<Signal>, manager: QueueManager) {
    manager.close().expect("close manager");
    let _ = shutdown.send(Signal::Shutdown);
    drop(manager);
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_create_get_list_drop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (shutdown, _keep) = broadcast::channel(8);
    let manager = open_manager(dir.path(), &shutdown);
    assert!(manager.is_empty());

    manager
        .create_queue("orders", ServiceType::PriorityQueue, ConfigPatch::default())
        .expect("create");
    manager
        .create_queue("orders-dlq", ServiceType::PriorityQueue, ConfigPatch::default())
        .expect("create");
    manager
        .create_queue("billing", ServiceType::PriorityQueue, ConfigPatch::default())
        .expect("create");
    assert_eq!(manager.len(), 3);

    assert!(manager.queue("orders").is_some());
    assert!(manager.queue("missing").is_none());

    assert_eq!(
        manager.list(Some("orders"), None),
        vec!["orders".to_string(), "orders-dlq".to_string()]
    );
    assert_eq!(
        manager.list(None, Some(ServiceType::PriorityQueue)).len(),
        3
    );

    manager.drop_queue("billing").expect("drop");
    assert!(manager.queue("billing").is_none());
    assert_eq!(
        manager.drop_queue("billing"),
        Err(QueueError::QueueNotFound("billing".into()))
    );

    settle(&shutdown, manager).await;
}

#[tokio::test]
async fn test_duplicate_and_invalid_names_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (shutdown, _keep) = broadcast::channel(8);
    let manager = open_manager(dir.path(), &shutdown);

    manager
        .create_queue("jobs", ServiceType::PriorityQueue, ConfigPatch::default())
        .expect("create");
    assert_eq!(
        manager.create_queue("jobs", ServiceType::PriorityQueue, ConfigPatch::default()),
        Err(QueueError::QueueAlreadyExists("jobs".into()))
    );
    assert!(matches!(
        manager.create_queue("_sys", ServiceType::PriorityQueue, ConfigPatch::default()),
        Err(QueueError::InvalidRequest(_))
    ));
    assert!(matches!(
        manager.create_queue("no spaces", ServiceType::PriorityQueue, ConfigPatch::default()),
        Err(QueueError::InvalidRequest(_))
    ));
    assert_eq!(manager.len(), 1);

    settle(&shutdown, manager).await;
}

#[tokio::test]
async fn test_restart_restores_queues_and_export_counter() {
    let dir = tempfile::tempdir().expect("tempdir");

    let first_service_id = {
        let (shutdown, _keep) = broadcast::channel(8);
        let manager = open_manager(dir.path(), &shutdown);
        manager
            .create_queue(
                "persist",
                ServiceType::PriorityQueue,
                ConfigPatch {
                    pop_count_limit: Some(3),
                    ..ConfigPatch::default()
                },
            )
            .expect("create");
        let queue = manager.queue("persist").expect("queue");
        queue.push("m1", b"one", 600_000, 0, 0).expect("push");
        let service_id = queue.service_id().to_string();
        drop(queue);
        settle(&shutdown, manager).await;
        service_id
    };

    let (shutdown, _keep) = broadcast::channel(8);
    let manager = open_manager(dir.path(), &shutdown);
    assert_eq!(manager.len(), 1);

    let queue = manager.queue("persist").expect("restored queue");
    assert_eq!(queue.size(), 1);
    // The patched config survives the restart.
    assert_eq!(queue.config().pop_count_limit, 3);

    // Export ids keep growing: a new queue never reuses a service id.
    manager
        .create_queue("fresh", ServiceType::PriorityQueue, ConfigPatch::default())
        .expect("create");
    let fresh = manager.queue("fresh").expect("queue");
    assert_ne!(fresh.service_id(), first_service_id);
    assert!(
        fresh.descriptor().export_id > queue.descriptor().export_id,
        "export ids must be monotonic across restarts"
    );

    drop(queue);
    drop(fresh);
    settle(&shutdown, manager).await;
}

#[tokio::test]
async fn test_drop_purges_rows_for_good() {
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let (shutdown, _keep) = broadcast::channel(8);
        let manager = open_manager(dir.path(), &shutdown);
        manager
            .create_queue("doomed", ServiceType::PriorityQueue, ConfigPatch::default())
            .expect("create");
        let queue = manager.queue("doomed").expect("queue");
        for i in 0..20 {
            queue
                .push(&format!("m{i}"), b"payload", 600_000, 0, 0)
                .expect("push");
        }
        drop(queue);
        manager.drop_queue("doomed").expect("drop");
        settle(&shutdown, manager).await;
    }

    let (shutdown, _keep) = broadcast::channel(8);
    let manager = open_manager(dir.path(), &shutdown);
    assert!(manager.is_empty(), "dropped queue must not be restored");

    // Recreating under the same name starts empty.
    manager
        .create_queue("doomed", ServiceType::PriorityQueue, ConfigPatch::default())
        .expect("create");
    let queue = manager.queue("doomed").expect("queue");
    assert_eq!(queue.size(), 0);

    drop(queue);
    settle(&shutdown, manager).await;
}

#[tokio::test]
async fn test_disabled_queue_is_skipped_until_enabled() {
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let (shutdown, _keep) = broadcast::channel(8);
        let manager = open_manager(dir.path(), &shutdown);
        manager
            .create_queue("active", ServiceType::PriorityQueue, ConfigPatch::default())
            .expect("create");
        manager
            .create_queue("standby", ServiceType::PriorityQueue, ConfigPatch::default())
            .expect("create");
        let queue = manager.queue("standby").expect("queue");
        queue.push("m1", b"one", 600_000, 0, 0).expect("push");
        queue.push("m2", b"two", 600_000, 0, 0).expect("push");
        drop(queue);

        manager.disable_queue("standby").expect("disable");
        assert!(manager.queue("standby").is_none());
        assert_eq!(manager.list(None, None), vec!["active".to_string()]);
        assert_eq!(
            manager.disable_queue("standby"),
            Err(QueueError::QueueNotFound("standby".into()))
        );

        settle(&shutdown, manager).await;
    }

    // The disabled queue survives the restart on disk but is not
    // loaded.
    let (shutdown, _keep) = broadcast::channel(8);
    let manager = open_manager(dir.path(), &shutdown);
    assert_eq!(manager.len(), 1);
    assert!(manager.queue("standby").is_none());

    // Enabling loads it back with its messages intact.
    manager.enable_queue("standby").expect("enable");
    let queue = manager.queue("standby").expect("queue");
    assert_eq!(queue.size(), 2);
    assert!(matches!(
        manager.enable_queue("standby"),
        Err(QueueError::InvalidRequest(_))
    ));
    assert_eq!(
        manager.enable_queue("missing"),
        Err(QueueError::QueueNotFound("missing".into()))
    );

    drop(queue);
    settle(&shutdown, manager).await;
}

#[tokio::test]
async fn test_unfinished_drop_is_completed_on_next_load() {
    let dir = tempfile::tempdir().expect("tempdir");

    // A drop that crashed after marking the descriptor but before the
    // purge: the marked descriptor and the queue's rows are still on
    // disk.
    let service_id = {
        let db = Database::open(dir.path(), 1024 * 1024).expect("open database");
        let store = WriteBehind::new(db);
        let mut desc = ServiceDescriptor::new(7, ServiceType::PriorityQueue, "ghost", 1);
        desc.to_delete = true;
        store.store(
            keys::descriptor_key("ghost"),
            records::encode_record(&desc).expect("encode"),
        );
        store.store(keys::meta_key(&desc.service_id, 1), b"junk".to_vec());
        store.store(keys::payload_key(&desc.service_id, 1), b"junk".to_vec());
        store.close().expect("close store");
        desc.service_id
    };

    {
        let (shutdown, _keep) = broadcast::channel(8);
        let manager = open_manager(dir.path(), &shutdown);
        assert!(manager.is_empty(), "a marked queue must not be loaded");

        // The name is free again, and the counter covers the purged
        // descriptor so its service id is never reused.
        manager
            .create_queue("ghost", ServiceType::PriorityQueue, ConfigPatch::default())
            .expect("create");
        let queue = manager.queue("ghost").expect("queue");
        assert_eq!(queue.size(), 0);
        assert!(queue.descriptor().export_id > 7);
        assert_ne!(queue.service_id(), service_id);

        drop(queue);
        settle(&shutdown, manager).await;
    }

    let db = Database::open(dir.path(), 1024 * 1024).expect("reopen database");
    let leftovers = db
        .scan_prefix(&keys::queue_prefix(&service_id))
        .count();
    assert_eq!(leftovers, 0, "the load must have purged the marked rows");
}

#[tokio::test]
async fn test_popping_through_the_manager() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (shutdown, _keep) = broadcast::channel(8);
    let manager = open_manager(dir.path(), &shutdown);
    manager
        .create_queue("work", ServiceType::PriorityQueue, ConfigPatch::default())
        .expect("create");

    let queue = manager.queue("work").expect("queue");
    queue.push("job-1", b"payload", 600_000, 0, 0).expect("push");
    let items = queue
        .pop(PopOptions {
            lock_timeout: None,
            wait_ms: 0,
            limit: 1,
            lock: true,
        })
        .await
        .expect("pop");
    assert_eq!(items.len(), 1);

    let receipt = items[0].receipt.as_deref().expect("receipt");
    queue.delete_by_receipt(receipt).expect("ack");
    assert_eq!(queue.size(), 0);

    drop(queue);
    settle(&shutdown, manager).await;
}
