//! End-to-end engine scenarios over a real on-disk store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use ferriq_common::clock::now_ms;
use ferriq_common::{DictValue, QueueError, Response, Signal};
use ferriq_queue::{
    Command, ConfigPatch, EngineSettings, PQueue, PopOptions, QueueConfig, ServiceDescriptor,
    ServiceType,
};
use ferriq_store::{Database, WriteBehind};

fn open_store(path: &std::path::Path) -> Arc<WriteBehind> {
    let db = Database::open(path, 1024 * 1024).expect("open database");
    WriteBehind::new(db)
}

fn queue_on(
    store: &Arc<WriteBehind>,
    shutdown: &broadcast::Sender<Signal>,
    patch: ConfigPatch,
) -> Arc<PQueue> {
    let settings = Arc::new(EngineSettings::default());
    let desc = ServiceDescriptor::new(1, ServiceType::PriorityQueue, "q", now_ms());
    let mut config = QueueConfig::new(&settings.tuning, now_ms());
    patch.apply(&mut config);
    PQueue::create(desc, config, settings, Arc::clone(store), shutdown.clone())
        .expect("create queue")
}

fn fresh_queue(patch: ConfigPatch) -> (tempfile::TempDir, Arc<PQueue>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let (shutdown, _keep) = broadcast::channel(4);
    let queue = queue_on(&store, &shutdown, patch);
    (dir, queue)
}

async fn pop(queue: &PQueue, limit: i64, lock: bool, wait: i64) -> Vec<ferriq_common::MessageItem> {
    queue
        .pop(PopOptions {
            lock_timeout: None,
            wait_ms: wait,
            limit,
            lock,
        })
        .await
        .expect("pop")
}

fn dict_int(response: &Response, key: &str) -> i64 {
    let Response::Dict(dict) = response else {
        panic!("expected a dict response");
    };
    match dict.get(key) {
        Some(DictValue::Int(v)) => *v,
        other => panic!("expected integer field {key}, got {other:?}"),
    }
}

#[tokio::test]
async fn test_single_message_lock_cycle() {
    let (_dir, queue) = fresh_queue(ConfigPatch::default());
    queue.push("a", b"A", 60_000, 0, 5).expect("push");

    let items = pop(&queue, 1, true, 0).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "a");
    assert_eq!(items[0].payload, b"A");

    // The locked message is invisible to a second consumer.
    assert!(pop(&queue, 1, true, 0).await.is_empty());
}

#[tokio::test]
async fn test_bulk_pop_orders_by_priority_then_arrival() {
    let (_dir, queue) = fresh_queue(ConfigPatch::default());
    queue.push("b", b"", 60_000, 0, 5).expect("push");
    queue.push("c", b"", 60_000, 0, 1).expect("push");

    let items = pop(&queue, 2, false, 0).await;
    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "b"]);
    assert_eq!(queue.size(), 0);
}

#[tokio::test]
async fn test_lock_expiry_consumes_the_retry_budget() {
    let (_dir, queue) = fresh_queue(ConfigPatch {
        pop_count_limit: Some(2),
        pop_lock_timeout: Some(1_000),
        ..ConfigPatch::default()
    });
    queue.push("d", b"", 60_000, 0, 0).expect("push");

    // First lock times out: the message returns to the front.
    assert_eq!(pop(&queue, 1, true, 0).await.len(), 1);
    assert!(queue.check_timeouts(now_ms() + 1_500) >= 1);
    assert_eq!(queue.in_flight(), 0);
    let info = queue.message_info("d").expect("info");
    assert_eq!(dict_int(&info, "UnlockTs"), 0);
    assert_eq!(dict_int(&info, "PopCount"), 1);

    // Second expiry exhausts the budget: the message is deleted.
    assert_eq!(pop(&queue, 1, true, 0).await.len(), 1);
    assert!(queue.check_timeouts(now_ms() + 1_500) >= 1);
    assert!(pop(&queue, 1, true, 0).await.is_empty());
    assert_eq!(queue.size(), 0);
}

#[tokio::test]
async fn test_delayed_delivery_surfaces_through_the_update_task() {
    let (_dir, queue) = fresh_queue(ConfigPatch::default());
    queue.push("e", b"E", 60_000, 500, 0).expect("push");

    // Before the delay elapses nothing is available.
    assert!(pop(&queue, 1, true, 0).await.is_empty());

    // The queue's own update task moves it to available; the blocked
    // pop is woken by the return-to-front signal.
    let sweeper = tokio::spawn(Arc::clone(&queue).run_update());
    let items = pop(&queue, 1, true, 5_000).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "e");
    assert_eq!(items[0].payload, b"E");

    queue.close();
    sweeper.await.expect("join");
}

#[tokio::test]
async fn test_receipt_delete_is_single_use() {
    let (_dir, queue) = fresh_queue(ConfigPatch::default());
    queue.push("f", b"", 60_000, 0, 0).expect("push");

    let items = pop(&queue, 1, true, 0).await;
    let receipt = items[0].receipt.clone().expect("receipt");
    queue.delete_by_receipt(&receipt).expect("first delete");
    assert_eq!(
        queue.delete_by_receipt(&receipt),
        Err(QueueError::ReceiptExpired)
    );
}

#[tokio::test]
async fn test_restart_restores_messages_in_serial_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ids: Vec<String> = (0..100).map(|i| format!("msg-{i:03}")).collect();
    let desc = {
        let store = open_store(dir.path());
        let (shutdown, _keep) = broadcast::channel(4);
        let queue = queue_on(&store, &shutdown, ConfigPatch::default());
        for id in &ids {
            queue
                .push(id, id.as_bytes(), 600_000, 0, 4)
                .expect("push");
        }
        let desc = queue.descriptor().clone();
        drop(queue);
        store.close().expect("close store");
        desc
    };

    let store = open_store(dir.path());
    let (shutdown, _keep) = broadcast::channel(4);
    let queue = PQueue::load(
        desc,
        Arc::new(EngineSettings::default()),
        Arc::clone(&store),
        shutdown.clone(),
    )
    .expect("reload queue");

    let status = queue.status();
    assert_eq!(dict_int(&status, "TotalMessages"), 100);
    assert_eq!(dict_int(&status, "InFlightMessages"), 0);

    // A bulk pop returns the first ten pushed, in serial order, with
    // their payloads intact.
    let items = pop(&queue, 10, false, 0).await;
    let popped: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    let expected: Vec<&str> = ids.iter().take(10).map(String::as_str).collect();
    assert_eq!(popped, expected);
    assert_eq!(items[0].payload, ids[0].as_bytes());
}

#[tokio::test]
async fn test_restart_drops_expired_and_budget_exhausted_messages() {
    let dir = tempfile::tempdir().expect("tempdir");
    let desc = {
        let store = open_store(dir.path());
        let (shutdown, _keep) = broadcast::channel(4);
        let queue = queue_on(
            &store,
            &shutdown,
            ConfigPatch {
                pop_count_limit: Some(1),
                pop_lock_timeout: Some(50),
                ..ConfigPatch::default()
            },
        );
        // "stale" expires almost immediately and is never touched again.
        queue.push("stale", b"", 1, 0, 9).expect("push");
        queue.push("spent", b"", 600_000, 0, 0).expect("push");
        queue.push("alive", b"", 600_000, 0, 5).expect("push");
        // Consume "spent"'s only allowed pop; it is still locked when
        // the store shuts down.
        let items = pop(&queue, 1, true, 0).await;
        assert_eq!(items[0].id, "spent");
        let desc = queue.descriptor().clone();
        drop(queue);
        store.close().expect("close store");
        desc
    };

    let store = open_store(dir.path());
    let (shutdown, _keep) = broadcast::channel(4);
    let queue = PQueue::load(
        desc,
        Arc::new(EngineSettings::default()),
        Arc::clone(&store),
        shutdown,
    )
    .expect("reload");

    // "spent" reached its pop budget, so only "alive" survives.
    assert_eq!(queue.size(), 1);
    let items = pop(&queue, 10, false, 0).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "alive");
}

#[tokio::test]
async fn test_wait_zero_never_blocks() {
    let (_dir, queue) = fresh_queue(ConfigPatch::default());
    let started = Instant::now();
    assert!(pop(&queue, 1, true, 0).await.is_empty());
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn test_zero_pop_count_limit_retries_forever() {
    let (_dir, queue) = fresh_queue(ConfigPatch {
        pop_count_limit: Some(0),
        pop_lock_timeout: Some(100),
        ..ConfigPatch::default()
    });
    queue.push("hardy", b"", 600_000, 0, 0).expect("push");

    for _ in 0..5 {
        assert_eq!(pop(&queue, 1, true, 0).await.len(), 1);
        assert!(queue.check_timeouts(now_ms() + 1_000) >= 1);
    }
    assert_eq!(queue.size(), 1);
}

#[tokio::test]
async fn test_execute_validates_parameter_ranges() {
    let (_dir, queue) = fresh_queue(ConfigPatch::default());

    let err = queue
        .execute(Command::Pop {
            limit: 0,
            wait: 0,
            lock_timeout: None,
            lock: true,
        })
        .await
        .expect_err("limit out of range");
    assert!(err.to_string().contains("POP limit"));
    assert!(err.to_string().contains("10"));

    let err = queue
        .execute(Command::Pop {
            limit: 1,
            wait: -1,
            lock_timeout: None,
            lock: true,
        })
        .await
        .expect_err("wait out of range");
    assert!(err.to_string().contains("30000"));

    let err = queue
        .execute(Command::Push {
            id: Some("x".into()),
            payload: Vec::new(),
            ttl: None,
            delay: None,
            priority: Some(-1),
        })
        .await
        .expect_err("negative priority");
    assert!(err.to_string().contains("priority"));

    let err = queue
        .execute(Command::Push {
            id: Some("x".into()),
            payload: Vec::new(),
            ttl: None,
            delay: Some(i64::MAX),
            priority: None,
        })
        .await
        .expect_err("delay beyond cap");
    assert!(err.to_string().contains("43200000"));
}

#[tokio::test]
async fn test_execute_push_assigns_an_id_when_absent() {
    let (_dir, queue) = fresh_queue(ConfigPatch::default());
    let response = queue
        .execute(Command::Push {
            id: None,
            payload: b"auto".to_vec(),
            ttl: None,
            delay: None,
            priority: None,
        })
        .await
        .expect("push");
    let Response::Str(id) = response else {
        panic!("expected the assigned id back");
    };
    assert!(!id.is_empty());

    let items = queue
        .execute(Command::Pop {
            limit: 1,
            wait: 0,
            lock_timeout: None,
            lock: false,
        })
        .await
        .expect("pop")
        .expect_items();
    assert_eq!(items[0].id, id);
}
