//! Cross-key behavior of the keyed queue.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use claude_runner::config::QueueConfig;
use claude_runner::queue::{KeyedQueue, QueueError, TaskError};

fn queue() -> KeyedQueue<String> {
    KeyedQueue::from_config(&QueueConfig::default())
}

#[tokio::test]
async fn keys_run_in_parallel() {
    const KEYS: usize = 4;
    const TASKS: usize = 3;
    const DELAY: Duration = Duration::from_millis(60);

    let queue = queue();
    let started = Instant::now();
    for k in 0..KEYS {
        let handle = queue.get_or_create(format!("chat-{k}")).unwrap();
        for t in 0..TASKS {
            handle.enqueue(format!("task-{t}"), async {
                tokio::time::sleep(DELAY).await;
                Ok::<(), TaskError>(())
            });
        }
    }
    assert_eq!(queue.stats().active_queues, KEYS);
    assert_eq!(queue.stats().busy_queues, KEYS);

    let report = queue.shutdown(Duration::from_secs(5)).await;
    let elapsed = started.elapsed();

    assert!(report.drained);
    assert!(elapsed >= DELAY * 3, "{elapsed:?}");
    // Serial execution across keys would take KEYS times longer.
    assert!(elapsed < DELAY * 6, "{elapsed:?}");
    assert_eq!(queue.stats().completed, (KEYS * TASKS) as u64);
}

#[tokio::test]
async fn reentrant_enqueue_runs_after_current_entry() {
    let queue = queue();
    let handle = queue.get_or_create("chat".to_string()).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let inner_handle = handle.clone();
    let inner_order = Arc::clone(&order);
    handle.enqueue("outer", async move {
        inner_order.lock().unwrap().push("outer:start");
        let follow_order = Arc::clone(&inner_order);
        inner_handle.enqueue("follow-up", async move {
            follow_order.lock().unwrap().push("follow-up");
            Ok::<(), TaskError>(())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        inner_order.lock().unwrap().push("outer:end");
        Ok::<(), TaskError>(())
    });

    let report = queue.shutdown(Duration::from_secs(5)).await;
    assert!(report.drained);
    assert_eq!(
        *order.lock().unwrap(),
        vec!["outer:start", "outer:end", "follow-up"]
    );
}

#[tokio::test]
async fn failures_are_counted_per_key_and_reset() {
    let queue = queue();
    let key = "flaky".to_string();
    let handle = queue.get_or_create(key.clone()).unwrap();
    let (release, gate) = tokio::sync::oneshot::channel::<()>();

    handle.enqueue("fail-1", async { Err::<(), TaskError>("first".into()) });
    handle.enqueue("fail-2", async { Err::<(), TaskError>("second".into()) });
    handle.enqueue("gate", async move {
        let _ = gate.await;
        Ok::<(), TaskError>(())
    });

    for _ in 0..100 {
        if queue.consecutive_failures(&key) == Some(2) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(queue.consecutive_failures(&key), Some(2));
    assert_eq!(queue.stats().failures, 2);

    release.send(()).unwrap();
    queue.shutdown(Duration::from_secs(5)).await;
    assert_eq!(queue.stats().completed, 1);
}

async fn wait_until_drained(queue: &KeyedQueue<String>) {
    for _ in 0..200 {
        if queue.stats().active_queues == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("queue never drained: {:?}", queue.stats());
}

#[tokio::test]
async fn drained_key_starts_fresh() {
    let queue = queue();
    let key = "chat".to_string();
    let handle = queue.get_or_create(key.clone()).unwrap();
    handle.enqueue("boom", async { Err::<(), TaskError>("x".into()) });

    wait_until_drained(&queue).await;
    assert_eq!(queue.consecutive_failures(&key), None);

    let (release, gate) = tokio::sync::oneshot::channel::<()>();
    let ticket = handle.enqueue("again", async move {
        let _ = gate.await;
        Ok::<(), TaskError>(())
    });
    assert!(!ticket.is_cancelled());
    assert_eq!(queue.consecutive_failures(&key), Some(0));

    release.send(()).unwrap();
    queue.shutdown(Duration::from_secs(5)).await;
    assert_eq!(queue.stats().completed, 1);
    assert_eq!(queue.stats().failures, 1);
}

#[tokio::test]
async fn stale_handle_cannot_revive_key_after_shutdown() {
    let queue = queue();
    let handle = queue.get_or_create("chat".to_string()).unwrap();
    handle.enqueue("first", async { Ok::<(), TaskError>(()) });
    assert!(queue.shutdown(Duration::from_secs(5)).await.drained);

    let ran = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&ran);
    let ticket = handle.enqueue("late", async move {
        *flag.lock().unwrap() = true;
        Ok::<(), TaskError>(())
    });

    assert!(ticket.is_cancelled());
    assert_eq!(queue.stats().active_queues, 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!*ran.lock().unwrap());
    assert_eq!(queue.stats().completed, 1);
}

#[tokio::test]
async fn shutdown_rejects_unknown_keys() {
    let queue = queue();
    queue.shutdown(Duration::from_millis(10)).await;
    tokio_test::assert_err!(queue.get_or_create("late".to_string()));
    assert!(matches!(
        queue.get_or_create("late".to_string()),
        Err(QueueError::ShuttingDown)
    ));
}

#[tokio::test]
async fn running_entry_can_be_cancelled() {
    let queue = queue();
    let handle = queue.get_or_create("chat".to_string()).unwrap();
    let ticket = handle.enqueue("long", async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok::<(), TaskError>(())
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    ticket.cancel();
    let report = queue.shutdown(Duration::from_secs(2)).await;
    assert!(report.drained);
    assert_eq!(queue.stats().failures, 0);
}
