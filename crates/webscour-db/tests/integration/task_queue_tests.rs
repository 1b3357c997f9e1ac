use std::collections::HashSet;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use webscour_core::CrawlError;
use webscour_core::queue::WorkQueue;
use webscour_core::task::{PoolConfig, QueueDepth};
use webscour_db::PgTaskQueue;

use crate::integration::common::{connect, setup_test_db};

async fn declared_queue(pool: &sqlx::PgPool, name: &str) -> PgTaskQueue {
    let queue = PgTaskQueue::new(pool.clone(), name);
    queue.declare().await.unwrap();
    queue
}

#[tokio::test]
async fn declare_is_idempotent() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgTaskQueue::new(pool, "url_queue");

    queue.declare().await.unwrap();
    queue.declare().await.unwrap();

    assert_eq!(queue.name(), "url_queue");
    assert!(queue.depth().await.unwrap().is_drained());
}

#[tokio::test]
async fn publish_to_undeclared_queue_fails() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgTaskQueue::new(pool, "missing");

    let err = queue.publish("https://a.test/").await.unwrap_err();
    assert!(matches!(err, CrawlError::QueueError(_)));
}

#[tokio::test]
async fn publish_receive_ack_removes_task() {
    let (pool, _container) = setup_test_db().await;
    let queue = declared_queue(&pool, "url_queue").await;

    queue.publish("https://a.test/").await.unwrap();
    assert_eq!(
        queue.depth().await.unwrap(),
        QueueDepth {
            pending: 1,
            in_flight: 0
        }
    );

    let delivery = queue.receive("W1").await.unwrap().expect("task available");
    assert_eq!(delivery.url, "https://a.test/");
    assert_eq!(delivery.attempt, 0);
    assert!(!delivery.redelivered);
    assert_eq!(
        queue.depth().await.unwrap(),
        QueueDepth {
            pending: 0,
            in_flight: 1
        }
    );

    queue.ack(delivery.tag).await.unwrap();
    assert!(queue.depth().await.unwrap().is_drained());
    assert!(queue.receive("W1").await.unwrap().is_none());
}

#[tokio::test]
async fn delivers_in_publication_order() {
    let (pool, _container) = setup_test_db().await;
    let queue = declared_queue(&pool, "url_queue").await;

    for url in ["https://a.test/1", "https://a.test/2", "https://a.test/3"] {
        queue.publish(url).await.unwrap();
    }
    assert_eq!(
        queue.pending_urls(10).await.unwrap(),
        vec!["https://a.test/1", "https://a.test/2", "https://a.test/3"]
    );

    let mut received = Vec::new();
    while let Some(delivery) = queue.receive("W1").await.unwrap() {
        received.push(delivery.url);
        queue.ack(delivery.tag).await.unwrap();
    }
    assert_eq!(
        received,
        vec!["https://a.test/1", "https://a.test/2", "https://a.test/3"]
    );
}

#[tokio::test]
async fn consumer_holds_at_most_one_delivery() {
    let (pool, _container) = setup_test_db().await;
    let queue = declared_queue(&pool, "url_queue").await;

    queue.publish("https://a.test/1").await.unwrap();
    queue.publish("https://a.test/2").await.unwrap();

    let first = queue.receive("W1").await.unwrap().unwrap();
    assert!(queue.receive("W1").await.unwrap().is_none());

    let second = queue.receive("W2").await.unwrap().unwrap();
    assert_ne!(first.tag, second.tag);

    queue.ack(first.tag).await.unwrap();
    assert!(queue.receive("W1").await.unwrap().is_none());
    assert!(queue.depth().await.unwrap().pending == 0);
}

#[tokio::test]
async fn competing_consumers_never_share_a_task() {
    let (pool, _container) = setup_test_db().await;
    let queue = declared_queue(&pool, "url_queue").await;

    for i in 0..30 {
        queue.publish(&format!("https://a.test/{i}")).await.unwrap();
    }

    let mut handles = Vec::new();
    for w in 1..=5 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let consumer = format!("W{w}");
            let mut seen = Vec::new();
            loop {
                match queue.receive(&consumer).await.unwrap() {
                    Some(delivery) => {
                        seen.push(delivery.url);
                        queue.ack(delivery.tag).await.unwrap();
                    }
                    None => {
                        if queue.depth().await.unwrap().pending == 0 {
                            break;
                        }
                        tokio::task::yield_now().await;
                    }
                }
            }
            seen
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), 30);
    assert_eq!(unique.len(), 30);
    assert!(queue.depth().await.unwrap().is_drained());
}

#[tokio::test]
async fn settling_an_unknown_tag_fails() {
    let (pool, _container) = setup_test_db().await;
    let queue = declared_queue(&pool, "url_queue").await;

    queue.publish("https://a.test/").await.unwrap();
    let delivery = queue.receive("W1").await.unwrap().unwrap();
    queue.ack(delivery.tag).await.unwrap();

    assert!(matches!(
        queue.ack(delivery.tag).await,
        Err(CrawlError::QueueError(_))
    ));
    assert!(matches!(
        queue.requeue(delivery.tag, Utc::now()).await,
        Err(CrawlError::QueueError(_))
    ));
    assert!(matches!(
        queue.ack(999_999).await,
        Err(CrawlError::QueueError(_))
    ));
}

#[tokio::test]
async fn requeue_counts_attempts_and_delays_redelivery() {
    let (pool, _container) = setup_test_db().await;
    let queue = declared_queue(&pool, "url_queue").await;

    queue.publish("https://a.test/").await.unwrap();
    let delivery = queue.receive("W1").await.unwrap().unwrap();

    queue
        .requeue(delivery.tag, Utc::now() + TimeDelta::hours(1))
        .await
        .unwrap();
    assert!(queue.receive("W1").await.unwrap().is_none());
    assert_eq!(
        queue.depth().await.unwrap(),
        QueueDepth {
            pending: 1,
            in_flight: 0
        }
    );

    // Pull the deadline back so the task becomes deliverable again.
    sqlx::query("UPDATE crawl_tasks SET available_at = NOW() - INTERVAL '1 second'")
        .execute(&pool)
        .await
        .unwrap();

    let again = queue.receive("W2").await.unwrap().unwrap();
    assert_eq!(again.tag, delivery.tag);
    assert_eq!(again.attempt, 1);
    assert!(again.redelivered);
}

#[tokio::test]
async fn release_consumer_returns_held_tasks() {
    let (pool, _container) = setup_test_db().await;
    let queue = declared_queue(&pool, "url_queue").await;

    queue.publish("https://a.test/").await.unwrap();
    let held = queue.receive("W1").await.unwrap().unwrap();

    assert_eq!(queue.release_consumer("W2").await.unwrap(), 0);
    assert_eq!(queue.release_consumer("W1").await.unwrap(), 1);

    let redelivered = queue.receive("W2").await.unwrap().unwrap();
    assert_eq!(redelivered.tag, held.tag);
    assert_eq!(redelivered.attempt, 0);
    assert!(redelivered.redelivered);
}

#[tokio::test]
async fn workers_of_two_crawl_processes_do_not_interfere() {
    let (pool, _container) = setup_test_db().await;
    let queue = declared_queue(&pool, "url_queue").await;

    queue.publish("https://a.test/1").await.unwrap();
    queue.publish("https://a.test/2").await.unwrap();

    let first_process = PoolConfig::default().with_workers(1);
    let second_process = PoolConfig::default().with_workers(1);
    let w1_a = first_process.worker_config(0).worker_id;
    let w1_b = second_process.worker_config(0).worker_id;
    assert_ne!(w1_a, w1_b);

    let held_a = queue.receive(&w1_a).await.unwrap().unwrap();
    let held_b = queue.receive(&w1_b).await.unwrap().unwrap();
    assert_ne!(held_a.tag, held_b.tag);

    // The second process shutting down only gives back its own delivery.
    assert_eq!(queue.release_consumer(&w1_b).await.unwrap(), 1);
    queue.ack(held_a.tag).await.unwrap();

    assert_eq!(
        queue.depth().await.unwrap(),
        QueueDepth {
            pending: 1,
            in_flight: 0
        }
    );
}

#[tokio::test]
async fn purge_discards_only_pending_tasks() {
    let (pool, _container) = setup_test_db().await;
    let queue = declared_queue(&pool, "url_queue").await;

    for i in 0..3 {
        queue.publish(&format!("https://a.test/{i}")).await.unwrap();
    }
    let held = queue.receive("W1").await.unwrap().unwrap();

    assert_eq!(queue.purge().await.unwrap(), 2);
    assert_eq!(
        queue.depth().await.unwrap(),
        QueueDepth {
            pending: 0,
            in_flight: 1
        }
    );
    queue.ack(held.tag).await.unwrap();
    assert_eq!(queue.purge().await.unwrap(), 0);
}

#[tokio::test]
async fn queues_are_isolated_by_name() {
    let (pool, _container) = setup_test_db().await;
    let crawl = declared_queue(&pool, "url_queue").await;
    let other = declared_queue(&pool, "other_queue").await;

    crawl.publish("https://a.test/").await.unwrap();

    assert!(other.receive("W1").await.unwrap().is_none());
    assert!(other.depth().await.unwrap().is_drained());
    assert_eq!(other.purge().await.unwrap(), 0);
    assert_eq!(crawl.depth().await.unwrap().pending, 1);
}

#[tokio::test]
async fn reclaim_expired_returns_stale_deliveries() {
    let (pool, _container) = setup_test_db().await;
    let queue = declared_queue(&pool, "url_queue").await;

    queue.publish("https://a.test/").await.unwrap();
    let held = queue.receive("crashed").await.unwrap().unwrap();

    assert_eq!(
        queue
            .reclaim_expired(Duration::from_secs(3600))
            .await
            .unwrap(),
        0
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        queue
            .reclaim_expired(Duration::from_millis(10))
            .await
            .unwrap(),
        1
    );

    let redelivered = queue.receive("W1").await.unwrap().unwrap();
    assert_eq!(redelivered.tag, held.tag);
    assert!(redelivered.redelivered);
    assert_eq!(queue.release_consumer("crashed").await.unwrap(), 0);
}

#[tokio::test]
async fn tasks_survive_a_database_restart() {
    let (pool, container) = setup_test_db().await;
    let queue = declared_queue(&pool, "url_queue").await;

    queue.publish("https://a.test/1").await.unwrap();
    queue.publish("https://a.test/2").await.unwrap();
    let held = queue.receive("W1").await.unwrap().unwrap();
    pool.close().await;

    container.stop().await.expect("Failed to stop container");
    container.start().await.expect("Failed to restart container");

    let pool = connect(&container).await;
    let queue = PgTaskQueue::new(pool, "url_queue");
    queue.declare().await.unwrap();

    assert_eq!(
        queue.depth().await.unwrap(),
        QueueDepth {
            pending: 1,
            in_flight: 1
        }
    );
    assert_eq!(queue.release_consumer("W1").await.unwrap(), 1);
    assert_eq!(
        queue.pending_urls(10).await.unwrap(),
        vec!["https://a.test/1", "https://a.test/2"]
    );

    let first = queue.receive("W1").await.unwrap().unwrap();
    assert_eq!(first.tag, held.tag);
}
