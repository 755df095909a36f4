mod common;

use common::{fast_config, send_ids, wait_until};
use servicekit::common::{HandlerError, ServiceBusError};
use servicekit::consumer::{Consumer, ConsumerState, MessageContext};
use servicekit::service_bus::InMemoryServiceBus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

async fn idle_consumer(bus: &InMemoryServiceBus, workers: usize, receive_timeout: Duration) -> Consumer {
    let config = fast_config("orders")
        .with_max_concurrent(workers)
        .with_receive_timeout(receive_timeout);
    Consumer::new(bus, config, |_ctx: MessageContext| async {
        Ok::<(), HandlerError>(())
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_each_worker_keeps_a_receive_outstanding() {
    let bus = InMemoryServiceBus::new();
    let consumer = idle_consumer(&bus, 4, Duration::from_millis(500)).await;

    consumer.start(CancellationToken::new()).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(1), || async {
            bus.peak_concurrent_receives() == 4
        })
        .await
    );
    assert_eq!(consumer.active_workers().await, 4);

    consumer.stop(None).await.unwrap();
    assert_eq!(bus.peak_concurrent_receives(), 4);
}

#[tokio::test]
async fn test_receive_errors_back_off_and_never_stop_polling() {
    let bus = InMemoryServiceBus::new();
    bus.set_receive_error(Some(ServiceBusError::MessageReceiveFailed(
        "connection reset".to_string(),
    )))
    .await;

    let config = fast_config("orders").with_receive_error_backoff(Duration::from_millis(100));
    let consumer = Consumer::new(&bus, config, |_ctx: MessageContext| async {
        Ok::<(), HandlerError>(())
    })
    .await
    .unwrap();

    consumer.start(CancellationToken::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(550)).await;

    // At most one attempt per backoff interval, plus the first one.
    let calls = bus.receive_calls();
    assert!(calls >= 3, "expected repeated receive attempts, got {calls}");
    assert!(calls <= 7, "receive retried faster than the backoff: {calls}");
    assert_eq!(consumer.state(), ConsumerState::Running);
    assert_eq!(consumer.active_workers().await, 1);

    bus.set_receive_error(None).await;
    send_ids(&bus, "orders", &["after-outage"]).await;
    assert!(
        wait_until(Duration::from_secs(2), || async {
            bus.completed_ids().await == vec!["after-outage".to_string()]
        })
        .await
    );

    consumer.stop(None).await.unwrap();
}

#[tokio::test]
async fn test_receive_timeouts_are_not_backed_off() {
    let bus = InMemoryServiceBus::new();
    bus.fail_next_receives_with_timeout(3).await;
    send_ids(&bus, "orders", &["late"]).await;

    // A long backoff would delay the message if timeouts were treated as errors.
    let config = fast_config("orders").with_receive_error_backoff(Duration::from_secs(10));
    let consumer = Consumer::new(&bus, config, |_ctx: MessageContext| async {
        Ok::<(), HandlerError>(())
    })
    .await
    .unwrap();

    consumer.start(CancellationToken::new()).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(1), || async {
            bus.completed_ids().await == vec!["late".to_string()]
        })
        .await
    );
    consumer.stop(None).await.unwrap();
}

#[tokio::test]
async fn test_idle_stop_returns_within_one_receive_timeout() {
    let bus = InMemoryServiceBus::new();
    let consumer = idle_consumer(&bus, 3, Duration::from_millis(200)).await;

    consumer.start(CancellationToken::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    consumer.stop(None).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(600), "stop took {elapsed:?}");
    assert_eq!(consumer.state(), ConsumerState::Stopped);
    assert_eq!(consumer.active_workers().await, 0);
    assert_eq!(bus.closed_receivers().await, 1);
}

#[tokio::test]
async fn test_stop_with_hung_handler_honours_deadline() {
    let bus = InMemoryServiceBus::new();
    send_ids(&bus, "orders", &["stuck"]).await;

    let entered = Arc::new(AtomicBool::new(false));
    let flag = entered.clone();
    let consumer = Consumer::new(&bus, fast_config("orders"), move |_ctx: MessageContext| {
        let flag = flag.clone();
        async move {
            flag.store(true, Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok::<(), HandlerError>(())
        }
    })
    .await
    .unwrap();

    consumer.start(CancellationToken::new()).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(1), || async {
            entered.load(Ordering::SeqCst)
        })
        .await
    );

    let started = Instant::now();
    consumer.stop(Some(Duration::from_millis(200))).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(200), "stop took {elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "stop took {elapsed:?}");
    assert_eq!(consumer.state(), ConsumerState::Stopped);
    assert_eq!(bus.closed_receivers().await, 1);
    assert!(bus.completed_ids().await.is_empty());
    // The lock held by the closed receiver lapses and the message is visible again.
    assert_eq!(bus.message_count("orders").await, 1);
}

#[tokio::test]
async fn test_shutdown_timeout_caps_a_longer_deadline() {
    let bus = InMemoryServiceBus::new();
    send_ids(&bus, "orders", &["stuck"]).await;

    let entered = Arc::new(AtomicBool::new(false));
    let flag = entered.clone();
    let config = fast_config("orders").with_shutdown_timeout(Duration::from_millis(100));
    let consumer = Consumer::new(&bus, config, move |_ctx: MessageContext| {
        let flag = flag.clone();
        async move {
            flag.store(true, Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok::<(), HandlerError>(())
        }
    })
    .await
    .unwrap();

    consumer.start(CancellationToken::new()).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(1), || async {
            entered.load(Ordering::SeqCst)
        })
        .await
    );

    let started = Instant::now();
    consumer.stop(Some(Duration::from_secs(30))).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(bus.closed_receivers().await, 1);
}

#[tokio::test]
async fn test_cooperative_handler_finishes_during_stop() {
    let bus = InMemoryServiceBus::new();
    send_ids(&bus, "orders", &["long-running"]).await;

    let entered = Arc::new(AtomicBool::new(false));
    let flag = entered.clone();
    let consumer = Consumer::new(&bus, fast_config("orders"), move |ctx: MessageContext| {
        let flag = flag.clone();
        async move {
            flag.store(true, Ordering::SeqCst);
            ctx.cancelled().await;
            Ok::<(), HandlerError>(())
        }
    })
    .await
    .unwrap();

    consumer.start(CancellationToken::new()).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(1), || async {
            entered.load(Ordering::SeqCst)
        })
        .await
    );

    consumer.stop(Some(Duration::from_secs(1))).await.unwrap();
    assert_eq!(bus.completed_ids().await, vec!["long-running".to_string()]);
}

#[tokio::test]
async fn test_caller_cancellation_interrupts_receives() {
    let bus = InMemoryServiceBus::new();
    let consumer = idle_consumer(&bus, 2, Duration::from_secs(30)).await;

    let cancel = CancellationToken::new();
    consumer.start(cancel.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(consumer.active_workers().await, 2);

    cancel.cancel();
    assert!(
        wait_until(Duration::from_secs(1), || async {
            consumer.active_workers().await == 0
        })
        .await
    );

    // Workers are gone, the receiver stays open until stop.
    assert_eq!(bus.closed_receivers().await, 0);
    consumer.stop(None).await.unwrap();
    assert_eq!(bus.closed_receivers().await, 1);
}

#[tokio::test]
async fn test_handler_sees_worker_metadata() {
    let bus = InMemoryServiceBus::new();
    send_ids(&bus, "orders", &["meta"]).await;

    let workers_seen = Arc::new(AtomicUsize::new(usize::MAX));
    let seen = workers_seen.clone();
    let config = fast_config("orders").with_max_concurrent(1);
    let consumer = Consumer::new(&bus, config, move |ctx: MessageContext| {
        let seen = seen.clone();
        async move {
            assert_eq!(ctx.correlation_id, "meta");
            assert_eq!(ctx.message.delivery_count, 1);
            seen.store(ctx.worker_id, Ordering::SeqCst);
            Ok::<(), HandlerError>(())
        }
    })
    .await
    .unwrap();

    consumer.start(CancellationToken::new()).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(1), || async {
            bus.completed_ids().await.len() == 1
        })
        .await
    );
    consumer.stop(None).await.unwrap();
    assert_eq!(workers_seen.load(Ordering::SeqCst), 0);
}
