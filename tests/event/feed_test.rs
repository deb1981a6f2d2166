// Feed Tests
// Tests for subscriber fan-out and revocable subscriptions

use syncpeers::event::Feed;
use tokio::sync::mpsc;

#[test]
fn test_send_without_subscribers() {
    let feed: Feed<u32> = Feed::new("empty");
    assert_eq!(feed.send(1), 0);
    assert_eq!(feed.subscriber_count(), 0);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let feed = Feed::new("test");
    let (tx, mut rx) = mpsc::channel(4);
    let sub = feed.subscribe(tx);
    assert!(sub.is_active());

    feed.send("first");
    sub.unsubscribe();
    feed.send("second");

    assert_eq!(rx.try_recv().unwrap(), "first");
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_subscription_outlives_feed() {
    let feed = Feed::new("short-lived");
    let (tx, _rx) = mpsc::channel::<u8>(1);
    let sub = feed.subscribe(tx);
    drop(feed);
    assert!(!sub.is_active());
    sub.unsubscribe();
}

#[test]
fn test_slow_subscriber_does_not_starve_others() {
    let feed = Feed::new("test");
    let (slow_tx, _slow_rx) = mpsc::channel(1);
    let (fast_tx, mut fast_rx) = mpsc::channel(16);
    let _slow = feed.subscribe(slow_tx);
    let _fast = feed.subscribe(fast_tx);

    for n in 0..10u32 {
        feed.send(n);
    }

    let received: Vec<u32> = std::iter::from_fn(|| fast_rx.try_recv().ok()).collect();
    assert_eq!(received, (0..10).collect::<Vec<_>>());
    assert_eq!(feed.dropped_count(), 9);
}

#[tokio::test]
async fn test_delivery_to_async_receiver() {
    let feed = Feed::new("async");
    let (tx, mut rx) = mpsc::channel(1);
    let _sub = feed.subscribe(tx);

    let handle = tokio::spawn(async move { rx.recv().await });
    feed.send(42u64);

    assert_eq!(handle.await.unwrap(), Some(42));
}
