use std::time::Duration;

use serde_json::json;
use sfs::bus::{BusError, EventBus};
use sfs::config::BusConfig;

fn start(config: BusConfig) -> EventBus {
    let (bus, _hub) = EventBus::start(config);
    bus
}

/// Wait until the hub has handled everything sent before this call.
async fn settle(bus: &EventBus) {
    bus.stats().await.unwrap();
}

async fn recv_json(stream: &mut sfs::bus::Stream) -> serde_json::Value {
    let message = tokio::time::timeout(Duration::from_secs(1), stream.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("stream closed");
    message.decode().unwrap()
}

#[tokio::test]
async fn test_every_subscriber_gets_each_message() {
    let bus = start(BusConfig::default());
    let mut a = bus.subscribe("file").await.unwrap();
    let mut b = bus.subscribe("file").await.unwrap();
    let mut other = bus.subscribe("user.u1").await.unwrap();

    bus.publish("file", &json!({"FileID": "0000001", "State": "saved"}))
        .unwrap();
    settle(&bus).await;

    assert_eq!(recv_json(&mut a).await["FileID"], "0000001");
    assert_eq!(recv_json(&mut b).await["State"], "saved");
    assert!(other.try_recv().is_none());
}

#[tokio::test]
async fn test_publish_order_preserved() {
    let bus = start(BusConfig::default());
    let mut stream = bus.subscribe("file").await.unwrap();

    for n in 0..10 {
        bus.publish("file", &n).unwrap();
    }
    for n in 0..10 {
        assert_eq!(recv_json(&mut stream).await, json!(n));
    }
}

#[tokio::test]
async fn test_publish_without_subscribers_is_dropped() {
    let bus = start(BusConfig::default());
    bus.publish("user.nobody", &"lost").unwrap();
    settle(&bus).await;

    let mut late = bus.subscribe("user.nobody").await.unwrap();
    settle(&bus).await;
    assert!(late.try_recv().is_none());
    assert_eq!(bus.stats().await.unwrap().backlog_topics, 0);
}

#[tokio::test]
async fn test_fire_once_backlog_goes_to_first_subscriber() {
    let bus = start(BusConfig::default());
    bus.publish("once.widget.r1", &"m1").unwrap();
    bus.publish("once.widget.r1", &"m2").unwrap();
    settle(&bus).await;

    let stats = bus.stats().await.unwrap();
    assert_eq!(stats.backlog_topics, 1);
    assert_eq!(stats.backlog_messages, 2);

    let mut first = bus.subscribe("once.widget.r1").await.unwrap();
    assert_eq!(recv_json(&mut first).await, json!("m1"));
    assert_eq!(recv_json(&mut first).await, json!("m2"));
    assert!(first.try_recv().is_none());

    let mut second = bus.subscribe("once.widget.r1").await.unwrap();
    settle(&bus).await;
    assert!(second.try_recv().is_none());
    assert_eq!(bus.stats().await.unwrap().backlog_messages, 0);
}

#[tokio::test]
async fn test_abandoned_subscribe_keeps_backlog() {
    let bus = start(BusConfig::default());
    bus.publish("once.widget.r1", &"m1").unwrap();

    // The caller gives up before the hub registers the stream
    let abandoned = tokio::time::timeout(Duration::ZERO, bus.subscribe("once.widget.r1")).await;
    assert!(abandoned.is_err());

    let stats = bus.stats().await.unwrap();
    assert_eq!(stats.backlog_messages, 1);
    assert_eq!(stats.subscribers, 0);

    let mut stream = bus.subscribe("once.widget.r1").await.unwrap();
    assert_eq!(recv_json(&mut stream).await, json!("m1"));
}

#[tokio::test]
async fn test_backlog_limit_drops_oldest() {
    let bus = start(BusConfig {
        backlog_limit: 2,
        ..Default::default()
    });
    for m in ["m1", "m2", "m3"] {
        bus.publish("once.widget.r1", &m).unwrap();
    }

    let mut stream = bus.subscribe("once.widget.r1").await.unwrap();
    assert_eq!(recv_json(&mut stream).await, json!("m2"));
    assert_eq!(recv_json(&mut stream).await, json!("m3"));
    assert!(stream.try_recv().is_none());
}

#[tokio::test]
async fn test_unclaimed_backlog_expires() {
    let bus = start(BusConfig {
        backlog_ttl: Duration::from_millis(50),
        ..Default::default()
    });
    bus.publish("once.widget.r1", &"m1").unwrap();
    settle(&bus).await;
    assert_eq!(bus.stats().await.unwrap().backlog_topics, 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(bus.stats().await.unwrap().backlog_topics, 0);

    let mut stream = bus.subscribe("once.widget.r1").await.unwrap();
    settle(&bus).await;
    assert!(stream.try_recv().is_none());
}

#[tokio::test]
async fn test_slow_subscriber_only_loses_its_own_messages() {
    let bus = start(BusConfig {
        subscriber_capacity: 2,
        ..Default::default()
    });
    let mut slow = bus.subscribe("file").await.unwrap();
    let mut fast = bus.subscribe("file").await.unwrap();

    for n in 0..5 {
        bus.publish("file", &n).unwrap();
        // The fast subscriber keeps up
        assert_eq!(recv_json(&mut fast).await, json!(n));
    }

    // The slow one kept the oldest messages that fit, the rest were dropped
    assert_eq!(recv_json(&mut slow).await, json!(0));
    assert_eq!(recv_json(&mut slow).await, json!(1));
    assert!(slow.try_recv().is_none());

    // And it is still subscribed
    bus.publish("file", &"after").unwrap();
    assert_eq!(recv_json(&mut slow).await, json!("after"));
}

#[tokio::test]
async fn test_unsubscribe_closes_stream() {
    let bus = start(BusConfig::default());
    let mut stream = bus.subscribe("file").await.unwrap();
    let mut other = bus.subscribe("file").await.unwrap();

    stream.unsubscribe().await;
    bus.publish("file", &"m1").unwrap();

    assert!(stream.recv().await.is_none());
    assert_eq!(recv_json(&mut other).await, json!("m1"));

    let stats = bus.stats().await.unwrap();
    assert_eq!(stats.subscribers, 1);
}

#[tokio::test]
async fn test_dropped_stream_is_removed() {
    let bus = start(BusConfig::default());
    let stream = bus.subscribe("user.u1").await.unwrap();
    assert_eq!(bus.stats().await.unwrap().topics, 1);

    drop(stream);
    let stats = bus.stats().await.unwrap();
    assert_eq!(stats.topics, 0);
    assert_eq!(stats.subscribers, 0);
}

#[tokio::test]
async fn test_close_ends_streams_and_rejects_publish() {
    let (bus, hub) = EventBus::start(BusConfig::default());
    let mut a = bus.subscribe("file").await.unwrap();
    let mut b = bus.subscribe("user.u1").await.unwrap();

    bus.close();
    hub.await.unwrap();

    assert!(a.recv().await.is_none());
    assert!(b.recv().await.is_none());
    assert!(matches!(bus.publish("file", &"late"), Err(BusError::Closed)));
    assert!(matches!(bus.subscribe("file").await, Err(BusError::Closed)));
}

#[tokio::test]
async fn test_stats_count_topics_and_subscribers() {
    let bus = start(BusConfig::default());
    let _a = bus.subscribe("file").await.unwrap();
    let _b = bus.subscribe("file").await.unwrap();
    let _c = bus.subscribe("user.u1").await.unwrap();
    bus.publish("once.widget.r9", &"m").unwrap();

    let stats = bus.stats().await.unwrap();
    assert_eq!(stats.topics, 2);
    assert_eq!(stats.subscribers, 3);
    assert_eq!(stats.backlog_topics, 1);
    assert_eq!(stats.backlog_messages, 1);
}
