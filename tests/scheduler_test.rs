//! Scheduled publishing against a real SQLite database.

mod common;

use common::{wait_for, TestFixture};
use serde_json::{json, Value};
use sqlgate::publish::{PublishScheduler, PublishTransport, ScheduleState, TransportError};
use sqlgate::registry::Registry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Default)]
struct RecordingTransport {
    connected: AtomicBool,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl PublishTransport for RecordingTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

#[tokio::test]
async fn test_publishes_rows_once_connected() {
    let fixture = TestFixture::new();
    let registry = Registry::load([
        "mqtt;SELECT name, value FROM counters ORDER BY name;counters;20",
        "api;SELECT 1;/ignored",
    ]);
    let transport = Arc::new(RecordingTransport::default());
    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    let scheduler = PublishScheduler::spawn(
        &registry,
        fixture.gateway(),
        transport.clone(),
        "plant/",
        &tracker,
        token.clone(),
    );
    assert_eq!(scheduler.len(), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(transport.published.lock().unwrap().is_empty());
    assert_eq!(
        *scheduler.handles()[0].state.borrow(),
        ScheduleState::AwaitingTransport
    );

    transport.connected.store(true, Ordering::SeqCst);
    let published_twice = || transport.published.lock().unwrap().len() >= 2;
    assert!(wait_for(Duration::from_secs(2), published_twice).await);

    token.cancel();
    tracker.close();
    tracker.wait().await;

    let published = transport.published.lock().unwrap().clone();
    let (topic, payload) = &published[0];
    assert_eq!(topic, "plant/counters");
    let payload: Value = serde_json::from_slice(payload).unwrap();
    assert_eq!(
        payload,
        json!({"rows": [
            {"name": "big", "value": "9223372036854775807"},
            {"name": "small", "value": 42}
        ]})
    );
}

#[tokio::test]
async fn test_failing_query_keeps_cycling() {
    let fixture = TestFixture::new();
    let registry = Registry::load(["mqtt;SELECT * FROM no_such_table;broken;20"]);
    let transport = Arc::new(RecordingTransport::default());
    transport.connected.store(true, Ordering::SeqCst);
    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    let scheduler = PublishScheduler::spawn(
        &registry,
        fixture.gateway(),
        transport.clone(),
        "",
        &tracker,
        token.clone(),
    );
    let mut state = scheduler.handles()[0].state.clone();

    // Two distinct Failed transitions prove the loop survived the first.
    for _ in 0..2 {
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ScheduleState::Failed),
        )
        .await
        .expect("no failed cycle")
        .unwrap();
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s != ScheduleState::Failed),
        )
        .await
        .expect("loop stopped after failure")
        .unwrap();
    }

    token.cancel();
    tracker.close();
    tracker.wait().await;
    assert!(transport.published.lock().unwrap().is_empty());
}
