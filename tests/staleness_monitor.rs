//! Staleness monitor against a real store and a recording sink

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use launcher::launch_log_store::{LaunchLogStore, SledLaunchLogStore, StatusUpdate};
use launcher::monitor::{MetricsSink, StalenessMonitor, StalenessReport, LONG_PENDING_GAUGE, PENDING_GAUGE};
use launcher::types::NewLaunchLog;
use launcher::LaunchLogStatus;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Default)]
struct RecordingSink {
    gauges: Mutex<HashMap<String, f64>>,
    writes: Mutex<usize>,
}

impl RecordingSink {
    fn value(&self, name: &str) -> Option<f64> {
        self.gauges.lock().unwrap().get(name).copied()
    }

    fn writes(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

impl MetricsSink for RecordingSink {
    fn gauge(&self, name: &str, value: f64) {
        self.gauges.lock().unwrap().insert(name.to_string(), value);
        *self.writes.lock().unwrap() += 1;
    }
}

fn log_created(minutes_ago: i64) -> NewLaunchLog {
    NewLaunchLog {
        from: common::FROM.to_string(),
        to: common::TO.to_string(),
        value: Decimal::ONE,
        gas_price: Decimal::ONE,
        data: Vec::new(),
        item_id: "1".to_string(),
        item_type: "t".to_string(),
        created_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
    }
}

async fn pending(store: &SledLaunchLogStore, minutes_ago: i64, nonce: u64) {
    let log = store.create(log_created(minutes_ago)).await.unwrap();
    store
        .update_status(StatusUpdate::dispatched(log.id, format!("0x{:04x}", nonce), nonce))
        .await
        .unwrap();
}

fn monitor(store: Arc<SledLaunchLogStore>, sink: Arc<RecordingSink>, interval: Duration) -> StalenessMonitor {
    StalenessMonitor::new(store, sink, interval, Duration::from_secs(600))
}

#[tokio::test]
async fn test_counts_pending_and_long_pending() {
    let db = common::temp_db();
    let store = Arc::new(SledLaunchLogStore::open(&db).unwrap());
    for (i, age) in [11, 11, 1, 2, 3].into_iter().enumerate() {
        pending(&store, age, i as u64).await;
    }
    // Old but no longer pending: ignored
    let done = store.create(log_created(60)).await.unwrap();
    store
        .update_status(StatusUpdate::to(done.id, LaunchLogStatus::Failed))
        .await
        .unwrap();
    store.create(log_created(60)).await.unwrap();

    let sink = Arc::new(RecordingSink::default());
    let report = monitor(store, sink.clone(), Duration::from_secs(10))
        .tick(Utc::now())
        .await
        .unwrap();

    assert_eq!(report, StalenessReport { pending: 5, long_pending: 2 });
    assert_eq!(sink.value(PENDING_GAUGE), Some(5.0));
    assert_eq!(sink.value(LONG_PENDING_GAUGE), Some(2.0));
}

#[tokio::test]
async fn test_empty_store_reports_zero() {
    let db = common::temp_db();
    let store = Arc::new(SledLaunchLogStore::open(&db).unwrap());
    let sink = Arc::new(RecordingSink::default());

    let report = monitor(store, sink.clone(), Duration::from_secs(10))
        .tick(Utc::now())
        .await
        .unwrap();
    assert_eq!(report, StalenessReport { pending: 0, long_pending: 0 });
    assert_eq!(sink.value(PENDING_GAUGE), Some(0.0));
    assert_eq!(sink.value(LONG_PENDING_GAUGE), Some(0.0));
}

#[tokio::test]
async fn test_threshold_is_relative_to_tick_time() {
    let db = common::temp_db();
    let store = Arc::new(SledLaunchLogStore::open(&db).unwrap());
    pending(&store, 5, 1).await;
    let sink = Arc::new(RecordingSink::default());
    let monitor = monitor(store, sink, Duration::from_secs(10));

    let now = monitor.tick(Utc::now()).await.unwrap();
    assert_eq!(now.long_pending, 0);

    let later = monitor
        .tick(Utc::now() + ChronoDuration::minutes(6))
        .await
        .unwrap();
    assert_eq!(later.long_pending, 1);
}

#[tokio::test]
async fn test_run_reports_periodically_and_stops() {
    let db = common::temp_db();
    let store = Arc::new(SledLaunchLogStore::open(&db).unwrap());
    pending(&store, 20, 1).await;
    let sink = Arc::new(RecordingSink::default());
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(monitor(store, sink.clone(), Duration::from_millis(20)).run(rx));

    for _ in 0..100 {
        if sink.writes() >= 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(sink.writes() >= 4, "expected at least two ticks");
    assert_eq!(sink.value(LONG_PENDING_GAUGE), Some(1.0));

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("monitor did not stop")
        .unwrap();
}
