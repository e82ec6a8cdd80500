//! Staleness eviction

use chrono::{TimeZone, Utc};
use cotsync::ingest::{Notification, Transport};
use cotsync::sweep::StaleSweeper;

use super::support::{cot_xml, Harness, STALE_LATE, STALE_SOON};

fn seed(harness: &Harness) {
    for (uid, stale, detail) in [
        ("stale-live", STALE_SOON, ""),
        ("stale-archived", STALE_SOON, "<archive/>"),
        ("fresh-live", STALE_LATE, ""),
        ("fresh-archived", STALE_LATE, "<archive/>"),
    ] {
        let xml = cot_xml(uid, "a-f-G", stale, detail);
        harness.ingestor.ingest(Transport::Datagram, xml.as_bytes());
    }
    harness.drain();
}

fn uids(harness: &Harness) -> Vec<String> {
    let mut uids: Vec<String> = harness
        .store
        .list_entities()
        .unwrap()
        .into_iter()
        .map(|r| r.uid)
        .collect();
    uids.sort();
    uids
}

#[test]
fn test_sweep_removes_only_stale_live_records() {
    let harness = Harness::new();
    seed(&harness);
    let sweeper = StaleSweeper::new(harness.store.clone(), harness.bus.clone());

    let now = Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap();
    assert_eq!(sweeper.sweep_expired(now).unwrap(), 1);
    assert_eq!(
        uids(&harness),
        vec!["fresh-archived", "fresh-live", "stale-archived"]
    );
    assert!(matches!(
        &harness.drain()[..],
        [Notification::EntityRemoved { uid, .. }] if uid == "stale-live"
    ));

    assert_eq!(sweeper.sweep_expired(now).unwrap(), 0);
}

#[test]
fn test_clear_transient_keeps_archived() {
    let harness = Harness::new();
    seed(&harness);
    let sweeper = StaleSweeper::new(harness.store.clone(), harness.bus.clone());

    assert_eq!(sweeper.clear_transient().unwrap(), 2);
    assert_eq!(uids(&harness), vec!["fresh-archived", "stale-archived"]);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_sweep_runs_on_interval() {
    let harness = Harness::new();
    seed(&harness);
    let handle = StaleSweeper::new(harness.store.clone(), harness.bus.clone())
        .spawn(std::time::Duration::from_secs(15));

    // first tick fires immediately; records stale in 2024 are past due against the wall clock
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    assert!(!uids(&harness).contains(&"stale-live".to_string()));
    assert!(uids(&harness).contains(&"stale-archived".to_string()));
    handle.abort();
}
