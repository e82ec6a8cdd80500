//! Subscription lifecycle against an in-memory mission server

use std::sync::Arc;

use cotsync::error::SyncError;
use cotsync::ingest::{Notification, Transport};
use cotsync::mission::{MissionApi, MissionDescriptor, RetryPolicy, SubscriptionController, SubscriptionState};
use chrono::{TimeZone, Utc};

use super::support::{descriptor, marker, FakeMissionApi, Harness};

const HOST: &str = "tak.example.org";

fn controller(harness: &Harness, api: &Arc<FakeMissionApi>) -> SubscriptionController {
    let api: Arc<dyn MissionApi> = api.clone();
    SubscriptionController::new(
        harness.ingestor.clone(),
        api,
        HOST,
        "cotsync-test",
        RetryPolicy::none(),
    )
}

#[tokio::test]
async fn test_subscribe_reconciles_and_downloads() {
    let harness = Harness::new();
    let api = FakeMissionApi::new();
    api.add_mission(descriptor("alpha", &["A", "B"]), None);
    api.add_cot("A", marker("A"));
    api.add_cot("B", marker("B"));
    let controller = controller(&harness, &api);

    let sync = controller.subscribe("alpha", None).await.unwrap();
    assert_eq!(controller.state("alpha"), SubscriptionState::Subscribed);
    assert_eq!(sync.report.to_fetch, vec!["A", "B"]);
    assert_eq!(sync.mission.token.as_deref(), Some("token-alpha"));

    let summary = sync.download.await.unwrap();
    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.failed, 0);

    let items = harness.store.mission_items(sync.mission.mission_id).unwrap();
    for item in &items {
        let entity = harness.store.find_entity_by_uid(&item.uid).unwrap().unwrap();
        assert_eq!(item.entity_id, Some(entity.local_id));
        assert!(entity.archived, "mission content is kept through sweeps");
    }
    assert!(harness.drain().iter().any(|n| matches!(
        n,
        Notification::MissionDownloadCompleted { mission, fetched: 2, .. } if mission == "alpha"
    )));
}

#[tokio::test]
async fn test_bad_password_then_prompt() {
    let harness = Harness::new();
    let api = FakeMissionApi::new();
    api.add_mission(descriptor("secret", &[]), Some("hunter2"));
    let controller = controller(&harness, &api);

    let err = controller.subscribe("secret", Some("wrong")).await.unwrap_err();
    assert!(matches!(err, SyncError::BadMissionPassword(ref name) if name == "secret"));
    assert!(err.is_user_visible());
    assert_eq!(controller.state("secret"), SubscriptionState::Unsubscribed);
    assert!(harness.store.find_mission(HOST, "secret").unwrap().is_none());

    let sync = controller
        .complete_password_prompt("secret", "hunter2")
        .await
        .unwrap();
    assert_eq!(sync.mission.password.as_deref(), Some("hunter2"));
    assert_eq!(controller.state("secret"), SubscriptionState::Subscribed);
}

#[tokio::test]
async fn test_double_subscribe_is_rejected() {
    let harness = Harness::new();
    let api = FakeMissionApi::new();
    api.add_mission(descriptor("alpha", &[]), None);
    let controller = controller(&harness, &api);

    controller.subscribe("alpha", None).await.unwrap();
    let err = controller.subscribe("alpha", None).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidState { action: "subscribe", .. }));
}

#[tokio::test]
async fn test_reconnect_uses_cached_password() {
    let harness = Harness::new();
    let api = FakeMissionApi::new();
    api.add_mission(descriptor("secret", &["A"]), Some("hunter2"));
    api.add_cot("A", marker("A"));
    let controller = controller(&harness, &api);
    controller.subscribe("secret", Some("hunter2")).await.unwrap();

    api.add_mission(descriptor("secret", &["A", "B"]), Some("hunter2"));
    let results = controller.on_reconnect().await;
    assert_eq!(results.len(), 1);
    let sync = results.into_iter().next().unwrap().1.unwrap();
    assert_eq!(sync.report.to_add, vec!["B"]);
    assert_eq!(
        api.subscribe_passwords(),
        vec![Some("hunter2".to_string()), Some("hunter2".to_string())]
    );
    assert_eq!(controller.state("secret"), SubscriptionState::Subscribed);
}

#[tokio::test]
async fn test_failed_reconnect_stays_subscribed() {
    let harness = Harness::new();
    let api = FakeMissionApi::new();
    api.add_mission(descriptor("alpha", &[]), None);
    let controller = controller(&harness, &api);
    controller.subscribe("alpha", None).await.unwrap();

    api.set_unreachable(true);
    let results = controller.on_reconnect().await;
    assert!(matches!(results[0].1, Err(SyncError::ServerUnreachable(_))));
    assert_eq!(controller.state("alpha"), SubscriptionState::Subscribed);
}

#[tokio::test]
async fn test_reconnect_resubscribes_in_background() {
    let harness = Harness::new();
    let api = FakeMissionApi::new();
    api.add_mission(descriptor("alpha", &[]), None);
    let controller = Arc::new(controller(&harness, &api));
    controller.subscribe("alpha", None).await.unwrap();

    api.add_mission(descriptor("alpha", &["A"]), None);
    api.add_cot("A", marker("A"));
    let resubscribe = controller.spawn_reconnect();
    assert!(!resubscribe.is_finished(), "caller is not held up by the server round trips");

    let report = harness
        .ingestor
        .ingest(Transport::Stream, marker("LIVE").as_bytes());
    assert_eq!(report.upserted.len(), 1);

    let results = resubscribe.await.unwrap();
    assert_eq!(results.len(), 1);
    let sync = results.into_iter().next().unwrap().1.unwrap();
    assert_eq!(sync.report.to_fetch, vec!["A"]);
    sync.download.await.unwrap();
    assert!(harness.store.find_entity_by_uid("A").unwrap().is_some());
    assert_eq!(controller.state("alpha"), SubscriptionState::Subscribed);
}

#[tokio::test]
async fn test_subscribe_without_password_keeps_cached_one() {
    let harness = Harness::new();
    let api = FakeMissionApi::new();
    api.add_mission(descriptor("alpha", &[]), None);
    controller(&harness, &api)
        .subscribe("alpha", Some("pw"))
        .await
        .unwrap();

    let restarted = controller(&harness, &api);
    let sync = restarted.subscribe("alpha", None).await.unwrap();
    assert_eq!(sync.mission.password.as_deref(), Some("pw"));
    let record = harness.store.find_mission(HOST, "alpha").unwrap().unwrap();
    assert_eq!(record.password.as_deref(), Some("pw"));
}

#[tokio::test]
async fn test_unsubscribe_is_local_first() {
    let harness = Harness::new();
    let api = FakeMissionApi::new();
    api.add_mission(descriptor("alpha", &["A"]), None);
    api.add_cot("A", marker("A"));
    let controller = controller(&harness, &api);
    let sync = controller.subscribe("alpha", None).await.unwrap();
    sync.download.await.unwrap();
    assert!(harness.store.find_entity_by_uid("A").unwrap().is_some());

    api.set_fail_unsubscribe(true);
    controller.unsubscribe("alpha").await.unwrap();

    assert_eq!(controller.state("alpha"), SubscriptionState::Unsubscribed);
    assert!(harness.store.find_mission(HOST, "alpha").unwrap().is_none());
    assert!(harness.store.find_entity_by_uid("A").unwrap().is_none());
    assert_eq!(api.unsubscribed(), vec!["alpha"]);
}

#[tokio::test]
async fn test_refresh_requires_subscription() {
    let harness = Harness::new();
    let api = FakeMissionApi::new();
    api.add_mission(descriptor("alpha", &["A"]), None);
    let controller = controller(&harness, &api);

    assert!(matches!(
        controller.refresh("alpha").await,
        Err(SyncError::InvalidState { .. })
    ));

    controller.subscribe("alpha", None).await.unwrap();
    api.add_mission(descriptor("alpha", &[]), None);
    let sync = controller.refresh("alpha").await.unwrap();
    assert_eq!(sync.report.to_remove, vec!["A"]);
    assert_eq!(controller.state("alpha"), SubscriptionState::Subscribed);
}

#[tokio::test]
async fn test_mission_list_keeps_cached_credentials() {
    let harness = Harness::new();
    let api = FakeMissionApi::new();
    api.add_mission(
        MissionDescriptor {
            description: "recon".to_string(),
            create_time: Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()),
            ..descriptor("alpha", &[])
        },
        Some("pw"),
    );
    api.add_mission(descriptor("bravo", &[]), None);
    let controller = controller(&harness, &api);
    controller.subscribe("alpha", Some("pw")).await.unwrap();

    let records = controller.refresh_mission_list().await.unwrap();
    assert_eq!(records.len(), 2);
    let alpha = harness.store.find_mission(HOST, "alpha").unwrap().unwrap();
    assert_eq!(alpha.password.as_deref(), Some("pw"));
    assert_eq!(alpha.token.as_deref(), Some("token-alpha"));
    assert_eq!(alpha.description, "recon");
    let bravo = harness.store.find_mission(HOST, "bravo").unwrap().unwrap();
    assert_eq!(bravo.password, None);
}
