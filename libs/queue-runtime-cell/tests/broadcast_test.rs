mod common;

use std::sync::Arc;

use tokio::time::{timeout, Duration};
use uuid::Uuid;

use appointment_cell::{Notice, Notifier};
use common::{called, Harness};
use queue_runtime_cell::*;

#[tokio::test]
async fn schedule_subscribers_only_see_their_schedule() {
    let broadcaster = DisplayBroadcaster::new();
    let morning = Uuid::new_v4();
    let evening = Uuid::new_v4();

    let mut morning_rx = broadcaster.subscribe(morning).await;
    let mut evening_rx = broadcaster.subscribe(evening).await;

    broadcaster.publish(called(morning)).await.unwrap();

    let message = timeout(Duration::from_secs(1), morning_rx.recv()).await.unwrap().unwrap();
    let update: DisplayUpdate = serde_json::from_str(&message).unwrap();
    assert_eq!(update.schedule_id, Some(morning));
    assert!(matches!(update.notice, Notice::PatientCalled { queue_number: Some(2), .. }));

    assert!(evening_rx.try_recv().is_err());
}

#[tokio::test]
async fn global_feed_sees_everything() {
    let broadcaster = DisplayBroadcaster::default();
    let mut global = broadcaster.subscribe_global();

    broadcaster.publish(called(Uuid::new_v4())).await.unwrap();
    broadcaster
        .publish(Notice::PatientBlacklisted {
            patient_id: Uuid::new_v4(),
            no_show_count: 3,
        })
        .await
        .unwrap();

    let first: DisplayUpdate = serde_json::from_str(&global.recv().await.unwrap()).unwrap();
    let second: DisplayUpdate = serde_json::from_str(&global.recv().await.unwrap()).unwrap();
    assert!(first.schedule_id.is_some());
    assert!(second.schedule_id.is_none());
}

#[tokio::test]
async fn publishing_without_listeners_is_not_an_error() {
    let broadcaster = DisplayBroadcaster::new();
    assert!(broadcaster.notify(called(Uuid::new_v4())).await.is_ok());
}

#[tokio::test]
async fn clones_share_channels_and_idle_ones_are_pruned() {
    let broadcaster = DisplayBroadcaster::new();
    let cloned = broadcaster.clone();
    let kept = Uuid::new_v4();
    let dropped = Uuid::new_v4();

    let _kept_rx = broadcaster.subscribe(kept).await;
    drop(cloned.subscribe(dropped).await);

    let mut channels = broadcaster.get_active_channels().await;
    channels.sort();
    let mut expected = vec![kept, dropped];
    expected.sort();
    assert_eq!(channels, expected);

    assert_eq!(cloned.prune_idle_channels().await, 1);
    assert_eq!(broadcaster.get_active_channels().await, vec![kept]);

    broadcaster.remove_channel(kept).await;
    assert!(broadcaster.get_active_channels().await.is_empty());
}

#[tokio::test]
async fn engine_calls_reach_the_display() {
    let broadcaster = DisplayBroadcaster::new();
    let harness = Harness::new(2, Arc::new(broadcaster.clone())).await;
    let mut display = broadcaster.subscribe(harness.schedule_id).await;

    let patient = harness.patient("Mira").await;
    let booked = harness
        .engine
        .booking
        .book_appointment(appointment_cell::BookAppointmentRequest::regular(patient, harness.schedule_id))
        .await
        .unwrap();

    harness.clock.set(common::visit_day_at(8, 0));
    let issued = harness.engine.check_in.issue_token(booked.id).await.unwrap();
    harness.engine.check_in.redeem(&issued.token).await.unwrap();
    harness.engine.booking.call_next(harness.schedule_id).await.unwrap();

    let message = timeout(Duration::from_secs(1), display.recv()).await.unwrap().unwrap();
    let update: DisplayUpdate = serde_json::from_str(&message).unwrap();
    assert!(matches!(
        update.notice,
        Notice::PatientCalled { appointment_id, queue_number: Some(1), .. } if appointment_id == booked.id
    ));
}
