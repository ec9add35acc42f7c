//! End-to-end tests for the tracking service on the simulated platform

use geofence_tracker::domain::error::PlatformError;
use geofence_tracker::domain::types::{GeographicPoint, TransitionKind, ZoneId};
use geofence_tracker::infra::{Config, Metrics};
use geofence_tracker::io::sim::{encode_event, SimOp};
use geofence_tracker::io::{Platform, SimPlatform, TransitionReceiver};
use geofence_tracker::services::{Phase, TrackingService};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn start_point() -> GeographicPoint {
    GeographicPoint::new(-23.5505, -46.6333)
}

fn create_service() -> (TrackingService, Arc<SimPlatform>) {
    let sim = Arc::new(SimPlatform::new(start_point()));
    let service = TrackingService::new(
        Config::default(),
        Platform::from_shared(sim.clone()),
        Arc::new(Metrics::new()),
    );
    (service, sim)
}

/// Poll until `cond` holds or the wait budget runs out
async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

fn zone_centered_near(sim: &SimPlatform, point: GeographicPoint) -> bool {
    sim.zone(&ZoneId::fixed()).is_some_and(|z| z.center.distance_m(&point) < 1.0)
}

#[tokio::test]
async fn test_start_installs_zone_around_subject() {
    let (mut service, sim) = create_service();

    service.start();

    assert!(eventually(|| zone_centered_near(&sim, start_point())).await);
    assert_eq!(
        sim.indicator(),
        Some(("Location Updater".to_string(), "ic_person_pin_circle".to_string()))
    );
    assert!(
        service
            .wait_for_status(WAIT, |s| s.phase == Phase::Idle && s.current_zone_id.is_some())
            .await
    );

    service.stop().await;
}

#[tokio::test]
async fn test_start_twice_keeps_one_session() {
    let (mut service, sim) = create_service();

    let first = service.start();
    let second = service.start();

    assert_eq!(first, second);
    assert!(eventually(|| sim.registered_zones().len() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sim.count_ops(|op| matches!(op, SimOp::SettingsCheck)), 1);

    service.stop().await;
}

#[tokio::test]
async fn test_walking_out_recenters_zone() {
    let (mut service, sim) = create_service();
    service.start();
    assert!(eventually(|| zone_centered_near(&sim, start_point())).await);

    let mut position = start_point();
    for leg in 1..=3 {
        position = position.offset(90.0, 400.0);
        sim.move_to(position);
        assert!(eventually(|| zone_centered_near(&sim, position)).await, "leg {leg}");
        assert_eq!(sim.registered_zones().len(), 1);
    }

    assert!(service.wait_for_status(WAIT, |s| s.cycle == 4 && s.phase == Phase::Idle).await);
    assert_eq!(service.metrics().report().exits_received, 3);
    assert_eq!(service.metrics().live_workers(), 0);

    service.stop().await;
}

#[tokio::test]
async fn test_foreign_exit_still_recenters() {
    let (mut service, sim) = create_service();
    service.start();
    assert!(eventually(|| sim.registered_zones().len() == 1).await);

    // Subject drifts inside the zone; a spurious EXIT still triggers a fix
    let drifted = start_point().offset(0.0, 50.0);
    sim.move_to(drifted);
    sim.fire_transition(TransitionKind::Exit, &[ZoneId::fixed()]);

    assert!(eventually(|| zone_centered_near(&sim, drifted)).await);
    service.stop().await;
}

#[tokio::test]
async fn test_payload_through_notify_target_recenters() {
    let (mut service, sim) = create_service();
    service.start();
    assert!(eventually(|| sim.registered_zones().len() == 1).await);

    // A platform binding hands raw payloads to the registered target
    let drifted = start_point().offset(270.0, 60.0);
    sim.move_to(drifted);
    let payload = encode_event(TransitionKind::Exit, vec![ZoneId::fixed()], Some(drifted));
    service.notify_target().on_transition(&payload);

    assert!(eventually(|| zone_centered_near(&sim, drifted)).await);
    assert_eq!(service.metrics().report().exits_received, 1);
    service.stop().await;
}

#[tokio::test]
async fn test_stop_releases_everything() {
    let (mut service, sim) = create_service();
    service.start();
    assert!(eventually(|| sim.registered_zones().len() == 1).await);

    // Leave a fix request in flight
    sim.hold_fixes(true);
    sim.move_to(start_point().offset(180.0, 500.0));
    assert!(eventually(|| sim.active_subscriptions() == 1).await);

    service.stop().await;

    assert!(!service.is_active());
    assert!(sim.registered_zones().is_empty());
    assert_eq!(sim.active_subscriptions(), 0);
    assert_eq!(sim.indicator(), None);
    assert_eq!(service.metrics().live_workers(), 0);

    // Second stop is a no-op
    let ops = sim.ops().len();
    service.stop().await;
    assert_eq!(sim.ops().len(), ops);
}

#[tokio::test]
async fn test_restart_after_stop_begins_new_session() {
    let (mut service, sim) = create_service();
    let first = service.start();
    assert!(eventually(|| sim.registered_zones().len() == 1).await);
    service.stop().await;

    let second = service.start();
    assert_ne!(first, second);
    assert!(eventually(|| sim.registered_zones().len() == 1).await);
    service.stop().await;
}

#[tokio::test]
async fn test_location_disabled_installs_nothing() {
    let (mut service, sim) = create_service();
    sim.fail_settings(Some(PlatformError::LocationDisabled));

    service.start();
    assert!(eventually(|| service.metrics().report().settings_failed == 1).await);

    assert!(sim.registered_zones().is_empty());
    assert_eq!(sim.count_ops(|op| matches!(op, SimOp::RequestUpdates)), 0);
    service.stop().await;
}
