//! One-shot location fix requests
//!
//! A request first runs the platform settings check, then starts a fix
//! worker: a dedicated task holding a location update subscription. The
//! worker forwards the first fix to the controller and ends, dropping the
//! subscription. Teardown is guaranteed: `terminate()` aborts and joins,
//! and dropping a `FixWorker` aborts it.

use crate::domain::error::TrackerError;
use crate::domain::types::FixRequestPolicy;
use crate::infra::metrics::Metrics;
use crate::io::platform::{LocationProvider, LocationSettings};
use crate::services::controller::ControllerEvent;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct LocationFixRequester {
    settings: Arc<dyn LocationSettings>,
    locations: Arc<dyn LocationProvider>,
    metrics: Arc<Metrics>,
}

impl LocationFixRequester {
    pub fn new(
        settings: Arc<dyn LocationSettings>,
        locations: Arc<dyn LocationProvider>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { settings, locations, metrics }
    }

    /// Verify location settings can satisfy `policy`
    pub async fn check_settings(&self, policy: &FixRequestPolicy) -> Result<(), TrackerError> {
        self.settings.check(policy).await.map_err(TrackerError::SettingsUnsatisfied)
    }

    /// Start the worker for `cycle`
    ///
    /// The fix arrives as `FixDelivered`. A refused or canceled subscription
    /// ends the worker with `FixAbandoned`.
    pub fn start_worker(
        &self,
        cycle: u64,
        policy: FixRequestPolicy,
        events: mpsc::Sender<ControllerEvent>,
    ) -> FixWorker {
        let locations = self.locations.clone();
        let metrics = self.metrics.clone();
        metrics.worker_started();
        let handle = tokio::spawn(run_worker(cycle, policy, locations, events, metrics.clone()));
        debug!(cycle = %cycle, "fix_worker_started");
        FixWorker { cycle, started_at: Instant::now(), handle: Some(handle), metrics }
    }
}

async fn run_worker(
    cycle: u64,
    policy: FixRequestPolicy,
    locations: Arc<dyn LocationProvider>,
    events: mpsc::Sender<ControllerEvent>,
    metrics: Arc<Metrics>,
) {
    let mut subscription = match locations.request_updates(&policy).await {
        Ok(rx) => {
            info!(
                cycle = %cycle,
                priority = policy.priority.as_str(),
                interval_ms = %policy.interval.as_millis(),
                "location_request_success"
            );
            rx
        }
        Err(e) => {
            metrics.record_location_request_failed();
            warn!(cycle = %cycle, error = %TrackerError::LocationRequest(e), "location_request_failure");
            let _ = events.send(ControllerEvent::FixAbandoned { cycle }).await;
            return;
        }
    };

    match subscription.recv().await {
        Some(point) => {
            info!(
                cycle = %cycle,
                lat = %point.latitude,
                lng = %point.longitude,
                accuracy = ?point.vertical_accuracy_m,
                "location_result"
            );
            // Unsubscribe before handing off; later updates are not wanted
            drop(subscription);
            if events.send(ControllerEvent::FixDelivered { cycle, point }).await.is_err() {
                debug!(cycle = %cycle, "fix_dropped_controller_gone");
            }
        }
        None => {
            warn!(cycle = %cycle, "location_request_canceled");
            let _ = events.send(ControllerEvent::FixAbandoned { cycle }).await;
        }
    }
}

/// Handle to the live worker of one cycle
pub struct FixWorker {
    cycle: u64,
    started_at: Instant,
    handle: Option<JoinHandle<()>>,
    metrics: Arc<Metrics>,
}

impl FixWorker {
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Abort the worker and wait until its task is gone
    pub async fn terminate(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
            self.metrics.worker_stopped();
            debug!(cycle = %self.cycle, "fix_worker_terminated");
        }
    }
}

impl Drop for FixWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            self.metrics.worker_stopped();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::PlatformError;
    use crate::domain::types::GeographicPoint;
    use crate::io::sim::SimPlatform;

    fn create_requester(sim: &Arc<SimPlatform>, metrics: &Arc<Metrics>) -> LocationFixRequester {
        LocationFixRequester::new(sim.clone(), sim.clone(), metrics.clone())
    }

    #[tokio::test]
    async fn test_settings_failure_maps_to_unsatisfied() {
        let sim = Arc::new(SimPlatform::new(GeographicPoint::new(0.0, 0.0)));
        sim.fail_settings(Some(PlatformError::LocationDisabled));
        let requester = create_requester(&sim, &Arc::new(Metrics::new()));

        let result = requester.check_settings(&FixRequestPolicy::default()).await;
        assert_eq!(result, Err(TrackerError::SettingsUnsatisfied(PlatformError::LocationDisabled)));
    }

    #[tokio::test]
    async fn test_worker_forwards_first_fix_and_unsubscribes() {
        let sim = Arc::new(SimPlatform::new(GeographicPoint::new(10.0, 20.0)));
        let metrics = Arc::new(Metrics::new());
        let requester = create_requester(&sim, &metrics);
        let (tx, mut rx) = mpsc::channel(4);

        let worker = requester.start_worker(7, FixRequestPolicy::default(), tx);
        assert_eq!(metrics.live_workers(), 1);

        match rx.recv().await {
            Some(ControllerEvent::FixDelivered { cycle, point }) => {
                assert_eq!(cycle, 7);
                assert_eq!(point.latitude, 10.0);
                assert_eq!(point.longitude, 20.0);
            }
            other => panic!("unexpected event {other:?}"),
        }

        worker.terminate().await;
        assert_eq!(metrics.live_workers(), 0);
        assert_eq!(sim.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_dropping_stalled_worker_releases_subscription() {
        let sim = Arc::new(SimPlatform::new(GeographicPoint::new(0.0, 0.0)));
        sim.hold_fixes(true);
        let metrics = Arc::new(Metrics::new());
        let requester = create_requester(&sim, &metrics);
        let (tx, _rx) = mpsc::channel(4);

        let worker = requester.start_worker(1, FixRequestPolicy::default(), tx);
        // Let the worker subscribe
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(sim.active_subscriptions(), 1);
        assert!(!worker.is_finished());

        worker.terminate().await;
        assert_eq!(sim.active_subscriptions(), 0);
        assert_eq!(metrics.live_workers(), 0);
    }

    #[tokio::test]
    async fn test_canceled_subscription_reports_abandoned() {
        let sim = Arc::new(SimPlatform::new(GeographicPoint::new(0.0, 0.0)));
        sim.hold_fixes(true);
        let metrics = Arc::new(Metrics::new());
        let requester = create_requester(&sim, &metrics);
        let (tx, mut rx) = mpsc::channel(4);

        let worker = requester.start_worker(3, FixRequestPolicy::default(), tx);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(sim.cancel_subscriptions(), 1);

        match rx.recv().await {
            Some(ControllerEvent::FixAbandoned { cycle }) => assert_eq!(cycle, 3),
            other => panic!("unexpected event {other:?}"),
        }
        worker.terminate().await;
        assert_eq!(metrics.live_workers(), 0);
    }

    #[tokio::test]
    async fn test_request_failure_ends_worker_without_fix() {
        let sim = Arc::new(SimPlatform::new(GeographicPoint::new(0.0, 0.0)));
        sim.fail_requests(Some(PlatformError::Unavailable));
        let metrics = Arc::new(Metrics::new());
        let requester = create_requester(&sim, &metrics);
        let (tx, mut rx) = mpsc::channel(4);

        let worker = requester.start_worker(1, FixRequestPolicy::default(), tx);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(worker.is_finished());
        assert!(matches!(rx.try_recv(), Ok(ControllerEvent::FixAbandoned { cycle: 1 })));
        assert_eq!(metrics.report().location_requests_failed, 1);
        drop(worker);
        assert_eq!(metrics.live_workers(), 0);
    }
}
