//! Start/stop control surface for background tracking
//!
//! A `TrackingService` lives for the whole process. It owns the exit flag
//! and the transition source (the notify target handed to the platform with
//! every zone). Each `start()` creates a fresh session: a controller task and
//! its zone worker task. `stop()` tears both down and clears the status
//! indicator. Both calls are idempotent.

use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::platform::{NotifyTarget, Platform};
use crate::services::controller::{SessionStatus, TrackingController};
use crate::services::transition_signal::{ExitFlag, TransitionSignalSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

struct RunningSession {
    session_id: Uuid,
    shutdown_tx: watch::Sender<bool>,
    controller: JoinHandle<()>,
    zone_worker: JoinHandle<()>,
    status_rx: watch::Receiver<SessionStatus>,
}

pub struct TrackingService {
    config: Config,
    platform: Platform,
    metrics: Arc<Metrics>,
    exit_flag: ExitFlag,
    notify: NotifyTarget,
    running: Option<RunningSession>,
}

impl TrackingService {
    pub fn new(config: Config, platform: Platform, metrics: Arc<Metrics>) -> Self {
        let exit_flag = ExitFlag::new();
        let notify: NotifyTarget =
            Arc::new(TransitionSignalSource::new(exit_flag.clone(), metrics.clone()));
        Self { config, platform, metrics, exit_flag, notify, running: None }
    }

    /// Endpoint the platform delivers geofence transitions to
    pub fn notify_target(&self) -> NotifyTarget {
        self.notify.clone()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn is_active(&self) -> bool {
        self.running.is_some()
    }

    /// Begin background tracking
    ///
    /// Returns the session id; a second call returns the running session's id
    /// without creating anything.
    pub fn start(&mut self) -> Uuid {
        if let Some(running) = &self.running {
            info!(session_id = %running.session_id, "tracking_already_started");
            return running.session_id;
        }

        self.platform
            .status
            .show(self.config.notification_title(), self.config.notification_icon());

        let (controller, zone_worker) = TrackingController::new(
            &self.config,
            self.platform.clone(),
            self.notify.clone(),
            self.exit_flag.clone(),
            self.metrics.clone(),
        );
        let session_id = controller.session_id();
        let status_rx = controller.subscribe_status();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let zone_worker = tokio::spawn(zone_worker.run());
        let controller = tokio::spawn(controller.run(shutdown_rx));

        info!(
            session_id = %session_id,
            zone_id = %self.config.zone_id(),
            radius_m = %self.config.radius_m(),
            "tracking_started"
        );
        self.running =
            Some(RunningSession { session_id, shutdown_tx, controller, zone_worker, status_rx });
        session_id
    }

    /// End background tracking, releasing the zone and any fix worker
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.controller.await {
            warn!(error = %e, "controller_task_failed");
        }
        // Manager was dropped with the controller, so the worker drains and exits
        if let Err(e) = running.zone_worker.await {
            warn!(error = %e, "zone_worker_task_failed");
        }

        self.platform.status.clear();
        info!(session_id = %running.session_id, "tracking_stopped");
    }

    /// Latest snapshot of the running session
    pub fn status(&self) -> Option<SessionStatus> {
        self.running.as_ref().map(|r| r.status_rx.borrow().clone())
    }

    /// Wait until the running session's status satisfies `pred`
    ///
    /// Returns false on timeout or if no session is running.
    pub async fn wait_for_status(
        &self,
        timeout: Duration,
        pred: impl FnMut(&SessionStatus) -> bool,
    ) -> bool {
        let Some(running) = &self.running else {
            return false;
        };
        let mut rx = running.status_rx.clone();
        let satisfied =
            matches!(tokio::time::timeout(timeout, rx.wait_for(pred)).await, Ok(Ok(_)));
        satisfied
    }
}
