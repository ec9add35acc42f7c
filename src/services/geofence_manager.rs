//! Geofence manager - serializes zone install/remove off the controller loop
//!
//! The controller enqueues zone commands and moves on; a single zone worker
//! executes them in order against the platform. Because removal of the old
//! zone is always queued before the install of its replacement, the worker
//! preserves "remove, then install" even though neither is awaited by the
//! controller. Completions only feed logs, metrics and the `ZoneReplaced`
//! notification.

use crate::domain::error::{TrackerError, ZoneOp};
use crate::domain::types::{TriggerZone, ZoneId};
use crate::infra::metrics::Metrics;
use crate::io::platform::{GeofencingClient, NotifyTarget};
use crate::services::controller::ControllerEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

/// A zone operation to be processed by the worker
#[derive(Debug)]
pub enum ZoneCmd {
    Install(TriggerZone),
    Remove(ZoneId),
    /// Reply once every earlier command has completed
    Flush(oneshot::Sender<()>),
}

/// Controller-side handle to the zone worker
pub struct GeofenceManager {
    cmd_tx: mpsc::Sender<ZoneCmd>,
    /// Id the platform last confirmed as registered
    registered: Arc<Mutex<Option<ZoneId>>>,
}

impl GeofenceManager {
    /// Queue installation of `zone`
    pub fn install(&self, zone: TriggerZone) {
        self.enqueue(ZoneCmd::Install(zone));
    }

    /// Queue removal of the zone registered under `zone_id`
    pub fn remove(&self, zone_id: ZoneId) {
        self.enqueue(ZoneCmd::Remove(zone_id));
    }

    /// Queue removal of `zone.id` followed by installation of `zone`
    pub fn replace(&self, zone: TriggerZone) {
        self.remove(zone.id.clone());
        self.install(zone);
    }

    /// Wait until every queued operation has completed
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(ZoneCmd::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn registered(&self) -> Option<ZoneId> {
        self.registered.lock().clone()
    }

    fn enqueue(&self, cmd: ZoneCmd) {
        if let Err(e) = self.cmd_tx.try_send(cmd) {
            match e {
                TrySendError::Full(cmd) => error!(cmd = ?cmd, "zone_cmd_dropped_queue_full"),
                TrySendError::Closed(cmd) => error!(cmd = ?cmd, "zone_cmd_dropped_worker_gone"),
            }
        }
    }
}

/// Worker that executes zone commands against the platform
pub struct ZoneWorker {
    client: Arc<dyn GeofencingClient>,
    /// Shared by every zone this process installs
    notify: NotifyTarget,
    cmd_rx: mpsc::Receiver<ZoneCmd>,
    registered: Arc<Mutex<Option<ZoneId>>>,
    events: mpsc::Sender<ControllerEvent>,
    metrics: Arc<Metrics>,
}

impl ZoneWorker {
    /// Run the worker, processing commands until the manager is dropped
    pub async fn run(mut self) {
        info!("zone_worker_started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                ZoneCmd::Remove(zone_id) => self.remove(zone_id).await,
                ZoneCmd::Install(zone) => self.install(zone).await,
                ZoneCmd::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }

        info!("zone_worker_stopped");
    }

    async fn remove(&self, zone_id: ZoneId) {
        match self.client.remove(std::slice::from_ref(&zone_id)).await {
            Ok(()) => {
                let mut registered = self.registered.lock();
                if registered.as_ref() == Some(&zone_id) {
                    *registered = None;
                }
                drop(registered);
                self.metrics.record_zone_remove(true);
                info!(zone_id = %zone_id, "zone_remove_success");
            }
            Err(source) => {
                self.metrics.record_zone_remove(false);
                let err = TrackerError::ZoneOperation { op: ZoneOp::Remove, zone_id, source };
                warn!(error = %err, "zone_remove_failure");
            }
        }
    }

    async fn install(&self, zone: TriggerZone) {
        let zone_id = zone.id.clone();
        let installed = match self.client.add(&zone, self.notify.clone()).await {
            Ok(()) => {
                *self.registered.lock() = Some(zone_id.clone());
                self.metrics.record_zone_install(true);
                info!(
                    zone_id = %zone_id,
                    lat = %zone.center.latitude,
                    lng = %zone.center.longitude,
                    radius_m = %zone.radius_m,
                    "zone_install_success"
                );
                true
            }
            Err(source) => {
                self.metrics.record_zone_install(false);
                let err =
                    TrackerError::ZoneOperation { op: ZoneOp::Install, zone_id: zone_id.clone(), source };
                warn!(error = %err, "zone_install_failure");
                false
            }
        };

        // Controller may already be gone during shutdown
        let _ = self.events.try_send(ControllerEvent::ZoneReplaced { zone_id, installed });
    }
}

/// Create a zone command channel and worker
///
/// Returns the manager (for the controller) and the worker (to be spawned)
pub fn create_zone_worker(
    client: Arc<dyn GeofencingClient>,
    notify: NotifyTarget,
    events: mpsc::Sender<ControllerEvent>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (GeofenceManager, ZoneWorker) {
    let (cmd_tx, cmd_rx) = mpsc::channel(buffer_size);
    let registered = Arc::new(Mutex::new(None));
    let manager = GeofenceManager { cmd_tx, registered: registered.clone() };
    let worker = ZoneWorker { client, notify, cmd_rx, registered, events, metrics };
    (manager, worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::PlatformError;
    use crate::domain::types::{GeographicPoint, DEFAULT_RADIUS_M};
    use crate::io::platform::TransitionReceiver;
    use crate::io::sim::{SimOp, SimPlatform};

    struct NullReceiver;

    impl TransitionReceiver for NullReceiver {
        fn on_transition(&self, _payload: &[u8]) {}
    }

    struct Harness {
        sim: Arc<SimPlatform>,
        manager: GeofenceManager,
        events_rx: mpsc::Receiver<ControllerEvent>,
        metrics: Arc<Metrics>,
    }

    fn create_harness() -> Harness {
        let sim = Arc::new(SimPlatform::new(GeographicPoint::new(0.0, 0.0)));
        let metrics = Arc::new(Metrics::new());
        let (events_tx, events_rx) = mpsc::channel(16);
        let (manager, worker) =
            create_zone_worker(sim.clone(), Arc::new(NullReceiver), events_tx, metrics.clone(), 16);
        tokio::spawn(worker.run());
        Harness { sim, manager, events_rx, metrics }
    }

    fn zone_at(lat: f64, lng: f64) -> TriggerZone {
        TriggerZone::centered_at(ZoneId::fixed(), GeographicPoint::new(lat, lng), DEFAULT_RADIUS_M)
    }

    #[tokio::test]
    async fn test_replace_removes_before_install() {
        let mut h = create_harness();

        h.manager.replace(zone_at(1.0, 2.0));
        h.manager.flush().await;

        let ops = h.sim.ops();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0], SimOp::Remove(vec![ZoneId::fixed()]));
        assert!(matches!(&ops[1], SimOp::Add(id, _) if *id == ZoneId::fixed()));
        assert_eq!(h.manager.registered(), Some(ZoneId::fixed()));

        match h.events_rx.try_recv() {
            Ok(ControllerEvent::ZoneReplaced { zone_id, installed }) => {
                assert_eq!(zone_id, ZoneId::fixed());
                assert!(installed);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_repeated_replace_keeps_single_zone() {
        let h = create_harness();

        for i in 0..5 {
            h.manager.replace(zone_at(f64::from(i), 0.0));
        }
        h.manager.flush().await;

        let zones = h.sim.registered_zones();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].center.latitude, 4.0);
    }

    #[tokio::test]
    async fn test_remove_failure_does_not_block_install() {
        let mut h = create_harness();
        h.sim.fail_removes(Some(PlatformError::Unavailable));

        h.manager.replace(zone_at(3.0, 4.0));
        h.manager.flush().await;

        assert_eq!(h.sim.registered_zones().len(), 1);
        let summary = h.metrics.report();
        assert_eq!(summary.zone_removes_failed, 1);
        assert_eq!(summary.zone_installs_ok, 1);
        assert!(matches!(
            h.events_rx.try_recv(),
            Ok(ControllerEvent::ZoneReplaced { installed: true, .. })
        ));
    }

    #[tokio::test]
    async fn test_install_failure_leaves_no_zone() {
        let mut h = create_harness();
        h.manager.replace(zone_at(1.0, 1.0));
        h.manager.flush().await;
        let _ = h.events_rx.try_recv();

        h.sim.fail_installs(Some(PlatformError::Rejected("quota".to_string())));
        h.manager.replace(zone_at(2.0, 2.0));
        h.manager.flush().await;

        assert!(h.sim.registered_zones().is_empty());
        assert_eq!(h.manager.registered(), None);
        assert!(matches!(
            h.events_rx.try_recv(),
            Ok(ControllerEvent::ZoneReplaced { installed: false, .. })
        ));
    }
}
