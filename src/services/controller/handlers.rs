//! Event handlers for the TrackingController
//!
//! Each handler advances the cycle state machine by one step. Events that
//! carry a cycle number other than the current one belong to an abandoned
//! cycle and are ignored.

use super::{ControllerEvent, Phase, TrackingController};
use crate::domain::error::TrackerError;
use crate::domain::types::{GeographicPoint, TriggerZone, ZoneId};
use std::time::Instant;
use tracing::{debug, info, warn};

impl TrackingController {
    /// Handle the exit flag being raised
    ///
    /// Idle starts a cycle. A cycle already in flight absorbs the signal,
    /// except a fix request older than `supersede_after` or whose worker has
    /// already ended, which is abandoned.
    pub(crate) async fn handle_exit_signal(&mut self) {
        match self.session.phase {
            Phase::Idle => {
                self.begin_cycle().await;
            }
            Phase::FixInFlight => {
                let stalled = self.session.worker.as_ref().map_or(true, |w| {
                    w.is_finished() || w.age() >= self.supersede_after
                });
                if stalled {
                    self.metrics.record_cycle_superseded();
                    let worker_cycle = self.session.worker.as_ref().map(|w| w.cycle());
                    info!(
                        cycle = %self.session.cycle,
                        worker_cycle = ?worker_cycle,
                        "fix_request_superseded"
                    );
                    self.begin_cycle().await;
                } else {
                    self.metrics.record_cycle_coalesced();
                    debug!(cycle = %self.session.cycle, "exit_coalesced");
                }
            }
            Phase::AwaitingSettingsCheck | Phase::Recentering => {
                self.metrics.record_cycle_coalesced();
                debug!(cycle = %self.session.cycle, phase = self.session.phase.as_str(), "exit_coalesced");
            }
        }
    }

    /// Start a new cycle: tear down any previous worker, check permission,
    /// then kick off the settings check
    pub(crate) async fn begin_cycle(&mut self) {
        if let Some(worker) = self.session.worker.take() {
            worker.terminate().await;
        }

        if !self.platform.permissions.has_fine_location() {
            self.metrics.record_permission_denied();
            debug!(error = %TrackerError::PermissionDenied, "cycle_aborted");
            self.set_phase(Phase::Idle);
            return;
        }

        self.session.cycle += 1;
        self.session.cycle_started_at = Some(Instant::now());
        self.metrics.record_cycle_started();
        let cycle = self.session.cycle;
        info!(session_id = %self.session.session_id, cycle = %cycle, "cycle_started");
        self.set_phase(Phase::AwaitingSettingsCheck);

        let requester = self.requester.clone();
        let policy = self.policy;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = requester.check_settings(&policy).await;
            let _ = events.send(ControllerEvent::SettingsChecked { cycle, result }).await;
        });
    }

    /// Handle the settings check completing
    pub(crate) fn handle_settings_checked(&mut self, cycle: u64, result: Result<(), TrackerError>) {
        if cycle != self.session.cycle || self.session.phase != Phase::AwaitingSettingsCheck {
            debug!(cycle = %cycle, current = %self.session.cycle, "stale_settings_result");
            return;
        }

        if let Err(e) = result {
            self.metrics.record_settings_failed();
            warn!(cycle = %cycle, error = %e, "cycle_aborted");
            self.set_phase(Phase::Idle);
            return;
        }

        // Permission may have been revoked while the check ran
        if !self.platform.permissions.has_fine_location() {
            self.metrics.record_permission_denied();
            debug!(cycle = %cycle, error = %TrackerError::PermissionDenied, "cycle_aborted");
            self.set_phase(Phase::Idle);
            return;
        }

        let worker = self.requester.start_worker(cycle, self.policy, self.events_tx.clone());
        self.session.worker = Some(worker);
        self.set_phase(Phase::FixInFlight);
    }

    /// Handle a fix from the current cycle's worker
    pub(crate) async fn handle_fix_delivered(&mut self, cycle: u64, point: GeographicPoint) {
        if cycle != self.session.cycle || self.session.phase != Phase::FixInFlight {
            debug!(cycle = %cycle, current = %self.session.cycle, "stale_fix_discarded");
            return;
        }

        if let Some(worker) = self.session.worker.take() {
            worker.terminate().await;
        }
        let latency_ms =
            self.session.cycle_started_at.map_or(0, |t| t.elapsed().as_millis() as u64);
        self.metrics.record_fix_delivered(latency_ms);

        self.set_phase(Phase::Recentering);
        self.recenter(point);
        self.set_phase(Phase::Idle);
    }

    /// Handle the current worker ending without a fix
    ///
    /// The cycle is over; the next exit signal starts a fresh one.
    pub(crate) async fn handle_fix_abandoned(&mut self, cycle: u64) {
        if cycle != self.session.cycle || self.session.phase != Phase::FixInFlight {
            debug!(cycle = %cycle, current = %self.session.cycle, "stale_abandon_ignored");
            return;
        }

        if let Some(worker) = self.session.worker.take() {
            worker.terminate().await;
        }
        warn!(cycle = %cycle, "cycle_aborted_without_fix");
        self.set_phase(Phase::Idle);
    }

    /// Replace the registered zone with one centered at `point`
    fn recenter(&mut self, point: GeographicPoint) {
        let zone = TriggerZone::centered_at(self.zone_id.clone(), point, self.radius_m);
        info!(
            cycle = %self.session.cycle,
            zone_id = %zone.id,
            center = %zone.center,
            radius_m = %zone.radius_m,
            "zone_recentering"
        );
        self.zones.replace(zone);
    }

    /// Handle the zone worker reporting an install outcome
    pub(crate) fn handle_zone_replaced(&mut self, zone_id: ZoneId, installed: bool) {
        if installed {
            self.session.current_zone_id = Some(zone_id);
        } else {
            self.session.current_zone_id = None;
            warn!(zone_id = %zone_id, "tracking_degraded_no_active_zone");
        }
        self.publish_status();
    }

    /// Release the worker and the registered zone at session end
    pub(crate) async fn teardown(&mut self) {
        if let Some(worker) = self.session.worker.take() {
            worker.terminate().await;
        }
        // Let queued installs land first so nothing registers after the remove
        self.zones.flush().await;
        if let Some(zone_id) = self.zones.registered() {
            self.zones.remove(zone_id);
            self.zones.flush().await;
        }

        self.session.current_zone_id = None;
        self.session.active = false;
        self.set_phase(Phase::Idle);
    }
}
