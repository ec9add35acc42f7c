//! Tracking controller - the exit → fix → re-center cycle
//!
//! The controller owns the tracking session and is the only writer of its
//! state. Everything asynchronous reaches it as a message:
//! - the exit flag (raised by the transition source on the platform thread)
//! - `ControllerEvent`s from the settings check, the fix worker and the
//!   zone worker
//!
//! One cycle runs at a time. Exit signals that arrive mid-cycle are absorbed
//! into it, unless the fix request has been outstanding longer than
//! `supersede_after`, in which case the stalled worker is torn down and a
//! fresh cycle starts.

mod handlers;

use crate::domain::error::TrackerError;
use crate::domain::types::{FixRequestPolicy, GeographicPoint, ZoneId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::platform::{NotifyTarget, Platform};
use crate::services::fix_requester::{FixWorker, LocationFixRequester};
use crate::services::geofence_manager::{create_zone_worker, GeofenceManager, ZoneWorker};
use crate::services::transition_signal::ExitFlag;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::info;
use uuid::Uuid;

/// Controller event channel depth
const EVENT_BUFFER: usize = 64;

/// Zone command queue depth
const ZONE_CMD_BUFFER: usize = 32;

/// Where the controller is within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No fix request outstanding
    Idle,
    /// Waiting for the platform settings check
    AwaitingSettingsCheck,
    /// Fix worker running
    FixInFlight,
    /// Old zone being removed, new one installed
    Recentering,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::AwaitingSettingsCheck => "awaiting_settings_check",
            Phase::FixInFlight => "fix_in_flight",
            Phase::Recentering => "recentering",
        }
    }
}

/// Results of asynchronous steps, delivered back to the controller
#[derive(Debug)]
pub enum ControllerEvent {
    SettingsChecked { cycle: u64, result: Result<(), TrackerError> },
    FixDelivered { cycle: u64, point: GeographicPoint },
    /// Worker ended without a fix (request refused or subscription canceled)
    FixAbandoned { cycle: u64 },
    ZoneReplaced { zone_id: ZoneId, installed: bool },
}

/// Per-process tracking state, created on start and dropped on stop
pub struct TrackingSession {
    pub(crate) session_id: Uuid,
    pub(crate) active: bool,
    pub(crate) current_zone_id: Option<ZoneId>,
    pub(crate) phase: Phase,
    /// Number of the current (or last) cycle
    pub(crate) cycle: u64,
    pub(crate) cycle_started_at: Option<Instant>,
    /// At most one live worker per session
    pub(crate) worker: Option<FixWorker>,
    pub(crate) exit_rx: watch::Receiver<bool>,
}

impl TrackingSession {
    fn new(exit_rx: watch::Receiver<bool>) -> Self {
        Self {
            session_id: Uuid::now_v7(),
            active: true,
            current_zone_id: None,
            phase: Phase::Idle,
            cycle: 0,
            cycle_started_at: None,
            worker: None,
            exit_rx,
        }
    }
}

/// Externally observable session snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub active: bool,
    pub phase: Phase,
    pub cycle: u64,
    pub current_zone_id: Option<ZoneId>,
    pub worker_live: bool,
}

pub struct TrackingController {
    pub(crate) session: TrackingSession,
    pub(crate) policy: FixRequestPolicy,
    pub(crate) zone_id: ZoneId,
    pub(crate) radius_m: f32,
    pub(crate) supersede_after: Duration,
    pub(crate) platform: Platform,
    pub(crate) requester: LocationFixRequester,
    pub(crate) zones: GeofenceManager,
    pub(crate) exit_flag: ExitFlag,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) events_tx: mpsc::Sender<ControllerEvent>,
    pub(crate) events_rx: mpsc::Receiver<ControllerEvent>,
    pub(crate) status_tx: watch::Sender<SessionStatus>,
}

impl TrackingController {
    /// Create a controller and the zone worker it drives
    ///
    /// The worker must be spawned by the caller.
    pub fn new(
        config: &Config,
        platform: Platform,
        notify: NotifyTarget,
        exit_flag: ExitFlag,
        metrics: Arc<Metrics>,
    ) -> (Self, ZoneWorker) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (zones, zone_worker) = create_zone_worker(
            platform.geofencing.clone(),
            notify,
            events_tx.clone(),
            metrics.clone(),
            ZONE_CMD_BUFFER,
        );
        let requester = LocationFixRequester::new(
            platform.settings.clone(),
            platform.locations.clone(),
            metrics.clone(),
        );

        // Exits raised while no session was running are stale
        exit_flag.take();
        let session = TrackingSession::new(exit_flag.subscribe());
        let (status_tx, _) = watch::channel(SessionStatus {
            session_id: session.session_id,
            active: true,
            phase: Phase::Idle,
            cycle: 0,
            current_zone_id: None,
            worker_live: false,
        });

        let controller = Self {
            session,
            policy: config.fix_policy(),
            zone_id: config.zone_id(),
            radius_m: config.radius_m(),
            supersede_after: config.supersede_after(),
            platform,
            requester,
            zones,
            exit_flag,
            metrics,
            events_tx,
            events_rx,
            status_tx,
        };
        (controller, zone_worker)
    }

    pub fn session_id(&self) -> Uuid {
        self.session.session_id
    }

    pub fn phase(&self) -> Phase {
        self.session.phase
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Run the session until `shutdown` flips to true
    ///
    /// Starts with an initial cycle so a first zone is installed around the
    /// starting position.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(session_id = %self.session.session_id, "tracking_session_started");
        self.begin_cycle().await;

        loop {
            let input = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                changed = self.session.exit_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    None
                }
                Some(event) = self.events_rx.recv() => Some(event),
            };

            match input {
                Some(event) => self.process_event(event).await,
                None => {
                    if self.exit_flag.take() {
                        self.handle_exit_signal().await;
                    }
                }
            }
        }

        self.teardown().await;
        info!(session_id = %self.session.session_id, "tracking_session_stopped");
    }

    /// Dispatch one controller event to its handler
    pub async fn process_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::SettingsChecked { cycle, result } => {
                self.handle_settings_checked(cycle, result);
            }
            ControllerEvent::FixDelivered { cycle, point } => {
                self.handle_fix_delivered(cycle, point).await;
            }
            ControllerEvent::FixAbandoned { cycle } => {
                self.handle_fix_abandoned(cycle).await;
            }
            ControllerEvent::ZoneReplaced { zone_id, installed } => {
                self.handle_zone_replaced(zone_id, installed);
            }
        }
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.session.phase = phase;
        self.publish_status();
    }

    pub(crate) fn publish_status(&self) {
        let status = SessionStatus {
            session_id: self.session.session_id,
            active: self.session.active,
            phase: self.session.phase,
            cycle: self.session.cycle,
            current_zone_id: self.session.current_zone_id.clone(),
            worker_live: self.session.worker.is_some(),
        };
        self.status_tx.send_replace(status);
    }
}
