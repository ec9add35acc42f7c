//! In-process simulated platform
//!
//! Implements every platform collaborator against in-memory state:
//! - a simulated subject that can be moved or walked along a heading
//! - the set of zones registered with the "platform"
//! - location update subscriptions, fed from the subject's position
//! - failure injection for permission, settings, subscriptions and zone ops
//!
//! When the subject crosses a registered zone boundary the simulator encodes a
//! geofencing event and hands it to the zone's notify target, the same way a
//! real platform would deliver a broadcast.

use crate::domain::error::PlatformError;
use crate::domain::types::{
    FixRequestPolicy, GeofencingEvent, GeographicPoint, InitialTrigger, TransitionKind,
    TriggerZone, ZoneId,
};
use crate::infra::config::SimConfig;
use crate::io::platform::{
    GeofencingClient, LocationProvider, LocationSettings, NotifyTarget, PermissionGate,
    StatusIndicator,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Buffered fixes per subscription
const SUBSCRIPTION_BUFFER: usize = 8;

/// Platform call recorded for ordering assertions
#[derive(Debug, Clone, PartialEq)]
pub enum SimOp {
    SettingsCheck,
    RequestUpdates,
    Add(ZoneId, GeographicPoint),
    Remove(Vec<ZoneId>),
}

struct RegisteredZone {
    zone: TriggerZone,
    notify: NotifyTarget,
    inside: bool,
}

struct SimState {
    position: GeographicPoint,
    heading_deg: f64,
    permission_granted: bool,
    settings_error: Option<PlatformError>,
    request_error: Option<PlatformError>,
    install_error: Option<PlatformError>,
    remove_error: Option<PlatformError>,
    hold_fixes: bool,
    fix_delay: Duration,
    zones: HashMap<ZoneId, RegisteredZone>,
    subscribers: Vec<mpsc::Sender<GeographicPoint>>,
    ops: Vec<SimOp>,
    indicator: Option<(String, String)>,
}

pub struct SimPlatform {
    state: Mutex<SimState>,
}

impl SimPlatform {
    pub fn new(start: GeographicPoint) -> Self {
        Self {
            state: Mutex::new(SimState {
                position: start,
                heading_deg: 0.0,
                permission_granted: true,
                settings_error: None,
                request_error: None,
                install_error: None,
                remove_error: None,
                hold_fixes: false,
                fix_delay: Duration::ZERO,
                zones: HashMap::new(),
                subscribers: Vec::new(),
                ops: Vec::new(),
                indicator: None,
            }),
        }
    }

    pub fn from_config(config: &SimConfig) -> Self {
        let sim = Self::new(GeographicPoint::new(config.start_latitude, config.start_longitude));
        {
            let mut state = sim.state.lock();
            state.heading_deg = config.heading_deg;
            state.permission_granted = config.permission_granted;
            state.fix_delay = Duration::from_millis(config.fix_delay_ms);
            if !config.location_enabled {
                state.settings_error = Some(PlatformError::LocationDisabled);
            }
        }
        sim
    }

    // Failure injection

    pub fn set_permission(&self, granted: bool) {
        self.state.lock().permission_granted = granted;
    }

    pub fn fail_settings(&self, error: Option<PlatformError>) {
        self.state.lock().settings_error = error;
    }

    pub fn fail_requests(&self, error: Option<PlatformError>) {
        self.state.lock().request_error = error;
    }

    pub fn fail_installs(&self, error: Option<PlatformError>) {
        self.state.lock().install_error = error;
    }

    pub fn fail_removes(&self, error: Option<PlatformError>) {
        self.state.lock().remove_error = error;
    }

    /// Stop answering subscriptions until `deliver_fix` is called
    pub fn hold_fixes(&self, hold: bool) {
        self.state.lock().hold_fixes = hold;
    }

    /// Push a fix to every live subscription
    ///
    /// Returns how many subscriptions accepted it.
    pub fn deliver_fix(&self, point: GeographicPoint) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.iter().filter(|tx| tx.try_send(point).is_ok()).count()
    }

    /// Drop every live subscription as if the platform canceled it
    ///
    /// Returns how many were canceled.
    pub fn cancel_subscriptions(&self) -> usize {
        let mut state = self.state.lock();
        let live = state.subscribers.iter().filter(|tx| !tx.is_closed()).count();
        state.subscribers.clear();
        live
    }

    // Subject movement

    pub fn position(&self) -> GeographicPoint {
        self.state.lock().position
    }

    /// Teleport the subject, delivering any boundary crossings
    pub fn move_to(&self, point: GeographicPoint) {
        let notifications = {
            let mut state = self.state.lock();
            state.position = point;
            Self::detect_crossings(&mut state)
        };
        Self::dispatch(notifications);
    }

    /// Walk `step_m` meters, turning by `turn_deg` first
    pub fn step(&self, step_m: f64, turn_deg: f64) -> GeographicPoint {
        let (position, notifications) = {
            let mut state = self.state.lock();
            state.heading_deg = (state.heading_deg + turn_deg).rem_euclid(360.0);
            state.position = state.position.offset(state.heading_deg, step_m);
            let notifications = Self::detect_crossings(&mut state);
            (state.position, notifications)
        };
        Self::dispatch(notifications);
        position
    }

    /// Deliver a transition for the given zones to their notify target
    ///
    /// Payload is delivered even if the subject did not actually cross.
    pub fn fire_transition(&self, kind: TransitionKind, ids: &[ZoneId]) {
        let notification = {
            let state = self.state.lock();
            let notify = ids.iter().find_map(|id| state.zones.get(id)).map(|z| z.notify.clone());
            notify.map(|n| (n, encode_event(kind, ids.to_vec(), Some(state.position))))
        };
        match notification {
            Some(n) => Self::dispatch(vec![n]),
            None => warn!(kind = kind.as_str(), "sim_transition_without_registered_zone"),
        }
    }

    // Inspection

    pub fn registered_zones(&self) -> Vec<TriggerZone> {
        self.state.lock().zones.values().map(|z| z.zone.clone()).collect()
    }

    pub fn zone(&self, id: &ZoneId) -> Option<TriggerZone> {
        self.state.lock().zones.get(id).map(|z| z.zone.clone())
    }

    /// Subscriptions whose receiver is still held by a worker
    pub fn active_subscriptions(&self) -> usize {
        self.state.lock().subscribers.iter().filter(|tx| !tx.is_closed()).count()
    }

    pub fn ops(&self) -> Vec<SimOp> {
        self.state.lock().ops.clone()
    }

    pub fn count_ops(&self, pred: impl Fn(&SimOp) -> bool) -> usize {
        self.state.lock().ops.iter().filter(|op| pred(op)).count()
    }

    pub fn indicator(&self) -> Option<(String, String)> {
        self.state.lock().indicator.clone()
    }

    fn detect_crossings(state: &mut SimState) -> Vec<(NotifyTarget, Vec<u8>)> {
        let position = state.position;
        let mut notifications = Vec::new();
        for registered in state.zones.values_mut() {
            let inside = registered.zone.contains(&position);
            if inside == registered.inside {
                continue;
            }
            registered.inside = inside;
            let kind = if inside { TransitionKind::Enter } else { TransitionKind::Exit };
            if registered.zone.transitions.contains(kind) {
                notifications.push((
                    registered.notify.clone(),
                    encode_event(kind, vec![registered.zone.id.clone()], Some(position)),
                ));
            }
        }
        notifications
    }

    /// Invoke notify targets outside the state lock
    fn dispatch(notifications: Vec<(NotifyTarget, Vec<u8>)>) {
        for (notify, payload) in notifications {
            notify.on_transition(&payload);
        }
    }
}

/// Encode a geofencing event the way the platform delivers it
pub fn encode_event(
    kind: TransitionKind,
    triggering_geofences: Vec<ZoneId>,
    triggering_location: Option<GeographicPoint>,
) -> Vec<u8> {
    let event = GeofencingEvent {
        error_code: None,
        transition: kind.code(),
        triggering_geofences,
        triggering_location,
    };
    serde_json::to_vec(&event).unwrap_or_default()
}

impl PermissionGate for SimPlatform {
    fn has_fine_location(&self) -> bool {
        self.state.lock().permission_granted
    }
}

#[async_trait]
impl LocationSettings for SimPlatform {
    async fn check(&self, _policy: &FixRequestPolicy) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.ops.push(SimOp::SettingsCheck);
        match &state.settings_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LocationProvider for SimPlatform {
    async fn request_updates(
        &self,
        policy: &FixRequestPolicy,
    ) -> Result<mpsc::Receiver<GeographicPoint>, PlatformError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut state = self.state.lock();
        state.ops.push(SimOp::RequestUpdates);
        if let Some(e) = &state.request_error {
            return Err(e.clone());
        }
        debug!(priority = policy.priority.as_str(), "sim_location_subscription");

        if !state.hold_fixes {
            let fix = state.position.with_vertical_accuracy(3.0);
            if state.fix_delay.is_zero() {
                let _ = tx.try_send(fix);
            } else {
                let delayed = tx.clone();
                let delay = state.fix_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = delayed.send(fix).await;
                });
            }
        }
        state.subscribers.push(tx);
        Ok(rx)
    }
}

#[async_trait]
impl GeofencingClient for SimPlatform {
    async fn add(&self, zone: &TriggerZone, notify: NotifyTarget) -> Result<(), PlatformError> {
        let notification = {
            let mut state = self.state.lock();
            state.ops.push(SimOp::Add(zone.id.clone(), zone.center));
            if let Some(e) = &state.install_error {
                return Err(e.clone());
            }
            let inside = zone.contains(&state.position);
            let initial = match zone.initial_trigger {
                InitialTrigger::Enter if inside => Some(TransitionKind::Enter),
                InitialTrigger::Exit if !inside => Some(TransitionKind::Exit),
                _ => None,
            };
            let notification = initial.map(|kind| {
                (notify.clone(), encode_event(kind, vec![zone.id.clone()], Some(state.position)))
            });
            debug!(zone_id = %zone.id, inside, expires_after = ?zone.expires_after, "sim_zone_added");
            state
                .zones
                .insert(zone.id.clone(), RegisteredZone { zone: zone.clone(), notify, inside });
            notification
        };
        Self::dispatch(notification.into_iter().collect());
        Ok(())
    }

    async fn remove(&self, ids: &[ZoneId]) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.ops.push(SimOp::Remove(ids.to_vec()));
        if let Some(e) = &state.remove_error {
            return Err(e.clone());
        }
        for id in ids {
            state.zones.remove(id);
        }
        Ok(())
    }
}

impl StatusIndicator for SimPlatform {
    fn show(&self, title: &str, icon: &str) {
        self.state.lock().indicator = Some((title.to_string(), icon.to_string()));
    }

    fn clear(&self) {
        self.state.lock().indicator = None;
    }
}
