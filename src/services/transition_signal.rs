//! Geofence transition decoding and the shared exit flag
//!
//! The platform delivers transitions on its own callback context. The
//! source decodes and classifies each payload and, for EXIT, raises the
//! exit flag. The flag is a watch channel with a single consumer (the
//! controller), so repeated raises before the controller takes it collapse
//! into one notification.

use crate::domain::error::TrackerError;
use crate::domain::types::{GeofencingEvent, TransitionKind};
use crate::infra::metrics::Metrics;
use crate::io::platform::TransitionReceiver;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Edge-triggered "subject left the zone" flag
#[derive(Clone)]
pub struct ExitFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ExitFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ExitFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag; notifies only on a false -> true edge
    pub fn raise(&self) {
        self.tx.send_if_modified(|raised| {
            if *raised {
                false
            } else {
                *raised = true;
                true
            }
        });
    }

    /// Consume the flag, returning whether it was raised
    pub fn take(&self) -> bool {
        let mut was_raised = false;
        self.tx.send_if_modified(|raised| {
            was_raised = std::mem::replace(raised, false);
            false
        });
        was_raised
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Decodes platform transition payloads and raises the exit flag
pub struct TransitionSignalSource {
    exit: ExitFlag,
    metrics: Arc<Metrics>,
}

impl TransitionSignalSource {
    pub fn new(exit: ExitFlag, metrics: Arc<Metrics>) -> Self {
        Self { exit, metrics }
    }

    pub fn decode(payload: &[u8]) -> Result<GeofencingEvent, TrackerError> {
        serde_json::from_slice(payload).map_err(|e| TrackerError::Decode(e.to_string()))
    }

    /// Decode, classify and act on one payload
    ///
    /// Returns the classified transition, or None if the payload was discarded.
    pub fn handle(&self, payload: &[u8]) -> Option<TransitionKind> {
        let event = match Self::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "transition_discarded");
                self.metrics.record_transition_discarded();
                return None;
            }
        };

        if event.has_error() {
            debug!(error_code = ?event.error_code, "transition_error_discarded");
            self.metrics.record_transition_discarded();
            return None;
        }

        let Some(kind) = TransitionKind::from_code(event.transition) else {
            debug!(transition = %event.transition, "transition_unknown_discarded");
            self.metrics.record_transition_discarded();
            return None;
        };

        match kind {
            TransitionKind::Exit => {
                for zone_id in &event.triggering_geofences {
                    info!(zone_id = %zone_id, location = ?event.triggering_location, "zone_exit");
                }
                self.metrics.record_exit_received();
                self.exit.raise();
            }
            TransitionKind::Enter => {
                for zone_id in &event.triggering_geofences {
                    info!(zone_id = %zone_id, "zone_enter");
                }
                self.metrics.record_enter_received();
            }
            TransitionKind::Dwell => {}
        }

        Some(kind)
    }
}

impl TransitionReceiver for TransitionSignalSource {
    fn on_transition(&self, payload: &[u8]) {
        self.handle(payload);
    }
}
