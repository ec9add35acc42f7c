//! Services - tracking logic and state management
//!
//! This module contains the core services:
//! - `controller` - The exit → fix → re-center state machine
//! - `fix_requester` - Settings check and one-shot fix worker
//! - `geofence_manager` - Serialized zone install/remove worker
//! - `transition_signal` - Transition decoding and the shared exit flag
//! - `service` - Start/stop control surface

pub mod controller;
pub mod fix_requester;
pub mod geofence_manager;
pub mod service;
pub mod transition_signal;

// Re-export commonly used types
pub use controller::{ControllerEvent, Phase, SessionStatus, TrackingController};
pub use fix_requester::{FixWorker, LocationFixRequester};
pub use geofence_manager::{create_zone_worker, GeofenceManager, ZoneCmd, ZoneWorker};
pub use service::TrackingService;
pub use transition_signal::{ExitFlag, TransitionSignalSource};
