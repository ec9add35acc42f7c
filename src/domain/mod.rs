//! Domain models - core tracking types and error taxonomy
//!
//! This module contains the canonical data types used throughout the system:
//! - `GeographicPoint` - a resolved position from a location fix
//! - `TriggerZone` - the circular geofence registered with the platform
//! - `FixRequestPolicy` - precision and frequency policy for fix requests
//! - `GeofencingEvent` - transition payload delivered by the platform
//! - `TrackerError` - non-fatal failures of a tracking cycle

pub mod error;
pub mod types;

pub use error::{PlatformError, TrackerError, ZoneOp};
pub use types::{FixRequestPolicy, GeographicPoint, TransitionKind, TriggerZone, ZoneId};
