//! IO modules - platform interfaces and external endpoints
//!
//! This module contains everything that talks to the outside world:
//! - `platform` - Traits for the host platform's location and geofencing APIs
//! - `sim` - In-process simulated platform (subject, zones, failure injection)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod platform;
pub mod prometheus;
pub mod sim;

// Re-export commonly used types
pub use platform::{NotifyTarget, Platform, TransitionReceiver};
pub use sim::SimPlatform;
