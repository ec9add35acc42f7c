//! Geofence tracker library
//!
//! Keeps a single circular trigger zone centered on the subject. When the
//! platform reports an EXIT from that zone, one fresh location fix is taken
//! and the zone is re-installed around it.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
