//! Error taxonomy for the tracking cycle
//!
//! None of these are fatal. The controller logs them, counts them and
//! degrades to idle until the next exit signal or restart.

use crate::domain::types::ZoneId;

/// Error reported by a platform collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("location services disabled")]
    LocationDisabled,
    #[error("required location hardware missing")]
    HardwareMissing,
    #[error("request rejected by platform: {0}")]
    Rejected(String),
    #[error("platform unavailable")]
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneOp {
    Install,
    Remove,
}

impl ZoneOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneOp::Install => "install",
            ZoneOp::Remove => "remove",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackerError {
    #[error("fine location permission not granted")]
    PermissionDenied,

    #[error("location settings do not satisfy the fix policy: {0}")]
    SettingsUnsatisfied(#[source] PlatformError),

    #[error("location update request failed: {0}")]
    LocationRequest(#[source] PlatformError),

    #[error("zone {} of '{zone_id}' failed: {source}", .op.as_str())]
    ZoneOperation {
        op: ZoneOp,
        zone_id: ZoneId,
        #[source]
        source: PlatformError,
    },

    #[error("undecodable transition payload: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_operation_message() {
        let err = TrackerError::ZoneOperation {
            op: ZoneOp::Install,
            zone_id: ZoneId::fixed(),
            source: PlatformError::Rejected("too many geofences".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "zone install of 'geo_id' failed: request rejected by platform: too many geofences"
        );
    }
}
