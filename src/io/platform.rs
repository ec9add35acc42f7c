//! Platform collaborator interfaces
//!
//! The host operating system owns permissions, location settings, location
//! hardware, geofence monitoring and the persistent status indicator. The
//! tracker only sees them through these traits, so a real platform binding
//! and the in-process simulator are interchangeable.

use crate::domain::error::PlatformError;
use crate::domain::types::{FixRequestPolicy, GeographicPoint, TriggerZone, ZoneId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Reports whether fine location authorization is currently held
pub trait PermissionGate: Send + Sync {
    fn has_fine_location(&self) -> bool;
}

/// Verifies that location settings can satisfy a fix policy
#[async_trait]
pub trait LocationSettings: Send + Sync {
    async fn check(&self, policy: &FixRequestPolicy) -> Result<(), PlatformError>;
}

/// Location update subscriptions
///
/// The returned receiver is the subscription: the platform pushes fixes
/// into it until the receiver is dropped, which unsubscribes.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn request_updates(
        &self,
        policy: &FixRequestPolicy,
    ) -> Result<mpsc::Receiver<GeographicPoint>, PlatformError>;
}

/// Receives raw geofencing transition payloads from the platform
///
/// Called on a platform callback context; implementations must not block.
pub trait TransitionReceiver: Send + Sync {
    fn on_transition(&self, payload: &[u8]);
}

/// Endpoint the platform invokes when a monitored transition occurs
///
/// Registered once at process start and shared by every zone.
pub type NotifyTarget = Arc<dyn TransitionReceiver>;

/// Geofence registration with the platform
#[async_trait]
pub trait GeofencingClient: Send + Sync {
    async fn add(&self, zone: &TriggerZone, notify: NotifyTarget) -> Result<(), PlatformError>;
    async fn remove(&self, ids: &[ZoneId]) -> Result<(), PlatformError>;
}

/// Persistent status indicator required while tracking runs
pub trait StatusIndicator: Send + Sync {
    fn show(&self, title: &str, icon: &str);
    fn clear(&self);
}

/// Bundle of every collaborator the tracker depends on
#[derive(Clone)]
pub struct Platform {
    pub permissions: Arc<dyn PermissionGate>,
    pub settings: Arc<dyn LocationSettings>,
    pub locations: Arc<dyn LocationProvider>,
    pub geofencing: Arc<dyn GeofencingClient>,
    pub status: Arc<dyn StatusIndicator>,
}

impl Platform {
    /// Wire every collaborator to one object implementing them all
    pub fn from_shared<P>(platform: Arc<P>) -> Self
    where
        P: PermissionGate
            + LocationSettings
            + LocationProvider
            + GeofencingClient
            + StatusIndicator
            + 'static,
    {
        Self {
            permissions: platform.clone(),
            settings: platform.clone(),
            locations: platform.clone(),
            geofencing: platform.clone(),
            status: platform,
        }
    }
}
