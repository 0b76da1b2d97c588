//! Collaborator seams. The core drives the platform BLE stack and the
//! location/permission services exclusively through these traits, so any
//! backend (or a scripted test double) can sit behind them.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Serialize;
use uuid::Uuid;

use crate::error::PlatformError;
use crate::types::{Address, GattService};

/// One advertisement observed during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Advertisement {
    pub address: Address,
    pub name: Option<String>,
    pub rssi: i16,
}

/// Link-level events the platform reports asynchronously for any peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link dropped without a caller-issued disconnect.
    Disconnected { address: Address, status: i32 },
}

/// Capability surface of the platform BLE stack.
///
/// Streams end when the platform tears the underlying source down. The core
/// issues at most one outstanding GATT call per peripheral at a time;
/// implementations do not need their own per-link queueing.
#[async_trait]
pub trait BleAdapter: Send + Sync + 'static {
    /// Whether the radio is powered on.
    async fn is_enabled(&self) -> bool;

    /// Start discovery. Advertisements arrive on the returned stream until
    /// [`stop_scan`](Self::stop_scan) is called or the platform ends the scan.
    async fn scan(&self) -> Result<BoxStream<'static, Advertisement>, PlatformError>;

    async fn stop_scan(&self) -> Result<(), PlatformError>;

    /// Establish a link; resolves once the platform reports the link as up.
    async fn connect(&self, address: &Address) -> Result<(), PlatformError>;

    async fn disconnect(&self, address: &Address) -> Result<(), PlatformError>;

    /// Enumerate all services and their characteristics, in discovery order.
    async fn discover_services(&self, address: &Address)
        -> Result<Vec<GattService>, PlatformError>;

    async fn read_characteristic(
        &self,
        address: &Address,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, PlatformError>;

    async fn write_descriptor(
        &self,
        address: &Address,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), PlatformError>;

    /// Register for notifications on a characteristic. Payloads arrive on the
    /// returned stream in link order.
    async fn subscribe(
        &self,
        address: &Address,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<BoxStream<'static, Vec<u8>>, PlatformError>;

    async fn unsubscribe(
        &self,
        address: &Address,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), PlatformError>;

    /// Link-state events for all peripherals, used to detect passive
    /// disconnects.
    async fn link_events(&self) -> Result<BoxStream<'static, LinkEvent>, PlatformError>;
}

/// Permissions the gate may find missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Permission {
    /// Foreground fine-location, required for BLE scanning on platforms that
    /// tie discovery to location access.
    FineLocation,
}

/// Remediation intents forwarded to the platform's UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    EnableBluetooth,
    EnableLocation,
    RequestPermission(Permission),
}

/// Readiness facts and the remediation launcher, provided by the embedding
/// platform. The core only reads results; it never prompts on its own.
pub trait LocationServices: Send + Sync + 'static {
    /// Whether this platform requires location services for BLE discovery.
    fn location_required(&self) -> bool;

    fn location_enabled(&self) -> bool;

    fn permission_granted(&self, permission: Permission) -> bool;

    /// Hand a remediation intent to the external UI layer.
    fn launch_remediation(&self, remediation: Remediation);
}
