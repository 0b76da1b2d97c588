//! Error taxonomy. Every failure is scoped to one peripheral or one scan;
//! nothing here is fatal to the process.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::gate::ReadinessResult;
use crate::types::Address;

/// An error reported by the platform BLE stack, carrying the platform status
/// code (for example a GATT status) and a human-readable description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("platform error (status {status}): {message}")]
pub struct PlatformError {
    pub status: i32,
    pub message: String,
}

impl PlatformError {
    pub fn new(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Errors surfaced by the core, either as a rejected call or through
/// [`crate::types::BleEvent::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
pub enum BleError {
    /// The gate did not report `Ready`; the operation was not attempted.
    #[error("precondition failed: {0}")]
    PreconditionFailed(ReadinessResult),

    #[error("invalid hardware address: {0:?}")]
    InvalidAddress(String),

    /// A connect attempt is already in flight for this address.
    #[error("connect already in progress for {0}")]
    AlreadyConnecting(Address),

    #[error("already connected to {0}")]
    AlreadyConnected(Address),

    #[error("no connection for {0}")]
    NotConnected(Address),

    /// The platform rejected the scan request. Not retried.
    #[error("scan failed to start: {0}")]
    ScanStartFailed(PlatformError),

    #[error("connect to {address} timed out")]
    ConnectTimeout { address: Address },

    #[error("connect to {address} failed: {source}")]
    ConnectFailed {
        address: Address,
        source: PlatformError,
    },

    /// The automatic reconnect budget is spent; the caller must reconnect
    /// manually.
    #[error("{address}: retry budget exhausted after {attempts} attempts")]
    ExhaustedRetries { address: Address, attempts: u32 },

    #[error("GATT {operation} on {address} timed out")]
    OperationTimeout {
        address: Address,
        operation: &'static str,
    },

    /// The enable-notification write to the CCCD failed; only the affected
    /// characteristic is skipped.
    #[error("descriptor write for characteristic {characteristic} failed: {source}")]
    DescriptorWriteFailed {
        characteristic: Uuid,
        source: PlatformError,
    },

    #[error("subscription to characteristic {characteristic} failed: {source}")]
    SubscriptionFailed {
        characteristic: Uuid,
        source: PlatformError,
    },

    /// Passive disconnect reported by the platform. Triggers the automatic
    /// reconnect sequence while budget remains.
    #[error("link to {address} lost (status {status})")]
    LinkLost { address: Address, status: i32 },

    #[error(transparent)]
    Platform(#[from] PlatformError),
}
