//! Shared data structures: addresses, discovered peripherals, the GATT model
//! and the event union delivered to the consumer.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::error::BleError;

static ADDRESS_PATTERN: OnceLock<Regex> = OnceLock::new();

fn address_pattern() -> &'static Regex {
    ADDRESS_PATTERN
        .get_or_init(|| Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}$").unwrap())
}

/// Canonical hardware address of a peripheral: six hex octets, colon
/// separated, upper case. Accepts `-` separators and lower case on input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = BleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if !address_pattern().is_match(trimmed) {
            return Err(BleError::InvalidAddress(s.to_string()));
        }
        Ok(Address(trimmed.replace('-', ":").to_uppercase()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peripheral as observed by the scanner or supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeripheralHandle {
    /// The hardware address, the identity of the peripheral.
    pub address: Address,
    /// The advertised name, if the advertisement carried one.
    pub name: Option<String>,
    /// The most recently observed signal strength.
    pub rssi: Option<i16>,
}

impl PeripheralHandle {
    /// A handle for a known address that was never observed in a scan.
    pub fn from_address(address: Address) -> Self {
        Self {
            address,
            name: None,
            rssi: None,
        }
    }
}

/// Standard GATT characteristic property bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CharProps(u8);

impl CharProps {
    pub const BROADCAST: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const WRITE_WITHOUT_RESPONSE: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn contains(&self, mask: u8) -> bool {
        self.0 & mask != 0
    }

    pub fn readable(&self) -> bool {
        self.contains(Self::READ)
    }

    pub fn notifiable(&self) -> bool {
        self.contains(Self::NOTIFY)
    }

    pub fn writable(&self) -> bool {
        self.contains(Self::WRITE | Self::WRITE_WITHOUT_RESPONSE)
    }

    /// A characteristic is worth subscribing to only when it can be read and
    /// pushes notifications.
    pub fn subscribable(&self) -> bool {
        self.readable() && self.notifiable()
    }
}

/// One characteristic within a discovered service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: CharProps,
    /// Descriptor UUIDs attached to this characteristic.
    pub descriptors: Vec<Uuid>,
}

/// One discovered service with its characteristics in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

/// The enumerated attribute tree of one connection. Built once after service
/// discovery and dropped when the connection ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattProfile {
    pub services: Vec<GattService>,
}

impl GattProfile {
    /// Subscribable characteristics in discovery order, paired with the UUID
    /// of the service that contains them.
    pub fn subscribable(&self) -> impl Iterator<Item = (Uuid, &GattCharacteristic)> {
        self.services.iter().flat_map(|service| {
            service
                .characteristics
                .iter()
                .filter(|ch| ch.properties.subscribable())
                .map(move |ch| (service.uuid, ch))
        })
    }

    pub fn characteristic_count(&self) -> usize {
        self.services.iter().map(|s| s.characteristics.len()).sum()
    }
}

/// Why a connection attempt ended in `ConnectionState::Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailReason {
    /// The connect or a setup operation timed out.
    Timeout,
    /// The platform reported the connect or a setup operation as failed.
    ConnectFailed,
    /// The retry budget is spent; terminal until the caller reconnects.
    ExhaustedRetries,
}

/// Connection lifecycle states. Only the connection task mutates these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    ServiceDiscovery,
    Subscribing,
    Connected,
    Disconnecting,
    Disconnected,
    Failed(FailReason),
}

impl ConnectionState {
    /// States in which a second `connect` for the same address is rejected.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::ServiceDiscovery
                | ConnectionState::Subscribing
                | ConnectionState::Connected
                | ConnectionState::Disconnecting
        )
    }
}

/// Events produced by a discovery scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ScanEvent {
    /// Whether the platform accepted the scan request. `ok: false` terminates
    /// the scan with no further events.
    Started { ok: bool },
    /// An advertisement passed the filter. Repeated observations of the same
    /// address refresh the signal strength.
    DeviceObserved { device: PeripheralHandle, rssi: i16 },
    /// The scan window closed or the scan was cancelled; carries the
    /// deduplicated device list.
    Finished { devices: Vec<PeripheralHandle> },
}

/// The closed event union delivered to the consumer, in order, through the
/// channel returned by [`crate::manager::BleManager::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BleEvent {
    Scan(ScanEvent),
    /// A connect attempt is being issued for this address.
    StartConnect { address: Address },
    ConnectionStateChanged {
        address: Address,
        state: ConnectionState,
    },
    /// Notifications are flowing for this characteristic.
    Subscribed {
        address: Address,
        service: Uuid,
        characteristic: Uuid,
    },
    /// This characteristic was skipped; the connection itself is unaffected.
    SubscriptionFailed {
        address: Address,
        characteristic: Uuid,
        reason: BleError,
    },
    /// One inbound notification payload, opaque to this crate.
    Payload {
        address: Address,
        characteristic: Uuid,
        data: Vec<u8>,
    },
    /// The link ended. `was_active` distinguishes a caller-requested teardown
    /// from a link loss reported by the platform.
    Disconnected {
        address: Address,
        was_active: bool,
        status: i32,
    },
    Error { error: BleError, context: String },
}
