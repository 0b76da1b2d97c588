//! Constants shared across the crate: the standard notification descriptor,
//! its toggle values, and the transport policy defaults.

use std::time::Duration;

use uuid::Uuid;

/// Client Characteristic Configuration Descriptor, the standard descriptor
/// used to toggle notifications on a characteristic.
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// CCCD value enabling notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value disabling notifications.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Default timeout for establishing a link.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default timeout for a single GATT operation (read, descriptor write,
/// service discovery).
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of automatic reconnect attempts after the initial one.
pub const DEFAULT_RECONNECT_COUNT: u32 = 1;

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(5000);

/// Default discovery scan window.
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(10);
