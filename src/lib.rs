//! BLE central session core: precondition gating, timed discovery scans and
//! per-peripheral connection state machines that discover services, enable
//! notifications and reconnect on link loss.
//!
//! The crate is platform-agnostic: it drives the BLE stack exclusively
//! through the [`platform::BleAdapter`] and [`platform::LocationServices`]
//! traits and reports every observable outcome as a [`types::BleEvent`] on
//! the channel returned by [`manager::BleManager::new`].
//!
//! ```no_run
//! use blelink::{BleManager, TransportPolicy};
//! # use blelink::platform::{BleAdapter, LocationServices};
//! # async fn demo<A: BleAdapter, L: LocationServices>(adapter: A, location: L) {
//! let (manager, mut events) = BleManager::new(adapter, location, TransportPolicy::default());
//! manager.start_scan(None).await.unwrap();
//! while let Some(event) = events.recv().await {
//!     log::info!("{event:?}");
//! }
//! # }
//! ```

pub mod connection;
pub mod constants;
pub mod error;
pub mod gate;
pub mod manager;
pub mod notification;
pub mod platform;
pub mod policy;
pub mod scanner;
pub mod types;

pub use error::{BleError, PlatformError};
pub use gate::ReadinessResult;
pub use manager::BleManager;
pub use policy::TransportPolicy;
pub use scanner::ScanFilter;
pub use types::{
    Address, BleEvent, ConnectionState, FailReason, PeripheralHandle, ScanEvent,
};
