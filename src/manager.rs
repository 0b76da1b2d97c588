//! The facade tying the gate, the scanner and the connection machinery
//! together behind one event channel.

use std::sync::Arc;

use log::info;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::connection::ConnectionManager;
use crate::error::BleError;
use crate::gate::{PreconditionGate, ReadinessResult};
use crate::platform::{BleAdapter, LocationServices};
use crate::policy::TransportPolicy;
use crate::scanner::{ScanFilter, Scanner};
use crate::types::{Address, BleEvent, ConnectionState};

/// Entry point of the crate. Owns the scanner and all connections; every
/// observable outcome flows through the event receiver handed out by
/// [`BleManager::new`].
pub struct BleManager<A: BleAdapter, L: LocationServices> {
    gate: PreconditionGate<A, L>,
    scanner: Scanner<A>,
    connections: ConnectionManager<A>,
}

impl<A: BleAdapter, L: LocationServices> BleManager<A, L> {
    /// Build the manager and the event channel its components report on. The
    /// receiver must be drained; events queue unboundedly otherwise.
    pub fn new(adapter: A, location: L, policy: TransportPolicy) -> (Self, UnboundedReceiver<BleEvent>) {
        let adapter = Arc::new(adapter);
        let location = Arc::new(location);
        let (events, receiver) = mpsc::unbounded_channel();
        let manager = Self {
            gate: PreconditionGate::new(adapter.clone(), location),
            scanner: Scanner::new(adapter.clone(), policy, events.clone()),
            connections: ConnectionManager::new(adapter, policy, events),
        };
        (manager, receiver)
    }

    /// Evaluate the scan/connect preconditions without side effects.
    pub async fn check_ready(&self) -> ReadinessResult {
        self.gate.check_ready().await
    }

    /// Forward the remediation for an unmet precondition to the platform's
    /// UI layer.
    pub fn remediate(&self, result: &ReadinessResult) {
        self.gate.remediate(result);
    }

    /// Start a discovery scan. Rejected while a precondition is unmet; the
    /// scan itself runs in the background and reports through the event
    /// channel.
    pub async fn start_scan(&self, filter: Option<ScanFilter>) -> Result<(), BleError> {
        self.guard().await?;
        self.scanner.start_scan(filter).await;
        Ok(())
    }

    /// Cancel the active scan, if any.
    pub fn cancel_scan(&self) {
        self.scanner.cancel_scan();
    }

    /// Start the connection state machine for `address`. Rejected while a
    /// precondition is unmet or a machine for this address is busy.
    pub async fn connect(&self, address: Address) -> Result<(), BleError> {
        self.guard().await?;
        info!("connect requested for {address}");
        self.connections.connect(address)
    }

    /// Parse `address` and connect. Convenience for callers holding raw
    /// address strings.
    pub async fn connect_str(&self, address: &str) -> Result<(), BleError> {
        self.connect(address.parse()?).await
    }

    /// Request an active disconnect. No-op when nothing is connected.
    pub fn disconnect(&self, address: &Address) {
        self.connections.disconnect(address);
    }

    /// Tear down every connection and wait for the tasks to finish. Scans
    /// are unaffected.
    pub async fn disconnect_all(&self) {
        self.connections.disconnect_all().await;
    }

    /// Current lifecycle state for `address`; `Idle` when unknown.
    pub fn connection_state(&self, address: &Address) -> ConnectionState {
        self.connections.state_of(address)
    }

    /// Stop scanning and tear down every connection, waiting for the
    /// connection tasks to finish.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.scanner.cancel_scan();
        self.disconnect_all().await;
    }

    async fn guard(&self) -> Result<(), BleError> {
        let readiness = self.gate.check_ready().await;
        if readiness.is_ready() {
            Ok(())
        } else {
            Err(BleError::PreconditionFailed(readiness))
        }
    }
}
