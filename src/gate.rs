//! Precondition gate: a pure readiness query over the radio, the location
//! permission and location services, plus a remediation forwarder. Scanning
//! and connecting are only permitted while this reports `Ready`.

use std::fmt;
use std::sync::Arc;

use log::debug;
use serde::Serialize;

use crate::platform::{BleAdapter, LocationServices, Permission, Remediation};

/// Outcome of a readiness check. Anything but `Ready` short-circuits scanner
/// and connection operations with `BleError::PreconditionFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReadinessResult {
    Ready,
    NeedsBluetoothEnable,
    NeedsLocationEnable,
    NeedsPermission(Permission),
}

impl ReadinessResult {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessResult::Ready)
    }
}

impl fmt::Display for ReadinessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessResult::Ready => write!(f, "ready"),
            ReadinessResult::NeedsBluetoothEnable => write!(f, "bluetooth is disabled"),
            ReadinessResult::NeedsLocationEnable => write!(f, "location services are disabled"),
            ReadinessResult::NeedsPermission(permission) => {
                write!(f, "missing permission {permission:?}")
            }
        }
    }
}

/// First unmet precondition wins; the order (radio, then permission, then
/// location services) follows the platform's own gating order.
fn evaluate(
    bluetooth_enabled: bool,
    permission_granted: bool,
    location_required: bool,
    location_enabled: bool,
) -> ReadinessResult {
    if !bluetooth_enabled {
        return ReadinessResult::NeedsBluetoothEnable;
    }
    if !permission_granted {
        return ReadinessResult::NeedsPermission(Permission::FineLocation);
    }
    if location_required && !location_enabled {
        return ReadinessResult::NeedsLocationEnable;
    }
    ReadinessResult::Ready
}

/// Queries platform state; holds no state of its own and never polls. Callers
/// re-check after remediation.
pub struct PreconditionGate<A, L> {
    adapter: Arc<A>,
    location: Arc<L>,
}

impl<A: BleAdapter, L: LocationServices> PreconditionGate<A, L> {
    pub fn new(adapter: Arc<A>, location: Arc<L>) -> Self {
        Self { adapter, location }
    }

    pub async fn check_ready(&self) -> ReadinessResult {
        let result = evaluate(
            self.adapter.is_enabled().await,
            self.location.permission_granted(Permission::FineLocation),
            self.location.location_required(),
            self.location.location_enabled(),
        );
        debug!("readiness check: {result}");
        result
    }

    /// Forward the remediation for an unmet precondition to the external UI
    /// layer. No-op for `Ready`.
    pub fn remediate(&self, result: &ReadinessResult) {
        let remediation = match result {
            ReadinessResult::Ready => return,
            ReadinessResult::NeedsBluetoothEnable => Remediation::EnableBluetooth,
            ReadinessResult::NeedsLocationEnable => Remediation::EnableLocation,
            ReadinessResult::NeedsPermission(permission) => {
                Remediation::RequestPermission(*permission)
            }
        };
        self.location.launch_remediation(remediation);
    }
}
