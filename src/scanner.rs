//! Timed discovery scan: deduplicates devices by hardware address, keeps the
//! most recent signal strength, and reports one terminal completion event.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::BleError;
use crate::platform::{Advertisement, BleAdapter};
use crate::policy::TransportPolicy;
use crate::types::{Address, BleEvent, PeripheralHandle, ScanEvent};

/// Optional constraints on which advertisements are reported. Every provided
/// criterion must hold; an empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    /// Exact advertised names to accept.
    pub names: Vec<String>,
    /// Accept names starting with this prefix.
    pub name_prefix: Option<String>,
    /// Hardware addresses to accept.
    pub addresses: Vec<Address>,
    /// Per-scan override of the policy's scan window.
    pub duration: Option<Duration>,
}

impl ScanFilter {
    fn matches(&self, advertisement: &Advertisement) -> bool {
        if !self.addresses.is_empty() && !self.addresses.contains(&advertisement.address) {
            return false;
        }
        if !self.names.is_empty() {
            let Some(name) = advertisement.name.as_deref() else {
                return false;
            };
            if !self.names.iter().any(|n| n == name) {
                return false;
            }
        }
        if let Some(prefix) = &self.name_prefix {
            if !advertisement
                .name
                .as_deref()
                .map(|name| name.starts_with(prefix.as_str()))
                .unwrap_or(false)
            {
                return false;
            }
        }
        true
    }
}

struct ActiveScan {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Issues timed or manually-cancelled discovery scans. One scan at a time;
/// starting a new one cancels the previous.
pub struct Scanner<A: BleAdapter> {
    adapter: Arc<A>,
    policy: TransportPolicy,
    events: UnboundedSender<BleEvent>,
    active: Mutex<Option<ActiveScan>>,
}

impl<A: BleAdapter> Scanner<A> {
    pub(crate) fn new(
        adapter: Arc<A>,
        policy: TransportPolicy,
        events: UnboundedSender<BleEvent>,
    ) -> Self {
        Self {
            adapter,
            policy,
            events,
            active: Mutex::new(None),
        }
    }

    /// Start a scan. Non-blocking: the outcome arrives as `ScanEvent`s on the
    /// event channel, ending with `Finished` (or with `Started { ok: false }`
    /// if the platform rejects the scan).
    pub async fn start_scan(&self, filter: Option<ScanFilter>) {
        let previous = self.active.lock().unwrap().take();
        if let Some(previous) = previous {
            debug!("scan already active, restarting");
            previous.cancel.cancel();
            let _ = previous.task.await;
        }

        let filter = filter.unwrap_or_default();
        let duration = filter.duration.unwrap_or(self.policy.scan_duration);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scan_task(
            self.adapter.clone(),
            filter,
            duration,
            self.events.clone(),
            cancel.clone(),
        ));
        *self.active.lock().unwrap() = Some(ActiveScan { cancel, task });
    }

    /// Cancel the active scan, if any. Idempotent and a no-op when nothing is
    /// scanning; the cancelled scan still emits its `Finished` event with the
    /// devices found so far.
    pub fn cancel_scan(&self) {
        if let Some(active) = self.active.lock().unwrap().take() {
            info!("cancelling scan");
            active.cancel.cancel();
        }
    }
}

async fn scan_task<A: BleAdapter>(
    adapter: Arc<A>,
    filter: ScanFilter,
    duration: Duration,
    events: UnboundedSender<BleEvent>,
    cancel: CancellationToken,
) {
    let mut stream = match adapter.scan().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("scan failed to start: {e}");
            let _ = events.send(BleEvent::Scan(ScanEvent::Started { ok: false }));
            let _ = events.send(BleEvent::Error {
                error: BleError::ScanStartFailed(e),
                context: "scan-start".to_string(),
            });
            return;
        }
    };
    info!("scan started ({duration:?} window)");
    let _ = events.send(BleEvent::Scan(ScanEvent::Started { ok: true }));

    let mut seen: HashMap<Address, PeripheralHandle> = HashMap::new();
    let mut order: Vec<Address> = Vec::new();
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("scan cancelled");
                break;
            }
            _ = &mut deadline => {
                debug!("scan window elapsed");
                break;
            }
            item = stream.next() => match item {
                Some(advertisement) => {
                    if !filter.matches(&advertisement) {
                        continue;
                    }
                    observe(&mut seen, &mut order, &events, advertisement);
                }
                None => {
                    info!("scan stream ended by the platform");
                    break;
                }
            },
        }
    }

    drop(stream);
    if let Err(e) = adapter.stop_scan().await {
        warn!("stop_scan failed: {e}");
    }

    let devices: Vec<PeripheralHandle> = order
        .into_iter()
        .filter_map(|address| seen.remove(&address))
        .collect();
    info!("scan finished, {} device(s)", devices.len());
    let _ = events.send(BleEvent::Scan(ScanEvent::Finished { devices }));
}

fn observe(
    seen: &mut HashMap<Address, PeripheralHandle>,
    order: &mut Vec<Address>,
    events: &UnboundedSender<BleEvent>,
    advertisement: Advertisement,
) {
    let rssi = advertisement.rssi;
    let handle = match seen.entry(advertisement.address.clone()) {
        Entry::Occupied(mut entry) => {
            let handle = entry.get_mut();
            // Most recent observation wins.
            handle.rssi = Some(rssi);
            if handle.name.is_none() {
                handle.name = advertisement.name;
            }
            handle.clone()
        }
        Entry::Vacant(entry) => {
            order.push(advertisement.address.clone());
            debug!(
                "observed {} ({:?}, rssi {rssi})",
                advertisement.address, advertisement.name
            );
            entry
                .insert(PeripheralHandle {
                    address: advertisement.address,
                    name: advertisement.name,
                    rssi: Some(rssi),
                })
                .clone()
        }
    };
    let _ = events.send(BleEvent::Scan(ScanEvent::DeviceObserved {
        device: handle,
        rssi,
    }));
}
