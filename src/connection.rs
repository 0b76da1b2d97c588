//! Per-peripheral connection state machine and the reconnect policy around
//! it. One task drives each connection; all state mutation happens inside
//! that task, and GATT operations are serialized because the task awaits one
//! adapter call at a time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::constants::{CCCD_UUID, ENABLE_NOTIFICATION_VALUE};
use crate::error::{BleError, PlatformError};
use crate::notification::NotificationChannel;
use crate::platform::{BleAdapter, LinkEvent};
use crate::policy::TransportPolicy;
use crate::types::{
    Address, BleEvent, ConnectionState, FailReason, GattCharacteristic, GattProfile,
};

struct ConnectionEntry {
    state: Arc<Mutex<ConnectionState>>,
    cancel: CancellationToken,
    link_tx: UnboundedSender<i32>,
    task: JoinHandle<()>,
}

/// Owns every per-peripheral state machine. At most one exists per address;
/// `connect` while one is busy is rejected without side effects.
pub struct ConnectionManager<A: BleAdapter> {
    adapter: Arc<A>,
    policy: TransportPolicy,
    events: UnboundedSender<BleEvent>,
    connections: Arc<Mutex<HashMap<Address, ConnectionEntry>>>,
}

impl<A: BleAdapter> ConnectionManager<A> {
    pub(crate) fn new(
        adapter: Arc<A>,
        policy: TransportPolicy,
        events: UnboundedSender<BleEvent>,
    ) -> Self {
        let manager = Self {
            adapter,
            policy,
            events,
            connections: Arc::new(Mutex::new(HashMap::new())),
        };
        manager.spawn_link_router();
        manager
    }

    /// Routes platform link events to the connection task owning the address.
    fn spawn_link_router(&self) {
        let adapter = self.adapter.clone();
        let connections = self.connections.clone();
        tokio::spawn(async move {
            let mut stream = match adapter.link_events().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("failed to register for link events: {e}");
                    return;
                }
            };
            while let Some(event) = stream.next().await {
                let LinkEvent::Disconnected { address, status } = event;
                let link_tx = connections
                    .lock()
                    .unwrap()
                    .get(&address)
                    .map(|entry| entry.link_tx.clone());
                match link_tx {
                    Some(link_tx) => {
                        let _ = link_tx.send(status);
                    }
                    None => debug!("link event for unmanaged peripheral {address}"),
                }
            }
        });
    }

    /// Start the connection state machine for `address`. Non-blocking: the
    /// task reports progress through the event channel.
    pub fn connect(&self, address: Address) -> Result<(), BleError> {
        let mut connections = self.connections.lock().unwrap();
        if let Some(entry) = connections.get(&address) {
            let state = entry.state.lock().unwrap().clone();
            match state {
                ConnectionState::Connecting
                | ConnectionState::ServiceDiscovery
                | ConnectionState::Subscribing => {
                    return Err(BleError::AlreadyConnecting(address));
                }
                ConnectionState::Connected | ConnectionState::Disconnecting => {
                    return Err(BleError::AlreadyConnected(address));
                }
                ConnectionState::Idle
                | ConnectionState::Disconnected
                | ConnectionState::Failed(_) => {
                    connections.remove(&address);
                }
            }
        }

        // Claim the busy state before the task is scheduled so a concurrent
        // connect for the same address is rejected.
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));
        let cancel = CancellationToken::new();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let task = ConnectionTask {
            adapter: self.adapter.clone(),
            policy: self.policy,
            events: self.events.clone(),
            state: state.clone(),
            cancel: cancel.clone(),
            link_rx,
            address: address.clone(),
            subscriptions: Vec::new(),
        };
        let handle = tokio::spawn(task.run());
        connections.insert(
            address,
            ConnectionEntry {
                state,
                cancel,
                link_tx,
                task: handle,
            },
        );
        Ok(())
    }

    /// Request an active disconnect. Safe no-op when no connection exists or
    /// the state machine already reached a terminal state.
    pub fn disconnect(&self, address: &Address) {
        if let Some(entry) = self.connections.lock().unwrap().get(address) {
            entry.cancel.cancel();
        }
    }

    /// Tear down every connection and wait for the tasks to finish.
    pub async fn disconnect_all(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut connections = self.connections.lock().unwrap();
            connections
                .drain()
                .map(|(_, entry)| {
                    entry.cancel.cancel();
                    entry.task
                })
                .collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Current state of the machine for `address`; `Idle` when none exists.
    pub fn state_of(&self, address: &Address) -> ConnectionState {
        self.connections
            .lock()
            .unwrap()
            .get(address)
            .map(|entry| entry.state.lock().unwrap().clone())
            .unwrap_or(ConnectionState::Idle)
    }
}

/// Outcome of one full connect attempt (connect, discovery, subscribe,
/// steady state).
enum Attempt {
    /// Terminal: active disconnect completed or nothing left to do.
    Finished,
    /// The attempt failed or the link was lost; retry if budget remains.
    Retry,
}

struct ConnectionTask<A: BleAdapter> {
    adapter: Arc<A>,
    policy: TransportPolicy,
    events: UnboundedSender<BleEvent>,
    state: Arc<Mutex<ConnectionState>>,
    cancel: CancellationToken,
    link_rx: UnboundedReceiver<i32>,
    address: Address,
    subscriptions: Vec<NotificationChannel<A>>,
}

impl<A: BleAdapter> ConnectionTask<A> {
    async fn run(mut self) {
        let budget = self.policy.reconnect_count;
        let mut attempts_left = budget;
        loop {
            match self.attempt().await {
                Attempt::Finished => return,
                Attempt::Retry => {
                    if attempts_left == 0 {
                        warn!("{}: retry budget exhausted", self.address);
                        self.set_state(ConnectionState::Failed(FailReason::ExhaustedRetries));
                        self.emit(BleEvent::Error {
                            error: BleError::ExhaustedRetries {
                                address: self.address.clone(),
                                attempts: budget + 1,
                            },
                            context: "reconnect".to_string(),
                        });
                        return;
                    }
                    attempts_left -= 1;
                    info!(
                        "{}: reconnecting in {:?} ({} attempt(s) left)",
                        self.address, self.policy.reconnect_interval, attempts_left
                    );
                    let cancel = self.cancel.clone();
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            // Caller gave up while we were waiting to retry.
                            self.set_state(ConnectionState::Disconnected);
                            self.emit(BleEvent::Disconnected {
                                address: self.address.clone(),
                                was_active: true,
                                status: 0,
                            });
                            return;
                        }
                        _ = sleep(self.policy.reconnect_interval) => {}
                    }
                }
            }
        }
    }

    async fn attempt(&mut self) -> Attempt {
        // Connecting
        self.emit(BleEvent::StartConnect {
            address: self.address.clone(),
        });
        self.set_state(ConnectionState::Connecting);

        let cancel = self.cancel.clone();
        let adapter = self.adapter.clone();
        let address = self.address.clone();
        let connected = tokio::select! {
            _ = cancel.cancelled() => None,
            result = timeout(self.policy.connect_timeout, adapter.connect(&address)) => Some(result),
        };
        match connected {
            None => {
                // Active cancel mid-connect: abort the attempt, no retry.
                let _ = self.adapter.disconnect(&self.address).await;
                self.set_state(ConnectionState::Disconnected);
                self.emit(BleEvent::Disconnected {
                    address: self.address.clone(),
                    was_active: true,
                    status: 0,
                });
                return Attempt::Finished;
            }
            Some(Ok(Ok(()))) => {}
            Some(Ok(Err(source))) => {
                warn!("{}: connect failed: {source}", self.address);
                self.set_state(ConnectionState::Failed(FailReason::ConnectFailed));
                self.emit(BleEvent::Error {
                    error: BleError::ConnectFailed {
                        address: self.address.clone(),
                        source,
                    },
                    context: "connect".to_string(),
                });
                return Attempt::Retry;
            }
            Some(Err(_)) => {
                warn!(
                    "{}: connect timed out after {:?}",
                    self.address, self.policy.connect_timeout
                );
                self.set_state(ConnectionState::Failed(FailReason::Timeout));
                self.emit(BleEvent::Error {
                    error: BleError::ConnectTimeout {
                        address: self.address.clone(),
                    },
                    context: "connect".to_string(),
                });
                return Attempt::Retry;
            }
        }

        // Link events queued before this session belong to earlier attempts.
        while self.link_rx.try_recv().is_ok() {}

        // ServiceDiscovery
        self.set_state(ConnectionState::ServiceDiscovery);
        let address = self.address.clone();
        let services = match self
            .gatt_op("service-discovery", self.adapter.discover_services(&address))
            .await
        {
            Ok(services) => services,
            Err(error) => {
                warn!("{}: service discovery failed: {error}", self.address);
                let _ = self.adapter.disconnect(&self.address).await;
                let reason = match error {
                    BleError::OperationTimeout { .. } => FailReason::Timeout,
                    _ => FailReason::ConnectFailed,
                };
                self.set_state(ConnectionState::Failed(reason));
                self.emit(BleEvent::Error {
                    error,
                    context: "service-discovery".to_string(),
                });
                return Attempt::Retry;
            }
        };
        let profile = GattProfile { services };
        debug!(
            "{}: discovered {} service(s), {} characteristic(s)",
            self.address,
            profile.services.len(),
            profile.characteristic_count()
        );

        // Subscribing: one pass over the subscribable characteristics in
        // discovery order. Failures skip the characteristic, never the
        // connection.
        self.set_state(ConnectionState::Subscribing);
        let targets: Vec<(Uuid, GattCharacteristic)> = profile
            .subscribable()
            .map(|(service, ch)| (service, ch.clone()))
            .collect();
        for (service, characteristic) in &targets {
            if self.cancel.is_cancelled() {
                break;
            }
            self.setup_subscription(*service, characteristic).await;
        }
        if self.cancel.is_cancelled() {
            // Cancelled mid-setup: tear down without ever reporting Connected.
            return self.teardown_active().await;
        }

        // Connected is reported first; only then do the per-characteristic
        // Subscribed events fire and payload forwarding begin, in discovery
        // order.
        self.set_state(ConnectionState::Connected);
        let events = self.events.clone();
        let address = self.address.clone();
        for channel in &mut self.subscriptions {
            let _ = events.send(BleEvent::Subscribed {
                address: address.clone(),
                service: channel.service(),
                characteristic: channel.characteristic(),
            });
            channel.start();
        }
        info!(
            "{}: connected, {} of {} subscribable characteristic(s) active",
            self.address,
            self.subscriptions.len(),
            targets.len()
        );
        // The profile is owned by this session and dropped with it.
        drop(profile);

        // Connected: wait for an active disconnect or a link loss.
        let cancel = self.cancel.clone();
        let link_down = tokio::select! {
            _ = cancel.cancelled() => None,
            status = self.link_rx.recv() => Some(status),
        };
        match link_down {
            None => self.teardown_active().await,
            Some(status) => {
                let Some(status) = status else {
                    debug!("{}: link channel closed, stopping", self.address);
                    return Attempt::Finished;
                };
                warn!("{}: link lost (status {status})", self.address);
                self.close_subscriptions().await;
                self.set_state(ConnectionState::Disconnected);
                self.emit(BleEvent::Disconnected {
                    address: self.address.clone(),
                    was_active: false,
                    status,
                });
                self.emit(BleEvent::Error {
                    error: BleError::LinkLost {
                        address: self.address.clone(),
                        status,
                    },
                    context: "connected".to_string(),
                });
                Attempt::Retry
            }
        }
    }

    /// Read (best-effort), enable the notification descriptor, and open the
    /// channel for one subscribable characteristic.
    async fn setup_subscription(&mut self, service: Uuid, characteristic: &GattCharacteristic) {
        let address = self.address.clone();
        let uuid = characteristic.uuid;

        match self
            .gatt_op(
                "read",
                self.adapter.read_characteristic(&address, service, uuid),
            )
            .await
        {
            Ok(value) => debug!("{address}: read {uuid}, {} byte(s)", value.len()),
            // The read is best-effort; a failure does not fail the pass.
            Err(error) => debug!("{address}: read of {uuid} failed: {error}"),
        }

        if !characteristic.descriptors.contains(&CCCD_UUID) {
            debug!("{address}: {uuid} has no notification descriptor, skipping");
            return;
        }

        let enabled = self
            .gatt_op(
                "descriptor-write",
                self.adapter.write_descriptor(
                    &address,
                    service,
                    uuid,
                    CCCD_UUID,
                    &ENABLE_NOTIFICATION_VALUE,
                ),
            )
            .await;
        if let Err(error) = enabled {
            let reason = match error {
                BleError::Platform(source) => BleError::DescriptorWriteFailed {
                    characteristic: uuid,
                    source,
                },
                other => other,
            };
            warn!("{address}: enabling notifications on {uuid} failed: {reason}");
            self.emit(BleEvent::SubscriptionFailed {
                address,
                characteristic: uuid,
                reason,
            });
            return;
        }

        match NotificationChannel::open(
            self.adapter.clone(),
            self.events.clone(),
            address.clone(),
            service,
            uuid,
        )
        .await
        {
            Ok(channel) => {
                // Reported as Subscribed once the Connected state is out.
                self.subscriptions.push(channel);
            }
            Err(reason) => {
                warn!("{address}: subscription to {uuid} failed: {reason}");
                self.emit(BleEvent::SubscriptionFailed {
                    address,
                    characteristic: uuid,
                    reason,
                });
            }
        }
    }

    /// Close every open channel before the link (and with it the profile) is
    /// released.
    async fn close_subscriptions(&mut self) {
        let mut channels = std::mem::take(&mut self.subscriptions);
        for channel in &mut channels {
            channel.close().await;
        }
    }

    /// Caller-requested teardown: close every channel, release the link and
    /// report the terminal state. Never retried.
    async fn teardown_active(&mut self) -> Attempt {
        self.set_state(ConnectionState::Disconnecting);
        self.close_subscriptions().await;
        let _ = self.adapter.disconnect(&self.address).await;
        self.set_state(ConnectionState::Disconnected);
        self.emit(BleEvent::Disconnected {
            address: self.address.clone(),
            was_active: true,
            status: 0,
        });
        info!("{}: disconnected on request", self.address);
        Attempt::Finished
    }

    /// Run one GATT operation under the per-operation timeout.
    async fn gatt_op<T, F>(&self, operation: &'static str, op: F) -> Result<T, BleError>
    where
        F: Future<Output = Result<T, PlatformError>>,
    {
        match timeout(self.policy.operation_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(BleError::Platform(source)),
            Err(_) => Err(BleError::OperationTimeout {
                address: self.address.clone(),
                operation,
            }),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        {
            let mut state = self.state.lock().unwrap();
            debug!("{}: {:?} -> {next:?}", self.address, *state);
            *state = next.clone();
        }
        self.emit(BleEvent::ConnectionStateChanged {
            address: self.address.clone(),
            state: next,
        });
    }

    fn emit(&self, event: BleEvent) {
        if self.events.send(event).is_err() {
            debug!("{}: event receiver dropped", self.address);
        }
    }
}
