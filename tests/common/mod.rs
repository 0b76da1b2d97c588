//! Scripted platform doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use blelink::error::PlatformError;
use blelink::platform::{
    Advertisement, BleAdapter, LinkEvent, LocationServices, Permission, Remediation,
};
use blelink::types::{Address, BleEvent, CharProps, GattCharacteristic, GattService};
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use uuid::Uuid;

/// Capture crate logs in test output. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn addr(s: &str) -> Address {
    s.parse().unwrap()
}

pub fn notify_char(uuid: Uuid, with_cccd: bool) -> GattCharacteristic {
    GattCharacteristic {
        uuid,
        properties: CharProps::from_bits(CharProps::READ | CharProps::NOTIFY),
        descriptors: if with_cccd {
            vec![blelink::constants::CCCD_UUID]
        } else {
            vec![]
        },
    }
}

pub fn read_only_char(uuid: Uuid) -> GattCharacteristic {
    GattCharacteristic {
        uuid,
        properties: CharProps::from_bits(CharProps::READ),
        descriptors: vec![],
    }
}

pub fn service_with(uuid: Uuid, characteristics: Vec<GattCharacteristic>) -> GattService {
    GattService {
        uuid,
        characteristics,
    }
}

/// Receive the next event, failing the test instead of hanging forever.
pub async fn next_event(events: &mut UnboundedReceiver<BleEvent>) -> BleEvent {
    timeout(Duration::from_secs(3600), events.recv())
        .await
        .expect("no event within the test deadline")
        .expect("event channel closed")
}

/// Drain events until one matches, returning the matching event. Events
/// before the match are discarded.
pub async fn wait_for(
    events: &mut UnboundedReceiver<BleEvent>,
    pred: impl Fn(&BleEvent) -> bool,
) -> BleEvent {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Scripted outcome for a connect or GATT call.
#[derive(Debug, Clone)]
pub enum Outcome {
    Succeed,
    Fail(i32),
    /// Never resolves; lets the caller's timeout fire.
    Hang,
}

#[derive(Default)]
struct Inner {
    enabled: bool,
    scan_error: Option<PlatformError>,
    advertisements: Vec<Advertisement>,
    connect_script: VecDeque<Outcome>,
    discover_script: VecDeque<Outcome>,
    services: Vec<GattService>,
    read_values: HashMap<Uuid, Vec<u8>>,
    hung_reads: Vec<Uuid>,
    descriptor_failures: Vec<Uuid>,
    subscribe_failures: Vec<Uuid>,
    preloaded_payloads: HashMap<Uuid, Vec<Vec<u8>>>,
    descriptor_writes: Vec<(Uuid, Uuid, Vec<u8>)>,
    payload_senders: HashMap<Uuid, UnboundedSender<Vec<u8>>>,
    link_senders: Vec<UnboundedSender<LinkEvent>>,
    log: Vec<String>,
}

/// A platform double driven entirely by per-test scripts. Cloning shares the
/// same scripted state, so tests keep a handle after moving one clone into
/// the manager.
#[derive(Clone)]
pub struct MockAdapter {
    inner: Arc<Mutex<Inner>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        init_logging();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                enabled: true,
                ..Default::default()
            })),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.lock().unwrap().enabled = enabled;
    }

    pub fn fail_scan(&self, status: i32) {
        self.inner.lock().unwrap().scan_error = Some(PlatformError::new(status, "scan rejected"));
    }

    pub fn set_advertisements(&self, advertisements: Vec<Advertisement>) {
        self.inner.lock().unwrap().advertisements = advertisements;
    }

    /// Queue the outcome of the next connect call. Unscripted calls succeed.
    pub fn push_connect(&self, outcome: Outcome) {
        self.inner.lock().unwrap().connect_script.push_back(outcome);
    }

    /// Queue the outcome of the next service discovery. Unscripted calls
    /// succeed with the configured services.
    pub fn push_discovery(&self, outcome: Outcome) {
        self.inner
            .lock()
            .unwrap()
            .discover_script
            .push_back(outcome);
    }

    pub fn set_services(&self, services: Vec<GattService>) {
        self.inner.lock().unwrap().services = services;
    }

    pub fn set_read_value(&self, characteristic: Uuid, value: Vec<u8>) {
        self.inner
            .lock()
            .unwrap()
            .read_values
            .insert(characteristic, value);
    }

    /// Make reads of this characteristic stall until the caller's timeout.
    pub fn hang_read(&self, characteristic: Uuid) {
        self.inner.lock().unwrap().hung_reads.push(characteristic);
    }

    /// Queue a payload delivered the moment the subscription is registered,
    /// before any forwarding starts.
    pub fn preload_payload(&self, characteristic: Uuid, data: Vec<u8>) {
        self.inner
            .lock()
            .unwrap()
            .preloaded_payloads
            .entry(characteristic)
            .or_default()
            .push(data);
    }

    pub fn fail_descriptor_write(&self, characteristic: Uuid) {
        self.inner
            .lock()
            .unwrap()
            .descriptor_failures
            .push(characteristic);
    }

    pub fn fail_subscribe(&self, characteristic: Uuid) {
        self.inner
            .lock()
            .unwrap()
            .subscribe_failures
            .push(characteristic);
    }

    /// Push one notification payload into an open subscription stream.
    pub fn send_payload(&self, characteristic: Uuid, data: Vec<u8>) {
        let sender = self
            .inner
            .lock()
            .unwrap()
            .payload_senders
            .get(&characteristic)
            .cloned()
            .expect("no open subscription for characteristic");
        sender.send(data).unwrap();
    }

    /// Report a passive link loss for `address`.
    pub fn drop_link(&self, address: Address, status: i32) {
        let senders = self.inner.lock().unwrap().link_senders.clone();
        for sender in senders {
            let _ = sender.send(LinkEvent::Disconnected {
                address: address.clone(),
                status,
            });
        }
    }

    pub fn descriptor_writes(&self) -> Vec<(Uuid, Uuid, Vec<u8>)> {
        self.inner.lock().unwrap().descriptor_writes.clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.inner.lock().unwrap().log.clone()
    }

    pub fn calls(&self, prefix: &str) -> usize {
        self.log().iter().filter(|l| l.starts_with(prefix)).count()
    }

    fn record(&self, entry: String) {
        self.inner.lock().unwrap().log.push(entry);
    }
}

#[async_trait]
impl BleAdapter for MockAdapter {
    async fn is_enabled(&self) -> bool {
        self.inner.lock().unwrap().enabled
    }

    async fn scan(&self) -> Result<BoxStream<'static, Advertisement>, PlatformError> {
        self.record("scan".to_string());
        let (error, advertisements) = {
            let inner = self.inner.lock().unwrap();
            (inner.scan_error.clone(), inner.advertisements.clone())
        };
        if let Some(error) = error {
            return Err(error);
        }
        Ok(stream::iter(advertisements).chain(stream::pending()).boxed())
    }

    async fn stop_scan(&self) -> Result<(), PlatformError> {
        self.record("stop_scan".to_string());
        Ok(())
    }

    async fn connect(&self, address: &Address) -> Result<(), PlatformError> {
        self.record(format!("connect {address}"));
        let outcome = self
            .inner
            .lock()
            .unwrap()
            .connect_script
            .pop_front()
            .unwrap_or(Outcome::Succeed);
        match outcome {
            Outcome::Succeed => Ok(()),
            Outcome::Fail(status) => Err(PlatformError::new(status, "connect refused")),
            Outcome::Hang => {
                futures_util::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn disconnect(&self, address: &Address) -> Result<(), PlatformError> {
        self.record(format!("disconnect {address}"));
        Ok(())
    }

    async fn discover_services(
        &self,
        address: &Address,
    ) -> Result<Vec<GattService>, PlatformError> {
        self.record(format!("discover {address}"));
        let (outcome, services) = {
            let mut inner = self.inner.lock().unwrap();
            (
                inner.discover_script.pop_front().unwrap_or(Outcome::Succeed),
                inner.services.clone(),
            )
        };
        match outcome {
            Outcome::Succeed => Ok(services),
            Outcome::Fail(status) => Err(PlatformError::new(status, "discovery failed")),
            Outcome::Hang => {
                futures_util::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn read_characteristic(
        &self,
        _address: &Address,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, PlatformError> {
        self.record(format!("read {characteristic}"));
        let (hung, value) = {
            let inner = self.inner.lock().unwrap();
            (
                inner.hung_reads.contains(&characteristic),
                inner.read_values.get(&characteristic).cloned(),
            )
        };
        if hung {
            futures_util::future::pending::<()>().await;
            unreachable!()
        }
        Ok(value.unwrap_or_default())
    }

    async fn write_descriptor(
        &self,
        _address: &Address,
        _service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), PlatformError> {
        self.record(format!("write_descriptor {characteristic}"));
        let mut inner = self.inner.lock().unwrap();
        inner
            .descriptor_writes
            .push((characteristic, descriptor, value.to_vec()));
        if inner.descriptor_failures.contains(&characteristic) {
            return Err(PlatformError::new(133, "descriptor write rejected"));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        _address: &Address,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<BoxStream<'static, Vec<u8>>, PlatformError> {
        self.record(format!("subscribe {characteristic}"));
        let mut inner = self.inner.lock().unwrap();
        if inner.subscribe_failures.contains(&characteristic) {
            return Err(PlatformError::new(133, "subscribe rejected"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for data in inner
            .preloaded_payloads
            .get(&characteristic)
            .cloned()
            .unwrap_or_default()
        {
            let _ = tx.send(data);
        }
        inner.payload_senders.insert(characteristic, tx);
        Ok(receiver_stream(rx))
    }

    async fn unsubscribe(
        &self,
        _address: &Address,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), PlatformError> {
        self.record(format!("unsubscribe {characteristic}"));
        self.inner
            .lock()
            .unwrap()
            .payload_senders
            .remove(&characteristic);
        Ok(())
    }

    async fn link_events(&self) -> Result<BoxStream<'static, LinkEvent>, PlatformError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().link_senders.push(tx);
        Ok(receiver_stream(rx))
    }
}

fn receiver_stream<T: Send + 'static>(rx: UnboundedReceiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

struct LocInner {
    required: bool,
    enabled: bool,
    granted: bool,
    remediations: Vec<Remediation>,
}

/// Location/permission double. Defaults to everything satisfied.
#[derive(Clone)]
pub struct MockLocation {
    inner: Arc<Mutex<LocInner>>,
}

impl MockLocation {
    pub fn ready() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LocInner {
                required: true,
                enabled: true,
                granted: true,
                remediations: Vec::new(),
            })),
        }
    }

    pub fn set_location_enabled(&self, enabled: bool) {
        self.inner.lock().unwrap().enabled = enabled;
    }

    pub fn set_permission_granted(&self, granted: bool) {
        self.inner.lock().unwrap().granted = granted;
    }

    pub fn set_location_required(&self, required: bool) {
        self.inner.lock().unwrap().required = required;
    }

    pub fn remediations(&self) -> Vec<Remediation> {
        self.inner.lock().unwrap().remediations.clone()
    }
}

impl LocationServices for MockLocation {
    fn location_required(&self) -> bool {
        self.inner.lock().unwrap().required
    }

    fn location_enabled(&self) -> bool {
        self.inner.lock().unwrap().enabled
    }

    fn permission_granted(&self, _permission: Permission) -> bool {
        self.inner.lock().unwrap().granted
    }

    fn launch_remediation(&self, remediation: Remediation) {
        self.inner.lock().unwrap().remediations.push(remediation);
    }
}
