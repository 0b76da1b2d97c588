//! Notification channels: one forwarding task per subscribed characteristic,
//! delivering payloads to the consumer in the order the link produced them.

use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::debug;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::constants::{CCCD_UUID, DISABLE_NOTIFICATION_VALUE};
use crate::error::BleError;
use crate::platform::BleAdapter;
use crate::types::{Address, BleEvent};

/// One active subscription. Payload ordering is guaranteed per channel: a
/// single task drains the platform stream and forwards to the event channel.
///
/// Opening and forwarding are separate steps. [`open`](Self::open) registers
/// the platform subscription; payloads are buffered by the platform stream
/// until [`start`](Self::start), so the consumer never sees a `Payload`
/// before the `Subscribed` event for the same characteristic.
pub struct NotificationChannel<A: BleAdapter> {
    adapter: Arc<A>,
    events: UnboundedSender<BleEvent>,
    address: Address,
    service: Uuid,
    characteristic: Uuid,
    cancel: CancellationToken,
    // Mutex only to make the channel `Sync`; the stream is never accessed
    // concurrently.
    stream: std::sync::Mutex<Option<BoxStream<'static, Vec<u8>>>>,
    task: Option<JoinHandle<()>>,
    closed: bool,
}

impl<A: BleAdapter> NotificationChannel<A> {
    /// Register the platform subscription. Fails with `SubscriptionFailed` if
    /// the platform rejects the registration; the channel is then never
    /// created and must be re-opened by a fresh discovery pass.
    pub(crate) async fn open(
        adapter: Arc<A>,
        events: UnboundedSender<BleEvent>,
        address: Address,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Self, BleError> {
        let stream = adapter
            .subscribe(&address, service, characteristic)
            .await
            .map_err(|source| BleError::SubscriptionFailed {
                characteristic,
                source,
            })?;

        Ok(Self {
            adapter,
            events,
            address,
            service,
            characteristic,
            cancel: CancellationToken::new(),
            stream: std::sync::Mutex::new(Some(stream)),
            task: None,
            closed: false,
        })
    }

    pub(crate) fn service(&self) -> Uuid {
        self.service
    }

    pub(crate) fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    /// Start forwarding payloads. No-op once started or closed.
    pub(crate) fn start(&mut self) {
        let Some(mut stream) = self.stream.lock().unwrap().take() else {
            return;
        };
        let cancel = self.cancel.clone();
        let events = self.events.clone();
        let address = self.address.clone();
        let characteristic = self.characteristic;
        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    item = stream.next() => match item {
                        Some(data) => {
                            let _ = events.send(BleEvent::Payload {
                                address: address.clone(),
                                characteristic,
                                data,
                            });
                        }
                        None => {
                            debug!("{address}: notification stream for {characteristic} ended");
                            break;
                        }
                    },
                }
            }
        }));
    }

    /// Close the channel. Idempotent; once this returns, no further `Payload`
    /// event for this characteristic will be emitted. The CCCD disable write
    /// and the platform unsubscribe are best-effort (the link may already be
    /// gone).
    pub(crate) async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        *self.stream.lock().unwrap() = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        if let Err(e) = self
            .adapter
            .write_descriptor(
                &self.address,
                self.service,
                self.characteristic,
                CCCD_UUID,
                &DISABLE_NOTIFICATION_VALUE,
            )
            .await
        {
            debug!(
                "{}: disable-notification write for {} failed: {e}",
                self.address, self.characteristic
            );
        }
        if let Err(e) = self
            .adapter
            .unsubscribe(&self.address, self.service, self.characteristic)
            .await
        {
            debug!(
                "{}: unsubscribe for {} failed: {e}",
                self.address, self.characteristic
            );
        }
    }
}
