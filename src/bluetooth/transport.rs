/// BLE transport used by the fetch session
///
/// The session only needs connect / read / subscribe / unsubscribe /
/// disconnect, so those are expressed as a trait. [`BluerTransport`] talks to
/// BlueZ; tests drive the session with an in-memory implementation.
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, Address, Device, Uuid};
use futures_util::{pin_mut, StreamExt};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

use crate::bluetooth::protocol::KNOWN_CHARACTERISTICS;
use crate::error::TransportError;

/// Queue depth between the notification callback and the session loop
pub const NOTIFICATION_QUEUE_DEPTH: usize = 64;

const SERVICES_RESOLVE_POLL_MS: u64 = 100;

/// Upper bound on the wait for GATT services after the link comes up
pub const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(20);

/// Connection primitives consumed by [`crate::bluetooth::session::FetchSession`]
pub trait Transport: Send + Sync {
    type Connection: Send + Sync;

    fn connect(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    fn read_characteristic(
        &self,
        conn: &Self::Connection,
        uuid: Uuid,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Start notifications; each payload is delivered on the returned channel
    /// in arrival order. The channel closes if the device goes away.
    fn subscribe(
        &self,
        conn: &Self::Connection,
        uuid: Uuid,
    ) -> impl Future<Output = Result<mpsc::Receiver<Vec<u8>>, TransportError>> + Send;

    fn unsubscribe(
        &self,
        conn: &Self::Connection,
        uuid: Uuid,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn disconnect(
        &self,
        conn: Self::Connection,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Runs `on_drop` when dropped unless [`DropGuard::disarm`] was called
///
/// Used to tear a half-open link down both when a connect attempt fails and
/// when the attempt's future is dropped by an outer timeout.
pub struct DropGuard<F: FnOnce()> {
    on_drop: Option<F>,
}

impl<F: FnOnce()> DropGuard<F> {
    pub fn new(on_drop: F) -> Self {
        Self {
            on_drop: Some(on_drop),
        }
    }

    pub fn disarm(mut self) {
        self.on_drop = None;
    }
}

impl<F: FnOnce()> Drop for DropGuard<F> {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

/// Disconnect `device` in the background; errors are only logged
fn spawn_disconnect(device: Device) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        warn!("No runtime to disconnect {} from", device.address());
        return;
    };
    handle.spawn(async move {
        let address = device.address();
        match device.disconnect().await {
            Ok(()) => debug!("Dropped half-open link to {}", address),
            Err(e) => warn!("Failed to disconnect {} after a failed attempt: {}", address, e),
        }
    });
}

/// GATT services show up asynchronously after the link is established
async fn wait_for_services(device: &Device) -> Result<(), TransportError> {
    while !device.is_services_resolved().await? {
        if !device.is_connected().await? {
            return Err(TransportError::Disconnected);
        }
        sleep(Duration::from_millis(SERVICES_RESOLVE_POLL_MS)).await;
    }
    Ok(())
}

/// BlueZ-backed transport on the default adapter
pub struct BluerTransport {
    adapter: Adapter,
}

/// An open GATT connection with its characteristics resolved
pub struct BluerConnection {
    device: Device,
    characteristics: HashMap<Uuid, Characteristic>,
    forwarders: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl BluerTransport {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    fn characteristic<'a>(
        conn: &'a BluerConnection,
        uuid: Uuid,
    ) -> Result<&'a Characteristic, TransportError> {
        conn.characteristics
            .get(&uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }
}

impl Transport for BluerTransport {
    type Connection = BluerConnection;

    async fn connect(&self, address: &str) -> Result<BluerConnection, TransportError> {
        let addr: Address = address
            .parse()
            .map_err(|_| TransportError::InvalidAddress(address.to_string()))?;
        let device = self.adapter.device(addr)?;

        // Anything that fails from here on must not leave the link up
        let link = {
            let device = device.clone();
            DropGuard::new(move || spawn_disconnect(device))
        };

        if !device.is_connected().await? {
            device.connect().await?;
        }

        match timeout(SERVICES_RESOLVE_TIMEOUT, wait_for_services(&device)).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout(SERVICES_RESOLVE_TIMEOUT)),
        }

        let mut characteristics = HashMap::new();
        for service in device.services().await? {
            for characteristic in service.characteristics().await? {
                let uuid = characteristic.uuid().await?;
                if KNOWN_CHARACTERISTICS.contains(&uuid) {
                    debug!("Resolved characteristic {} on {}", uuid, address);
                    characteristics.insert(uuid, characteristic);
                }
            }
        }

        link.disarm();
        Ok(BluerConnection {
            device,
            characteristics,
            forwarders: Mutex::new(HashMap::new()),
        })
    }

    async fn read_characteristic(
        &self,
        conn: &BluerConnection,
        uuid: Uuid,
    ) -> Result<Vec<u8>, TransportError> {
        let characteristic = Self::characteristic(conn, uuid)?;
        Ok(characteristic.read().await?)
    }

    async fn subscribe(
        &self,
        conn: &BluerConnection,
        uuid: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        let characteristic = Self::characteristic(conn, uuid)?;
        let stream = characteristic.notify().await?;
        let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE_DEPTH);

        // Forward notifications into the session's queue until either side goes away
        let forwarder = tokio::spawn(async move {
            pin_mut!(stream);
            while let Some(value) = stream.next().await {
                if tx.send(value).await.is_err() {
                    break;
                }
            }
            debug!("Notification stream for {} ended", uuid);
        });

        if let Ok(mut forwarders) = conn.forwarders.lock() {
            if let Some(previous) = forwarders.insert(uuid, forwarder) {
                previous.abort();
            }
        }

        Ok(rx)
    }

    async fn unsubscribe(&self, conn: &BluerConnection, uuid: Uuid) -> Result<(), TransportError> {
        // Dropping the notify stream tells BlueZ to stop notifying
        let forwarder = conn
            .forwarders
            .lock()
            .ok()
            .and_then(|mut forwarders| forwarders.remove(&uuid));
        match forwarder {
            Some(handle) => handle.abort(),
            None => warn!("No active subscription for {}", uuid),
        }
        Ok(())
    }

    async fn disconnect(&self, conn: BluerConnection) -> Result<(), TransportError> {
        if let Ok(mut forwarders) = conn.forwarders.lock() {
            for (_, handle) in forwarders.drain() {
                handle.abort();
            }
        }
        conn.device.disconnect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting_guard(count: &Arc<AtomicU32>) -> DropGuard<impl FnOnce()> {
        let count = Arc::clone(count);
        DropGuard::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn guard_fires_on_early_return() {
        fn attempt(count: &Arc<AtomicU32>, fail: bool) -> Result<(), TransportError> {
            let guard = counting_guard(count);
            if fail {
                return Err(TransportError::Disconnected);
            }
            guard.disarm();
            Ok(())
        }

        let count = Arc::new(AtomicU32::new(0));
        assert!(attempt(&count, true).is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(attempt(&count, false).is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn guard_fires_when_attempt_times_out() {
        let count = Arc::new(AtomicU32::new(0));

        let attempt = {
            let guard = counting_guard(&count);
            async move {
                // Services never resolve
                std::future::pending::<()>().await;
                guard.disarm();
            }
        };
        let result = timeout(Duration::from_secs(30), attempt).await;

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
