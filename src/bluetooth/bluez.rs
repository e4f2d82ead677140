//! BlueZ transport.
//!
//! Discovery runs in a background task that forwards adapter events as
//! [`Advertisement`]s and periodically re-offers every device the adapter
//! already knows about. Each connection keeps one task per notification
//! subscription plus a watcher for link loss; all of them are aborted when
//! the connection is dropped. A notification stream that ends without an
//! unsubscribe counts as link loss too.

use std::{
   collections::HashMap,
   pin::pin,
   sync::Arc,
   time::Duration,
};

use bluer::{
   Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty, Session,
   gatt::remote::Characteristic,
};
use futures::stream::{Stream, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{
   select,
   sync::{mpsc, oneshot},
   task::JoinHandle,
   time::{self, MissedTickBehavior},
};
use uuid::Uuid;

use crate::{
   bluetooth::transport::{
      Advertisement, AdvertisementStream, CharFlags, CharacteristicInfo, Connection,
      DisconnectHandler, NotificationSink, Peripheral, ServiceInfo, Transport,
   },
   error::{ExploreError, Result},
};

/// Poll period while waiting for BlueZ to resolve services.
const SERVICES_RESOLVED_POLL: Duration = Duration::from_millis(100);
/// Maximum time to wait for BlueZ to start a notification session
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Advertisement channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 256;

pub struct BluezTransport {
   // Keeps the D-Bus connection alive for the adapter handle.
   _session: Session,
   adapter: Adapter,
   rescan_interval: Duration,
}

impl BluezTransport {
   pub async fn new(rescan_interval: Duration) -> Result<Self> {
      let session = Session::new().await?;
      let adapter = session
         .default_adapter()
         .await
         .map_err(|_| ExploreError::AdapterNotFound)?;

      if !adapter.is_powered().await? {
         adapter.set_powered(true).await?;
         info!("Powered on adapter: {}", adapter.name());
      }
      info!("Using adapter {} ({})", adapter.name(), adapter.address().await?);

      Ok(Self {
         _session: session,
         adapter,
         rescan_interval,
      })
   }

   fn parse_address(peripheral: &Peripheral) -> Result<Address> {
      peripheral
         .id
         .parse()
         .map_err(|_| ExploreError::InvalidAddress(peripheral.id.clone()))
   }
}

/// Builds an advertisement for a known device. Devices without a name are skipped.
async fn observe(adapter: &Adapter, addr: Address) -> Option<Advertisement> {
   let device = adapter.device(addr).ok()?;
   let name = device.name().await.ok().flatten()?;
   if name.is_empty() {
      return None;
   }
   let rssi = device.rssi().await.ok().flatten();
   let services = device
      .uuids()
      .await
      .ok()
      .flatten()
      .map(|uuids| uuids.into_iter().collect())
      .unwrap_or_default();
   Some(Advertisement {
      peripheral: Peripheral::new(addr.to_string(), name),
      rssi,
      services,
   })
}

async fn discovery_loop(
   adapter: Adapter,
   rescan_interval: Duration,
   events: impl Stream<Item = AdapterEvent>,
   tx: mpsc::Sender<Advertisement>,
) {
   let mut events = pin!(events);
   let mut rescan = time::interval(rescan_interval);
   rescan.set_missed_tick_behavior(MissedTickBehavior::Skip);

   loop {
      let addresses = select! {
         event = events.next() => match event {
            Some(AdapterEvent::DeviceAdded(addr)) => vec![addr],
            Some(AdapterEvent::DeviceRemoved(addr)) => {
               debug!("Device removed: {addr}");
               continue;
            },
            Some(_) => continue,
            None => {
               warn!("Adapter event stream ended");
               break;
            },
         },
         _ = rescan.tick() => match adapter.device_addresses().await {
            Ok(addresses) => addresses,
            Err(e) => {
               warn!("Failed to list known devices: {e}");
               continue;
            },
         },
      };

      for addr in addresses {
         let Some(advertisement) = observe(&adapter, addr).await else {
            continue;
         };
         if tx.send(advertisement).await.is_err() {
            debug!("Advertisement receiver dropped, stopping discovery");
            return;
         }
      }
   }
}

#[async_trait::async_trait]
impl Transport for BluezTransport {
   async fn advertisements(&self) -> Result<AdvertisementStream> {
      let events = self.adapter.discover_devices().await?;
      let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      tokio::spawn(discovery_loop(
         self.adapter.clone(),
         self.rescan_interval,
         events,
         tx,
      ));
      Ok(futures::stream::unfold(rx, |mut rx| async move {
         rx.recv().await.map(|adv| (adv, rx))
      })
      .boxed())
   }

   async fn connect(
      &self,
      peripheral: &Peripheral,
      timeout: Duration,
      on_disconnect: DisconnectHandler,
   ) -> Result<Arc<dyn Connection>> {
      let addr = Self::parse_address(peripheral)?;
      let device = self.adapter.device(addr)?;
      // Subscribed before connecting so a drop during setup is still seen.
      let events = device.events().await?;

      let establish = async {
         if !device.is_connected().await? {
            device.connect().await?;
         }
         while !device.is_services_resolved().await? {
            time::sleep(SERVICES_RESOLVED_POLL).await;
         }
         Ok::<_, ExploreError>(())
      };
      match time::timeout(timeout, establish).await {
         Ok(Ok(())) => {},
         Ok(Err(e)) => return Err(e),
         Err(_) => {
            let _ = device.disconnect().await;
            return Err(ExploreError::ConnectTimeout(timeout));
         },
      }

      if !device.is_connected().await? {
         return Err(ExploreError::ConnectionClosed);
      }

      let watcher = tokio::spawn(watch_link(events, on_disconnect.clone()));
      Ok(Arc::new(BluezConnection {
         device,
         on_disconnect,
         characteristics: Mutex::default(),
         notify_tasks: Mutex::default(),
         watcher,
      }))
   }
}

/// Calls `on_disconnect` once the device reports it is no longer connected
/// or its event stream ends.
async fn watch_link(events: impl Stream<Item = DeviceEvent>, on_disconnect: DisconnectHandler) {
   let mut events = pin!(events);
   while let Some(event) = events.next().await {
      if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
         break;
      }
   }
   on_disconnect();
}

/// Forwards notification values into `sink`. A stream that ends on its own
/// means the link is gone; a closed sink means nobody is listening.
async fn forward_notifications(
   values: impl Stream<Item = Vec<u8>>,
   characteristic: Uuid,
   sink: NotificationSink,
   on_link_lost: DisconnectHandler,
) {
   let mut values = pin!(values);
   while let Some(value) = values.next().await {
      if sink.deliver(characteristic, &value).await.is_err() {
         return;
      }
   }
   debug!("{characteristic}: notification stream ended");
   on_link_lost();
}

struct BluezConnection {
   device: Device,
   on_disconnect: DisconnectHandler,
   characteristics: Mutex<HashMap<Uuid, Characteristic>>,
   notify_tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
   watcher: JoinHandle<()>,
}

impl Drop for BluezConnection {
   fn drop(&mut self) {
      self.watcher.abort();
      for (_, task) in self.notify_tasks.lock().drain() {
         task.abort();
      }
   }
}

impl BluezConnection {
   async fn characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
      if let Some(characteristic) = self.characteristics.lock().get(&uuid) {
         return Ok(characteristic.clone());
      }
      self.services().await?;
      self
         .characteristics
         .lock()
         .get(&uuid)
         .cloned()
         .ok_or(ExploreError::CharacteristicNotFound(uuid))
   }
}

#[async_trait::async_trait]
impl Connection for BluezConnection {
   async fn is_connected(&self) -> bool {
      self.device.is_connected().await.unwrap_or(false)
   }

   async fn services(&self) -> Result<Vec<ServiceInfo>> {
      let mut tree = Vec::new();
      let mut found = HashMap::new();
      for service in self.device.services().await? {
         let mut characteristics = Vec::new();
         for characteristic in service.characteristics().await? {
            let uuid = characteristic.uuid().await?;
            let flags = characteristic.flags().await?;
            characteristics.push(CharacteristicInfo {
               uuid,
               flags: CharFlags {
                  read: flags.read,
                  write: flags.write || flags.write_without_response,
                  notify: flags.notify,
                  indicate: flags.indicate,
               },
            });
            found.insert(uuid, characteristic);
         }
         tree.push(ServiceInfo {
            uuid: service.uuid().await?,
            characteristics,
         });
      }
      *self.characteristics.lock() = found;
      Ok(tree)
   }

   async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
      Ok(self.characteristic(characteristic).await?.read().await?)
   }

   async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
      Ok(self.characteristic(characteristic).await?.write(data).await?)
   }

   async fn subscribe(&self, characteristic: Uuid, sink: NotificationSink) -> Result<()> {
      let handle = self.characteristic(characteristic).await?;
      let (ready_tx, ready_rx) = oneshot::channel();
      let on_link_lost = self.on_disconnect.clone();

      let task = tokio::spawn(async move {
         let values = match handle.notify().await {
            Ok(values) => {
               let _ = ready_tx.send(Ok(()));
               values
            },
            Err(e) => {
               let _ = ready_tx.send(Err(e));
               return;
            },
         };
         forward_notifications(values, characteristic, sink, on_link_lost).await;
      });

      match time::timeout(SUBSCRIBE_TIMEOUT, ready_rx).await {
         Err(_) => {
            task.abort();
            Err(ExploreError::RequestTimeout)
         },
         Ok(Ok(Ok(()))) => {
            if let Some(old) = self.notify_tasks.lock().insert(characteristic, task) {
               old.abort();
            }
            Ok(())
         },
         Ok(Ok(Err(e))) => Err(e.into()),
         Ok(Err(_)) => Err(ExploreError::ConnectionClosed),
      }
   }

   async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
      // Dropping the notify stream ends the subscription.
      if let Some(task) = self.notify_tasks.lock().remove(&characteristic) {
         task.abort();
      }
      Ok(())
   }

   async fn disconnect(&self) -> Result<()> {
      // A requested disconnect is not link loss.
      self.watcher.abort();
      for (_, task) in self.notify_tasks.lock().drain() {
         task.abort();
      }
      self.device.disconnect().await?;
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use std::sync::atomic::{AtomicU32, Ordering};

   use futures::stream;

   use super::*;

   fn counting_handler() -> (DisconnectHandler, Arc<AtomicU32>) {
      let fired = Arc::new(AtomicU32::new(0));
      let handler: DisconnectHandler = {
         let fired = fired.clone();
         Arc::new(move || {
            fired.fetch_add(1, Ordering::SeqCst);
         })
      };
      (handler, fired)
   }

   #[tokio::test]
   async fn test_watch_link_fires_on_disconnect_event() {
      let (handler, fired) = counting_handler();
      let events = stream::iter([
         DeviceEvent::PropertyChanged(DeviceProperty::Connected(true)),
         DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)),
      ])
      .chain(stream::pending());
      watch_link(events, handler).await;
      assert_eq!(fired.load(Ordering::SeqCst), 1);
   }

   #[tokio::test]
   async fn test_watch_link_fires_when_events_end() {
      let (handler, fired) = counting_handler();
      watch_link(stream::empty(), handler).await;
      assert_eq!(fired.load(Ordering::SeqCst), 1);
   }

   #[tokio::test]
   async fn test_ended_notification_stream_reports_link_loss() {
      let (handler, fired) = counting_handler();
      let (sink, mut rx) = NotificationSink::channel(4);
      let hrm = crate::gatt::names::sig(0x2a37);

      forward_notifications(stream::iter([vec![0x00, 0x48], vec![0x00, 0x49]]), hrm, sink, handler)
         .await;

      assert_eq!(rx.recv().await.unwrap().payload.as_slice(), &[0x00, 0x48]);
      assert_eq!(rx.recv().await.unwrap().payload.as_slice(), &[0x00, 0x49]);
      assert_eq!(fired.load(Ordering::SeqCst), 1);
   }

   #[tokio::test]
   async fn test_closed_sink_is_not_link_loss() {
      let (handler, fired) = counting_handler();
      let (sink, rx) = NotificationSink::channel(4);
      drop(rx);

      forward_notifications(
         stream::iter([vec![0x01]]).chain(stream::pending()),
         crate::gatt::names::sig(0x2a37),
         sink,
         handler,
      )
      .await;
      assert_eq!(fired.load(Ordering::SeqCst), 0);
   }
}
