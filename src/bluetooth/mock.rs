//! Scripted in-memory transport for tests.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{
   StreamExt,
   channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded},
};
use parking_lot::Mutex;
use smol_str::SmolStr;
use uuid::Uuid;

use crate::{
   bluetooth::transport::{
      Advertisement, AdvertisementStream, CharFlags, CharacteristicInfo, Connection,
      DisconnectHandler, NotificationSink, Peripheral, ServiceInfo, Transport,
   },
   error::{ExploreError, Result},
   gatt::names::sig,
};

/// Number of calls of each kind a device has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Calls {
   pub connects: u32,
   pub reads: u32,
   pub writes: u32,
   pub subscribes: u32,
   pub unsubscribes: u32,
   pub disconnects: u32,
}

#[derive(Default)]
struct DeviceState {
   services: Vec<ServiceInfo>,
   values: HashMap<Uuid, Vec<u8>>,
   connected: bool,
   connect_failures: u32,
   reject_connects: bool,
   fail_reads: bool,
   fail_subscribes: bool,
   sinks: HashMap<Uuid, NotificationSink>,
   on_disconnect: Option<DisconnectHandler>,
   written: Vec<(Uuid, Vec<u8>)>,
   calls: Calls,
}

/// A fake peripheral. Clones share state.
#[derive(Clone)]
pub struct MockDevice {
   peripheral: Peripheral,
   state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
   pub fn new(name: &str) -> Self {
      Self {
         peripheral: Peripheral::new(format!("mock:{name}"), name),
         state: Arc::default(),
      }
   }

   /// Heart Rate service with a notifiable measurement and a readable
   /// control point.
   pub fn heart_rate(name: &str) -> Self {
      Self::new(name)
         .with_service(sig(0x180d), &[
            (sig(0x2a37), CharFlags {
               notify: true,
               ..Default::default()
            }),
            (sig(0x2a39), CharFlags {
               read: true,
               write: true,
               ..Default::default()
            }),
         ])
         .with_value(sig(0x2a39), &[0x01])
   }

   pub fn with_service(self, uuid: Uuid, characteristics: &[(Uuid, CharFlags)]) -> Self {
      self.state.lock().services.push(ServiceInfo {
         uuid,
         characteristics: characteristics
            .iter()
            .map(|&(uuid, flags)| CharacteristicInfo { uuid, flags })
            .collect(),
      });
      self
   }

   pub fn with_value(self, characteristic: Uuid, value: &[u8]) -> Self {
      self.state.lock().values.insert(characteristic, value.to_vec());
      self
   }

   pub fn peripheral(&self) -> &Peripheral {
      &self.peripheral
   }

   pub fn advertisement(&self) -> Advertisement {
      Advertisement {
         peripheral: self.peripheral.clone(),
         rssi: Some(-60),
         services: self.state.lock().services.iter().map(|s| s.uuid).collect(),
      }
   }

   pub fn calls(&self) -> Calls {
      self.state.lock().calls
   }

   pub fn written(&self) -> Vec<(Uuid, Vec<u8>)> {
      self.state.lock().written.clone()
   }

   pub fn is_connected(&self) -> bool {
      self.state.lock().connected
   }

   pub fn is_subscribed(&self, characteristic: &Uuid) -> bool {
      self.state.lock().sinks.contains_key(characteristic)
   }

   /// The next `n` connection attempts fail.
   pub fn fail_connects(&self, n: u32) {
      self.state.lock().connect_failures = n;
   }

   /// While set, connection attempts fail with an unrecoverable error.
   pub fn reject_connects(&self, reject: bool) {
      self.state.lock().reject_connects = reject;
   }

   pub fn fail_reads(&self) {
      self.state.lock().fail_reads = true;
   }

   /// While set, subscriptions fail as if the link dropped mid-request.
   pub fn fail_subscribes(&self, fail: bool) {
      self.state.lock().fail_subscribes = fail;
   }

   /// Pushes a payload through the subscription for `characteristic`.
   pub async fn notify(&self, characteristic: Uuid, payload: &[u8]) -> Result<()> {
      let sink = self
         .state
         .lock()
         .sinks
         .get(&characteristic)
         .cloned()
         .ok_or(ExploreError::CharacteristicNotFound(characteristic))?;
      sink.deliver(characteristic, payload).await
   }

   /// Simulates the peripheral dropping the link.
   pub fn drop_link(&self) {
      let handler = {
         let mut state = self.state.lock();
         state.connected = false;
         state.sinks.clear();
         state.on_disconnect.take()
      };
      if let Some(handler) = handler {
         handler();
      }
   }
}

/// In-memory [`Transport`] over a set of [`MockDevice`]s.
pub struct MockTransport {
   devices: Mutex<HashMap<SmolStr, MockDevice>>,
   adverts_tx: UnboundedSender<Advertisement>,
   adverts_rx: Mutex<Option<UnboundedReceiver<Advertisement>>>,
}

impl MockTransport {
   pub fn new() -> Arc<Self> {
      let (adverts_tx, adverts_rx) = unbounded();
      Arc::new(Self {
         devices: Mutex::default(),
         adverts_tx,
         adverts_rx: Mutex::new(Some(adverts_rx)),
      })
   }

   pub fn add_device(&self, device: MockDevice) {
      self
         .devices
         .lock()
         .insert(device.peripheral.id.clone(), device);
   }

   /// Queues an advertisement for `device` on the advertisement stream.
   pub fn advertise(&self, device: &MockDevice) {
      let _ = self.adverts_tx.unbounded_send(device.advertisement());
   }

   /// Connects without a disconnect handler.
   pub async fn open(&self, device: &MockDevice) -> Arc<dyn Connection> {
      self
         .connect(device.peripheral(), Duration::from_secs(1), Arc::new(|| {}))
         .await
         .expect("mock connect")
   }
}

#[async_trait]
impl Transport for MockTransport {
   async fn advertisements(&self) -> Result<AdvertisementStream> {
      self
         .adverts_rx
         .lock()
         .take()
         .map(|rx| rx.boxed())
         .ok_or(ExploreError::ScannerShutdown)
   }

   async fn connect(
      &self,
      peripheral: &Peripheral,
      timeout: Duration,
      on_disconnect: DisconnectHandler,
   ) -> Result<Arc<dyn Connection>> {
      let device = self
         .devices
         .lock()
         .get(&peripheral.id)
         .cloned()
         .ok_or(ExploreError::DeviceNotConnected)?;
      {
         let mut state = device.state.lock();
         state.calls.connects += 1;
         if state.reject_connects {
            return Err(ExploreError::InvalidAddress(peripheral.id.clone()));
         }
         if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(ExploreError::ConnectTimeout(timeout));
         }
         state.connected = true;
         state.on_disconnect = Some(on_disconnect);
      }
      Ok(Arc::new(MockConnection { device }))
   }
}

struct MockConnection {
   device: MockDevice,
}

impl MockConnection {
   fn ensure_connected(state: &DeviceState) -> Result<()> {
      if state.connected {
         Ok(())
      } else {
         Err(ExploreError::DeviceNotConnected)
      }
   }
}

#[async_trait]
impl Connection for MockConnection {
   async fn is_connected(&self) -> bool {
      self.device.is_connected()
   }

   async fn services(&self) -> Result<Vec<ServiceInfo>> {
      let state = self.device.state.lock();
      Self::ensure_connected(&state)?;
      Ok(state.services.clone())
   }

   async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
      let mut state = self.device.state.lock();
      state.calls.reads += 1;
      Self::ensure_connected(&state)?;
      if state.fail_reads {
         return Err(ExploreError::ConnectionClosed);
      }
      state
         .values
         .get(&characteristic)
         .cloned()
         .ok_or(ExploreError::CharacteristicNotFound(characteristic))
   }

   async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
      let mut state = self.device.state.lock();
      state.calls.writes += 1;
      Self::ensure_connected(&state)?;
      state.written.push((characteristic, data.to_vec()));
      Ok(())
   }

   async fn subscribe(&self, characteristic: Uuid, sink: NotificationSink) -> Result<()> {
      let mut state = self.device.state.lock();
      state.calls.subscribes += 1;
      Self::ensure_connected(&state)?;
      if state.fail_subscribes {
         return Err(ExploreError::ConnectionClosed);
      }
      state.sinks.insert(characteristic, sink);
      Ok(())
   }

   async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
      let mut state = self.device.state.lock();
      state.calls.unsubscribes += 1;
      state.sinks.remove(&characteristic);
      Ok(())
   }

   async fn disconnect(&self) -> Result<()> {
      let mut state = self.device.state.lock();
      state.calls.disconnects += 1;
      state.connected = false;
      state.sinks.clear();
      state.on_disconnect = None;
      Ok(())
   }
}
