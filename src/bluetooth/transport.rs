//! Transport abstraction used by the supervisor.
//!
//! The supervisor never talks to the Bluetooth stack directly; it goes
//! through [`Transport`] for discovery and connection setup and through
//! [`Connection`] for GATT traffic on one live link.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::stream::BoxStream;
use smallvec::SmallVec;
use smol_str::SmolStr;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{ExploreError, Result};

pub type Payload = SmallVec<[u8; 32]>;

/// Opaque handle to a discovered peripheral plus its advertised name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peripheral {
   /// Transport-level identifier (a MAC address for BlueZ).
   pub id: SmolStr,
   pub name: SmolStr,
}

impl Peripheral {
   pub fn new(id: impl Into<SmolStr>, name: impl Into<SmolStr>) -> Self {
      Self {
         id: id.into(),
         name: name.into(),
      }
   }
}

/// A single advertisement observation.
#[derive(Debug, Clone)]
pub struct Advertisement {
   pub peripheral: Peripheral,
   pub rssi: Option<i16>,
   pub services: Vec<Uuid>,
}

pub type AdvertisementStream = BoxStream<'static, Advertisement>;

/// Capability flags of a characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharFlags {
   pub read: bool,
   pub write: bool,
   pub notify: bool,
   pub indicate: bool,
}

impl CharFlags {
   pub const fn readable(&self) -> bool {
      self.read
   }

   /// Notifiable or indicatable.
   pub const fn subscribable(&self) -> bool {
      self.notify || self.indicate
   }
}

impl fmt::Display for CharFlags {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let names = [
         (self.read, "read"),
         (self.write, "write"),
         (self.notify, "notify"),
         (self.indicate, "indicate"),
      ];
      let mut first = true;
      for (_, name) in names.iter().filter(|(set, _)| *set) {
         if !first {
            f.write_str(",")?;
         }
         f.write_str(name)?;
         first = false;
      }
      Ok(())
   }
}

/// A characteristic as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
   pub uuid: Uuid,
   pub flags: CharFlags,
}

/// A service and its characteristics as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
   pub uuid: Uuid,
   pub characteristics: Vec<CharacteristicInfo>,
}

/// One inbound notification or indication.
#[derive(Debug, Clone)]
pub struct Notification {
   pub characteristic: Uuid,
   pub payload: Payload,
}

/// Delivery target handed to [`Connection::subscribe`].
///
/// Payloads pushed through one sink keep their order.
#[derive(Debug, Clone)]
pub struct NotificationSink {
   tx: mpsc::Sender<Notification>,
}

impl NotificationSink {
   pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
      let (tx, rx) = mpsc::channel(capacity);
      (Self { tx }, rx)
   }

   pub async fn deliver(&self, characteristic: Uuid, payload: &[u8]) -> Result<()> {
      self
         .tx
         .send(Notification {
            characteristic,
            payload: Payload::from_slice(payload),
         })
         .await
         .map_err(|_| ExploreError::ConnectionClosed)
   }
}

/// Invoked by the transport when a link drops on its own.
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// Discovery and connection setup.
#[async_trait]
pub trait Transport: Send + Sync {
   /// Starts observing advertisements.
   async fn advertisements(&self) -> Result<AdvertisementStream>;

   /// Opens a link, giving up after `timeout`.
   async fn connect(
      &self,
      peripheral: &Peripheral,
      timeout: Duration,
      on_disconnect: DisconnectHandler,
   ) -> Result<Arc<dyn Connection>>;
}

/// GATT operations on one live link.
#[async_trait]
pub trait Connection: Send + Sync {
   async fn is_connected(&self) -> bool;

   async fn services(&self) -> Result<Vec<ServiceInfo>>;

   async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>>;

   async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()>;

   async fn subscribe(&self, characteristic: Uuid, sink: NotificationSink) -> Result<()>;

   async fn unsubscribe(&self, characteristic: Uuid) -> Result<()>;

   async fn disconnect(&self) -> Result<()>;
}
