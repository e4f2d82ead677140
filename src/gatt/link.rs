//! Per-connection GATT access.
//!
//! [`DeviceLink`] wraps one live [`Connection`] together with the device's
//! stop signal. Every operation checks the signal first so nothing is sent
//! to a link that is being torn down, and transport failures on reads and
//! writes raise the signal so the supervisor recycles the connection.

use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
   bluetooth::transport::{Connection, NotificationSink},
   error::{ExploreError, Result},
   event::Reporter,
   gatt::{names::UuidNames, services::ServiceMap},
   supervisor::StopSignal,
};

/// Renders bytes as space separated hex pairs.
pub fn bytes2str(data: &[u8]) -> String {
   let mut out = String::with_capacity(data.len() * 3);
   for (i, c) in hex::encode(data).chars().enumerate() {
      if i > 0 && i % 2 == 0 {
         out.push(' ');
      }
      out.push(c);
   }
   out
}

/// Renders a read value, as text when the characteristic name says so.
pub fn render_value(name: &str, value: &[u8]) -> String {
   if name.to_lowercase().contains("string") {
      String::from_utf8_lossy(value).into_owned()
   } else {
      bytes2str(value)
   }
}

/// Cheaply cloneable handle to a connected device.
#[derive(Clone)]
pub struct DeviceLink {
   conn: Arc<dyn Connection>,
   stop: StopSignal,
   reporter: Reporter,
   names: Arc<UuidNames>,
   subscribed: Arc<Mutex<Vec<Uuid>>>,
}

impl DeviceLink {
   pub fn new(
      conn: Arc<dyn Connection>,
      stop: StopSignal,
      reporter: Reporter,
      names: Arc<UuidNames>,
   ) -> Self {
      Self {
         conn,
         stop,
         reporter,
         names,
         subscribed: Arc::default(),
      }
   }

   pub fn device(&self) -> &str {
      self.reporter.device()
   }

   pub fn reporter(&self) -> &Reporter {
      &self.reporter
   }

   pub fn names(&self) -> &UuidNames {
      &self.names
   }

   pub async fn is_connected(&self) -> bool {
      self.conn.is_connected().await
   }

   /// Enumerates the service tree with resolved names.
   pub async fn services(&self) -> Result<ServiceMap> {
      let services = self.conn.services().await?;
      Ok(ServiceMap::resolve(services, &self.names))
   }

   fn skip_if_stopping(&self, operation: &str, characteristic: &Uuid) -> Result<()> {
      if self.stop.is_set() {
         self.reporter.report(
            operation,
            format_args!("{} skipped, stop signal set", self.names.display(characteristic)),
         );
         return Err(ExploreError::StopRequested);
      }
      Ok(())
   }

   pub async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
      self.skip_if_stopping("read_gatt_char", &characteristic)?;
      match self.conn.read(characteristic).await {
         Ok(value) => {
            self.reporter.report(
               "read_gatt_char",
               format_args!("{}: {}", self.names.display(&characteristic), bytes2str(&value)),
            );
            Ok(value)
         },
         Err(e) => {
            self.stop.set();
            self.reporter.error("read_gatt_char", format_args!("{e} ..."));
            Err(e)
         },
      }
   }

   pub async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
      self.skip_if_stopping("write_gatt_char", &characteristic)?;
      self.reporter.report(
         "write_gatt_char",
         format_args!("{} {}", bytes2str(data), self.names.display(&characteristic)),
      );
      if let Err(e) = self.conn.write(characteristic, data).await {
         self.stop.set();
         self.reporter.error("write_gatt_char", format_args!("{e} ..."));
         return Err(e);
      }
      Ok(())
   }

   pub async fn subscribe(&self, characteristic: Uuid, sink: NotificationSink) -> Result<()> {
      self.skip_if_stopping("start_notify", &characteristic)?;
      if let Err(e) = self.conn.subscribe(characteristic, sink).await {
         self.reporter.error("start_notify", format_args!("{e} ..."));
         return Err(e);
      }
      self.reporter.report(
         "start_notify",
         format_args!("{} OK", self.names.display(&characteristic)),
      );
      self.subscribed.lock().push(characteristic);
      Ok(())
   }

   /// Ends every subscription made through this link. Failures are logged.
   pub async fn unsubscribe_all(&self) {
      let subscribed = std::mem::take(&mut *self.subscribed.lock());
      for characteristic in subscribed {
         if let Err(e) = self.conn.unsubscribe(characteristic).await {
            self.reporter.warn(
               "stop_notify",
               format_args!("{}: {e}", self.names.display(&characteristic)),
            );
         }
      }
   }

   pub async fn disconnect(&self) -> Result<()> {
      self.conn.disconnect().await
   }
}
