//! Notification fan-out.
//!
//! Every payload is offered to each decoder that claims its characteristic,
//! then counted once under the characteristic's resolved name. Decoder
//! failures are logged and contained here.

use std::{
   any::Any,
   panic::{self, AssertUnwindSafe},
};

use log::debug;
use tokio::sync::mpsc;

use crate::{
   bluetooth::transport::Notification,
   devices::{Decoders, NotifyContext},
   error::ExploreError,
   gatt::{link::DeviceLink, stats::Statistics},
};

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
   payload
      .downcast_ref::<&str>()
      .copied()
      .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
      .unwrap_or("non-string panic payload")
}

/// Turns a decoder panic into an error attributed to its family.
pub fn decoder_panicked(family: &'static str, payload: &(dyn Any + Send)) -> ExploreError {
   ExploreError::Decoder {
      family,
      reason: format!("panicked: {}", panic_message(payload)),
   }
}

/// Routes notifications to decoders and keeps the counters.
#[derive(Clone)]
pub struct Dispatcher {
   decoders: Decoders,
   stats: Statistics,
}

impl Dispatcher {
   pub fn new(decoders: Decoders, stats: Statistics) -> Self {
      Self { decoders, stats }
   }

   pub fn decoders(&self) -> &Decoders {
      &self.decoders
   }

   #[cfg(test)]
   pub fn stats(&self) -> &Statistics {
      &self.stats
   }

   /// Handles one payload. Never fails.
   pub fn dispatch(&self, link: &DeviceLink, notification: &Notification) {
      let ctx = NotifyContext {
         characteristic: notification.characteristic,
         payload: &notification.payload,
         link,
         stats: &self.stats,
      };

      let mut claimed = false;
      for decoder in self
         .decoders
         .iter()
         .filter(|d| d.claims(&notification.characteristic))
      {
         claimed = true;
         match panic::catch_unwind(AssertUnwindSafe(|| decoder.on_notify(&ctx))) {
            Ok(Ok(())) => {},
            Ok(Err(e)) => link.reporter().error(decoder.family(), e),
            Err(payload) => link
               .reporter()
               .error(decoder.family(), decoder_panicked(decoder.family(), payload.as_ref())),
         }
      }

      let measurement = link.names().display(&notification.characteristic);
      if !claimed {
         link.reporter().report(
            "notification",
            format_args!("{measurement}:{}", notification.payload.len()),
         );
      }
      self.stats.increment(link.device(), &measurement);
   }

   /// Drains one connection's notification channel until every sender is gone.
   pub async fn run(&self, link: DeviceLink, mut rx: mpsc::Receiver<Notification>) {
      while let Some(notification) = rx.recv().await {
         self.dispatch(&link, &notification);
      }
      debug!("{}: notification channel closed", link.device());
   }
}
