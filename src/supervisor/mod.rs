//! Connection supervision.
//!
//! One [`Supervisor`] owns one peripheral for its whole life: it connects,
//! explores the GATT tree, starts the matching decoders, waits for the link
//! to be stopped and then reconnects, until the process shuts down. A fault
//! in one supervisor never touches its siblings.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use tokio::{runtime::Handle, select, task::JoinHandle};

use crate::{
   bluetooth::transport::{DisconnectHandler, NotificationSink, Peripheral, Transport},
   error::{ExploreError, Result},
   event::{EventSender, Phase, Reporter, SupervisorEvent, SupervisorExit},
   gatt::{
      dispatch::{Dispatcher, decoder_panicked, panic_message},
      link::{DeviceLink, render_value},
      names::UuidNames,
      services::ServiceMap,
      support::{Category, SupportTable},
   },
};

pub mod registry;
pub mod shutdown;
mod signal;

pub use signal::StopSignal;

/// Notification channel buffer size per connection
const NOTIFICATION_BUFFER_SIZE: usize = 1000;

/// State shared by every supervisor.
#[derive(Clone)]
pub struct SupervisorContext {
   pub transport: Arc<dyn Transport>,
   pub dispatcher: Dispatcher,
   pub support: SupportTable,
   pub names: Arc<UuidNames>,
   pub events: EventSender,
   /// Process-wide shutdown.
   pub shutdown: StopSignal,
   pub connect_timeout: Duration,
}

/// Result of one exploration pass.
#[derive(Debug)]
enum ExploreOutcome {
   /// Subscriptions are in place; wait for the stop signal.
   Ready,
   /// This cycle failed; disconnect and try again.
   Aborted(ExploreError),
   /// Retrying cannot help.
   Fatal(ExploreError),
}

impl ExploreOutcome {
   fn failed(error: ExploreError) -> Self {
      if error.is_transient() {
         Self::Aborted(error)
      } else {
         Self::Fatal(error)
      }
   }
}

/// A live link and the task pumping its notifications into the dispatcher.
///
/// Dropping a guard that was not closed with [`LinkGuard::close`] schedules a
/// best-effort disconnect, so an aborted supervisor still releases the link.
struct LinkGuard {
   link: DeviceLink,
   sink: NotificationSink,
   pump: JoinHandle<()>,
   closed: bool,
}

impl LinkGuard {
   async fn close(mut self) {
      if self.link.is_connected().await {
         self.link.unsubscribe_all().await;
         if let Err(e) = self.link.disconnect().await {
            self.link.reporter().warn("Connection", format_args!("disconnect failed: {e}"));
         }
      }
      self.closed = true;
   }
}

impl Drop for LinkGuard {
   fn drop(&mut self) {
      self.pump.abort();
      if self.closed {
         return;
      }
      let link = self.link.clone();
      if let Ok(runtime) = Handle::try_current() {
         runtime.spawn(async move {
            if link.is_connected().await {
               let _ = link.disconnect().await;
               link.reporter().report("Connection", "Forced Disconnect");
            }
         });
      }
   }
}

/// Per-peripheral connection state machine.
pub struct Supervisor {
   ctx: SupervisorContext,
   peripheral: Peripheral,
   stop: StopSignal,
   reporter: Reporter,
   cycle: u32,
   link: Option<LinkGuard>,
}

impl Supervisor {
   pub fn new(ctx: SupervisorContext, peripheral: Peripheral, stop: StopSignal) -> Self {
      Self {
         reporter: Reporter::new(peripheral.name.clone()),
         ctx,
         peripheral,
         stop,
         cycle: 0,
         link: None,
      }
   }

   /// Runs until shutdown or an unrecoverable fault, then disconnects.
   pub async fn run(mut self) -> SupervisorExit {
      self.reporter.report("device_task", "starting");
      let shutdown = self.ctx.shutdown.clone();

      let result = select! {
         result = AssertUnwindSafe(self.cycles()).catch_unwind() => result,
         () = shutdown.wait() => Ok(Ok(())),
      };
      let exit = match result {
         Ok(Ok(())) => SupervisorExit::Cancelled,
         Ok(Err(e)) => {
            self.reporter.error("device_task", format_args!("{e}"));
            SupervisorExit::Faulted
         },
         Err(payload) => {
            self.reporter.error(
               "device_task",
               format_args!("panicked: {}", panic_message(payload.as_ref())),
            );
            SupervisorExit::Faulted
         },
      };

      self.finalize().await;
      self
         .ctx
         .events
         .emit(&self.peripheral.name, SupervisorEvent::Finished(exit));
      self.reporter.report("device_task", format_args!("finished ({exit})"));
      exit
   }

   fn set_phase(&self, phase: Phase) {
      self.reporter.report("Phase", format_args!("{phase} (cycle {})", self.cycle));
      self.ctx.events.emit(
         &self.peripheral.name,
         SupervisorEvent::PhaseChanged {
            phase,
            cycle: self.cycle,
         },
      );
   }

   /// The reconnect loop. Returns `Ok` once shutdown is observed.
   async fn cycles(&mut self) -> Result<()> {
      self.set_phase(Phase::Disconnected);
      while !self.ctx.shutdown.is_set() {
         self.set_phase(Phase::Connecting);
         let Some(guard) = self.connect().await? else {
            self.set_phase(Phase::Disconnected);
            tokio::task::yield_now().await;
            continue;
         };
         let (link, sink) = (guard.link.clone(), guard.sink.clone());
         self.link = Some(guard);
         self.set_phase(Phase::Connected);

         self.set_phase(Phase::Exploring);
         match self.explore(&link, &sink).await {
            ExploreOutcome::Ready => {
               self.set_phase(Phase::Running);
               self.reporter.report("device_task", "waiting for stop event");
               select! {
                  () = self.stop.wait() => {},
                  () = self.ctx.shutdown.wait() => {},
               }
               self.reporter.report("device_task", "stopping");
            },
            ExploreOutcome::Aborted(e) => {
               self.reporter.warn("explore", format_args!("aborted: {e}"));
            },
            ExploreOutcome::Fatal(e) => return Err(e),
         }

         self.set_phase(Phase::Disconnecting);
         if let Some(guard) = self.link.take() {
            guard.close().await;
         }
         self.stop.clear();
         self.cycle += 1;
         self.set_phase(Phase::Disconnected);
         self.reporter.report("Connection", "Normal Disconnect");
         tokio::task::yield_now().await;
      }
      Ok(())
   }

   /// One connection attempt. `None` means try again.
   async fn connect(&self) -> Result<Option<LinkGuard>> {
      self.stop.clear();
      self.reporter.report("Connection", "Connecting");

      let on_disconnect: DisconnectHandler = {
         let stop = self.stop.clone();
         let reporter = self.reporter.clone();
         Arc::new(move || {
            reporter.warn("disconnected", "");
            stop.set();
         })
      };
      let conn = match self
         .ctx
         .transport
         .connect(&self.peripheral, self.ctx.connect_timeout, on_disconnect)
         .await
      {
         Ok(conn) => conn,
         Err(ExploreError::ConnectTimeout(_)) => {
            self.reporter.warn("Connection", "Timeout");
            return Ok(None);
         },
         Err(e) if e.is_transient() => {
            self.reporter.error("Connection", format_args!("{e}"));
            return Ok(None);
         },
         Err(e) => return Err(e),
      };
      self.reporter.report("Connection", "Connected");

      let link = DeviceLink::new(
         conn,
         self.stop.clone(),
         self.reporter.clone(),
         self.ctx.names.clone(),
      );
      let (sink, rx) = NotificationSink::channel(NOTIFICATION_BUFFER_SIZE);
      let pump = tokio::spawn({
         let dispatcher = self.ctx.dispatcher.clone();
         let link = link.clone();
         async move { dispatcher.run(link, rx).await }
      });
      Ok(Some(LinkGuard {
         link,
         sink,
         pump,
         closed: false,
      }))
   }

   /// Reads and subscribes to everything the support table allows, then
   /// starts the decoders whose device is present. Stops at the first failed
   /// read or subscription.
   async fn explore(&self, link: &DeviceLink, sink: &NotificationSink) -> ExploreOutcome {
      let services = match link.services().await {
         Ok(services) => services,
         Err(e) => return ExploreOutcome::failed(e),
      };
      if services.is_empty() {
         self.reporter.warn("services", "none resolved");
      } else {
         self.reporter.report("services", format_args!("{} resolved", services.len()));
      }

      for service in services.iter() {
         self.reporter.report("service", &service.name);
         for (i, c) in service.readable().enumerate() {
            self.reporter.report("reads", format_args!("{i}: {}", c.name));
         }
         for (i, c) in service.subscribable().enumerate() {
            self.reporter.report("notifications", format_args!("{i}: {}", c.name));
         }

         for c in service.readable().filter(|c| {
            self
               .ctx
               .support
               .is_supported(&service.name, &c.name, Category::Read)
         }) {
            match link.read(c.uuid).await {
               Ok(value) => self.reporter.report(
                  "read",
                  format_args!("{}:{} {}", service.name, c.name, render_value(&c.name, &value)),
               ),
               Err(e) => {
                  self.reporter.report("read", format_args!("{} read failed", c.name));
                  return ExploreOutcome::failed(e);
               },
            }
         }

         for c in service.subscribable().filter(|c| {
            self
               .ctx
               .support
               .is_supported(&service.name, &c.name, Category::Notify)
         }) {
            if let Err(e) = link.subscribe(c.uuid, sink.clone()).await {
               self.reporter.report("start_notify", "Failed");
               return ExploreOutcome::failed(e);
            }
         }
      }

      self.start_decoders(link, &services).await;
      ExploreOutcome::Ready
   }

   async fn start_decoders(&self, link: &DeviceLink, services: &ServiceMap) {
      for decoder in self
         .ctx
         .dispatcher
         .decoders()
         .iter()
         .filter(|d| d.device_present(services))
      {
         self.reporter.report(decoder.family(), "found");
         match AssertUnwindSafe(decoder.start(link, services))
            .catch_unwind()
            .await
         {
            Ok(Ok(())) => {},
            Ok(Err(e)) => self
               .reporter
               .error(decoder.family(), format_args!("start failed: {e}")),
            Err(payload) => self
               .reporter
               .error("start", decoder_panicked(decoder.family(), payload.as_ref())),
         }
      }
   }

   async fn finalize(&mut self) {
      self.set_phase(Phase::Disconnecting);
      self.reporter.report("device_task", "Finally Disconnecting");
      if let Some(guard) = self.link.take() {
         guard.close().await;
      }
      self.reporter.report("Connection", "Final Disconnect");
      self.set_phase(Phase::Stopped);
   }
}
