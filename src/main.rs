//! BLE sensor explorer.
//!
//! Scans for peripherals whose name contains one of the given filters,
//! connects to each of them, subscribes to the measurements it understands
//! and prints how many notifications every measurement produced on exit.

use std::{
   collections::BTreeMap,
   io::{self, Write},
   sync::Arc,
   time::Duration,
};

use clap::Parser;
use crossbeam::queue::SegQueue;
use log::{debug, error, info};
use parking_lot::Mutex;
use smol_str::SmolStr;
use tokio::{
   signal,
   sync::{Notify, mpsc},
   time,
};

use bluetooth::bluez::BluezTransport;
use event::{EventBus, Phase, SupervisorEvent};
use supervisor::{
   StopSignal, SupervisorContext,
   registry::Scanner,
   shutdown::{ShutdownCoordinator, StopOutcome},
};

mod bluetooth;
mod config;
mod devices;
mod error;
mod event;
mod gatt;
mod supervisor;

use crate::{
   config::Config,
   error::Result,
   gatt::{dispatch::Dispatcher, names::UuidNames, stats::Statistics, support::SupportTable},
};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
   /// Case-insensitive name substrings of the devices to connect to
   filters: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   let args = Args::parse();
   let config = Config::load()?;
   let filters = config.filters_or_default(args.filters);
   info!("Starting bleexplore, filters: {filters:?}");

   let names = Arc::new(UuidNames::with_extra(&config.extra_names)?);
   let stats = Statistics::new();
   let events = EventProcessor::new();
   events.clone().spawn_tracker();
   let shutdown = StopSignal::new();

   let scanner = match start_scanner(&config, &filters, &names, &stats, &events, &shutdown).await {
      Ok(scanner) => scanner,
      Err(e) => {
         error!("Failed to start scanning: {e}");
         if cfg!(target_os = "linux") {
            error!("You may need to restart Linux Bluetooth!");
         }
         time::sleep(config.startup_failure_delay()).await;
         return Err(e);
      },
   };

   let (interrupt_tx, interrupt_rx) = mpsc::channel(4);
   tokio::spawn(async move {
      while signal::ctrl_c().await.is_ok() {
         if interrupt_tx.send(()).await.is_err() {
            break;
         }
      }
   });

   let coordinator = ShutdownCoordinator::new(
      shutdown,
      config.shutdown_grace(),
      config.repeat_interrupt_window(),
   );
   let outcomes = coordinator.run(scanner, interrupt_rx).await?;

   events.drain();
   debug!("Notification counts: {}", stats.to_json());
   let mut out = io::stderr().lock();
   stats.write_summary(&mut out)?;
   write_outcomes(&mut out, &outcomes, &events.last_phases())?;
   Ok(())
}

async fn start_scanner(
   config: &Config,
   filters: &[String],
   names: &Arc<UuidNames>,
   stats: &Statistics,
   events: &Arc<EventProcessor>,
   shutdown: &StopSignal,
) -> Result<Scanner> {
   let transport = BluezTransport::new(config.rescan_interval()).await?;
   let ctx = SupervisorContext {
      transport: Arc::new(transport),
      dispatcher: Dispatcher::new(devices::builtin(), stats.clone()),
      support: SupportTable::builtin(),
      names: names.clone(),
      events: events.clone(),
      shutdown: shutdown.clone(),
      connect_timeout: config.connect_timeout(),
   };
   Scanner::start(ctx, filters).await
}

fn write_outcomes(
   out: &mut impl Write,
   outcomes: &[(SmolStr, StopOutcome)],
   phases: &BTreeMap<SmolStr, (Phase, u32)>,
) -> io::Result<()> {
   for (device, outcome) in outcomes {
      match phases.get(device) {
         Some((phase, cycle)) => writeln!(
            out,
            "[{device:<30} {:>22}] {phase} after {cycle} cycles",
            outcome.to_string()
         )?,
         None => writeln!(out, "[{device:<30} {:>22}]", outcome.to_string())?,
      }
   }
   Ok(())
}

/// Collects supervisor events and keeps the last phase of every device.
struct EventProcessor {
   queue: SegQueue<(SmolStr, SupervisorEvent)>,
   notifier: Notify,
   phases: Mutex<BTreeMap<SmolStr, (Phase, u32)>>,
}

impl EventProcessor {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
         phases: Mutex::default(),
      })
   }

   async fn recv(self: &Arc<Self>) -> Option<(SmolStr, SupervisorEvent)> {
      loop {
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         let notify = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   fn apply(&self, (device, event): (SmolStr, SupervisorEvent)) {
      match event {
         SupervisorEvent::PhaseChanged { phase, cycle } => {
            self.phases.lock().insert(device, (phase, cycle));
         },
         SupervisorEvent::Finished(exit) => {
            debug!("{device}: supervisor finished ({exit})");
         },
      }
   }

   /// Applies everything still queued.
   fn drain(&self) {
      while let Some(event) = self.queue.pop() {
         self.apply(event);
      }
   }

   fn last_phases(&self) -> BTreeMap<SmolStr, (Phase, u32)> {
      self.phases.lock().clone()
   }

   fn spawn_tracker(self: Arc<Self>) {
      tokio::spawn(async move {
         while let Some(event) = self.recv().await {
            self.apply(event);
         }
      });
   }
}

impl EventBus for EventProcessor {
   fn emit(&self, device: &str, event: SupervisorEvent) {
      self.queue.push((device.into(), event));
      self.notifier.notify_waiters();
   }
}
