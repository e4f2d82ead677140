//! Operator-driven shutdown.
//!
//! The first interrupt sets the process-wide shutdown signal and every
//! per-device stop signal, then all supervisors share one grace period to
//! disconnect. Those still running when it expires are aborted. Further
//! interrupts only re-assert the stop signals.

use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use log::{info, warn};
use smol_str::SmolStr;
use tokio::{
   select,
   sync::mpsc,
   time::{self, Instant},
};

use crate::{
   error::Result,
   event::SupervisorExit,
   supervisor::{
      StopSignal,
      registry::{Scanner, SupervisorHandle},
   },
};

/// How one supervisor ended during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum StopOutcome {
   /// Finished on its own within the grace period.
   Graceful(SupervisorExit),
   /// Aborted after the grace period.
   Forced,
   /// The task panicked outside the supervisor's own panic handling.
   Panicked,
}

pub struct ShutdownCoordinator {
   shutdown: StopSignal,
   grace: Duration,
   repeat_window: Duration,
}

impl ShutdownCoordinator {
   pub const fn new(shutdown: StopSignal, grace: Duration, repeat_window: Duration) -> Self {
      Self {
         shutdown,
         grace,
         repeat_window,
      }
   }

   /// Waits for the first interrupt, then stops everything the scanner started.
   ///
   /// A closed interrupt channel counts as an interrupt.
   pub async fn run(
      &self,
      scanner: Scanner,
      mut interrupts: mpsc::Receiver<()>,
   ) -> Result<Vec<(SmolStr, StopOutcome)>> {
      interrupts.recv().await;
      match scanner.active().await {
         Ok(active) => info!("Interrupt received, stopping {} devices: {active:?}", active.len()),
         Err(e) => warn!("Interrupt received, scanner unavailable: {e}"),
      }
      self.shutdown.set();

      let supervisors = scanner.join().await?;
      Ok(self.stop_all(supervisors, interrupts).await)
   }

   /// Signals every supervisor and waits for all of them within one grace
   /// period. Whatever is still running when it expires is aborted.
   pub async fn stop_all(
      &self,
      supervisors: Vec<SupervisorHandle>,
      mut interrupts: mpsc::Receiver<()>,
   ) -> Vec<(SmolStr, StopOutcome)> {
      let mut names = Vec::with_capacity(supervisors.len());
      let mut stops = Vec::with_capacity(supervisors.len());
      let mut aborts = Vec::with_capacity(supervisors.len());
      let mut joins = FuturesUnordered::new();
      for (i, SupervisorHandle { name, stop, task }) in supervisors.into_iter().enumerate() {
         info!("Stopping {name}");
         stop.set();
         names.push(name);
         stops.push(stop);
         aborts.push(task.abort_handle());
         joins.push(async move { (i, task.await) });
      }

      let mut outcomes: Vec<Option<StopOutcome>> = vec![None; names.len()];
      let deadline = time::sleep(self.grace);
      tokio::pin!(deadline);
      let mut aborted = false;
      let mut last_interrupt = Instant::now();

      while !joins.is_empty() {
         select! {
            Some((i, joined)) = joins.next() => {
               let name = &names[i];
               let outcome = match joined {
                  Ok(exit) => StopOutcome::Graceful(exit),
                  Err(e) if e.is_cancelled() => StopOutcome::Forced,
                  Err(e) => {
                     warn!("{name}: supervisor task failed: {e}");
                     StopOutcome::Panicked
                  },
               };
               info!("{name}: {outcome}");
               outcomes[i] = Some(outcome);
            },
            () = &mut deadline, if !aborted => {
               for (i, abort) in aborts.iter().enumerate() {
                  if outcomes[i].is_none() {
                     warn!("{}: did not stop within {:?}, aborting", names[i], self.grace);
                     abort.abort();
                  }
               }
               aborted = true;
            },
            Some(()) = interrupts.recv() => {
               let now = Instant::now();
               if now.duration_since(last_interrupt) <= self.repeat_window {
                  info!("Repeated interrupt, stop already in progress");
               } else {
                  info!("Interrupt received again, re-asserting stop");
               }
               last_interrupt = now;
               self.shutdown.set();
               for stop in &stops {
                  stop.set();
               }
            },
         }
      }

      names
         .into_iter()
         .zip(outcomes)
         .map(|(name, outcome)| (name, outcome.unwrap_or(StopOutcome::Forced)))
         .collect()
   }
}
