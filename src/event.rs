//! Supervisor lifecycle events and elapsed-time reporting.
//!
//! Every supervisor publishes its phase transitions through an [`EventBus`]
//! and writes its log lines through a [`Reporter`], which tags each line with
//! the time since that supervisor started and the peripheral name.

use std::{fmt, sync::Arc, time::Instant};

use log::{Level, log};
use smol_str::SmolStr;

/// Phases of the per-device connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum Phase {
   #[default]
   Disconnected,
   Connecting,
   Connected,
   Exploring,
   Running,
   Disconnecting,
   Stopped,
}

/// How a supervisor ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SupervisorExit {
   /// Stopped on request.
   Cancelled,
   /// An unrecoverable fault ended the loop; reported as a cancellation.
   Faulted,
}

/// Events that can be emitted by a supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
   PhaseChanged { phase: Phase, cycle: u32 },
   Finished(SupervisorExit),
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event on behalf of the named device.
   fn emit(&self, device: &str, event: SupervisorEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;

/// Prefixes log lines with elapsed time and device name.
#[derive(Debug, Clone)]
pub struct Reporter {
   device: SmolStr,
   started: Instant,
}

impl Reporter {
   pub fn new(device: impl Into<SmolStr>) -> Self {
      Self {
         device: device.into(),
         started: Instant::now(),
      }
   }

   pub fn device(&self) -> &SmolStr {
      &self.device
   }

   pub fn report(&self, operation: &str, msg: impl fmt::Display) {
      self.log(Level::Info, operation, msg);
   }

   pub fn warn(&self, operation: &str, msg: impl fmt::Display) {
      self.log(Level::Warn, operation, msg);
   }

   pub fn error(&self, operation: &str, msg: impl fmt::Display) {
      self.log(Level::Error, operation, msg);
   }

   fn log(&self, level: Level, operation: &str, msg: impl fmt::Display) {
      log!(level, "{}", self.line(operation, msg));
   }

   fn line(&self, operation: &str, msg: impl fmt::Display) -> String {
      let elapsed = self.started.elapsed().as_secs();
      format!(
         "[{:3}:{:02} {:<20} {:>22}] {msg}",
         elapsed / 60,
         elapsed % 60,
         self.device,
         operation
      )
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_report_line_layout() {
      let reporter = Reporter::new("Polar H10 1234");
      let line = reporter.line("Connection", "Connecting");
      assert_eq!(
         line,
         "[  0:00 Polar H10 1234                   Connection] Connecting"
      );
   }

   #[test]
   fn test_phase_names() {
      assert_eq!(Phase::default(), Phase::Disconnected);
      assert_eq!(Phase::Disconnecting.to_string(), "Disconnecting");
   }
}
