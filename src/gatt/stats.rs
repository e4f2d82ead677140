//! Per-device, per-measurement notification counters.

use std::{collections::BTreeMap, io, sync::Arc};

use parking_lot::Mutex;
use serde_json::json;
use smol_str::SmolStr;

type Counters = BTreeMap<SmolStr, BTreeMap<SmolStr, u64>>;

/// Process-wide statistics store.
///
/// Cheaply cloneable; all clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct Statistics(Arc<Mutex<Counters>>);

impl Statistics {
   pub fn new() -> Self {
      Self::default()
   }

   /// Increments the counter for `(device, measurement)`, creating it on first
   /// use, and returns the new value.
   pub fn increment(&self, device: &str, measurement: &str) -> u64 {
      let mut counters = self.0.lock();
      let count = counters
         .entry(device.into())
         .or_default()
         .entry(measurement.into())
         .or_default();
      *count += 1;
      *count
   }

   #[cfg(test)]
   pub fn get(&self, device: &str, measurement: &str) -> u64 {
      self
         .0
         .lock()
         .get(device)
         .and_then(|m| m.get(measurement))
         .copied()
         .unwrap_or(0)
   }

   /// Copy of all counters.
   pub fn snapshot(&self) -> Counters {
      self.0.lock().clone()
   }

   pub fn to_json(&self) -> serde_json::Value {
      json!(self.snapshot())
   }

   /// Writes the summary, grouped by device.
   pub fn write_summary(&self, out: &mut impl io::Write) -> io::Result<()> {
      for (device, measurements) in self.snapshot() {
         writeln!(out)?;
         for (measurement, count) in measurements {
            writeln!(out, "[{device:<30} {measurement:>22}] Count: {count}")?;
         }
      }
      writeln!(out)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_increment_creates_entries() {
      let stats = Statistics::new();
      assert_eq!(stats.get("H10", "Heart Rate Measurement"), 0);
      assert_eq!(stats.increment("H10", "Heart Rate Measurement"), 1);
      assert_eq!(stats.increment("H10", "Heart Rate Measurement"), 2);
      assert_eq!(stats.increment("H10", "Polar PMD Data"), 1);
      assert_eq!(stats.get("H10", "Heart Rate Measurement"), 2);
   }

   #[test]
   fn test_concurrent_increments_are_not_lost() {
      let stats = Statistics::new();
      let threads: Vec<_> = (0..8)
         .map(|i| {
            let stats = stats.clone();
            std::thread::spawn(move || {
               let device = if i % 2 == 0 { "A" } else { "B" };
               for _ in 0..1000 {
                  stats.increment(device, "m");
               }
            })
         })
         .collect();
      for t in threads {
         t.join().unwrap();
      }
      assert_eq!(stats.get("A", "m"), 4000);
      assert_eq!(stats.get("B", "m"), 4000);
   }

   #[test]
   fn test_json_and_summary() {
      let stats = Statistics::new();
      stats.increment("H10", "Heart Rate Measurement");
      assert_eq!(
         stats.to_json(),
         json!({"H10": {"Heart Rate Measurement": 1}})
      );

      let mut out = Vec::new();
      stats.write_summary(&mut out).unwrap();
      let text = String::from_utf8(out).unwrap();
      assert!(text.contains("Heart Rate Measurement] Count: 1"));
      assert!(text.starts_with('\n'));
   }
}
