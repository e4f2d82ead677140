//! Scanner and supervisor registry.
//!
//! The scanner consumes the transport's advertisement stream and starts one
//! [`Supervisor`] per newly seen peripheral whose name matches a filter. It
//! runs as an actor until the process-wide shutdown signal is set and then
//! hands every supervisor it started back through [`Scanner::join`].

use std::collections::HashMap;

use futures::stream::StreamExt;
use log::{debug, info};
use smol_str::SmolStr;
use tokio::{
   select,
   sync::{mpsc, oneshot},
   task::JoinHandle,
};

use crate::{
   bluetooth::transport::{Advertisement, AdvertisementStream},
   error::{ExploreError, Result},
   event::{Reporter, SupervisorExit},
   supervisor::{StopSignal, Supervisor, SupervisorContext},
};

/// Command channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 16;

/// Whether `name` contains one of the (lower-cased) filters.
pub fn matches_filter(name: &str, filters: &[String]) -> bool {
   if name.is_empty() {
      return false;
   }
   let name = name.to_lowercase();
   filters.iter().any(|f| name.contains(f.as_str()))
}

/// A running supervisor as seen by the registry.
pub struct SupervisorHandle {
   pub name: SmolStr,
   pub stop: StopSignal,
   pub task: JoinHandle<SupervisorExit>,
}

#[derive(Debug)]
enum ScannerCommand {
   Active(oneshot::Sender<Vec<SmolStr>>),
}

/// Handle to the scanner actor.
pub struct Scanner {
   inbox: mpsc::Sender<ScannerCommand>,
   task: JoinHandle<Vec<SupervisorHandle>>,
}

impl Scanner {
   /// Starts observing advertisements. Fails if the transport cannot scan.
   pub async fn start(ctx: SupervisorContext, filters: &[String]) -> Result<Self> {
      let adverts = ctx.transport.advertisements().await?;
      let (inbox, command_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      let actor = ScannerActor {
         filters: filters.iter().map(|f| f.to_lowercase()).collect(),
         reporter: Reporter::new("Scanner"),
         ctx,
         command_rx,
         supervisors: HashMap::new(),
      };
      let task = tokio::spawn(actor.run(adverts));
      Ok(Self { inbox, task })
   }

   /// Names of the supervisors that are still running.
   pub async fn active(&self) -> Result<Vec<SmolStr>> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(ScannerCommand::Active(tx))
         .await
         .map_err(|_| ExploreError::ScannerShutdown)?;
      rx.await.map_err(|_| ExploreError::ScannerShutdown)
   }

   /// Waits for the scanner to stop, which happens once shutdown is set,
   /// and returns every supervisor it started.
   pub async fn join(self) -> Result<Vec<SupervisorHandle>> {
      self.task.await.map_err(ExploreError::SupervisorPanicked)
   }
}

struct ScannerActor {
   ctx: SupervisorContext,
   filters: Vec<String>,
   reporter: Reporter,
   command_rx: mpsc::Receiver<ScannerCommand>,
   supervisors: HashMap<SmolStr, SupervisorHandle>,
}

impl ScannerActor {
   async fn run(mut self, mut adverts: AdvertisementStream) -> Vec<SupervisorHandle> {
      self
         .reporter
         .report("Scanning", format_args!("{:?}", self.filters));
      let shutdown = self.ctx.shutdown.clone();
      let mut scanning = true;

      // Supervisors keep running after the stream ends; only shutdown stops the actor.
      loop {
         select! {
            () = shutdown.wait() => break,
            advert = adverts.next(), if scanning => match advert {
               Some(advert) => self.observe(advert),
               None => {
                  self.reporter.warn("Scanning", "advertisement stream ended");
                  scanning = false;
               },
            },
            Some(cmd) = self.command_rx.recv() => self.handle_command(cmd),
         }
      }

      info!("Scanner stopped with {} supervisors", self.supervisors.len());
      self.supervisors.into_values().collect()
   }

   fn handle_command(&mut self, cmd: ScannerCommand) {
      match cmd {
         ScannerCommand::Active(reply) => {
            let active = self
               .supervisors
               .values()
               .filter(|s| !s.task.is_finished())
               .map(|s| s.name.clone())
               .collect();
            let _ = reply.send(active);
         },
      }
   }

   fn observe(&mut self, advert: Advertisement) {
      let name = &advert.peripheral.name;
      if !matches_filter(name, &self.filters) {
         return;
      }
      if let Some(existing) = self.supervisors.get(name) {
         if !existing.task.is_finished() {
            return;
         }
         debug!("{name}: previous supervisor finished, starting a new one");
      }

      self.reporter.report(
         "Found",
         format_args!("{name} rssi {:?} services {}", advert.rssi, advert.services.len()),
      );
      let stop = StopSignal::new();
      let supervisor = Supervisor::new(self.ctx.clone(), advert.peripheral.clone(), stop.clone());
      self.supervisors.insert(name.clone(), SupervisorHandle {
         name: name.clone(),
         stop,
         task: tokio::spawn(supervisor.run()),
      });
   }
}

#[cfg(test)]
mod tests {
   use std::time::Duration;

   use tokio::time;

   use super::*;
   use crate::{
      bluetooth::mock::{MockDevice, MockTransport},
      supervisor::tests::{context, eventually},
   };

   #[test]
   fn test_filter_is_case_insensitive_substring() {
      let filters = vec!["polar".to_string()];
      assert!(matches_filter("Polar H10 1234", &filters));
      assert!(matches_filter("PolarH10", &filters));
      assert!(!matches_filter("MoxySensor", &filters));
      assert!(!matches_filter("", &filters));
   }

   #[tokio::test]
   async fn test_only_matching_peripherals_get_a_supervisor() {
      let transport = MockTransport::new();
      let polar = MockDevice::heart_rate("PolarH10");
      let moxy = MockDevice::heart_rate("MoxySensor");
      transport.add_device(polar.clone());
      transport.add_device(moxy.clone());
      let (ctx, _bus) = context(transport.clone());

      let scanner = Scanner::start(ctx.clone(), &["polar".to_string()])
         .await
         .unwrap();
      transport.advertise(&polar);
      transport.advertise(&moxy);
      // Repeated advertisements for a registered name are ignored.
      transport.advertise(&polar);

      eventually("polar subscription", || polar.calls().subscribes == 1).await;
      assert_eq!(scanner.active().await.unwrap(), vec![SmolStr::new("PolarH10")]);
      assert_eq!(polar.calls().connects, 1);
      assert_eq!(moxy.calls().connects, 0);

      ctx.shutdown.set();
      let supervisors = scanner.join().await.unwrap();
      assert_eq!(supervisors.len(), 1);
      assert_eq!(supervisors[0].name, "PolarH10");
   }

   #[tokio::test]
   async fn test_finished_supervisor_is_replaced() {
      let transport = MockTransport::new();
      let device = MockDevice::heart_rate("Polar OH1");
      device.reject_connects(true);
      transport.add_device(device.clone());
      let (ctx, bus) = context(transport.clone());
      let scanner = Scanner::start(ctx.clone(), &["Polar".to_string()])
         .await
         .unwrap();

      transport.advertise(&device);
      eventually("first supervisor to fault", || {
         bus.finished("Polar OH1") == Some(SupervisorExit::Faulted)
      })
      .await;
      let drained = async {
         while !scanner.active().await.unwrap().is_empty() {
            time::sleep(Duration::from_millis(5)).await;
         }
      };
      time::timeout(Duration::from_secs(5), drained).await.unwrap();

      device.reject_connects(false);
      transport.advertise(&device);
      eventually("second supervisor", || device.calls().subscribes == 1).await;
      assert_eq!(device.calls().connects, 2);
      assert_eq!(scanner.active().await.unwrap().len(), 1);

      ctx.shutdown.set();
      let supervisors = scanner.join().await.unwrap();
      assert_eq!(supervisors.len(), 1);
      for s in supervisors {
         time::timeout(Duration::from_secs(5), s.task)
            .await
            .unwrap()
            .unwrap();
      }
   }
}
