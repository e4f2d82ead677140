//! Device family decoders.
//!
//! Each supported sensor family implements [`Decoder`]. The list is built
//! once at startup and shared read-only by every connection, so decoders
//! keep no per-connection state; everything they need arrives with the call.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
   error::Result,
   gatt::{link::DeviceLink, services::ServiceMap, stats::Statistics},
};

pub mod moxy;
pub mod parser;
pub mod polar;
pub mod vo2master;

/// Everything a decoder gets for one notification.
pub struct NotifyContext<'a> {
   pub characteristic: Uuid,
   pub payload: &'a [u8],
   pub link: &'a DeviceLink,
   pub stats: &'a Statistics,
}

impl NotifyContext<'_> {
   pub fn device(&self) -> &str {
      self.link.device()
   }
}

/// Capability interface of one device family.
#[async_trait]
pub trait Decoder: Send + Sync {
   /// Short family name used in logs.
   fn family(&self) -> &'static str;

   /// Whether notifications from `characteristic` are interpreted here.
   fn claims(&self, characteristic: &Uuid) -> bool;

   /// Whether the discovered services belong to this family.
   fn device_present(&self, services: &ServiceMap) -> bool;

   /// One-time setup after exploration, e.g. writing configuration commands.
   async fn start(&self, link: &DeviceLink, services: &ServiceMap) -> Result<()>;

   /// Interprets one payload.
   fn on_notify(&self, ctx: &NotifyContext<'_>) -> Result<()>;
}

/// Shared, immutable decoder list.
pub type Decoders = Arc<[Box<dyn Decoder>]>;

/// The built-in families.
pub fn builtin() -> Decoders {
   Arc::from(vec![
      Box::new(polar::Polar) as Box<dyn Decoder>,
      Box::new(moxy::Moxy),
      Box::new(vo2master::Vo2Master),
   ])
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::gatt::names::{MOXY_SMO2_DATA, POLAR_PMD_DATA, VO2_VENTILATORY, sig};

   #[test]
   fn test_builtin_claims_are_disjoint() {
      let decoders = builtin();
      let families: Vec<_> = decoders.iter().map(|d| d.family()).collect();
      assert_eq!(families, ["polar", "moxy", "vo2master"]);

      for uuid in [POLAR_PMD_DATA, MOXY_SMO2_DATA, VO2_VENTILATORY] {
         assert_eq!(decoders.iter().filter(|d| d.claims(&uuid)).count(), 1);
      }
      assert!(!decoders.iter().any(|d| d.claims(&sig(0x2a37))));
   }
}
