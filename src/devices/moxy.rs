//! Moxy muscle oxygen monitor.

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
   devices::{
      Decoder, NotifyContext,
      parser::{ProtoError, u16_le},
   },
   error::Result,
   gatt::{
      link::DeviceLink,
      names::{MOXY_SMO2_DATA, MOXY_SMO2_SERVICE},
      services::ServiceMap,
   },
};

/// One SmO2 data notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smo2Sample {
   pub counter: u16,
   /// Percent.
   pub current_smo2: f32,
   /// Percent.
   pub previous_smo2: f32,
   /// g/dl.
   pub thb: f32,
}

pub fn parse_smo2(data: &[u8]) -> std::result::Result<Smo2Sample, ProtoError> {
   Ok(Smo2Sample {
      counter: u16_le(data, 0)?,
      current_smo2: f32::from(u16_le(data, 2)?) / 10.0,
      previous_smo2: f32::from(u16_le(data, 4)?) / 10.0,
      thb: f32::from(u16_le(data, 6)?) / 100.0,
   })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Moxy;

#[async_trait]
impl Decoder for Moxy {
   fn family(&self) -> &'static str {
      "moxy"
   }

   fn claims(&self, characteristic: &Uuid) -> bool {
      *characteristic == MOXY_SMO2_DATA
   }

   fn device_present(&self, services: &ServiceMap) -> bool {
      services.contains_service(&MOXY_SMO2_SERVICE)
   }

   async fn start(&self, link: &DeviceLink, _services: &ServiceMap) -> Result<()> {
      link.reporter().report("moxy", "streaming SmO2");
      Ok(())
   }

   fn on_notify(&self, ctx: &NotifyContext<'_>) -> Result<()> {
      let sample = parse_smo2(ctx.payload)?;
      ctx.link.reporter().report(
         "SmO2",
         format_args!(
            "#{} {:.1}% (prev {:.1}%) THb {:.2}",
            sample.counter, sample.current_smo2, sample.previous_smo2, sample.thb
         ),
      );
      Ok(())
   }
}
