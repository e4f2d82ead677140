//! VO2 Master metabolic analyser.

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
   devices::{
      Decoder, NotifyContext,
      parser::{ProtoError, i16_le, u16_le},
   },
   error::Result,
   gatt::{
      link::{DeviceLink, bytes2str},
      names::{
         VO2_AMBIENT_CALIBRATION, VO2_COM_OUT, VO2_ENVIRONMENT, VO2_GAS_EXCHANGE,
         VO2_MASTER_SERVICE, VO2_SYRINGE_CALIBRATION, VO2_VENTILATORY,
      },
      services::ServiceMap,
   },
};

const CLAIMED: [Uuid; 6] = [
   VO2_COM_OUT,
   VO2_VENTILATORY,
   VO2_GAS_EXCHANGE,
   VO2_ENVIRONMENT,
   VO2_AMBIENT_CALIBRATION,
   VO2_SYRINGE_CALIBRATION,
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ventilatory {
   /// Breaths per minute.
   pub respiratory_frequency: f32,
   /// Litres.
   pub tidal_volume: f32,
   /// Litres per minute.
   pub minute_ventilation: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasExchange {
   /// Expired O2 fraction, percent.
   pub feo2: f32,
   /// ml/min.
   pub vo2: u16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Environment {
   /// hPa.
   pub pressure: f32,
   /// Degrees Celsius.
   pub temperature: f32,
   /// Percent relative humidity.
   pub humidity: f32,
}

pub fn parse_ventilatory(data: &[u8]) -> std::result::Result<Ventilatory, ProtoError> {
   Ok(Ventilatory {
      respiratory_frequency: f32::from(u16_le(data, 0)?) / 100.0,
      tidal_volume: f32::from(u16_le(data, 2)?) / 100.0,
      minute_ventilation: f32::from(u16_le(data, 4)?) / 100.0,
   })
}

pub fn parse_gas_exchange(data: &[u8]) -> std::result::Result<GasExchange, ProtoError> {
   Ok(GasExchange {
      feo2: f32::from(u16_le(data, 0)?) / 100.0,
      vo2: u16_le(data, 2)?,
   })
}

pub fn parse_environment(data: &[u8]) -> std::result::Result<Environment, ProtoError> {
   Ok(Environment {
      pressure: f32::from(u16_le(data, 0)?) / 10.0,
      temperature: f32::from(i16_le(data, 2)?) / 100.0,
      humidity: f32::from(u16_le(data, 4)?) / 100.0,
   })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Vo2Master;

#[async_trait]
impl Decoder for Vo2Master {
   fn family(&self) -> &'static str {
      "vo2master"
   }

   fn claims(&self, characteristic: &Uuid) -> bool {
      CLAIMED.contains(characteristic)
   }

   fn device_present(&self, services: &ServiceMap) -> bool {
      services.contains_service(&VO2_MASTER_SERVICE)
   }

   async fn start(&self, link: &DeviceLink, services: &ServiceMap) -> Result<()> {
      let streams = CLAIMED
         .iter()
         .filter(|uuid| services.characteristic(uuid).is_some())
         .count();
      link
         .reporter()
         .report("vo2master", format_args!("{streams} data characteristics"));
      Ok(())
   }

   fn on_notify(&self, ctx: &NotifyContext<'_>) -> Result<()> {
      let reporter = ctx.link.reporter();
      match ctx.characteristic {
         VO2_VENTILATORY => {
            let v = parse_ventilatory(ctx.payload)?;
            reporter.report(
               "ventilatory",
               format_args!(
                  "Rf {:.2} Tv {:.2} Ve {:.2}",
                  v.respiratory_frequency, v.tidal_volume, v.minute_ventilation
               ),
            );
         },
         VO2_GAS_EXCHANGE => {
            let g = parse_gas_exchange(ctx.payload)?;
            reporter.report(
               "gas_exchange",
               format_args!("FeO2 {:.2}% VO2 {}", g.feo2, g.vo2),
            );
         },
         VO2_ENVIRONMENT => {
            let e = parse_environment(ctx.payload)?;
            reporter.report(
               "environment",
               format_args!(
                  "{:.1} hPa {:.2} C {:.2}%",
                  e.pressure, e.temperature, e.humidity
               ),
            );
         },
         other => reporter.report(
            "vo2master",
            format_args!(
               "{}: {}",
               ctx.link.names().display(&other),
               bytes2str(ctx.payload)
            ),
         ),
      }
      Ok(())
   }
}
