//! Polar sensors (H10, OH1, Verity Sense).
//!
//! Streams are configured through the PMD (Polar Measurement Data) control
//! point: the feature byte read from it lists the measurement types the
//! sensor offers, and each one is started with a settings request followed
//! by a start command. Data frames then arrive on the PMD data
//! characteristic, tagged with their measurement type.

use async_trait::async_trait;
use log::debug;
use uuid::Uuid;

use crate::{
   bluetooth::transport::Payload,
   devices::{
      Decoder, NotifyContext,
      parser::{ProtoError, ensure_len, u16_le, uint_le},
   },
   error::Result,
   gatt::{
      link::{DeviceLink, bytes2str},
      names::{POLAR_PFC_CP, POLAR_PFC_FEATURE, POLAR_PMD_CP, POLAR_PMD_DATA, POLAR_PMD_SERVICE},
      services::ServiceMap,
   },
};

/// PMD control point op codes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmdOp {
   RequestSettings = 0x01,
   StartMeasurement = 0x02,
}

/// PMD measurement types.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::Display)]
pub enum PmdMeasurement {
   #[strum(serialize = "ECG")]
   Ecg = 0,
   #[strum(serialize = "PPG")]
   Ppg = 1,
   #[strum(serialize = "ACC")]
   Acc = 2,
   #[strum(serialize = "PPI")]
   Ppi = 3,
   #[strum(serialize = "GYRO")]
   Gyro = 5,
   #[strum(serialize = "MAG")]
   Mag = 6,
}

impl PmdMeasurement {
   /// Bit in the PMD feature byte advertising this measurement.
   pub const fn feature_bit(self) -> u8 {
      match self {
         Self::Ecg => 1 << 0,
         Self::Ppg => 1 << 1,
         Self::Acc => 1 << 2,
         Self::Ppi => 1 << 3,
         Self::Gyro => 1 << 5,
         Self::Mag => 1 << 6,
      }
   }

   /// Measurement types listed in a PMD feature byte.
   pub fn available(features: u8) -> Vec<Self> {
      [
         Self::Ecg,
         Self::Ppg,
         Self::Acc,
         Self::Ppi,
         Self::Gyro,
         Self::Mag,
      ]
      .into_iter()
      .filter(|m| features & m.feature_bit() != 0)
      .collect()
   }
}

/// PMD control point response codes.
const PMD_ERRORS: &[&str] = &[
   "success",
   "invalid op code",
   "invalid measurement type",
   "not supported",
   "invalid length",
   "invalid parameter",
   "already in state",
   "invalid resolution",
   "invalid sample rate",
   "invalid range",
   "invalid MTU",
   "invalid number of channels",
   "invalid state",
   "device in charger",
];

/// First byte of a control point response notification.
const PMD_CP_RESPONSE: u8 = 0xf0;

/// PFC feature flags that are worth reporting.
const PFC_FLAGS: &[(u16, &str)] = &[
   (1 << 0, "broadcast"),
   (1 << 1, "5khz"),
   (1 << 7, "multi_connection"),
   (1 << 8, "ant_plus"),
];

/// Optional stream parameters, encoded as `[type, 0x01, lo, hi]` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamSettings {
   pub sample_rate: Option<u16>,
   pub resolution: Option<u16>,
   pub range: Option<u16>,
   pub range_milliunit: Option<u16>,
   pub channels: Option<u16>,
   pub factor: Option<u16>,
}

impl StreamSettings {
   /// Settings used when starting each measurement.
   pub const fn for_measurement(measurement: PmdMeasurement) -> Self {
      let mut settings = Self {
         sample_rate: None,
         resolution: None,
         range: None,
         range_milliunit: None,
         channels: None,
         factor: None,
      };
      match measurement {
         PmdMeasurement::Acc => {
            settings.sample_rate = Some(0x32);
            settings.resolution = Some(0x10);
            settings.range = Some(0x08);
         },
         PmdMeasurement::Ecg => {
            settings.sample_rate = Some(130);
            settings.resolution = Some(14);
         },
         PmdMeasurement::Ppg => {
            settings.sample_rate = Some(130);
            settings.resolution = Some(22);
         },
         PmdMeasurement::Ppi | PmdMeasurement::Gyro | PmdMeasurement::Mag => {},
      }
      settings
   }
}

/// Builds a PMD control point command.
pub fn pmd_command(op: PmdOp, measurement: PmdMeasurement, settings: &StreamSettings) -> Payload {
   let mut packet = Payload::new();
   packet.push(op as u8);
   packet.push(measurement as u8);
   let fields = [
      (0x00, settings.sample_rate),
      (0x01, settings.resolution),
      (0x02, settings.range),
      (0x03, settings.range_milliunit),
      (0x04, settings.channels),
      (0x05, settings.factor),
   ];
   for (kind, value) in fields {
      if let Some(value) = value {
         packet.extend_from_slice(&[kind, 0x01]);
         packet.extend_from_slice(&value.to_le_bytes());
      }
   }
   packet
}

/// A decoded PMD data frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmdFrame {
   pub measurement: PmdMeasurement,
   pub timestamp: u64,
   pub frame_type: u8,
}

pub fn parse_pmd_frame(data: &[u8]) -> std::result::Result<PmdFrame, ProtoError> {
   ensure_len(data, 10)?;
   let measurement = PmdMeasurement::from_repr(data[0])
      .ok_or(ProtoError::UnknownMeasurement { kind: data[0] })?;
   Ok(PmdFrame {
      measurement,
      timestamp: uint_le(data, 1, 8)?,
      frame_type: data[9],
   })
}

/// Describes a control point response.
pub fn describe_cp_response(data: &[u8]) -> String {
   if data.len() < 4 || data[0] != PMD_CP_RESPONSE {
      return bytes2str(data);
   }
   let op = data[1];
   let measurement = PmdMeasurement::from_repr(data[2])
      .map_or_else(|| format!("0x{:02x}", data[2]), |m| m.to_string());
   let status = PMD_ERRORS
      .get(data[3] as usize)
      .copied()
      .unwrap_or("unknown error");
   format!("op 0x{op:02x} {measurement}: {status}")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Polar;

impl Polar {
   async fn report_pfc_features(&self, link: &DeviceLink) -> Result<()> {
      let response = link.read(POLAR_PFC_FEATURE).await?;
      let flags = u16_le(&response, 0)?;
      let available: Vec<_> = PFC_FLAGS
         .iter()
         .map(|(bit, name)| format!("{name}={}", flags & bit != 0))
         .collect();
      link.reporter().report(
         "pfc_features",
         format_args!("flags: {flags:x} {}", available.join(" ")),
      );
      Ok(())
   }
}

#[async_trait]
impl Decoder for Polar {
   fn family(&self) -> &'static str {
      "polar"
   }

   fn claims(&self, characteristic: &Uuid) -> bool {
      [POLAR_PMD_DATA, POLAR_PMD_CP, POLAR_PFC_CP].contains(characteristic)
   }

   fn device_present(&self, services: &ServiceMap) -> bool {
      services.contains_service(&POLAR_PMD_SERVICE)
   }

   async fn start(&self, link: &DeviceLink, services: &ServiceMap) -> Result<()> {
      if services.characteristic(&POLAR_PFC_FEATURE).is_some() {
         self.report_pfc_features(link).await?;
      }

      let response = link.read(POLAR_PMD_CP).await?;
      ensure_len(&response, 2)?;
      let available = PmdMeasurement::available(response[1]);
      link.reporter().report(
         "pmd_features",
         format_args!("{:#04x} available: {available:?}", response[1]),
      );

      for measurement in [
         PmdMeasurement::Acc,
         PmdMeasurement::Ecg,
         PmdMeasurement::Ppg,
         PmdMeasurement::Ppi,
      ] {
         if !available.contains(&measurement) {
            continue;
         }
         let request = pmd_command(PmdOp::RequestSettings, measurement, &StreamSettings::default());
         link.write(POLAR_PMD_CP, &request).await?;
         let start = pmd_command(
            PmdOp::StartMeasurement,
            measurement,
            &StreamSettings::for_measurement(measurement),
         );
         link.write(POLAR_PMD_CP, &start).await?;
      }
      Ok(())
   }

   fn on_notify(&self, ctx: &NotifyContext<'_>) -> Result<()> {
      let reporter = ctx.link.reporter();
      match ctx.characteristic {
         POLAR_PMD_DATA => {
            let frame = parse_pmd_frame(ctx.payload)?;
            let label = format!("PMD {}", frame.measurement);
            let count = ctx.stats.increment(ctx.device(), &label);
            debug!("{}: {label} timestamp {}", ctx.device(), frame.timestamp);
            reporter.report(
               &label,
               format_args!(
                  "{count:3} {:02x} len: {}",
                  frame.frame_type,
                  ctx.payload.len()
               ),
            );
         },
         POLAR_PMD_CP => reporter.report("PMD_CP", describe_cp_response(ctx.payload)),
         _ => reporter.report("PFC_CP", bytes2str(ctx.payload)),
      }
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_start_ecg_command() {
      let cmd = pmd_command(
         PmdOp::StartMeasurement,
         PmdMeasurement::Ecg,
         &StreamSettings::for_measurement(PmdMeasurement::Ecg),
      );
      assert_eq!(
         cmd.as_slice(),
         &[0x02, 0x00, 0x00, 0x01, 0x82, 0x00, 0x01, 0x01, 0x0e, 0x00]
      );
   }

   #[test]
   fn test_request_settings_has_no_parameters() {
      let cmd = pmd_command(
         PmdOp::RequestSettings,
         PmdMeasurement::Acc,
         &StreamSettings::default(),
      );
      assert_eq!(cmd.as_slice(), &[0x01, 0x02]);
   }

   #[test]
   fn test_acc_settings_include_range() {
      let cmd = pmd_command(
         PmdOp::StartMeasurement,
         PmdMeasurement::Acc,
         &StreamSettings::for_measurement(PmdMeasurement::Acc),
      );
      assert_eq!(cmd.len(), 2 + 3 * 4);
      assert_eq!(&cmd[10..], &[0x02, 0x01, 0x08, 0x00]);
   }

   #[test]
   fn test_feature_byte() {
      let available = PmdMeasurement::available(0b0000_0101);
      assert_eq!(available, vec![PmdMeasurement::Ecg, PmdMeasurement::Acc]);
   }

   #[test]
   fn test_parse_frame() {
      let mut data = vec![0x00];
      data.extend_from_slice(&1000u64.to_le_bytes());
      data.push(0x00);
      data.extend_from_slice(&[0xaa; 6]);
      let frame = parse_pmd_frame(&data).unwrap();
      assert_eq!(frame.measurement, PmdMeasurement::Ecg);
      assert_eq!(frame.timestamp, 1000);
      assert_eq!(frame.frame_type, 0);
   }

   #[test]
   fn test_parse_frame_errors() {
      assert!(matches!(
         parse_pmd_frame(&[0x00; 4]),
         Err(ProtoError::PayloadTooShort { .. })
      ));
      assert_eq!(
         parse_pmd_frame(&[0x04; 10]),
         Err(ProtoError::UnknownMeasurement { kind: 4 })
      );
   }

   #[test]
   fn test_describe_cp_response() {
      assert_eq!(
         describe_cp_response(&[0xf0, 0x02, 0x00, 0x00, 0x00]),
         "op 0x02 ECG: success"
      );
      assert_eq!(
         describe_cp_response(&[0xf0, 0x02, 0x01, 0x0d]),
         "op 0x02 PPG: device in charger"
      );
      assert_eq!(describe_cp_response(&[0x0f, 0x01]), "0f 01");
   }
}
