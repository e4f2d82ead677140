//! UUID naming table.
//!
//! Maps GATT service/characteristic UUIDs to the human-readable names the
//! support table and the decoders are written against. The built-in table
//! covers the Bluetooth SIG assigned numbers this tool cares about plus the
//! vendor services of the supported sensor families; more pairs can be
//! registered at startup.

use std::collections::HashMap;

use log::warn;
use smol_str::SmolStr;
use uuid::Uuid;

use crate::{config::ExtraName, error::Result};

/// Expands a 16-bit SIG assigned number into a full UUID.
pub const fn sig(short: u16) -> Uuid {
   Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_00805f9b34fb)
}

pub const POLAR_PMD_SERVICE: Uuid = Uuid::from_u128(0xfb005c80_02e7_f387_1cad_8acd2d8df0c8);
pub const POLAR_PMD_CP: Uuid = Uuid::from_u128(0xfb005c81_02e7_f387_1cad_8acd2d8df0c8);
pub const POLAR_PMD_DATA: Uuid = Uuid::from_u128(0xfb005c82_02e7_f387_1cad_8acd2d8df0c8);
pub const POLAR_PFC_SERVICE: Uuid = Uuid::from_u128(0x6217ff4b_fb31_1140_ad5a_a45545d7ecf3);
pub const POLAR_PFC_FEATURE: Uuid = Uuid::from_u128(0x6217ff4c_c8ec_b1fb_1380_3ad986708e2d);
pub const POLAR_PFC_CP: Uuid = Uuid::from_u128(0x6217ff4d_91bb_91d0_7e2a_7cd3bda8a1f3);

pub const MOXY_SMO2_SERVICE: Uuid = Uuid::from_u128(0x6404d801_4cb9_11e8_b566_0800200c9a66);
pub const MOXY_SMO2_DATA_PACKET: Uuid = Uuid::from_u128(0x6404d802_4cb9_11e8_b566_0800200c9a66);
pub const MOXY_SMO2_DATA_POINT_VALUE: Uuid =
   Uuid::from_u128(0x6404d803_4cb9_11e8_b566_0800200c9a66);
pub const MOXY_SMO2_DATA: Uuid = Uuid::from_u128(0x6404d804_4cb9_11e8_b566_0800200c9a66);
pub const MOXY_SMO2_DATA_POINT_CONTROL: Uuid =
   Uuid::from_u128(0x6404d805_4cb9_11e8_b566_0800200c9a66);
pub const MOXY_SMO2_DATA_RANGE_REQUEST: Uuid =
   Uuid::from_u128(0x6404d806_4cb9_11e8_b566_0800200c9a66);
pub const MOXY_SMO2_DATA_POINT_UPLOAD: Uuid =
   Uuid::from_u128(0x6404d807_4cb9_11e8_b566_0800200c9a66);

pub const VO2_MASTER_SERVICE: Uuid = Uuid::from_u128(0x00001523_1212_efde_1523_785feabcd123);
pub const VO2_COM_IN: Uuid = Uuid::from_u128(0x00001524_1212_efde_1523_785feabcd123);
pub const VO2_COM_OUT: Uuid = Uuid::from_u128(0x00001525_1212_efde_1523_785feabcd123);
pub const VO2_VENTILATORY: Uuid = Uuid::from_u128(0x00001526_1212_efde_1523_785feabcd123);
pub const VO2_GAS_EXCHANGE: Uuid = Uuid::from_u128(0x00001527_1212_efde_1523_785feabcd123);
pub const VO2_ENVIRONMENT: Uuid = Uuid::from_u128(0x00001528_1212_efde_1523_785feabcd123);
pub const VO2_AMBIENT_CALIBRATION: Uuid = Uuid::from_u128(0x00001529_1212_efde_1523_785feabcd123);
pub const VO2_SYRINGE_CALIBRATION: Uuid = Uuid::from_u128(0x0000152a_1212_efde_1523_785feabcd123);

/// SIG assigned numbers (16-bit) known to the tool.
const SIG_NAMES: &[(u16, &str)] = &[
   (0x1800, "Generic Access Profile"),
   (0x1801, "Generic Attribute Profile"),
   (0x1805, "Current Time Service"),
   (0x180a, "Device Information"),
   (0x180d, "Heart Rate"),
   (0x180f, "Battery Service"),
   (0x1816, "Cycling Speed and Cadence"),
   (0x1818, "Cycling Power"),
   (0x2a00, "Device Name"),
   (0x2a01, "Appearance"),
   (0x2a04, "Peripheral Preferred Connection Parameters"),
   (0x2a05, "Service Changed"),
   (0x2a19, "Battery Level"),
   (0x2a23, "System ID"),
   (0x2a24, "Model Number String"),
   (0x2a25, "Serial Number String"),
   (0x2a26, "Firmware Revision String"),
   (0x2a27, "Hardware Revision String"),
   (0x2a28, "Software Revision String"),
   (0x2a29, "Manufacturer Name String"),
   (0x2a2a, "IEEE 11073-20601 Regulatory Certification Data List"),
   (0x2a2b, "Current Time"),
   (0x2a37, "Heart Rate Measurement"),
   (0x2a38, "Body Sensor Location"),
   (0x2a39, "Heart Rate Control Point"),
   (0x2a50, "PnP ID"),
   (0x2a5b, "CSC Measurement"),
   (0x2a63, "Cycling Power Measurement"),
];

/// Vendor-specific 128-bit UUIDs.
static VENDOR_NAMES: &[(Uuid, &str)] = &[
   (POLAR_PMD_SERVICE, "Polar Measurement Data Service"),
   (POLAR_PMD_CP, "Polar PMD Control Point"),
   (POLAR_PMD_DATA, "Polar PMD Data"),
   (POLAR_PFC_SERVICE, "Polar Feature Configuration Service"),
   (POLAR_PFC_FEATURE, "Polar PFC Feature"),
   (POLAR_PFC_CP, "Polar PFC Control Point"),
   (MOXY_SMO2_SERVICE, "Moxy SMO2 Service"),
   (MOXY_SMO2_DATA_PACKET, "Moxy SMO2 Data Packet"),
   (MOXY_SMO2_DATA_POINT_VALUE, "Moxy SMO2 Data Point Value"),
   (MOXY_SMO2_DATA, "Moxy SMO2 Data"),
   (MOXY_SMO2_DATA_POINT_CONTROL, "Moxy SMO2 Data Point Control"),
   (MOXY_SMO2_DATA_RANGE_REQUEST, "Moxy SMO2 Data Range Request"),
   (MOXY_SMO2_DATA_POINT_UPLOAD, "Moxy SMO2 Data Point Upload"),
   (VO2_MASTER_SERVICE, "VO2_MASTER_CUSTOM_SERVICE"),
   (VO2_COM_IN, "COM_IN_UUID"),
   (VO2_COM_OUT, "COM_OUT_UUID"),
   (VO2_VENTILATORY, "VENTILATORY_CHARACTERISTIC"),
   (VO2_GAS_EXCHANGE, "GAS_EXCHANGE_CHARACTERISTIC"),
   (VO2_ENVIRONMENT, "ENVIRONMENT_CHARACTERISTIC"),
   (VO2_AMBIENT_CALIBRATION, "AMBIENT_GAS_CALIBRATION_CHARACTERISTIC"),
   (VO2_SYRINGE_CALIBRATION, "SYRINGE_FLOW_CALIBRATION_CHARACTERISTIC"),
   (
      Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e),
      "Nordic UART Service",
   ),
   (
      Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e),
      "Nordic UART RX",
   ),
   (
      Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e),
      "Nordic UART TX",
   ),
   (
      Uuid::from_u128(0x00000001_19ca_4651_86e5_fa29dcdd09d1),
      "ZwiftPlay Service",
   ),
   (
      Uuid::from_u128(0x00000002_19ca_4651_86e5_fa29dcdd09d1),
      "ZwiftPlay Data",
   ),
   (
      Uuid::from_u128(0x00000003_19ca_4651_86e5_fa29dcdd09d1),
      "ZwiftPlay Control Point",
   ),
   (
      Uuid::from_u128(0x00000004_19ca_4651_86e5_fa29dcdd09d1),
      "ZwiftPlay Response",
   ),
];

/// Bidirectional UUID/name registry.
#[derive(Debug, Clone, Default)]
pub struct UuidNames {
   by_uuid: HashMap<Uuid, SmolStr>,
   by_name: HashMap<SmolStr, Uuid>,
}

impl UuidNames {
   /// The built-in table.
   pub fn builtin() -> Self {
      let mut names = Self::default();
      for &(short, name) in SIG_NAMES {
         names.register(sig(short), name);
      }
      for &(uuid, name) in VENDOR_NAMES {
         names.register(uuid, name);
      }
      names
   }

   /// The built-in table extended with configured pairs.
   pub fn with_extra(extra: &[ExtraName]) -> Result<Self> {
      let mut names = Self::builtin();
      for entry in extra {
         let uuid: Uuid = entry.uuid.parse()?;
         if let Some(other) = names.uuid(&entry.name)
            && other != uuid
         {
            warn!("Name {:?} moves from {other} to {uuid}", entry.name);
         }
         names.register(uuid, entry.name.as_str());
      }
      Ok(names)
   }

   /// Adds or replaces a pair. Names are looked up case-insensitively.
   pub fn register(&mut self, uuid: Uuid, name: impl Into<SmolStr>) {
      let name = name.into();
      if let Some(old) = self.by_uuid.insert(uuid, name.clone()) {
         self.by_name.remove(&lower(&old));
      }
      self.by_name.insert(lower(&name), uuid);
   }

   pub fn name(&self, uuid: &Uuid) -> Option<&SmolStr> {
      self.by_uuid.get(uuid)
   }

   pub fn uuid(&self, name: &str) -> Option<Uuid> {
      self.by_name.get(&lower(name)).copied()
   }

   /// The resolved name, or the hyphenated UUID when unknown.
   pub fn display(&self, uuid: &Uuid) -> SmolStr {
      self
         .name(uuid)
         .cloned()
         .unwrap_or_else(|| SmolStr::from(uuid.hyphenated().to_string()))
   }
}

fn lower(s: &str) -> SmolStr {
   SmolStr::from(s.to_lowercase())
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_sig_expansion() {
      assert_eq!(
         sig(0x180d).to_string(),
         "0000180d-0000-1000-8000-00805f9b34fb"
      );
   }

   #[test]
   fn test_lookup_both_ways() {
      let names = UuidNames::builtin();
      assert_eq!(names.name(&sig(0x2a37)).unwrap(), "Heart Rate Measurement");
      assert_eq!(names.uuid("heart rate measurement"), Some(sig(0x2a37)));
      assert_eq!(names.uuid("Polar PMD Data"), Some(POLAR_PMD_DATA));
      assert_eq!(names.uuid("no such thing"), None);
   }

   #[test]
   fn test_unknown_uuid_displays_as_uuid() {
      let names = UuidNames::builtin();
      let unknown = Uuid::from_u128(0x12345678_0000_0000_0000_000000000000);
      assert!(names.name(&unknown).is_none());
      assert_eq!(
         names.display(&unknown),
         "12345678-0000-0000-0000-000000000000"
      );
   }

   #[test]
   fn test_extra_names_override() {
      let extra = vec![ExtraName {
         uuid: "6e400003-b5a3-f393-e0a9-e50e24dcca9e".into(),
         name: "Sensor Stream".into(),
      }];
      let names = UuidNames::with_extra(&extra).unwrap();
      let tx = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);
      assert_eq!(names.name(&tx).unwrap(), "Sensor Stream");
      assert_eq!(names.uuid("Sensor Stream"), Some(tx));
      assert_eq!(names.uuid("Nordic UART TX"), None);
   }

   #[test]
   fn test_bad_extra_uuid_is_rejected() {
      let extra = vec![ExtraName {
         uuid: "not-a-uuid".into(),
         name: "Broken".into(),
      }];
      assert!(UuidNames::with_extra(&extra).is_err());
   }
}
