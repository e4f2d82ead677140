//! Characteristic support table.
//!
//! Only characteristics listed here are read or subscribed to. Everything
//! else a peripheral exposes is skipped silently.

/// What the explorer does with a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Category {
   Read,
   Notify,
   Ignore,
}

/// Per-service category lists. A `None` category is the same as a missing key.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceSupport {
   pub read: Option<&'static [&'static str]>,
   pub notify: Option<&'static [&'static str]>,
   pub ignore: Option<&'static [&'static str]>,
}

impl ServiceSupport {
   const fn category(&self, category: Category) -> Option<&'static [&'static str]> {
      match category {
         Category::Read => self.read,
         Category::Notify => self.notify,
         Category::Ignore => self.ignore,
      }
   }
}

/// Service name to support entry. A `None` entry marks a service that is
/// known but has nothing actionable.
pub type SupportEntry = (&'static str, Option<ServiceSupport>);

const BUILTIN: &[SupportEntry] = &[
   (
      "Battery Service",
      Some(ServiceSupport {
         read: Some(&["Battery Level"]),
         notify: Some(&[]),
         ignore: Some(&[]),
      }),
   ),
   ("Current Time Service", None),
   (
      "Heart Rate",
      Some(ServiceSupport {
         read: Some(&["Heart Rate Control Point"]),
         notify: Some(&["Heart Rate Measurement"]),
         ignore: Some(&["Body Sensor Location"]),
      }),
   ),
   (
      "Device Information",
      Some(ServiceSupport {
         read: Some(&[
            "Manufacturer Name String",
            "Model Number String",
            "Serial Number String",
            "Hardware Revision String",
            "Firmware Revision String",
            "Software Revision String",
         ]),
         notify: None,
         ignore: Some(&[
            "PnP ID",
            "System ID",
            "IEEE 11073-20601 Regulatory Certification Data List",
         ]),
      }),
   ),
   (
      "Moxy SMO2 Service",
      Some(ServiceSupport {
         read: Some(&[]),
         notify: Some(&["Moxy SMO2 Data"]),
         ignore: Some(&[
            "Moxy SMO2 Data Packet",
            "Moxy SMO2 Data Point Value",
            "Moxy SMO2 Data Point Control",
            "Moxy SMO2 Data Range Request",
            "Moxy SMO2 Data Point Upload",
         ]),
      }),
   ),
   (
      "Polar Feature Configuration Service",
      Some(ServiceSupport {
         read: None,
         notify: Some(&["Polar PFC Control Point"]),
         ignore: None,
      }),
   ),
   (
      "Polar Measurement Data Service",
      Some(ServiceSupport {
         read: None,
         notify: Some(&["Polar PMD Control Point", "Polar PMD Data"]),
         ignore: None,
      }),
   ),
   (
      "ZwiftPlay Service",
      Some(ServiceSupport {
         read: None,
         notify: Some(&["ZwiftPlay Data", "ZwiftPlay Left", "ZwiftPlay Right", "ZwiftPlay Response"]),
         ignore: None,
      }),
   ),
   (
      "VO2_MASTER_CUSTOM_SERVICE",
      Some(ServiceSupport {
         read: None,
         notify: Some(&[
            "COM_OUT_UUID",
            "AMBIENT_GAS_CALIBRATION_CHARACTERISTIC",
            "VENTILATORY_CHARACTERISTIC",
            "GAS_EXCHANGE_CHARACTERISTIC",
            "SYRINGE_FLOW_CALIBRATION_CHARACTERISTIC",
            "ENVIRONMENT_CHARACTERISTIC",
         ]),
         ignore: None,
      }),
   ),
   (
      "Nordic UART Service",
      Some(ServiceSupport {
         read: None,
         notify: Some(&["Nordic UART TX", "Nordic UART RX"]),
         ignore: None,
      }),
   ),
];

/// Static allow-list keyed by resolved service name.
#[derive(Debug, Clone, Copy)]
pub struct SupportTable {
   entries: &'static [SupportEntry],
}

impl Default for SupportTable {
   fn default() -> Self {
      Self::builtin()
   }
}

impl SupportTable {
   pub const fn builtin() -> Self {
      Self::new(BUILTIN)
   }

   pub const fn new(entries: &'static [SupportEntry]) -> Self {
      Self { entries }
   }

   /// Whether `characteristic` of `service` should be acted on for `category`.
   ///
   /// Names are compared exactly. `Ignore` never matches.
   pub fn is_supported(&self, service: &str, characteristic: &str, category: Category) -> bool {
      if category == Category::Ignore {
         return false;
      }
      self
         .entries
         .iter()
         .find(|(name, _)| *name == service)
         .and_then(|(_, support)| support.as_ref())
         .and_then(|support| support.category(category))
         .is_some_and(|names| names.contains(&characteristic))
   }
}
