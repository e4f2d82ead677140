//! Error types for the BLE explorer.
//!
//! This module defines all error types that can occur while scanning,
//! connecting to peripherals, talking GATT and decoding payloads.

use smol_str::SmolStr;
use thiserror::Error;
use tokio::task::JoinError;
use uuid::Uuid;

use crate::devices::parser::ProtoError;

/// Main error type for the explorer.
#[derive(Error, Debug)]
pub enum ExploreError {
   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Invalid UUID: {0}")]
   InvalidUuid(#[from] uuid::Error),

   #[error("Payload error: {0}")]
   Proto(#[from] ProtoError),

   #[error("Connect timed out after {0:?}")]
   ConnectTimeout(std::time::Duration),

   #[error("Request timeout")]
   RequestTimeout,

   #[error("Connection closed")]
   ConnectionClosed,

   #[error("Device not connected")]
   DeviceNotConnected,

   #[error("Characteristic not found: {0}")]
   CharacteristicNotFound(Uuid),

   #[error("Stop requested")]
   StopRequested,

   #[error("Decoder {family} failed: {reason}")]
   Decoder { family: &'static str, reason: String },

   #[error("Supervisor panicked: {0}")]
   SupervisorPanicked(JoinError),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("Invalid config: {0} must be greater than zero")]
   InvalidConfig(&'static str),

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Adapter not found")]
   AdapterNotFound,

   #[error("Invalid device address: {0}")]
   InvalidAddress(SmolStr),

   #[error("Scanner has been shut down")]
   ScannerShutdown,
}

impl ExploreError {
   /// Whether the error is a transport hiccup that the next connection
   /// cycle is expected to recover from.
   pub const fn is_transient(&self) -> bool {
      matches!(
         self,
         Self::Bluetooth(_)
            | Self::Io(_)
            | Self::ConnectTimeout(_)
            | Self::RequestTimeout
            | Self::ConnectionClosed
            | Self::DeviceNotConnected
            | Self::CharacteristicNotFound(_)
            | Self::StopRequested
      )
   }
}

/// Convenience type alias for Results with `ExploreError`.
pub type Result<T> = std::result::Result<T, ExploreError>;
