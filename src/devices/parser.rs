//! Shared payload parsing helpers for the device decoders.

use thiserror::Error;

/// Error type for payload parsing.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtoError {
   /// Payload is too short for the expected format
   #[error("Payload too short: expected at least {expected} bytes, got {actual}")]
   PayloadTooShort { expected: usize, actual: usize },

   /// Unknown PMD measurement type
   #[error("Unknown measurement type: 0x{kind:02x}")]
   UnknownMeasurement { kind: u8 },

   /// Generic invalid payload format
   #[error("Invalid payload format: {reason}")]
   InvalidFormat { reason: &'static str },
}

pub const fn ensure_len(data: &[u8], expected: usize) -> Result<(), ProtoError> {
   if data.len() < expected {
      Err(ProtoError::PayloadTooShort {
         expected,
         actual: data.len(),
      })
   } else {
      Ok(())
   }
}

pub fn u16_le(data: &[u8], offset: usize) -> Result<u16, ProtoError> {
   ensure_len(data, offset + 2)?;
   Ok(u16::from_le_bytes([data[offset], data[offset + 1]]))
}

pub fn i16_le(data: &[u8], offset: usize) -> Result<i16, ProtoError> {
   u16_le(data, offset).map(|v| v as i16)
}

/// Little-endian unsigned integer of `len` bytes (at most 8).
pub fn uint_le(data: &[u8], offset: usize, len: usize) -> Result<u64, ProtoError> {
   if len > 8 {
      return Err(ProtoError::InvalidFormat {
         reason: "integer wider than 64 bits",
      });
   }
   ensure_len(data, offset + len)?;
   let mut buf = [0u8; 8];
   buf[..len].copy_from_slice(&data[offset..offset + len]);
   Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_short_payload() {
      assert_eq!(
         u16_le(&[1], 0),
         Err(ProtoError::PayloadTooShort {
            expected: 2,
            actual: 1
         })
      );
   }

   #[test]
   fn test_integers() {
      let data = [0x34, 0x12, 0xff, 0xff, 0x01, 0x00, 0x00];
      assert_eq!(u16_le(&data, 0), Ok(0x1234));
      assert_eq!(i16_le(&data, 2), Ok(-1));
      assert_eq!(uint_le(&data, 0, 7), Ok(0x0001_ffff_1234));
      assert!(uint_le(&data, 0, 9).is_err());
   }
}
