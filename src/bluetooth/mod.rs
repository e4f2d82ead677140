//! Bluetooth transport layer.
//!
//! [`transport`] defines what the supervisor needs from a Bluetooth stack,
//! [`bluez`] provides it on Linux through BlueZ.

pub mod bluez;
#[cfg(test)]
pub mod mock;
pub mod transport;
