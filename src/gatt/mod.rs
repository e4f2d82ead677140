//! GATT-level plumbing shared by every connection.
//!
//! Name resolution, the support table, per-connection access through
//! [`link::DeviceLink`], notification routing and the statistics store.

pub mod dispatch;
pub mod link;
pub mod names;
pub mod services;
pub mod stats;
pub mod support;
