//! Scooter BLE Controller
//!
//! Discovers BLE scooter controllers, keeps a GATT session to one of them and
//! encodes the scooter's hex command protocol.

pub mod cli;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
pub(crate) mod testing;
