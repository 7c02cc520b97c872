//! Bluetooth Module
//!
//! BLE communication with scooter controllers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │  (Main coordinator - command loop for the application)   │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │ Protocol │
//! │           │  │            │  │          │
//! │ - Timed   │  │ - GATT     │  │ - Hex    │
//! │   scan    │  │   session  │  │   codec  │
//! │ - Catalog │  │ - Channels │  │ - Tables │
//! └─────┬─────┘  └─────┬──────┘  └──────────┘
//!       │              │
//!       ▼              ▼
//! ┌──────────────────────────┐
//! │ Backend (WinRT / Mock)   │
//! └──────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Scooter command encoding and hex helpers
//! - [`backend`] - Platform seam: requests out, events back
//! - [`scanner`] - Timed device discovery
//! - [`connection`] - Connection state machine and channel discovery
//! - [`service`] - Main service coordinator

pub mod backend;
pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod service;
#[cfg(windows)]
pub mod winrt;

pub use service::{Backends, BluetoothCommand, BluetoothService};
