//! Wi-SUN B-route client for low-voltage smart electric energy meters.
//!
//! The meter is reached through an SKSTACK-IP serial modem. Requests and
//! responses are ECHONET Lite frames carried over UDP port `0x0E1A`.
//!
//! # Modules
//!
//! - [`echonet`] - ECHONET Lite frame model and codec
//! - [`skstack`] - SKSTACK-IP line protocol
//! - [`client`] - [`DeviceClient`] trait and the serial [`SmartMeterClient`]
//! - [`config`] - Modem and credential settings
//!
//! The modem must be configured for ASCII `ERXUDP` payloads (`WOPT 01`),
//! which is stored in its flash and only has to be set once.

pub mod client;
pub mod config;
pub mod echonet;
pub mod error;
pub mod skstack;

pub use client::{DeviceClient, PanDescriptor, SmartMeterClient};
pub use config::DeviceConfig;
pub use echonet::{Esv, Frame, Property};
pub use error::{DeviceError, Result};
