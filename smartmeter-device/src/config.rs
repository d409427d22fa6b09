//! Configuration for the Wi-SUN modem and the B-route link.

use std::net::Ipv6Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, Result};

/// Serial modem and B-route credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// B-route authentication ID (32 characters).
    #[serde(default)]
    pub id: String,

    /// B-route password (12 characters).
    #[serde(default)]
    pub password: String,

    /// Serial port path (e.g., "/dev/ttyACM0").
    #[serde(default = "default_port")]
    pub port: String,

    /// Baud rate (default: 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Fixed Wi-SUN channel (skips scanning when combined with `pan_id` and `ipaddr`).
    #[serde(default)]
    pub channel: Option<u8>,

    /// Fixed PAN ID.
    #[serde(default)]
    pub pan_id: Option<u16>,

    /// Fixed smart meter link-local IPv6 address.
    #[serde(default)]
    pub ipaddr: Option<Ipv6Addr>,

    /// Dual Stack Edition modem firmware (extra SIDE parameters).
    #[serde(default = "default_dse")]
    pub dse: bool,

    /// Serial traffic verbosity: 0 quiet, 3 logs every line.
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,

    /// How long to wait for a response to one query attempt.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,

    /// Delay between query attempts.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
}

fn default_port() -> String {
    "/dev/ttyACM0".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_dse() -> bool {
    true
}

fn default_verbosity() -> u8 {
    1
}

fn default_response_timeout() -> u64 {
    20
}

fn default_retry_interval() -> u64 {
    5
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            password: String::new(),
            port: default_port(),
            baud_rate: default_baud_rate(),
            channel: None,
            pan_id: None,
            ipaddr: None,
            dse: default_dse(),
            verbosity: default_verbosity(),
            response_timeout_secs: default_response_timeout(),
            retry_interval_secs: default_retry_interval(),
        }
    }
}

impl DeviceConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Check credentials and ranges.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() || self.password.is_empty() {
            return Err(DeviceError::config(
                "B-route ID and password are required",
            ));
        }

        if self.password.len() > 0xFF {
            return Err(DeviceError::config("B-route password is too long"));
        }

        if let Some(channel) = self.channel {
            if !(33..=60).contains(&channel) {
                return Err(DeviceError::config(format!(
                    "channel {} out of range 33..=60",
                    channel
                )));
            }
        }

        if self.verbosity > 3 {
            return Err(DeviceError::config("verbosity must be between 0 and 3"));
        }

        if self.response_timeout_secs == 0 {
            return Err(DeviceError::config("response_timeout_secs must be > 0"));
        }

        Ok(())
    }
}
