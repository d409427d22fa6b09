//! Command-line arguments and environment overrides.

use std::net::{Ipv6Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use clap::builder::BoolishValueParser;
use smartmeter_common::LogFormat;

use crate::config::ExporterConfig;

/// Prometheus exporter for ECHONET Lite smart meters over the Wi-SUN B-route.
#[derive(Parser, Debug, Default)]
#[command(name = "smartmeter-exporter")]
#[command(about = "Export smart meter power and current as Prometheus metrics")]
#[command(version)]
pub struct ExporterArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, env = "SMARTMETER_CONFIG")]
    pub config: Option<PathBuf>,

    /// B-route authentication ID.
    #[arg(long, env = "SMARTMETER_ID", hide_env_values = true)]
    pub id: Option<String>,

    /// B-route password.
    #[arg(long, env = "SMARTMETER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Serial device of the Wi-SUN modem.
    #[arg(short, long, env = "SMARTMETER_DEVICE")]
    pub device: Option<String>,

    /// Seconds between scrapes (values below 10 fall back to 60).
    #[arg(short, long, env = "SMARTMETER_INTERVAL")]
    pub interval: Option<u64>,

    /// HTTP listen port (overrides config).
    #[arg(short, long, env = "SMARTMETER_PORT")]
    pub port: Option<u16>,

    /// HTTP listen address (overrides config and --port).
    #[arg(long, env = "SMARTMETER_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Fixed Wi-SUN channel (33-60), skips scanning with --pan-id and --ipaddr.
    #[arg(long, env = "SMARTMETER_CHANNEL")]
    pub channel: Option<u8>,

    /// Fixed PAN ID in hex.
    #[arg(long, env = "SMARTMETER_PAN_ID", value_parser = parse_hex_u16)]
    pub pan_id: Option<u16>,

    /// Fixed smart meter IPv6 address.
    #[arg(long, env = "SMARTMETER_IPADDR")]
    pub ipaddr: Option<Ipv6Addr>,

    /// Dual Stack Edition modem firmware.
    #[arg(
        long,
        env = "SMARTMETER_DSE",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub dse: Option<bool>,

    /// Serial traffic verbosity (0-3).
    #[arg(short, long, env = "SMARTMETER_VERBOSITY")]
    pub verbosity: Option<u8>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (text, json).
    #[arg(long)]
    pub log_format: Option<LogFormat>,
}

/// Parse a PAN ID given as `8888` or `0x8888`.
fn parse_hex_u16(value: &str) -> Result<u16, String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex PAN ID '{}': {}", value, e))
}

impl ExporterConfig {
    /// Overlay command-line and environment values onto the file configuration.
    pub fn apply_args(&mut self, args: &ExporterArgs) {
        if let Some(id) = &args.id {
            self.device.id = id.clone();
        }
        if let Some(password) = &args.password {
            self.device.password = password.clone();
        }
        if let Some(device) = &args.device {
            self.device.port = device.clone();
        }
        if let Some(channel) = args.channel {
            self.device.channel = Some(channel);
        }
        if let Some(pan_id) = args.pan_id {
            self.device.pan_id = Some(pan_id);
        }
        if let Some(ipaddr) = args.ipaddr {
            self.device.ipaddr = Some(ipaddr);
        }
        if let Some(dse) = args.dse {
            self.device.dse = dse;
        }
        if let Some(verbosity) = args.verbosity {
            self.device.verbosity = verbosity;
        }
        if let Some(interval) = args.interval {
            self.scrape.interval_secs = interval;
        }

        if let Some(listen) = args.listen {
            self.http.listen = listen.to_string();
        } else if let Some(port) = args.port {
            let host = self
                .http
                .listen
                .rsplit_once(':')
                .map(|(host, _)| host)
                .unwrap_or("0.0.0.0");
            self.http.listen = format!("{}:{}", host, port);
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if let Some(format) = args.log_format {
            self.logging.format = format;
        }
    }
}
