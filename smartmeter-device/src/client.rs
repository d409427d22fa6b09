//! Device client for smart meters reachable over the Wi-SUN B-route.

use std::net::Ipv6Addr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::echonet::{Esv, Frame};
use crate::error::{DeviceError, Result};
use crate::skstack::{ECHONET_PORT, Line, SkStack, event, format_addr};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const SCAN_TIMEOUT: Duration = Duration::from_secs(180);
const JOIN_TIMEOUT: Duration = Duration::from_secs(60);

/// First active-scan duration exponent; each retry scans one step longer.
const SCAN_DURATION: u8 = 6;
const MAX_SCANS: u32 = 3;

/// Operations the scrape cycle needs from a meter connection.
#[async_trait]
pub trait DeviceClient: Send {
    /// Discover the meter's network address.
    async fn resolve_address(&mut self) -> Result<Ipv6Addr>;

    /// (Re-)establish the authenticated session with the meter.
    async fn authenticate(&mut self, address: Ipv6Addr) -> Result<()>;

    /// Send `request` and wait for its response, making up to `retries` attempts.
    async fn query(&mut self, address: Ipv6Addr, request: &Frame, retries: u32) -> Result<Frame>;
}

/// A PAN coordinator found during an active scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanDescriptor {
    pub channel: u8,
    pub pan_id: u16,
    pub mac: String,
}

#[derive(Default)]
struct PartialPan {
    channel: Option<u8>,
    pan_id: Option<u16>,
    mac: Option<String>,
}

impl PartialPan {
    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "Channel" => self.channel = u8::from_str_radix(value, 16).ok(),
            "Pan ID" => self.pan_id = u16::from_str_radix(value, 16).ok(),
            "Addr" => self.mac = Some(value.to_string()),
            _ => {}
        }
    }

    fn complete(&self) -> Option<PanDescriptor> {
        Some(PanDescriptor {
            channel: self.channel?,
            pan_id: self.pan_id?,
            mac: self.mac.clone()?,
        })
    }
}

/// SKSTACK-IP backed [`DeviceClient`].
pub struct SmartMeterClient<T> {
    stack: SkStack<T>,
    config: DeviceConfig,
    next_tid: u16,
}

impl SmartMeterClient<SerialStream> {
    /// Open the serial port named in `config` and initialize the modem.
    pub async fn open(config: DeviceConfig) -> Result<Self> {
        info!(port = %config.port, baud_rate = config.baud_rate, "Opening serial port");
        let stream = tokio_serial::new(&config.port, config.baud_rate).open_native_async()?;

        Self::initialize(stream, config).await
    }
}

impl<T> SmartMeterClient<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// Reset the modem, disable echo and load the B-route credentials.
    pub async fn initialize(stream: T, config: DeviceConfig) -> Result<Self> {
        config.validate()?;

        let mut client = Self {
            stack: SkStack::new(stream, config.verbosity),
            config,
            next_tid: 1,
        };

        client.stack.command("SKRESET", COMMAND_TIMEOUT).await?;
        client.stack.command("SKSREG SFE 0", COMMAND_TIMEOUT).await?;

        let password = format!(
            "SKSETPWD {:X} {}",
            client.config.password.len(),
            client.config.password
        );
        client.stack.command(&password, COMMAND_TIMEOUT).await?;

        let id = format!("SKSETRBID {}", client.config.id);
        client.stack.command(&id, COMMAND_TIMEOUT).await?;

        info!(dse = client.config.dse, "Wi-SUN modem initialized");
        Ok(client)
    }

    fn next_tid(&mut self) -> u16 {
        let tid = self.next_tid;
        self.next_tid = self.next_tid.wrapping_add(1);
        tid
    }

    /// Select channel and PAN for subsequent link operations.
    async fn set_link(&mut self, channel: u8, pan_id: u16) -> Result<()> {
        self.stack
            .command(&format!("SKSREG S2 {:02X}", channel), COMMAND_TIMEOUT)
            .await?;
        self.stack
            .command(&format!("SKSREG S3 {:04X}", pan_id), COMMAND_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Run one active scan and return the first PAN coordinator seen.
    pub async fn scan(&mut self, duration: u8) -> Result<Option<PanDescriptor>> {
        let mask: u32 = match self.config.channel {
            Some(channel) => channel
                .checked_sub(33)
                .filter(|bit| *bit < 32)
                .map(|bit| 1 << bit)
                .ok_or_else(|| DeviceError::config(format!("invalid channel {}", channel)))?,
            None => 0xFFFF_FFFF,
        };
        let mut command = format!("SKSCAN 2 {:08X} {}", mask, duration);
        if self.config.dse {
            command.push_str(" 0");
        }

        info!(duration, "Scanning for smart meter PAN");
        self.stack.command(&command, COMMAND_TIMEOUT).await?;

        let deadline = Instant::now() + SCAN_TIMEOUT;
        let mut current: Option<PartialPan> = None;
        let mut found: Option<PanDescriptor> = None;

        loop {
            match self.stack.next_line(deadline, "scan completion").await? {
                Line::PanDescStart => current = Some(PartialPan::default()),
                Line::Field(key, value) => {
                    if let Some(pan) = current.as_mut() {
                        pan.apply(&key, &value);
                    }
                }
                Line::Event { code, .. } if code == event::SCAN_COMPLETE => break,
                other => debug!(line = ?other, "Scan output"),
            }

            if found.is_none() {
                found = current.as_ref().and_then(PartialPan::complete);
            }
        }

        Ok(found)
    }

    /// Translate a MAC address into the link-local IPv6 address.
    async fn link_local_address(&mut self, mac: &str) -> Result<Ipv6Addr> {
        self.stack.send(&format!("SKLL64 {}", mac)).await?;
        let deadline = Instant::now() + COMMAND_TIMEOUT;

        loop {
            match self.stack.next_line(deadline, "SKLL64 address").await? {
                Line::Other(line) => {
                    if let Ok(addr) = line.trim().parse::<Ipv6Addr>() {
                        return Ok(addr);
                    }
                }
                Line::Fail(code) => {
                    return Err(DeviceError::CommandFailed {
                        command: "SKLL64".to_string(),
                        code,
                    });
                }
                _ => {}
            }
        }
    }

    /// One send/receive exchange.
    async fn exchange(&mut self, address: Ipv6Addr, request: &Frame) -> Result<Frame> {
        let tid = self.next_tid();
        let data = request.clone().with_tid(tid).encode()?;

        let side = if self.config.dse { "0 " } else { "" };
        let header = format!(
            "SKSENDTO 1 {} {:04X} 1 {}{:04X} ",
            format_addr(&address),
            ECHONET_PORT,
            side,
            data.len()
        );
        self.stack.send_with_data(&header, &data).await?;

        let deadline = Instant::now() + self.config.response_timeout();
        loop {
            match self.stack.next_line(deadline, "ECHONET Lite response").await? {
                Line::Fail(code) => {
                    return Err(DeviceError::CommandFailed {
                        command: "SKSENDTO".to_string(),
                        code,
                    });
                }
                Line::Event { code, .. } if code == event::SESSION_EXPIRED => {
                    return Err(DeviceError::SessionExpired);
                }
                Line::RxUdp(rx)
                    if rx.sender == address
                        && rx.remote_port == ECHONET_PORT
                        && rx.local_port == ECHONET_PORT =>
                {
                    let frame = match Frame::decode(&rx.data) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "Discarding malformed ECHONET Lite frame");
                            continue;
                        }
                    };
                    if frame.tid != tid {
                        debug!(expected = tid, got = frame.tid, "Ignoring unrelated frame");
                        continue;
                    }
                    return match frame.esv {
                        Esv::GetRes => Ok(frame),
                        other => Err(DeviceError::NotAvailable(other.as_u8())),
                    };
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl<T> DeviceClient for SmartMeterClient<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn resolve_address(&mut self) -> Result<Ipv6Addr> {
        if let (Some(addr), Some(channel), Some(pan_id)) =
            (self.config.ipaddr, self.config.channel, self.config.pan_id)
        {
            info!(addr = %addr, channel, pan_id, "Using fixed link parameters");
            self.set_link(channel, pan_id).await?;
            return Ok(addr);
        }

        for attempt in 0..MAX_SCANS {
            let duration = SCAN_DURATION + attempt as u8;
            if let Some(pan) = self.scan(duration).await? {
                info!(
                    channel = pan.channel,
                    pan_id = %format!("{:04X}", pan.pan_id),
                    mac = %pan.mac,
                    "Found smart meter PAN"
                );
                self.set_link(pan.channel, pan.pan_id).await?;

                let addr = match self.config.ipaddr {
                    Some(addr) => addr,
                    None => self.link_local_address(&pan.mac).await?,
                };
                return Ok(addr);
            }
            warn!(attempt = attempt + 1, "No PAN found, rescanning");
        }

        Err(DeviceError::NoPanFound(MAX_SCANS))
    }

    async fn authenticate(&mut self, address: Ipv6Addr) -> Result<()> {
        info!(addr = %address, "Starting PANA authentication");
        self.stack
            .command(&format!("SKJOIN {}", format_addr(&address)), COMMAND_TIMEOUT)
            .await?;

        let deadline = Instant::now() + JOIN_TIMEOUT;
        loop {
            if let Line::Event { code, .. } = self.stack.next_line(deadline, "PANA result").await? {
                match code {
                    event::PANA_SUCCEEDED => {
                        info!(addr = %address, "PANA authentication succeeded");
                        return Ok(());
                    }
                    event::PANA_FAILED => return Err(DeviceError::AuthenticationFailed),
                    _ => {}
                }
            }
        }
    }

    async fn query(&mut self, address: Ipv6Addr, request: &Frame, retries: u32) -> Result<Frame> {
        let attempts = retries.max(1);
        let mut last_error = DeviceError::protocol("no attempt made");

        for attempt in 1..=attempts {
            match self.exchange(address, request).await {
                Ok(frame) => return Ok(frame),
                Err(e @ (DeviceError::SessionExpired | DeviceError::NotAvailable(_))) => {
                    return Err(e);
                }
                Err(e @ (DeviceError::Io(_) | DeviceError::Closed)) => return Err(e),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Query attempt failed");
                    last_error = e;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_interval()).await;
            }
        }

        Err(last_error)
    }
}
