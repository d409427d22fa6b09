//! SKSTACK-IP line protocol spoken by Wi-SUN modules (BP35A1, BP35C0, RL7023...).
//!
//! Commands are ASCII lines terminated by CRLF. The modem answers with `OK`
//! or `FAIL ERxx`, and reports asynchronous activity through `EVENT`,
//! `EPANDESC` and `ERXUDP` lines.

use std::net::Ipv6Addr;
use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::echonet::from_hex;
use crate::error::{DeviceError, Result};

/// UDP port used by ECHONET Lite.
pub const ECHONET_PORT: u16 = 0x0E1A;

/// Event codes reported by `EVENT <code> ...` lines.
pub mod event {
    pub const SCAN_COMPLETE: u8 = 0x22;
    pub const PANA_FAILED: u8 = 0x24;
    pub const PANA_SUCCEEDED: u8 = 0x25;
    pub const SESSION_EXPIRED: u8 = 0x29;
}

/// A received UDP datagram (`ERXUDP`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxUdp {
    pub sender: Ipv6Addr,
    pub remote_port: u16,
    pub local_port: u16,
    pub data: Vec<u8>,
}

/// One parsed line of modem output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Ok,
    Fail(String),
    Event {
        code: u8,
        sender: Option<Ipv6Addr>,
        params: Vec<String>,
    },
    PanDescStart,
    /// Indented `key:value` field of an `EPANDESC` block.
    Field(String, String),
    RxUdp(RxUdp),
    Other(String),
}

/// Parse one line of modem output.
pub fn parse_line(line: &str) -> Line {
    if line == "OK" || line.starts_with("OK ") {
        return Line::Ok;
    }
    if let Some(code) = line.strip_prefix("FAIL ") {
        return Line::Fail(code.trim().to_string());
    }
    if line == "EPANDESC" {
        return Line::PanDescStart;
    }
    if line.starts_with(char::is_whitespace) {
        if let Some((key, value)) = line.trim().split_once(':') {
            return Line::Field(key.trim().to_string(), value.trim().to_string());
        }
    }
    if let Some(rest) = line.strip_prefix("EVENT ") {
        let mut tokens = rest.split_whitespace();
        if let Some(code) = tokens.next().and_then(|c| u8::from_str_radix(c, 16).ok()) {
            let sender = tokens.next().and_then(|s| s.parse().ok());
            return Line::Event {
                code,
                sender,
                params: tokens.map(str::to_string).collect(),
            };
        }
    }
    if line.starts_with("ERXUDP ") {
        if let Some(rx) = parse_erxudp(line) {
            return Line::RxUdp(rx);
        }
    }
    Line::Other(line.to_string())
}

/// Parse an `ERXUDP` line in ASCII data mode.
///
/// Standard firmware:
/// `ERXUDP <SENDER> <DEST> <RPORT> <LPORT> <SENDERLLA> <SECURED> <DATALEN> <DATA>`
///
/// Dual Stack Edition adds `<RSSI>` after the link-layer address and `<SIDE>`
/// after the secured flag.
fn parse_erxudp(line: &str) -> Option<RxUdp> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (len_idx, data_idx) = match tokens.len() {
        9 => (7, 8),
        11 => (9, 10),
        _ => return None,
    };

    let sender = tokens[1].parse().ok()?;
    let remote_port = u16::from_str_radix(tokens[3], 16).ok()?;
    let local_port = u16::from_str_radix(tokens[4], 16).ok()?;
    let data_len = usize::from_str_radix(tokens[len_idx], 16).ok()?;
    let data = from_hex(tokens[data_idx]).ok()?;
    if data.len() != data_len {
        return None;
    }

    Some(RxUdp {
        sender,
        remote_port,
        local_port,
        data,
    })
}

/// Format an address the way SKSTACK expects it: eight uppercase,
/// zero-padded groups.
pub fn format_addr(addr: &Ipv6Addr) -> String {
    addr.segments()
        .iter()
        .map(|s| format!("{:04X}", s))
        .collect::<Vec<_>>()
        .join(":")
}

/// Line-oriented connection to an SKSTACK-IP modem.
pub struct SkStack<T> {
    reader: BufReader<ReadHalf<T>>,
    writer: WriteHalf<T>,
    buf: Vec<u8>,
    verbosity: u8,
}

impl<T> SkStack<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// Wrap a stream connected to the modem.
    pub fn new(stream: T, verbosity: u8) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
            buf: Vec::with_capacity(256),
            verbosity,
        }
    }

    /// Send a command line.
    pub async fn send(&mut self, command: &str) -> Result<()> {
        if self.verbosity >= 2 {
            debug!(command = %redact(command), "SKSTACK >>");
        }
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send a command header followed by raw binary payload (no terminator).
    pub async fn send_with_data(&mut self, header: &str, data: &[u8]) -> Result<()> {
        if self.verbosity >= 2 {
            debug!(command = %header.trim_end(), bytes = data.len(), "SKSTACK >>");
        }
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send a command and wait for `OK`.
    pub async fn command(&mut self, command: &str, timeout: Duration) -> Result<()> {
        self.send(command).await?;
        let deadline = Instant::now() + timeout;

        loop {
            match self.next_line(deadline, "OK").await? {
                Line::Ok => return Ok(()),
                Line::Fail(code) => {
                    return Err(DeviceError::CommandFailed {
                        command: command_name(command).to_string(),
                        code,
                    });
                }
                other => trace!(line = ?other, "Ignoring line while waiting for OK"),
            }
        }
    }

    /// Read the next non-empty line that is not a command echo.
    pub async fn read_line(&mut self) -> Result<String> {
        loop {
            let n = self.reader.read_until(b'\n', &mut self.buf).await?;
            if n == 0 {
                return Err(DeviceError::Closed);
            }
            if !self.buf.ends_with(b"\n") {
                continue;
            }

            let line = String::from_utf8_lossy(&self.buf)
                .trim_end_matches(['\r', '\n'])
                .to_string();
            self.buf.clear();

            if line.trim().is_empty() || line.starts_with("SK") {
                continue;
            }
            if self.verbosity >= 3 {
                trace!(line = %line, "SKSTACK <<");
            }
            return Ok(line);
        }
    }

    /// Read and parse the next line, failing once `deadline` passes.
    pub async fn next_line(&mut self, deadline: Instant, waiting_for: &'static str) -> Result<Line> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout_at(deadline, self.read_line()).await {
            Ok(line) => Ok(parse_line(&line?)),
            Err(_) => Err(DeviceError::Timeout(remaining, waiting_for)),
        }
    }
}

fn command_name(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or(command)
}

/// Hide credentials in logged commands.
fn redact(command: &str) -> String {
    match command_name(command) {
        "SKSETPWD" | "SKSETRBID" => format!("{} ****", command_name(command)),
        _ => command.to_string(),
    }
}
