//! ECHONET Lite frame model and codec.
//!
//! Only the "format 1" specified-message layout is supported:
//!
//! ```text
//! EHD1 EHD2 TID(2) SEOJ(3) DEOJ(3) ESV OPC [EPC PDC EDT...]*
//! 0x10 0x81
//! ```

use crate::error::{DeviceError, Result};

const EHD1: u8 = 0x10;
const EHD2: u8 = 0x81;
const HEADER_LEN: usize = 12;

/// An ECHONET Lite object identifier (class group, class, instance).
pub type Eoj = [u8; 3];

/// Controller object, used as the source of our requests.
pub const CONTROLLER_EOJ: Eoj = [0x05, 0xFF, 0x01];

/// Low-voltage smart electric energy meter object.
pub const SMART_METER_EOJ: Eoj = [0x02, 0x88, 0x01];

/// Instantaneous electric power (W, 4-byte unsigned).
pub const EPC_INSTANTANEOUS_POWER: u8 = 0xE7;

/// Instantaneous current (0.1 A, R phase then T phase, 2 bytes each).
pub const EPC_INSTANTANEOUS_CURRENT: u8 = 0xE8;

/// ECHONET Lite service codes used by the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Esv {
    Get,
    GetRes,
    GetSna,
    Other(u8),
}

impl Esv {
    pub fn as_u8(&self) -> u8 {
        match self {
            Esv::Get => 0x62,
            Esv::GetRes => 0x72,
            Esv::GetSna => 0x52,
            Esv::Other(code) => *code,
        }
    }
}

impl From<u8> for Esv {
    fn from(code: u8) -> Self {
        match code {
            0x62 => Esv::Get,
            0x72 => Esv::GetRes,
            0x52 => Esv::GetSna,
            other => Esv::Other(other),
        }
    }
}

/// A single property: code (EPC) and raw data (EDT).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub epc: u8,
    pub edt: Vec<u8>,
}

impl Property {
    pub fn new(epc: u8, edt: Vec<u8>) -> Self {
        Self { epc, edt }
    }

    /// A property with empty data, as used in Get requests.
    pub fn request(epc: u8) -> Self {
        Self::new(epc, Vec::new())
    }
}

/// An ECHONET Lite frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tid: u16,
    pub seoj: Eoj,
    pub deoj: Eoj,
    pub esv: Esv,
    pub properties: Vec<Property>,
}

impl Frame {
    /// Build a Get request from the controller to `deoj` for the given EPCs.
    ///
    /// The transaction id is left at zero; the client assigns one on send.
    pub fn get(deoj: Eoj, epcs: &[u8]) -> Self {
        Self {
            tid: 0,
            seoj: CONTROLLER_EOJ,
            deoj,
            esv: Esv::Get,
            properties: epcs.iter().map(|&epc| Property::request(epc)).collect(),
        }
    }

    /// Same frame with another transaction id.
    pub fn with_tid(mut self, tid: u16) -> Self {
        self.tid = tid;
        self
    }

    /// Find a property by EPC.
    pub fn property(&self, epc: u8) -> Option<&Property> {
        self.properties.iter().find(|p| p.epc == epc)
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.properties.len() > u8::MAX as usize {
            return Err(DeviceError::frame("too many properties"));
        }

        let body_len: usize = self.properties.iter().map(|p| 2 + p.edt.len()).sum();
        let mut buf = Vec::with_capacity(HEADER_LEN + body_len);

        buf.push(EHD1);
        buf.push(EHD2);
        buf.extend_from_slice(&self.tid.to_be_bytes());
        buf.extend_from_slice(&self.seoj);
        buf.extend_from_slice(&self.deoj);
        buf.push(self.esv.as_u8());
        buf.push(self.properties.len() as u8);

        for property in &self.properties {
            if property.edt.len() > u8::MAX as usize {
                return Err(DeviceError::frame(format!(
                    "EDT too long for EPC 0x{:02X}",
                    property.epc
                )));
            }
            buf.push(property.epc);
            buf.push(property.edt.len() as u8);
            buf.extend_from_slice(&property.edt);
        }

        Ok(buf)
    }

    /// Parse wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(DeviceError::frame(format!(
                "frame too short: {} bytes",
                data.len()
            )));
        }
        if data[0] != EHD1 || data[1] != EHD2 {
            return Err(DeviceError::frame(format!(
                "unexpected header {:02X}{:02X}",
                data[0], data[1]
            )));
        }

        let tid = u16::from_be_bytes([data[2], data[3]]);
        let seoj = [data[4], data[5], data[6]];
        let deoj = [data[7], data[8], data[9]];
        let esv = Esv::from(data[10]);
        let count = data[11] as usize;

        let mut properties = Vec::with_capacity(count);
        let mut pos = HEADER_LEN;
        for _ in 0..count {
            if pos + 2 > data.len() {
                return Err(DeviceError::frame("truncated property header"));
            }
            let epc = data[pos];
            let pdc = data[pos + 1] as usize;
            pos += 2;
            if pos + pdc > data.len() {
                return Err(DeviceError::frame(format!(
                    "truncated EDT for EPC 0x{:02X}",
                    epc
                )));
            }
            properties.push(Property::new(epc, data[pos..pos + pdc].to_vec()));
            pos += pdc;
        }

        Ok(Self {
            tid,
            seoj,
            deoj,
            esv,
            properties,
        })
    }
}

/// Encode bytes as uppercase hex, the way SKSTACK prints them.
pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Decode an ASCII hex string.
pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(DeviceError::frame("odd-length hex data"));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| DeviceError::frame(format!("invalid hex at offset {}", i)))
        })
        .collect()
}
