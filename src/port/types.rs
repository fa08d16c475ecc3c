//! Line settings, event masks, and the other value types of the transport.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::SerialError;

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    pub fn bits(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = SerialError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            _ => Err(SerialError::InvalidArgument),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        bits.bits()
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

impl From<serialport::DataBits> for DataBits {
    fn from(bits: serialport::DataBits) -> Self {
        match bits {
            serialport::DataBits::Five => DataBits::Five,
            serialport::DataBits::Six => DataBits::Six,
            serialport::DataBits::Seven => DataBits::Seven,
            serialport::DataBits::Eight => DataBits::Eight,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = SerialError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            _ => Err(SerialError::InvalidArgument),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

impl From<serialport::StopBits> for StopBits {
    fn from(bits: serialport::StopBits) -> Self {
        match bits {
            serialport::StopBits::One => StopBits::One,
            serialport::StopBits::Two => StopBits::Two,
        }
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handshake {
    #[default]
    Off,
    /// RTS/CTS.
    Hardware,
    /// XON/XOFF.
    Software,
}

impl From<Handshake> for serialport::FlowControl {
    fn from(h: Handshake) -> Self {
        match h {
            Handshake::Off => serialport::FlowControl::None,
            Handshake::Hardware => serialport::FlowControl::Hardware,
            Handshake::Software => serialport::FlowControl::Software,
        }
    }
}

impl From<serialport::FlowControl> for Handshake {
    fn from(flow: serialport::FlowControl) -> Self {
        match flow {
            serialport::FlowControl::None => Handshake::Off,
            serialport::FlowControl::Hardware => Handshake::Hardware,
            serialport::FlowControl::Software => Handshake::Software,
        }
    }
}

/// Baud rate and character framing of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl LineSettings {
    pub fn new(baud_rate: u32, data_bits: DataBits, parity: Parity, stop_bits: StopBits) -> Self {
        Self {
            baud_rate,
            data_bits,
            parity,
            stop_bits,
        }
    }

    pub fn validate(&self) -> Result<(), SerialError> {
        if self.baud_rate == 0 {
            return Err(SerialError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for LineSettings {
    fn default() -> Self {
        Self::new(9600, DataBits::Eight, Parity::None, StopBits::One)
    }
}

impl fmt::Display for LineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        };
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            self.data_bits.bits(),
            parity,
            u8::from(self.stop_bits)
        )
    }
}

/// Read timeout policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Return immediately with whatever is queued.
    #[default]
    Nonblocking,
    /// Wait until the buffer is full or the call's timeout elapses.
    Blocking,
}

/// Completion engine used by an open port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoMode {
    /// A background engine thread completes reads, writes and comm-event waits.
    #[default]
    Overlapped,
    /// Reads and writes run on the calling thread; comm-event waits are unavailable.
    Synchronous,
}

/// Device identity passed to `open`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PortId {
    Name(String),
    /// Platform port number (`COM<n>` on Windows).
    Index(u32),
}

impl From<&str> for PortId {
    fn from(name: &str) -> Self {
        PortId::Name(name.to_string())
    }
}

impl From<String> for PortId {
    fn from(name: String) -> Self {
        PortId::Name(name)
    }
}

impl From<u32> for PortId {
    fn from(index: u32) -> Self {
        PortId::Index(index)
    }
}

/// Result of probing a device name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    NotPresent,
    InUse,
    UnknownError,
}

bitflags! {
    /// Line-status conditions a port can report through its comm event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u32 {
        const RX_CHAR = 0x0001;
        const RX_FLAG = 0x0002;
        const TX_EMPTY = 0x0004;
        const CTS = 0x0008;
        const DSR = 0x0010;
        const RLSD = 0x0020;
        const BREAK = 0x0040;
        const LINE_ERROR = 0x0080;
        const RING = 0x0100;
        const PRINTER_ERROR = 0x0200;
        const RX_80_FULL = 0x0400;
    }
}

impl EventMask {
    /// Mask installed by `open`.
    pub const DEFAULT: EventMask = EventMask::BREAK
        .union(EventMask::LINE_ERROR)
        .union(EventMask::RX_CHAR)
        .union(EventMask::CTS);
}

bitflags! {
    /// Latched line-status errors, cleared when read.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LineErrors: u32 {
        const RX_OVER = 0x0001;
        const OVERRUN = 0x0002;
        const RX_PARITY = 0x0004;
        const FRAME = 0x0008;
        const BREAK = 0x0010;
        const TX_FULL = 0x0100;
        const IO = 0x0400;
        const MODE = 0x8000;
    }
}

/// Input modem control lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ModemStatus {
    pub cts: bool,
    pub dsr: bool,
    pub ring: bool,
    pub rlsd: bool,
}

impl ModemStatus {
    /// Events implied by the transition from `previous` to `self`.
    pub fn changes_since(&self, previous: &ModemStatus) -> EventMask {
        let mut events = EventMask::empty();
        events.set(EventMask::CTS, self.cts != previous.cts);
        events.set(EventMask::DSR, self.dsr != previous.dsr);
        events.set(EventMask::RLSD, self.rlsd != previous.rlsd);
        // Ring reports the trailing edge only.
        events.set(EventMask::RING, previous.ring && !self.ring);
        events
    }
}
