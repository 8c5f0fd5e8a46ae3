use crate::{
    error::{KspadError, Result},
    types::BeltMode,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// First byte of every command frame
pub const FRAME_HEADER: u8 = 0xF7;

/// Device address byte, second byte of every command frame
pub const DEVICE_ADDRESS: u8 = 0xA2;

/// Last byte of every command frame
pub const FRAME_TRAILER: u8 = 0xFD;

/// Command frame size in bytes
pub const COMMAND_FRAME_SIZE: usize = 6;

/// Minimum telemetry frame size in bytes
pub const TELEMETRY_FRAME_MIN_SIZE: usize = 14;

/// Command opcodes understood by the treadmill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    /// Ask the device to push a telemetry frame
    RequestStats = 0x00,
    /// Set the belt speed in raw device units, 0 stops the belt
    SetSpeed = 0x01,
    /// Switch belt mode (1 = Manual, 2 = Standby)
    SetMode = 0x02,
    /// Start the belt
    StartBelt = 0x04,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestStats => write!(f, "request-stats"),
            Self::SetSpeed => write!(f, "set-speed"),
            Self::SetMode => write!(f, "set-mode"),
            Self::StartBelt => write!(f, "start-belt"),
        }
    }
}

/// Checksummed 6-byte command frame
///
/// Layout: `[0xF7, 0xA2, opcode, argument, checksum, 0xFD]`. The checksum is
/// the sum of bytes 1 through `len - 3` modulo 256 and is always computed,
/// never supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandFrame {
    bytes: Bytes,
}

impl CommandFrame {
    fn build(opcode: Opcode, argument: u8) -> Self {
        let mut buf = BytesMut::with_capacity(COMMAND_FRAME_SIZE);
        buf.put_u8(FRAME_HEADER);
        buf.put_u8(DEVICE_ADDRESS);
        buf.put_u8(opcode as u8);
        buf.put_u8(argument);
        buf.put_u8(0x00);
        buf.put_u8(FRAME_TRAILER);

        let sum = checksum(&buf);
        buf[COMMAND_FRAME_SIZE - 2] = sum;

        Self {
            bytes: buf.freeze(),
        }
    }

    /// Request a telemetry frame
    #[must_use]
    pub fn request_stats() -> Self {
        Self::build(Opcode::RequestStats, 0)
    }

    /// Set the belt speed in raw device units
    #[must_use]
    pub fn set_speed(raw: u8) -> Self {
        Self::build(Opcode::SetSpeed, raw)
    }

    /// Stop the belt, which is a set-speed to zero
    #[must_use]
    pub fn stop_belt() -> Self {
        Self::build(Opcode::SetSpeed, 0)
    }

    /// Start the belt
    #[must_use]
    pub fn start_belt() -> Self {
        Self::build(Opcode::StartBelt, 1)
    }

    /// Switch the belt mode
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::InvalidArgument`] for [`BeltMode::Auto`], which is
    /// reported by the device but cannot be selected by command.
    pub fn set_mode(mode: BeltMode) -> Result<Self> {
        match mode {
            BeltMode::Manual | BeltMode::Standby => Ok(Self::build(Opcode::SetMode, mode as u8)),
            BeltMode::Auto => Err(KspadError::InvalidArgument(
                "Auto mode cannot be selected by command".to_string(),
            )),
        }
    }

    /// Opcode byte
    #[must_use]
    pub fn opcode(&self) -> u8 {
        self.bytes[2]
    }

    /// Argument byte
    #[must_use]
    pub fn argument(&self) -> u8 {
        self.bytes[3]
    }

    /// Checksum byte
    #[must_use]
    pub fn checksum(&self) -> u8 {
        self.bytes[COMMAND_FRAME_SIZE - 2]
    }

    /// Raw frame bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Sum of bytes `1..=len-3` modulo 256
///
/// Frames shorter than 3 bytes have an empty checksum range and yield 0.
#[must_use]
pub fn checksum(frame: &[u8]) -> u8 {
    if frame.len() < 3 {
        return 0;
    }

    frame[1..frame.len() - 2]
        .iter()
        .fold(0u8, |acc, byte| acc.wrapping_add(*byte))
}

/// Build a command frame for an arbitrary opcode/argument pair
///
/// # Errors
///
/// Returns [`KspadError::InvalidArgument`] if `argument` does not fit in one byte.
pub fn encode_command(opcode: Opcode, argument: u32) -> Result<CommandFrame> {
    let argument = u8::try_from(argument).map_err(|_| {
        KspadError::InvalidArgument(format!(
            "{opcode} argument {argument} does not fit in one byte"
        ))
    })?;

    Ok(CommandFrame::build(opcode, argument))
}

/// Fields of a telemetry frame before speed translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryFields {
    /// Raw belt status code (offset 2)
    pub belt_state: u8,
    /// Speed in device units (offset 3)
    pub raw_speed: u8,
    /// Belt mode (offset 4)
    pub belt_mode: BeltMode,
    /// Running time in seconds (offsets 5-7)
    pub running_time_secs: u32,
    /// Distance, device-defined unit (offsets 8-10)
    pub distance: u32,
    /// Step count (offsets 11-13)
    pub steps: u32,
}

/// Decode an unsigned 3-byte big-endian integer
#[must_use]
pub fn be24(bytes: [u8; 3]) -> u32 {
    (u32::from(bytes[0]) << 16) | (u32::from(bytes[1]) << 8) | u32::from(bytes[2])
}

fn get_be24(buf: &mut &[u8]) -> u32 {
    let mut field = [0u8; 3];
    buf.copy_to_slice(&mut field);
    be24(field)
}

/// Parse a raw telemetry notification
///
/// Telemetry layout as pushed on the stats characteristic:
/// - Bytes 0-1: frame header, ignored
/// - Byte 2: belt state
/// - Byte 3: speed in device units
/// - Byte 4: belt mode (0=Auto, 1=Manual, 2=Standby)
/// - Bytes 5-7: running time in seconds (big-endian)
/// - Bytes 8-10: distance (big-endian)
/// - Bytes 11-13: steps (big-endian)
///
/// Anything after byte 13 is ignored.
///
/// # Errors
///
/// Returns [`KspadError::MalformedFrame`] if the frame is shorter than
/// [`TELEMETRY_FRAME_MIN_SIZE`] or the mode byte is not a known mode.
pub fn decode_telemetry(raw: &[u8]) -> Result<TelemetryFields> {
    if raw.len() < TELEMETRY_FRAME_MIN_SIZE {
        return Err(KspadError::MalformedFrame(format!(
            "Telemetry too short: {} bytes, expected at least {}",
            raw.len(),
            TELEMETRY_FRAME_MIN_SIZE
        )));
    }

    let mut buf = &raw[2..];

    let belt_state = buf.get_u8();
    let raw_speed = buf.get_u8();
    let mode_byte = buf.get_u8();
    let belt_mode = BeltMode::from_u8(mode_byte)
        .ok_or_else(|| KspadError::MalformedFrame(format!("Unknown belt mode: {mode_byte:02X}")))?;

    let running_time_secs = get_be24(&mut buf);
    let distance = get_be24(&mut buf);
    let steps = get_be24(&mut buf);

    Ok(TelemetryFields {
        belt_state,
        raw_speed,
        belt_mode,
        running_time_secs,
        distance,
        steps,
    })
}
