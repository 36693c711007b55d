//! SIS Telegram Protocol Communication
//!
//! Implements the SIS master protocol for IndraDrive communication: framed
//! binary telegrams with an additive checksum, exchanged one command/reaction
//! pair at a time over a half-duplex serial link.

pub mod command;
mod connection;
mod error;
pub mod fields;
mod params;
pub mod serial;
pub mod telegram;

#[cfg(test)]
pub(crate) mod mock;

pub use command::{CommandRequest, CommandStatus};
pub use connection::{Baudrate, Connection, ConnectionConfig, ConnectionState};
pub use error::{LineErrorKind, ProtocolError};
pub use fields::{
    Attribute, Datablock, HeaderControl, ParamControl, ParamIdent, ParamVariant, TelegramType,
};
pub use serial::{list_ports, PortInfo, SerialEvent, SerialTransport, Transport};
pub use telegram::{
    CommandPayload, Data, FrameAssembler, Header, ReactionKind, ReactionPayload, Service, Telegram,
};

/// Fixed size of the regular telegram header
pub const HEADER_SIZE: usize = 8;

/// Size of the extended header used for routing/sequential telegrams
pub const HEADER_SIZE_EXT: usize = 16;

/// Maximum number of payload bytes in one telegram
pub const MAX_PAYLOAD_SIZE: usize = 246;

/// Maximum size of one telegram on the wire (header + payload)
pub const MAX_FRAME_SIZE: usize = 254;

/// SIS station address of the master
pub const SIS_ADDR_MASTER: u8 = 0x00;

/// SIS station address of the drive
pub const SIS_ADDR_SLAVE: u8 = 0x01;

/// Unit address of the drive. For IndraDrive this value is held in P-0-4022.
pub const SIS_ADDR_UNIT: u8 = 0x01;

/// Default baud rate for drive communication
pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Default timeout for one receive wait cycle in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

/// Maximum wait/read cycles while assembling one reaction telegram
pub const MAX_READ_CYCLES: u32 = 100;

/// Maximum status polls while waiting for a drive command to leave `Busy`
pub const MAX_COMMAND_POLLS: u32 = 300;
