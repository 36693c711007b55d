//! # IndraLink Core Library
//!
//! Master-side driver for the SIS (SERCOS Interface Service) telegram
//! protocol spoken by IndraDrive servo drives over a serial link.

#![warn(missing_docs)]

//!
//! This library provides:
//! - SIS telegram construction, checksum handling and incremental decoding
//! - Serial transceive engine with line-error classification and retry
//! - SERCOS parameter and list-element access with attribute-driven scaling
//! - The two-phase drive command execution protocol
//!
//! ## Example
//!
//! ```rust,ignore
//! use indralink_core::protocol::{Connection, ConnectionConfig, ParamVariant};
//!
//! // Connect to the drive
//! let conn = Connection::open(ConnectionConfig::for_port("/dev/ttyUSB0"))?;
//!
//! // Read the velocity command value, S-0-0036
//! let speed = conn.read_parameter(ParamVariant::S, 36)?;
//! println!("S-0-0036 = {speed}");
//!
//! // Enter parameterization level via S-0-0420
//! conn.execute_command(ParamVariant::S, 420)?;
//! ```

pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::protocol::{
        Connection, ConnectionConfig, ConnectionState, Datablock, ParamVariant, ProtocolError,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
