//! Protocol errors

use thiserror::Error;

/// Serial line error classes reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineErrorKind {
    /// Break condition detected on the line
    Break,
    /// Framing error (bad start/stop bit timing)
    Frame,
    /// I/O device error
    Io,
    /// Unsupported mode requested from the driver
    Mode,
    /// Character buffer overrun, the next byte was lost
    Overrun,
    /// Input buffer overflow, a byte was lost
    RxOverflow,
    /// Input parity error
    Parity,
    /// Output buffer full
    TxFull,
    /// Error code not known to the driver
    Unknown(i32),
}

impl std::fmt::Display for LineErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineErrorKind::Break => write!(f, "break condition occurred"),
            LineErrorKind::Frame => write!(f, "framing error occurred"),
            LineErrorKind::Io => write!(f, "I/O device error occurred"),
            LineErrorKind::Mode => write!(f, "unsupported mode detected"),
            LineErrorKind::Overrun => write!(f, "character buffer overrun detected"),
            LineErrorKind::RxOverflow => write!(f, "input buffer overflow detected"),
            LineErrorKind::Parity => write!(f, "input parity error occurred"),
            LineErrorKind::TxFull => write!(f, "output buffer full"),
            LineErrorKind::Unknown(code) => write!(f, "unknown line error (code {code})"),
        }
    }
}

/// Errors that can occur during drive communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Not connected to drive")]
    NotConnected,

    #[error("Line error: {0}. Transceive has been aborted")]
    Line(LineErrorKind),

    #[error(
        "Reaction telegram incomplete after {received} bytes.\nCommand telegram was: {command}\nPartial reply: {reply}"
    )]
    IncompleteFrame {
        /// Bytes accumulated before the exchange timed out
        received: usize,
        /// Hex dump of the outgoing command telegram
        command: String,
        /// Hex dump of the partial reply
        reply: String,
    },

    #[error(
        "Reaction telegram received without payload, but just the header.\nReaction header: {reply}\nCommand telegram was: {command}"
    )]
    EmptyPayload {
        /// Hex dump of the outgoing command telegram
        command: String,
        /// Hex dump of the reaction header
        reply: String,
    },

    #[error("Malformed reaction telegram: {0}")]
    MalformedFrame(String),

    #[error("Telegram of {size} bytes exceeds the maximum frame size")]
    FrameTooLarge {
        /// Total frame size that was attempted
        size: usize,
    },

    #[error(
        "Drive returned error code {code:#06x} (status {status:#04x}).\nCommand telegram was: {command}"
    )]
    Drive {
        /// Status byte from the reaction payload
        status: u8,
        /// Drive error code carried in the reaction data
        code: u16,
        /// Hex dump of the outgoing command telegram
        command: String,
    },

    #[error(
        "Command cannot be executed because it is write-protected. Release the drive torque (disable the drive) or restart it"
    )]
    WriteProtected,

    #[error("Command execution caused a continuous busy loop ({polls} status polls). Restart the drive")]
    BusyLoopExceeded {
        /// Number of status polls issued before giving up
        polls: u32,
    },

    #[error("Command execution failed with status code {status:#04x}; canceled or not possible in the drive's current operation state")]
    CommandFailed {
        /// Terminal command status reported by the drive
        status: u8,
    },

    #[error("Invalid parameter reference: {0}")]
    InvalidParamRef(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
