//! Connection management
//!
//! Owns the serial transport and drives one command/reaction exchange at a
//! time: purge, send, then reassemble the reply across partial reads until
//! the declared frame length is satisfied.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

use super::serial::{SerialEvent, SerialTransport, Transport};
use super::telegram::{
    checksum_valid, hex_dump, CommandPayload, Data, FrameAssembler, ReactionKind, ReactionPayload,
    Service, Telegram,
};
use super::{
    ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS, MAX_FRAME_SIZE, MAX_READ_CYCLES,
    SIS_ADDR_MASTER, SIS_ADDR_SLAVE, SIS_ADDR_UNIT,
};

/// Cap on silent repetitions of an exchange that failed with a transient
/// drive code; past this the drive error surfaces to the caller
const TRANSIENT_RETRY_MAX: u32 = 10;

/// Subservice number for setting the drive baud rate
const SUBSERVICE_BAUDRATE: u8 = 0x07;

/// Baud rate masks accepted by the baud rate subservice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Baudrate {
    /// 9600 baud
    Baud9600 = 0b0000_0000,
    /// 19200 baud
    Baud19200 = 0b0000_0001,
    /// 38400 baud
    Baud38400 = 0b0000_0010,
    /// 57600 baud
    Baud57600 = 0b0000_0100,
    /// 115200 baud
    Baud115200 = 0b0000_1000,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connected and ready
    Connected,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Timeout per receive wait cycle in milliseconds
    pub read_timeout_ms: u64,
    /// Drive error codes the engine retries silently instead of surfacing.
    /// The default pair covers the drive's busy/retry class; confirm against
    /// the firmware documentation of the connected drive generation.
    pub transient_codes: Vec<u16>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            transient_codes: vec![0x0001, 0x0002],
        }
    }
}

impl ConnectionConfig {
    /// Default configuration for the given port
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }
}

/// Exclusive owner of the transport for the duration of one exchange
struct Engine {
    transport: Option<Box<dyn Transport>>,
}

/// Drive connection
///
/// The transport is a single shared, stateful resource: every exchange takes
/// the internal lock for its full send-receive cycle so that concurrent
/// callers never interleave partial frames. The lock is dropped between
/// transient-retry attempts rather than held across them.
pub struct Connection {
    config: ConnectionConfig,
    engine: Mutex<Engine>,
}

impl Connection {
    /// Open the configured serial port and take exclusive ownership of it
    pub fn open(config: ConnectionConfig) -> Result<Self, ProtocolError> {
        let transport = SerialTransport::open(&config.port_name, config.baud_rate)?;
        Ok(Self::with_transport(Box::new(transport), config))
    }

    /// Build a connection over an already-open transport (e.g. a TCP-serial
    /// bridge or a test double)
    pub fn with_transport(transport: Box<dyn Transport>, config: ConnectionConfig) -> Self {
        Self {
            config,
            engine: Mutex::new(Engine {
                transport: Some(transport),
            }),
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        if self.lock_engine().transport.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Active configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Release the transport; safe to call on any path, including after a
    /// failed operation
    pub fn close(&self) {
        let mut engine = self.lock_engine();
        if engine.transport.take().is_some() {
            tracing::debug!(port = %self.config.port_name, "connection closed");
        }
    }

    /// Request a new drive baud rate via the init-communication subservice
    pub fn set_baudrate(&self, baudrate: Baudrate) -> Result<(), ProtocolError> {
        let telegram = Telegram::command(
            SIS_ADDR_MASTER,
            SIS_ADDR_SLAVE,
            Service::InitComm,
            CommandPayload::Subservice {
                recipient: SIS_ADDR_UNIT,
                subservice: SUBSERVICE_BAUDRATE,
                data: Data::from_uint(baudrate as u8 as u64, 1),
            },
        );
        self.transceive(&telegram)?;
        Ok(())
    }

    fn lock_engine(&self) -> std::sync::MutexGuard<'_, Engine> {
        // A poisoned lock only means another thread panicked mid-exchange;
        // the next exchange starts with a purge either way.
        self.engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run one full exchange, transparently repeating it while the drive
    /// answers with a transient (busy/retry class) error code
    pub(crate) fn transceive(
        &self,
        telegram: &Telegram,
    ) -> Result<ReactionPayload, ProtocolError> {
        let frame = telegram.to_bytes()?;
        let kind = telegram.header.service.reaction_kind();
        let tx_dump = hex_dump(&frame);

        let mut attempts = 0u32;
        loop {
            let result = {
                let mut engine = self.lock_engine();
                engine.exchange_once(&frame, kind, &tx_dump, &self.config)
            };

            match result {
                Err(ProtocolError::Drive { code, status, .. })
                    if self.config.transient_codes.contains(&code)
                        && attempts < TRANSIENT_RETRY_MAX =>
                {
                    attempts += 1;
                    tracing::warn!(
                        code,
                        status,
                        attempts,
                        "transient drive status, repeating exchange"
                    );
                }
                other => return other,
            }
        }
    }
}

impl Engine {
    /// One send-then-receive-until-complete cycle
    fn exchange_once(
        &mut self,
        frame: &[u8],
        kind: ReactionKind,
        tx_dump: &str,
        config: &ConnectionConfig,
    ) -> Result<ReactionPayload, ProtocolError> {
        let transport = self.transport.as_mut().ok_or(ProtocolError::NotConnected)?;
        let timeout = Duration::from_millis(config.read_timeout_ms);

        // Discard whatever a previous, possibly failed, exchange left behind
        transport.purge()?;
        transport.write(frame)?;
        tracing::trace!(tx = tx_dump, "command telegram sent");

        let mut assembler = FrameAssembler::new(kind);
        let mut scratch = [0u8; MAX_FRAME_SIZE];

        for _ in 0..MAX_READ_CYCLES {
            match transport.wait_event(timeout)? {
                SerialEvent::Break => {
                    return Err(ProtocolError::Line(super::LineErrorKind::Break));
                }
                SerialEvent::LineError => {
                    return Err(ProtocolError::Line(transport.last_line_error()));
                }
                SerialEvent::None => {
                    return Err(ProtocolError::IncompleteFrame {
                        received: assembler.received(),
                        command: tx_dump.to_string(),
                        reply: hex_dump(assembler.bytes()),
                    });
                }
                SerialEvent::DataAvailable => {
                    let room = MAX_FRAME_SIZE - assembler.received();
                    let n = transport.read(&mut scratch[..room], timeout)?;
                    if n == 0 {
                        continue;
                    }
                    assembler.extend(&scratch[..n])?;

                    // A reaction that declares no payload at all is malformed:
                    // every reaction carries at least its status head.
                    if assembler.payload_len() == Some(0) {
                        return Err(ProtocolError::EmptyPayload {
                            command: tx_dump.to_string(),
                            reply: hex_dump(assembler.bytes()),
                        });
                    }

                    if assembler.is_complete() {
                        return finish_exchange(&assembler, tx_dump);
                    }
                }
            }
        }

        Err(ProtocolError::IncompleteFrame {
            received: assembler.received(),
            command: tx_dump.to_string(),
            reply: hex_dump(assembler.bytes()),
        })
    }
}

fn finish_exchange(
    assembler: &FrameAssembler,
    tx_dump: &str,
) -> Result<ReactionPayload, ProtocolError> {
    tracing::trace!(rx = %hex_dump(assembler.bytes()), "reaction telegram complete");
    if !checksum_valid(assembler.bytes()) {
        tracing::warn!("reaction telegram failed the checksum invariant");
    }

    let reaction = assembler.finish()?;
    if reaction.status() != 0 {
        return Err(ProtocolError::Drive {
            status: reaction.status(),
            code: reaction.error_code(),
            command: tx_dump.to_string(),
        });
    }
    Ok(reaction)
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
