//! Drive command execution
//!
//! SERCOS procedure commands (homing, parameterization level switch, ...)
//! are triggered by writing a request value into the command parameter and
//! acknowledged asynchronously through a status word the master polls. A
//! command is only considered executed once the request flag has been set,
//! acknowledged, cleared and acknowledged again.

use super::fields::{Datablock, ParamVariant};
use super::telegram::{Data, Service};
use super::{Connection, ProtocolError, MAX_COMMAND_POLLS};

/// Error code the drive answers with when a command parameter is
/// write-protected in the current operation state
const ERROR_CODE_WRITE_PROTECTED: u16 = 0x700C;

/// Request values written into a command parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandRequest {
    /// Clear the command flag
    NotSet = 0x0,
    /// Cancel a running command
    Cancel = 0x1,
    /// Start the command
    Set = 0x3,
}

/// Acknowledgment states reported by the command status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Command flag is clear
    NotSet,
    /// Command completed successfully
    Ok,
    /// Command was canceled
    Canceled,
    /// Command is still being executed
    Busy,
    /// Command failed in the drive
    Error,
    /// Status value not covered by the SERCOS convention
    Other(u8),
}

impl CommandStatus {
    /// Decode the low nibble of the status word
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x0 => CommandStatus::NotSet,
            0x3 => CommandStatus::Ok,
            0x5 => CommandStatus::Canceled,
            0x7 => CommandStatus::Busy,
            0xF => CommandStatus::Error,
            other => CommandStatus::Other(other),
        }
    }

    /// Raw status value
    pub fn raw(self) -> u8 {
        match self {
            CommandStatus::NotSet => 0x0,
            CommandStatus::Ok => 0x3,
            CommandStatus::Canceled => 0x5,
            CommandStatus::Busy => 0x7,
            CommandStatus::Error => 0xF,
            CommandStatus::Other(raw) => raw,
        }
    }
}

impl Connection {
    /// Execute a drive command parameter, e.g. S-0-0420 to enter the
    /// parameterization level
    ///
    /// Runs the full two-phase protocol: set the request flag, poll until
    /// the drive acknowledges `Ok`, then clear the flag and poll until the
    /// drive reports `NotSet` so the parameter is ready for reuse. A failure
    /// while setting never attempts the clear phase.
    pub fn execute_command(
        &self,
        variant: ParamVariant,
        number: u16,
    ) -> Result<(), ProtocolError> {
        tracing::debug!(variant = %variant, number, "executing drive command");

        self.request_command(variant, number, CommandRequest::Set)
            .map_err(|e| match e {
                ProtocolError::Drive {
                    code: ERROR_CODE_WRITE_PROTECTED,
                    ..
                } => ProtocolError::WriteProtected,
                other => other,
            })?;

        let status = self.poll_until_settled(variant, number)?;
        if status != CommandStatus::Ok {
            return Err(ProtocolError::CommandFailed {
                status: status.raw(),
            });
        }

        self.request_command(variant, number, CommandRequest::NotSet)?;

        let status = self.poll_until_settled(variant, number)?;
        if status != CommandStatus::NotSet {
            return Err(ProtocolError::CommandFailed {
                status: status.raw(),
            });
        }

        tracing::debug!(variant = %variant, number, "drive command executed");
        Ok(())
    }

    /// Query the acknowledgment state of a command parameter
    ///
    /// Uses the parameter-write service with the ident-number datablock as
    /// the status query form; the data field re-carries the parameter
    /// number.
    pub fn command_status(
        &self,
        variant: ParamVariant,
        number: u16,
    ) -> Result<CommandStatus, ProtocolError> {
        let reaction = self.transceive_param(
            variant,
            number,
            Service::ParamWrite,
            Datablock::IdentNumber,
            Data::from_uint(u64::from(number), 2),
        )?;
        Ok(CommandStatus::from_raw(reaction.data().to_u8()))
    }

    fn request_command(
        &self,
        variant: ParamVariant,
        number: u16,
        request: CommandRequest,
    ) -> Result<(), ProtocolError> {
        self.write_parameter(variant, number, f64::from(request as u8))
    }

    fn poll_until_settled(
        &self,
        variant: ParamVariant,
        number: u16,
    ) -> Result<CommandStatus, ProtocolError> {
        let mut polls = 0u32;
        loop {
            let status = self.command_status(variant, number)?;
            if status != CommandStatus::Busy {
                return Ok(status);
            }
            polls += 1;
            if polls >= MAX_COMMAND_POLLS {
                return Err(ProtocolError::BusyLoopExceeded { polls });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mock::{reaction_frame, MockExchange, MockTransport};
    use crate::protocol::telegram::ReactionKind;
    use crate::protocol::{Connection, ConnectionConfig};
    use byteorder::{ByteOrder, LittleEndian};
    use pretty_assertions::assert_eq;

    /// Attribute reply describing an unscaled 2-byte command parameter
    fn attribute_reply() -> Vec<u8> {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, (0b001 << 16) | 0x0001);
        reaction_frame(ReactionKind::Param, 0, &bytes)
    }

    fn write_ack() -> Vec<u8> {
        reaction_frame(ReactionKind::Param, 0, &[])
    }

    fn status_reply(status: u8) -> Vec<u8> {
        reaction_frame(ReactionKind::Param, 0, &[status, 0x00])
    }

    fn connect(exchanges: Vec<MockExchange>) -> (Connection, MockTransport) {
        let transport = MockTransport::new(exchanges);
        let handle = transport.clone();
        (
            Connection::with_transport(Box::new(transport), ConnectionConfig::default()),
            handle,
        )
    }

    #[test]
    fn test_command_status_decoding() {
        assert_eq!(CommandStatus::from_raw(0x0), CommandStatus::NotSet);
        assert_eq!(CommandStatus::from_raw(0x3), CommandStatus::Ok);
        assert_eq!(CommandStatus::from_raw(0x5), CommandStatus::Canceled);
        assert_eq!(CommandStatus::from_raw(0x7), CommandStatus::Busy);
        assert_eq!(CommandStatus::from_raw(0xF), CommandStatus::Error);
        assert_eq!(CommandStatus::from_raw(0x9), CommandStatus::Other(0x9));
        assert_eq!(CommandStatus::Other(0x9).raw(), 0x9);
    }

    #[test]
    fn test_execute_command_two_phases() {
        let (conn, mock) = connect(vec![
            // set phase: attribute fetch + request write
            MockExchange::reply(attribute_reply()),
            MockExchange::reply(write_ack()),
            // drive is busy once, then acknowledges
            MockExchange::reply(status_reply(0x7)),
            MockExchange::reply(status_reply(0x3)),
            // clear phase: attribute fetch + request write + acknowledgment
            MockExchange::reply(attribute_reply()),
            MockExchange::reply(write_ack()),
            MockExchange::reply(status_reply(0x0)),
        ]);

        conn.execute_command(ParamVariant::S, 420)
            .expect("command executes");

        let writes = mock.writes();
        assert_eq!(writes.len(), 7);

        // the set request carries 0x3 at the discovered 2-byte width
        assert_eq!(&writes[1][13..], &[0x03, 0x00]);
        // exactly one clear request follows the successful set phase
        assert_eq!(&writes[5][13..], &[0x00, 0x00]);

        // status queries use the ident-number datablock and echo the number
        let poll = &writes[2];
        assert_eq!(poll[5], Service::ParamWrite as u8);
        assert_eq!(poll[8], 0x0C);
        assert_eq!(LittleEndian::read_u16(&poll[13..15]), 420);
    }

    #[test]
    fn test_execute_command_busy_loop_exceeded() {
        let mut exchanges = vec![
            MockExchange::reply(attribute_reply()),
            MockExchange::reply(write_ack()),
        ];
        exchanges.extend(
            (0..MAX_COMMAND_POLLS).map(|_| MockExchange::reply(status_reply(0x7))),
        );
        let (conn, mock) = connect(exchanges);

        match conn.execute_command(ParamVariant::S, 420) {
            Err(ProtocolError::BusyLoopExceeded { polls }) => {
                assert_eq!(polls, MAX_COMMAND_POLLS);
            }
            other => panic!("expected BusyLoopExceeded, got {other:?}"),
        }
        // the cap was honored: no poll beyond the scripted 300 went out
        assert_eq!(mock.writes().len(), 2 + MAX_COMMAND_POLLS as usize);
    }

    #[test]
    fn test_execute_command_write_protected() {
        let rejected = reaction_frame(ReactionKind::Param, 0x06, &[0x0C, 0x70]);
        let (conn, mock) = connect(vec![
            MockExchange::reply(attribute_reply()),
            MockExchange::reply(rejected),
        ]);

        assert!(matches!(
            conn.execute_command(ParamVariant::S, 420),
            Err(ProtocolError::WriteProtected)
        ));
        // the failed set phase never proceeds to polling or clearing
        assert_eq!(mock.writes().len(), 2);
    }

    #[test]
    fn test_execute_command_terminal_error_status() {
        let (conn, mock) = connect(vec![
            MockExchange::reply(attribute_reply()),
            MockExchange::reply(write_ack()),
            MockExchange::reply(status_reply(0x5)),
        ]);

        assert!(matches!(
            conn.execute_command(ParamVariant::S, 420),
            Err(ProtocolError::CommandFailed { status: 0x5 })
        ));
        assert_eq!(mock.writes().len(), 3);
    }

    #[test]
    fn test_execute_command_clear_phase_must_reach_not_set() {
        let (conn, _) = connect(vec![
            MockExchange::reply(attribute_reply()),
            MockExchange::reply(write_ack()),
            MockExchange::reply(status_reply(0x3)),
            MockExchange::reply(attribute_reply()),
            MockExchange::reply(write_ack()),
            // the flag never clears
            MockExchange::reply(status_reply(0x3)),
        ]);

        assert!(matches!(
            conn.execute_command(ParamVariant::S, 420),
            Err(ProtocolError::CommandFailed { status: 0x3 })
        ));
    }
}
