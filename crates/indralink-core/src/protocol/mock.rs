//! Scripted transport double for engine tests
//!
//! Each [`MockExchange`] scripts the line behavior following one written
//! command: byte deliveries (possibly fragmented), silent timeouts, break
//! and line-error events. Cloning a [`MockTransport`] shares the underlying
//! script, so tests can keep a handle for inspecting written frames.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::serial::{SerialEvent, Transport};
use super::telegram::{apply_checksum, ReactionKind, START_SYMBOL};
use super::{
    LineErrorKind, ProtocolError, HEADER_SIZE, SIS_ADDR_MASTER, SIS_ADDR_SLAVE, SIS_ADDR_UNIT,
};

/// One scripted line event following a write
#[derive(Debug, Clone)]
pub(crate) enum RxStep {
    /// Deliver bytes on the next wait/read cycle; an empty delivery models
    /// the zero-byte read the engine must tolerate
    Bytes(Vec<u8>),
    /// Let the wait cycle time out
    Silence,
    /// Break condition on the line
    Break,
    /// Line-status error of the given kind
    LineError(LineErrorKind),
}

/// Scripted reply to one written command frame
#[derive(Debug, Clone)]
pub(crate) struct MockExchange {
    steps: VecDeque<RxStep>,
}

impl MockExchange {
    pub(crate) fn new(steps: Vec<RxStep>) -> Self {
        Self {
            steps: steps.into(),
        }
    }

    /// Reply with one whole frame in a single delivery
    pub(crate) fn reply(frame: Vec<u8>) -> Self {
        Self::new(vec![RxStep::Bytes(frame)])
    }
}

#[derive(Debug)]
struct Inner {
    exchanges: VecDeque<MockExchange>,
    current: VecDeque<RxStep>,
    pending: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    purges: usize,
    last_error: LineErrorKind,
}

/// Scripted [`Transport`] implementation
#[derive(Debug, Clone)]
pub(crate) struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    pub(crate) fn new(exchanges: Vec<MockExchange>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                exchanges: exchanges.into(),
                current: VecDeque::new(),
                pending: VecDeque::new(),
                writes: Vec::new(),
                purges: 0,
                last_error: LineErrorKind::Unknown(0),
            })),
        }
    }

    /// Frames written so far
    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Number of purge calls observed
    pub(crate) fn purge_count(&self) -> usize {
        self.lock().purges
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("mock transport lock")
    }
}

impl Transport for MockTransport {
    fn purge(&mut self) -> Result<(), ProtocolError> {
        let mut inner = self.lock();
        inner.purges += 1;
        inner.pending.clear();
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> Result<usize, ProtocolError> {
        let mut inner = self.lock();
        inner.writes.push(frame.to_vec());
        let steps = inner
            .exchanges
            .pop_front()
            .map(|exchange| exchange.steps)
            .unwrap_or_default();
        inner.current = steps;
        Ok(frame.len())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, ProtocolError> {
        let mut inner = self.lock();
        let mut n = 0;
        while n < buf.len() {
            match inner.pending.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn wait_event(&mut self, _timeout: Duration) -> Result<SerialEvent, ProtocolError> {
        let mut inner = self.lock();
        if !inner.pending.is_empty() {
            return Ok(SerialEvent::DataAvailable);
        }
        match inner.current.pop_front() {
            Some(RxStep::Bytes(bytes)) => {
                inner.pending.extend(bytes);
                Ok(SerialEvent::DataAvailable)
            }
            Some(RxStep::Silence) | None => Ok(SerialEvent::None),
            Some(RxStep::Break) => Ok(SerialEvent::Break),
            Some(RxStep::LineError(kind)) => {
                inner.last_error = kind;
                Ok(SerialEvent::LineError)
            }
        }
    }

    fn last_line_error(&self) -> LineErrorKind {
        self.lock().last_error
    }
}

/// Build a well-formed reaction frame of the given shape
pub(crate) fn reaction_frame(kind: ReactionKind, status: u8, data: &[u8]) -> Vec<u8> {
    let payload_len = kind.head_size() + data.len();
    let (service, echo) = match kind {
        ReactionKind::Subservice => (0x03, [SIS_ADDR_UNIT, 0x07]),
        ReactionKind::Param => (0x10, [0x3C, SIS_ADDR_UNIT]),
        ReactionKind::List => (0x11, [0x3C, SIS_ADDR_UNIT]),
    };

    let mut frame = vec![
        START_SYMBOL,
        0,
        payload_len as u8,
        payload_len as u8,
        0x10, // reaction type bit in the control byte
        service,
        SIS_ADDR_SLAVE,
        SIS_ADDR_MASTER,
        status,
        echo[0],
        echo[1],
    ];
    frame.extend_from_slice(data);
    apply_checksum(&mut frame, HEADER_SIZE);
    frame
}
