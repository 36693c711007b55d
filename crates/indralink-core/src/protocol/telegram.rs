//! Telegram encoding/decoding
//!
//! Implements the SIS telegram format: an 8-byte header (16 with the
//! extended routing variant), a service-dependent payload head and up to 246
//! bytes of variable data.
//!
//! Frame layout:
//! - 1 byte: start symbol (0x02)
//! - 1 byte: checksum (sum of all frame bytes mod 256 must equal zero)
//! - 2 bytes: payload length, stored twice for integrity
//! - 1 byte: control (bit-packed, see [`HeaderControl`])
//! - 1 byte: service code
//! - 2 bytes: sender and recipient station addresses
//! - N bytes: payload (head + variable data)

use byteorder::{ByteOrder, LittleEndian};

use super::fields::{HeaderControl, ParamControl, ParamIdent};
use super::{ProtocolError, HEADER_SIZE, HEADER_SIZE_EXT, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};

/// Telegram start symbol (STX)
pub const START_SYMBOL: u8 = 0x02;

/// Protocol services understood by the drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Service {
    /// Initialize SIS communication (subservice carrier, e.g. baud rate set)
    InitComm = 0x03,
    /// Read a single SERCOS parameter
    ParamRead = 0x10,
    /// Read a segment of a SERCOS list parameter
    ListRead = 0x11,
    /// Read the current communication phase
    ReadPhase = 0x12,
    /// Switch the communication phase
    SwitchPhase = 0x1D,
    /// Write a segment of a SERCOS list parameter
    ListWrite = 0x1E,
    /// Write a single SERCOS parameter
    ParamWrite = 0x1F,
}

impl Service {
    /// Payload shape of the reaction telegram this service answers with
    pub fn reaction_kind(self) -> ReactionKind {
        match self {
            Service::InitComm => ReactionKind::Subservice,
            Service::ListRead | Service::ListWrite => ReactionKind::List,
            _ => ReactionKind::Param,
        }
    }
}

/// Variable data region of a telegram payload
///
/// Multi-byte values are little-endian on the wire. The buffer remembers its
/// declared size so that extraction can mask to the width the drive actually
/// sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Data {
    bytes: Vec<u8>,
}

impl Data {
    /// Empty data region
    pub fn empty() -> Self {
        Self::default()
    }

    /// Data region from raw bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ProtocolError> {
        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: HEADER_SIZE + bytes.len(),
            });
        }
        Ok(Self { bytes })
    }

    /// Little-endian encoding of `value` in exactly `width` bytes (1, 2, 4
    /// or 8); the value is truncated to the requested width
    pub fn from_uint(value: u64, width: usize) -> Self {
        let mut bytes = vec![0u8; width.min(8)];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = (value >> (i * 8)) as u8;
        }
        Self { bytes }
    }

    /// Number of data bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the data region is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw byte view
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Resize the region, zero-filling on growth; used while decoding once
    /// the declared payload length becomes known
    pub fn resize(&mut self, len: usize) {
        self.bytes.resize(len, 0);
    }

    /// Copy incoming bytes into the region starting at `offset`
    pub(crate) fn fill_from(&mut self, offset: usize, bytes: &[u8]) {
        let end = (offset + bytes.len()).min(self.bytes.len());
        if end > offset {
            self.bytes[offset..end].copy_from_slice(&bytes[..end - offset]);
        }
    }

    /// First byte, or zero when empty
    pub fn to_u8(&self) -> u8 {
        self.bytes.first().copied().unwrap_or(0)
    }

    /// Little-endian u16 of the first bytes, masked to the declared size
    pub fn to_u16(&self) -> u16 {
        self.to_u64() as u16
    }

    /// Little-endian u32 of the first bytes, masked to the declared size
    pub fn to_u32(&self) -> u32 {
        self.to_u64() as u32
    }

    /// Little-endian u64 of the first bytes, masked to the declared size
    pub fn to_u64(&self) -> u64 {
        let mut out = 0u64;
        for (i, byte) in self.bytes.iter().take(8).enumerate() {
            out |= u64::from(*byte) << (i * 8);
        }
        out
    }

    /// Sign-extended value for logically signed operation data
    pub fn to_i64(&self) -> i64 {
        let width = self.bytes.len().min(8);
        if width == 0 || width == 8 {
            return self.to_u64() as i64;
        }
        let shift = (8 - width) * 8;
        ((self.to_u64() << shift) as i64) >> shift
    }
}

/// Extended header fields for routing and sequential telegrams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtHeader {
    /// Up to seven recipient sub-addresses
    pub sub_addresses: [u8; 7],
    /// Sequential telegram (packet) number
    pub packet_number: u8,
}

/// Telegram header
///
/// Constructed per request; the length fields and checksum are filled in
/// during encoding and the header is read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Checksum byte, assigned by [`Telegram::to_bytes`]
    pub checksum: u8,
    /// Payload length, stored in both duplicate wire fields
    pub payload_len: u8,
    /// Bit-packed control byte
    pub control: HeaderControl,
    /// Service code
    pub service: Service,
    /// Station address of the sender
    pub sender: u8,
    /// Station address of the recipient
    pub recipient: u8,
    /// Extended routing part; `None` for regular telegrams
    pub ext: Option<ExtHeader>,
}

impl Header {
    /// Header for a command telegram
    pub fn command(sender: u8, recipient: u8, service: Service) -> Self {
        Self {
            checksum: 0,
            payload_len: 0,
            control: HeaderControl::command(),
            service,
            sender,
            recipient,
            ext: None,
        }
    }

    /// Header size on the wire: 8, or 16 with the extended routing part
    pub fn size(&self) -> usize {
        if self.ext.is_some() {
            HEADER_SIZE_EXT
        } else {
            HEADER_SIZE
        }
    }

    /// Record the payload length in both duplicate length fields
    pub fn set_len(&mut self, payload_len: usize) {
        self.payload_len = payload_len as u8;
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(START_SYMBOL);
        buf.push(self.checksum);
        buf.push(self.payload_len);
        buf.push(self.payload_len);
        buf.push(self.control.to_byte());
        buf.push(self.service as u8);
        buf.push(self.sender);
        buf.push(self.recipient);
        if let Some(ext) = &self.ext {
            buf.extend_from_slice(&ext.sub_addresses);
            buf.push(ext.packet_number);
        }
    }
}

/// Compute the checksum for a serialized frame and write it into place
///
/// The checksum is the negated sum (mod 256) of every other frame byte, so
/// that the sum over the complete frame is zero. Exactly `payload_len` bytes
/// after the header participate; the frame buffer must already carry the
/// final payload.
pub fn apply_checksum(frame: &mut [u8], header_size: usize) {
    let payload_len = frame[2] as usize;
    let end = (header_size + payload_len).min(frame.len());
    let mut sum = 0u8;
    for (i, byte) in frame[..end].iter().enumerate() {
        if i != 1 {
            sum = sum.wrapping_add(*byte);
        }
    }
    frame[1] = 0u8.wrapping_sub(sum);
}

/// Whether a complete frame satisfies the checksum invariant
pub fn checksum_valid(frame: &[u8]) -> bool {
    frame
        .iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte))
        == 0
}

/// Payload of a command telegram, tagged by shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPayload {
    /// Generic subservice request, e.g. setting the baud rate
    Subservice {
        /// Unit address of the recipient
        recipient: u8,
        /// Subservice number
        subservice: u8,
        /// Subservice arguments
        data: Data,
    },
    /// Single-parameter access
    Param {
        /// Parameter control byte
        control: ParamControl,
        /// Unit address of the drive
        unit_addr: u8,
        /// Parameter identifier
        ident: ParamIdent,
        /// Operation data for writes; empty for reads
        data: Data,
    },
    /// List-segment access
    List {
        /// Parameter control byte
        control: ParamControl,
        /// Unit address of the drive
        unit_addr: u8,
        /// Parameter identifier
        ident: ParamIdent,
        /// Byte offset of the addressed segment within the list
        list_offset: u16,
        /// Size of the addressed segment in bytes
        segment_size: u16,
        /// Segment data for writes; empty for reads
        data: Data,
    },
}

impl CommandPayload {
    /// Size of the fixed payload head
    pub fn head_size(&self) -> usize {
        match self {
            CommandPayload::Subservice { .. } => 2,
            CommandPayload::Param { .. } => 5,
            CommandPayload::List { .. } => 9,
        }
    }

    /// Total payload size: head plus variable data
    pub fn size(&self) -> usize {
        let data = match self {
            CommandPayload::Subservice { data, .. } => data,
            CommandPayload::Param { data, .. } => data,
            CommandPayload::List { data, .. } => data,
        };
        self.head_size() + data.len()
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            CommandPayload::Subservice {
                recipient,
                subservice,
                data,
            } => {
                buf.push(*recipient);
                buf.push(*subservice);
                buf.extend_from_slice(data.as_slice());
            }
            CommandPayload::Param {
                control,
                unit_addr,
                ident,
                data,
            } => {
                buf.push(control.to_byte());
                buf.push(*unit_addr);
                buf.push(0); // parameter type, always zero
                let mut num = [0u8; 2];
                LittleEndian::write_u16(&mut num, ident.value());
                buf.extend_from_slice(&num);
                buf.extend_from_slice(data.as_slice());
            }
            CommandPayload::List {
                control,
                unit_addr,
                ident,
                list_offset,
                segment_size,
                data,
            } => {
                buf.push(control.to_byte());
                buf.push(*unit_addr);
                buf.push(0); // parameter type, always zero
                let mut word = [0u8; 2];
                LittleEndian::write_u16(&mut word, ident.value());
                buf.extend_from_slice(&word);
                LittleEndian::write_u16(&mut word, *list_offset);
                buf.extend_from_slice(&word);
                LittleEndian::write_u16(&mut word, *segment_size);
                buf.extend_from_slice(&word);
                buf.extend_from_slice(data.as_slice());
            }
        }
    }
}

/// Payload shape expected in a reaction telegram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    /// Subservice acknowledgment
    Subservice,
    /// Single-parameter reaction
    Param,
    /// List-segment reaction
    List,
}

impl ReactionKind {
    /// Size of the fixed payload head (status byte plus two echo bytes)
    pub fn head_size(self) -> usize {
        3
    }
}

/// Decoded payload of a reaction telegram
///
/// All three shapes lead with a status byte; zero status means the request
/// was processed and `data` carries the response, non-zero status means
/// `data` starts with a 16-bit drive error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionPayload {
    /// Subservice acknowledgment
    Subservice {
        /// Recipient status
        status: u8,
        /// Unit address echo
        recipient: u8,
        /// Subservice number echo
        subservice: u8,
        /// Response data
        data: Data,
    },
    /// Single-parameter reaction
    Param {
        /// Recipient status
        status: u8,
        /// Parameter control byte echo
        control: u8,
        /// Unit address echo
        unit_addr: u8,
        /// Response data
        data: Data,
    },
    /// List-segment reaction
    List {
        /// Recipient status
        status: u8,
        /// Parameter control byte echo
        control: u8,
        /// Unit address echo
        unit_addr: u8,
        /// Response data
        data: Data,
    },
}

impl ReactionPayload {
    /// Recipient status byte; zero on success
    pub fn status(&self) -> u8 {
        match self {
            ReactionPayload::Subservice { status, .. } => *status,
            ReactionPayload::Param { status, .. } => *status,
            ReactionPayload::List { status, .. } => *status,
        }
    }

    /// Response data region
    pub fn data(&self) -> &Data {
        match self {
            ReactionPayload::Subservice { data, .. } => data,
            ReactionPayload::Param { data, .. } => data,
            ReactionPayload::List { data, .. } => data,
        }
    }

    /// Drive error code carried in the data region of a failed reaction
    pub fn error_code(&self) -> u16 {
        self.data().to_u16()
    }
}

/// A complete command telegram ready for encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    /// Telegram header
    pub header: Header,
    /// Command payload
    pub payload: CommandPayload,
}

impl Telegram {
    /// Command telegram from header addressing and payload
    pub fn command(sender: u8, recipient: u8, service: Service, payload: CommandPayload) -> Self {
        Self {
            header: Header::command(sender, recipient, service),
            payload,
        }
    }

    /// Total frame size on the wire
    pub fn size(&self) -> usize {
        self.header.size() + self.payload.size()
    }

    /// Serialize to wire bytes: payload length is recorded in both length
    /// fields, then the checksum is computed over the finished buffer
    ///
    /// Fails without touching the transport when the frame would exceed the
    /// 254-byte wire limit.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let size = self.size();
        if size > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { size });
        }

        let mut header = self.header.clone();
        header.set_len(self.payload.size());

        let mut buf = Vec::with_capacity(size);
        header.encode_into(&mut buf);
        self.payload.encode_into(&mut buf);
        apply_checksum(&mut buf, header.size());
        Ok(buf)
    }
}

/// Incremental decoder for one reaction telegram
///
/// Bytes arrive in arbitrary chunks from the serial line. The declared
/// payload length sits at offset 2/3 and is only trusted once more than 4
/// bytes have accumulated; from then on the assembler knows the total frame
/// size and can tell when the telegram is complete.
#[derive(Debug)]
pub struct FrameAssembler {
    kind: ReactionKind,
    buf: Vec<u8>,
}

impl FrameAssembler {
    /// Assembler for a reaction of the given shape
    pub fn new(kind: ReactionKind) -> Self {
        Self {
            kind,
            buf: Vec::with_capacity(MAX_FRAME_SIZE),
        }
    }

    /// Append received bytes
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if self.buf.len() + bytes.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::MalformedFrame(format!(
                "reaction exceeds the {MAX_FRAME_SIZE}-byte frame limit"
            )));
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Bytes accumulated so far
    pub fn received(&self) -> usize {
        self.buf.len()
    }

    /// Raw view of the accumulated bytes
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Declared payload length, once enough of the header has arrived
    pub fn payload_len(&self) -> Option<usize> {
        if self.buf.len() > 4 {
            Some(self.buf[2] as usize)
        } else {
            None
        }
    }

    /// Whether the complete frame has arrived
    pub fn is_complete(&self) -> bool {
        match self.payload_len() {
            Some(len) => self.buf.len() >= HEADER_SIZE + len,
            None => false,
        }
    }

    /// Parse the assembled frame into a typed reaction payload
    pub fn finish(&self) -> Result<ReactionPayload, ProtocolError> {
        let payload_len = self.payload_len().ok_or_else(|| {
            ProtocolError::MalformedFrame("reaction header incomplete".to_string())
        })?;
        if !self.is_complete() {
            return Err(ProtocolError::MalformedFrame(format!(
                "got {} of {} bytes",
                self.buf.len(),
                HEADER_SIZE + payload_len
            )));
        }

        let head_size = self.kind.head_size();
        if payload_len < head_size {
            return Err(ProtocolError::MalformedFrame(format!(
                "declared payload of {payload_len} bytes is shorter than the {head_size}-byte head"
            )));
        }

        let payload = &self.buf[HEADER_SIZE..HEADER_SIZE + payload_len];
        let mut data = Data::empty();
        data.resize(payload_len - head_size);
        data.fill_from(0, &payload[head_size..]);

        Ok(match self.kind {
            ReactionKind::Subservice => ReactionPayload::Subservice {
                status: payload[0],
                recipient: payload[1],
                subservice: payload[2],
                data,
            },
            ReactionKind::Param => ReactionPayload::Param {
                status: payload[0],
                control: payload[1],
                unit_addr: payload[2],
                data,
            },
            ReactionKind::List => ReactionPayload::List {
                status: payload[0],
                control: payload[1],
                unit_addr: payload[2],
                data,
            },
        })
    }
}

/// Hex dump of a byte stream for error diagnostics
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for byte in bytes {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    out
}
