//! Bit-packed register fields
//!
//! The SIS wire format packs several hardware words bit by bit: the header
//! control byte, the parameter control byte, the 16-bit parameter identifier
//! and the 32-bit parameter attribute. Native bit-field layout is not
//! portable, so every field is encoded and decoded here with explicit masks
//! and shifts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// Telegram direction carried in bit 4 of the header control byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelegramType {
    /// Command telegram, sent by the master
    Command,
    /// Reaction telegram, sent by the drive
    Reaction,
}

/// Header control byte
///
/// Layout (LSB first): `sub_addresses:3`, `running_telegram:1`, `type:1`,
/// `status:3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderControl {
    /// Number of sub-addresses in the address block, 0..=7
    pub sub_addresses: u8,
    /// Whether a running telegram number byte follows the header
    pub running_telegram: bool,
    /// Command or reaction telegram
    pub telegram_type: TelegramType,
    /// Status class of a reaction telegram (0 = no error)
    pub status: u8,
}

impl HeaderControl {
    /// Control byte for a plain command telegram
    pub fn command() -> Self {
        Self {
            sub_addresses: 0,
            running_telegram: false,
            telegram_type: TelegramType::Command,
            status: 0,
        }
    }

    /// Pack into the wire byte
    pub fn to_byte(self) -> u8 {
        let mut value = self.sub_addresses & 0x07;
        if self.running_telegram {
            value |= 1 << 3;
        }
        if self.telegram_type == TelegramType::Reaction {
            value |= 1 << 4;
        }
        value | (self.status & 0x07) << 5
    }

    /// Unpack from the wire byte
    pub fn from_byte(value: u8) -> Self {
        Self {
            sub_addresses: value & 0x07,
            running_telegram: value & (1 << 3) != 0,
            telegram_type: if value & (1 << 4) != 0 {
                TelegramType::Reaction
            } else {
                TelegramType::Command
            },
            status: (value >> 5) & 0x07,
        }
    }
}

/// SERCOS parameter variant: S (drive standard) or P (product specific)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamVariant {
    /// S-parameter
    S,
    /// P-parameter
    P,
}

impl fmt::Display for ParamVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamVariant::S => write!(f, "S"),
            ParamVariant::P => write!(f, "P"),
        }
    }
}

/// 16-bit parameter identifier
///
/// Layout: `number:12`, `set:3`, `variant:1`. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamIdent {
    value: u16,
}

impl ParamIdent {
    /// Build an identifier for parameter block/set 0, e.g. S-0-0036
    pub fn new(variant: ParamVariant, number: u16) -> Self {
        Self::with_set(variant, 0, number)
    }

    /// Build an identifier with an explicit parameter set
    pub fn with_set(variant: ParamVariant, set: u8, number: u16) -> Self {
        let mut value = number & 0x0FFF;
        value |= u16::from(set & 0x07) << 12;
        if variant == ParamVariant::P {
            value |= 1 << 15;
        }
        Self { value }
    }

    /// Raw 16-bit wire value
    pub fn value(&self) -> u16 {
        self.value
    }

    /// Parameter number, 0..=4095
    pub fn number(&self) -> u16 {
        self.value & 0x0FFF
    }

    /// Parameter set, 0..=7
    pub fn set(&self) -> u8 {
        ((self.value >> 12) & 0x07) as u8
    }

    /// Parameter variant
    pub fn variant(&self) -> ParamVariant {
        if self.value & (1 << 15) != 0 {
            ParamVariant::P
        } else {
            ParamVariant::S
        }
    }
}

impl fmt::Display for ParamIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{:04}", self.variant(), self.set(), self.number())
    }
}

impl FromStr for ParamIdent {
    type Err = ProtocolError;

    /// Parse drive notation such as `S-0-0036` or `P-0-1177`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidParamRef(s.to_string());

        let mut parts = s.trim().split('-');
        let variant = match parts.next() {
            Some("S") | Some("s") => ParamVariant::S,
            Some("P") | Some("p") => ParamVariant::P,
            _ => return Err(invalid()),
        };
        let set: u8 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .filter(|set| *set <= 7)
            .ok_or_else(invalid)?;
        let number: u16 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .filter(|no| *no <= 0x0FFF)
            .ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self::with_set(variant, set, number))
    }
}

/// Datablock selector: which element of a parameter an access addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Datablock {
    /// Channel not active
    ChannelNotActive = 0b000,
    /// Ident number (write access); doubles as the command status query
    IdentNumber = 0b001,
    /// Parameter name
    Name = 0b010,
    /// Attribute word (read access)
    Attribute = 0b011,
    /// Unit text (read access)
    Unit = 0b100,
    /// Minimum input value (read access)
    MinValue = 0b101,
    /// Maximum input value (read access)
    MaxValue = 0b110,
    /// Operating data (write access)
    OperatingData = 0b111,
}

/// Parameter control byte of the SERCOS payload head
///
/// Layout (LSB first): `res:2`, `tx_final:1`, `datablock:3`, `res:2`. The
/// drive copies the byte from the command into the reaction telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamControl {
    /// Final transmission flag; lists are written in several steps
    pub tx_final: bool,
    /// Addressed datablock element
    pub datablock: Datablock,
}

impl ParamControl {
    /// Control byte addressing the given datablock in one final transmission
    pub fn new(datablock: Datablock) -> Self {
        Self {
            tx_final: true,
            datablock,
        }
    }

    /// Pack into the wire byte
    pub fn to_byte(self) -> u8 {
        let mut value = 0u8;
        if self.tx_final {
            value |= 1 << 2;
        }
        value | (self.datablock as u8 & 0x07) << 3
    }

    /// Unpack from the wire byte
    pub fn from_byte(value: u8) -> Self {
        let datablock = match (value >> 3) & 0x07 {
            0b000 => Datablock::ChannelNotActive,
            0b001 => Datablock::IdentNumber,
            0b010 => Datablock::Name,
            0b011 => Datablock::Attribute,
            0b100 => Datablock::Unit,
            0b101 => Datablock::MinValue,
            0b110 => Datablock::MaxValue,
            _ => Datablock::OperatingData,
        };
        Self {
            tx_final: value & (1 << 2) != 0,
            datablock,
        }
    }
}

impl Default for ParamControl {
    fn default() -> Self {
        Self::new(Datablock::OperatingData)
    }
}

/// 32-bit parameter attribute word
///
/// Layout: `conv_factor:16`, `data_len:3`, `func_of_data:1`, `data_disp:3`,
/// `res:1`, `scale_factor:4`, `wp_phase2:1`, `wp_phase3:1`, `wp_phase4:1`,
/// `res:1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    raw: u32,
}

impl Attribute {
    /// Wrap a raw attribute word read from the drive
    pub fn from_raw(raw: u32) -> Self {
        Self { raw }
    }

    /// Raw 32-bit value
    pub fn raw(&self) -> u32 {
        self.raw
    }

    /// Conversion factor for display purposes (1 when not applicable)
    pub fn conversion_factor(&self) -> u16 {
        (self.raw & 0xFFFF) as u16
    }

    /// 3-bit data length class
    pub fn data_len_class(&self) -> u8 {
        ((self.raw >> 16) & 0x07) as u8
    }

    /// Number of wire bytes one value of this parameter occupies
    ///
    /// Classes 0b001..0b011 are 2/4/8-byte parameters, 0b100..0b111 are
    /// 1/2/4/8-byte list elements. The reserved class falls back to 1 byte.
    pub fn byte_len(&self) -> usize {
        match self.data_len_class() {
            0b001 | 0b101 => 2,
            0b010 | 0b110 => 4,
            0b011 | 0b111 => 8,
            _ => 1,
        }
    }

    /// Whether the parameter is a procedure command rather than data
    pub fn is_procedure(&self) -> bool {
        self.raw & (1 << 19) != 0
    }

    /// Decimal places of the operation data, 0..=15
    pub fn scale_factor(&self) -> u8 {
        ((self.raw >> 24) & 0x0F) as u8
    }

    /// Whether the parameter is write-protected in the given phase (2..=4)
    pub fn write_protected_in_phase(&self, phase: u8) -> bool {
        match phase {
            2 => self.raw & (1 << 28) != 0,
            3 => self.raw & (1 << 29) != 0,
            4 => self.raw & (1 << 30) != 0,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_header_control_command_is_zero() {
        assert_eq!(HeaderControl::command().to_byte(), 0x00);
    }

    #[test]
    fn test_header_control_roundtrip() {
        let control = HeaderControl {
            sub_addresses: 5,
            running_telegram: true,
            telegram_type: TelegramType::Reaction,
            status: 0b110,
        };
        let byte = control.to_byte();
        assert_eq!(byte, 0b110_1_1_101);
        assert_eq!(HeaderControl::from_byte(byte), control);
    }

    #[test]
    fn test_param_ident_packing() {
        let ident = ParamIdent::new(ParamVariant::S, 36);
        assert_eq!(ident.value(), 36);

        let ident = ParamIdent::new(ParamVariant::P, 1177);
        assert_eq!(ident.value(), 0x8000 | 1177);
        assert_eq!(ident.variant(), ParamVariant::P);
        assert_eq!(ident.number(), 1177);
        assert_eq!(ident.set(), 0);
    }

    #[test]
    fn test_param_ident_display() {
        assert_eq!(ParamIdent::new(ParamVariant::S, 36).to_string(), "S-0-0036");
        assert_eq!(
            ParamIdent::with_set(ParamVariant::P, 1, 1177).to_string(),
            "P-1-1177"
        );
    }

    #[test]
    fn test_param_ident_parse() {
        let ident: ParamIdent = "S-0-0036".parse().expect("valid reference");
        assert_eq!(ident.variant(), ParamVariant::S);
        assert_eq!(ident.number(), 36);

        let ident: ParamIdent = "P-0-1177".parse().expect("valid reference");
        assert_eq!(ident.variant(), ParamVariant::P);
        assert_eq!(ident.number(), 1177);

        assert!("X-0-0001".parse::<ParamIdent>().is_err());
        assert!("S-8-0001".parse::<ParamIdent>().is_err());
        assert!("S-0-5000".parse::<ParamIdent>().is_err());
        assert!("S-0".parse::<ParamIdent>().is_err());
        assert!("S-0-1-2".parse::<ParamIdent>().is_err());
    }

    #[test]
    fn test_param_control_operating_data() {
        // tx_final (bit 2) + operating data (0b111 at bits 3-5)
        assert_eq!(ParamControl::default().to_byte(), 0x3C);
    }

    #[test]
    fn test_param_control_attribute() {
        let control = ParamControl::new(Datablock::Attribute);
        assert_eq!(control.to_byte(), 0x1C);
        assert_eq!(ParamControl::from_byte(0x1C), control);
    }

    #[test]
    fn test_attribute_decoding() {
        // scale factor 1, 2-byte parameter, conversion factor 1
        let attr = Attribute::from_raw(0x0101_0001 | (0b001 << 16));
        assert_eq!(attr.scale_factor(), 1);
        assert_eq!(attr.byte_len(), 2);
        assert_eq!(attr.conversion_factor(), 1);
        assert!(!attr.is_procedure());

        let attr = Attribute::from_raw(0b110 << 16);
        assert_eq!(attr.byte_len(), 4);

        let attr = Attribute::from_raw(0b011 << 16);
        assert_eq!(attr.byte_len(), 8);

        let attr = Attribute::from_raw(0b100 << 16);
        assert_eq!(attr.byte_len(), 1);

        // reserved class falls back to a single byte
        let attr = Attribute::from_raw(0);
        assert_eq!(attr.byte_len(), 1);
    }

    #[test]
    fn test_attribute_write_protection() {
        let attr = Attribute::from_raw(1 << 29);
        assert!(!attr.write_protected_in_phase(2));
        assert!(attr.write_protected_in_phase(3));
        assert!(!attr.write_protected_in_phase(4));
    }
}
