//! SERCOS parameter access
//!
//! Translates engineering-level parameter access into correctly scaled wire
//! telegrams. The drive describes each parameter through a 32-bit attribute
//! word (wire width and decimal scale); attributes are re-fetched on every
//! access, mirroring the drive's own service-channel convention, so runtime
//! attribute changes are always honored.

use super::fields::{Attribute, Datablock, ParamControl, ParamIdent, ParamVariant};
use super::telegram::{CommandPayload, Data, ReactionPayload, Service, Telegram};
use super::{Connection, ProtocolError, SIS_ADDR_MASTER, SIS_ADDR_SLAVE, SIS_ADDR_UNIT};

/// Byte offset 0 of a list addresses its 32-bit header word: maximum size in
/// the upper half, current size in the lower half
const LIST_HEADER_SIZE: u16 = 4;

impl Connection {
    /// Query the attribute word of a parameter and reduce it to the pair the
    /// access layer needs: decimal scale factor and wire width in bytes
    pub fn parameter_attributes(
        &self,
        variant: ParamVariant,
        number: u16,
    ) -> Result<(u8, usize), ProtocolError> {
        let reaction = self.transceive_param(
            variant,
            number,
            Service::ParamRead,
            Datablock::Attribute,
            Data::empty(),
        )?;
        let attribute = Attribute::from_raw(reaction.data().to_u32());
        Ok((attribute.scale_factor(), attribute.byte_len()))
    }

    /// Read a parameter as an engineering value
    ///
    /// The raw wire integer is sign-extended to honor negative operation
    /// data, then divided by ten to the power of the attribute's scale
    /// factor.
    pub fn read_parameter(
        &self,
        variant: ParamVariant,
        number: u16,
    ) -> Result<f64, ProtocolError> {
        let (scale, width) = self.parameter_attributes(variant, number)?;
        let reaction = self.transceive_param(
            variant,
            number,
            Service::ParamRead,
            Datablock::OperatingData,
            Data::empty(),
        )?;
        Ok(decode_scaled(reaction.data(), width, scale))
    }

    /// Read a parameter's operating data as raw bytes, for text and other
    /// unscaled content (e.g. the firmware identification string)
    pub fn read_parameter_raw(
        &self,
        variant: ParamVariant,
        number: u16,
    ) -> Result<Vec<u8>, ProtocolError> {
        let reaction = self.transceive_param(
            variant,
            number,
            Service::ParamRead,
            Datablock::OperatingData,
            Data::empty(),
        )?;
        Ok(reaction.data().as_slice().to_vec())
    }

    /// Write an engineering value to a parameter
    pub fn write_parameter(
        &self,
        variant: ParamVariant,
        number: u16,
        value: f64,
    ) -> Result<(), ProtocolError> {
        let (scale, width) = self.parameter_attributes(variant, number)?;
        let data = encode_scaled(value, width, scale);
        self.transceive_param(
            variant,
            number,
            Service::ParamWrite,
            Datablock::OperatingData,
            data,
        )?;
        Ok(())
    }

    /// Read one element of a list parameter as an engineering value
    ///
    /// Element 0 is the list header word; data elements start at index 1.
    pub fn read_list_element(
        &self,
        variant: ParamVariant,
        number: u16,
        index: u16,
    ) -> Result<f64, ProtocolError> {
        let (scale, width) = self.parameter_attributes(variant, number)?;
        let (offset, segment_size) = element_segment(variant, number, index, width)?;
        let reaction = self.transceive_list(
            variant,
            number,
            Service::ListRead,
            offset,
            segment_size,
            Data::empty(),
        )?;
        Ok(decode_scaled(reaction.data(), width, scale))
    }

    /// Write an engineering value to one element of a list parameter,
    /// growing the list's current size first when the element lies past it
    pub fn write_list_element(
        &self,
        variant: ParamVariant,
        number: u16,
        index: u16,
        value: f64,
    ) -> Result<(), ProtocolError> {
        let (scale, width) = self.parameter_attributes(variant, number)?;
        let (offset, segment_size) = element_segment(variant, number, index, width)?;

        self.set_list_size(variant, number, width, index, true)?;

        let data = encode_scaled(value, width, scale);
        self.transceive_list(
            variant,
            number,
            Service::ListWrite,
            offset,
            segment_size,
            data,
        )?;
        Ok(())
    }

    /// Raise a list's current size to hold `index * element_size` bytes
    ///
    /// Reads the header word (max size : current size), then writes it back
    /// with the current size raised. Nothing happens when the size already
    /// suffices or the requirement exceeds the list's cap. With `keep_tail`
    /// the existing size is never lowered, preserving later segments.
    fn set_list_size(
        &self,
        variant: ParamVariant,
        number: u16,
        width: usize,
        index: u16,
        keep_tail: bool,
    ) -> Result<(), ProtocolError> {
        let (required, _) = element_segment(variant, number, index, width)?;

        let header = self.transceive_list(
            variant,
            number,
            Service::ListRead,
            0,
            LIST_HEADER_SIZE,
            Data::empty(),
        )?;
        let word = header.data().to_u32();
        let max_size = (word >> 16) as u16;
        let current_size = word as u16;

        if required <= current_size || required > max_size {
            return Ok(());
        }

        let new_size = if keep_tail {
            required.max(current_size)
        } else {
            required
        };
        tracing::debug!(
            param = %ParamIdent::new(variant, number),
            current_size,
            new_size,
            "growing list"
        );

        let word = (u32::from(max_size) << 16) | u32::from(new_size);
        self.transceive_list(
            variant,
            number,
            Service::ListWrite,
            0,
            LIST_HEADER_SIZE,
            Data::from_uint(word.into(), 4),
        )?;
        Ok(())
    }

    pub(super) fn transceive_param(
        &self,
        variant: ParamVariant,
        number: u16,
        service: Service,
        datablock: Datablock,
        data: Data,
    ) -> Result<ReactionPayload, ProtocolError> {
        let telegram = Telegram::command(
            SIS_ADDR_MASTER,
            SIS_ADDR_SLAVE,
            service,
            CommandPayload::Param {
                control: ParamControl::new(datablock),
                unit_addr: SIS_ADDR_UNIT,
                ident: ParamIdent::new(variant, number),
                data,
            },
        );
        self.transceive(&telegram)
    }

    pub(super) fn transceive_list(
        &self,
        variant: ParamVariant,
        number: u16,
        service: Service,
        list_offset: u16,
        segment_size: u16,
        data: Data,
    ) -> Result<ReactionPayload, ProtocolError> {
        let telegram = Telegram::command(
            SIS_ADDR_MASTER,
            SIS_ADDR_SLAVE,
            service,
            CommandPayload::List {
                control: ParamControl::default(),
                unit_addr: SIS_ADDR_UNIT,
                ident: ParamIdent::new(variant, number),
                list_offset,
                segment_size,
                data,
            },
        );
        self.transceive(&telegram)
    }
}

/// Byte segment addressed by a list element index: offset and size
fn element_segment(
    variant: ParamVariant,
    number: u16,
    index: u16,
    width: usize,
) -> Result<(u16, u16), ProtocolError> {
    let offset = u32::from(index) * width as u32;
    if offset > u32::from(u16::MAX) {
        return Err(ProtocolError::InvalidParamRef(format!(
            "element {index} of {} lies beyond the list address range",
            ParamIdent::new(variant, number)
        )));
    }
    Ok((offset as u16, width as u16))
}

/// Scale an engineering value and encode it at the discovered wire width
fn encode_scaled(value: f64, width: usize, scale: u8) -> Data {
    let scaled = (value * 10f64.powi(i32::from(scale))).round() as i64;
    Data::from_uint(scaled as u64, width)
}

/// Decode a raw wire integer of the discovered width into an engineering
/// value, sign-extending per width
fn decode_scaled(data: &Data, width: usize, scale: u8) -> f64 {
    let raw = match width {
        1 => i64::from(data.to_u8() as i8),
        2 => i64::from(data.to_u16() as i16),
        8 => data.to_u64() as i64,
        _ => i64::from(data.to_u32() as i32),
    };
    raw as f64 / 10f64.powi(i32::from(scale))
}
