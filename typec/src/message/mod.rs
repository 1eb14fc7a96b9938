//! Encoding and decoding of USB PD messages.
//!
//! Messages are fixed-capacity records of a 16 bit header and up to seven
//! 32 bit data objects, so that no heap allocation is needed on encode or
//! decode paths. Extended messages are not decoded.

pub mod header;
pub mod pdo;
pub mod request;

use byteorder::{ByteOrder, LittleEndian};

use header::Header;

/// This module defines a unit system for the protocol layer, expressed as
/// `u32` values of millivolts, milliamps and microwatts, for use on targets
/// without floating point.
pub mod units {
    ISQ!(
        uom::si,
        u32,
        (millimeter, kilogram, second, milliampere, kelvin, mole, candela)
    );
}

pub(crate) mod _50milliamperes_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_current;

        @_50milliamperes: 0.05; "_50mA", "_50milliamps", "_50milliamps";
    }
}

pub(crate) mod _50millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_50millivolts: 0.05; "_50mV", "_50millivolts", "_50millivolts";
    }
}

pub(crate) mod _20millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_20millivolts: 0.02; "_20mV", "_20millivolts", "_20millivolts";
    }
}

pub(crate) mod _250milliwatts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::power;

        @_250milliwatts: 0.25; "_250mW", "_250milliwatts", "_250milliwatts";
    }
}

/// Maximum number of data objects in one message, as set by the standard.
pub const MAX_DATA_OBJECTS: usize = 7;

/// Maximum encoded size of a message: the header plus seven data objects.
pub const MAX_MESSAGE_BYTES: usize = 2 + 4 * MAX_DATA_OBJECTS;

/// Errors that can occur when serializing a message.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// The output buffer cannot hold the header and all data objects.
    #[error("output buffer too small")]
    BufferTooSmall,
}

/// Errors that can occur when parsing a received frame.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The frame is shorter than the header's data object count demands.
    #[error("truncated message")]
    Truncated,
}

/// A power delivery message.
///
/// The data object array has fixed capacity; the effective length is derived
/// from the header's data object count. Slots beyond the count are undefined
/// and must not be read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Message {
    /// The message header.
    pub header: Header,
    /// Data objects. Only the first [`Header::num_objects`] entries are
    /// meaningful; use [`Message::data_objects`] to read them.
    pub data: [u32; MAX_DATA_OBJECTS],
}

impl Message {
    /// Create a message with the given header and zeroed data objects.
    pub fn new(header: Header) -> Self {
        Self {
            header,
            data: [0; MAX_DATA_OBJECTS],
        }
    }

    /// The meaningful prefix of the data object array.
    pub fn data_objects(&self) -> &[u32] {
        &self.data[..self.header.num_objects()]
    }

    /// Serialize the message to `buf`: the header little-endian at bytes
    /// 0..2, then each data object little-endian. Returns the number of
    /// bytes written, `2 + 4 * count`.
    pub fn to_bytes(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        let count = self.header.num_objects();
        let size = 2 + 4 * count;
        if buf.len() < size {
            return Err(EncodeError::BufferTooSmall);
        }

        LittleEndian::write_u16(buf, self.header.0);
        for (index, object) in self.data[..count].iter().enumerate() {
            LittleEndian::write_u32(&mut buf[2 + 4 * index..], *object);
        }
        Ok(size)
    }

    /// Parse a whole frame.
    ///
    /// Port controllers that read length-prefixed hardware FIFOs usually
    /// decode in two stages instead: the header first, then the
    /// count-dependent remainder.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < 2 {
            return Err(ParseError::Truncated);
        }
        let header = Header(LittleEndian::read_u16(buf));

        let count = header.num_objects();
        if buf.len() < 2 + 4 * count {
            return Err(ParseError::Truncated);
        }

        let mut data = [0u32; MAX_DATA_OBJECTS];
        for (index, object) in data[..count].iter_mut().enumerate() {
            *object = LittleEndian::read_u32(&buf[2 + 4 * index..]);
        }
        Ok(Self { header, data })
    }
}
