//! The 16 bit header that starts every USB PD message.
//!
//! See [6.2.1.1]

use proc_bitfield::bitfield;

use crate::{DataRole, PowerRole};

bitfield! {
    /// Definition of the message header.
    ///
    /// The raw message type in bits 0..=4 is interpreted as a control
    /// message type when the data object count is zero, and as a data
    /// message type otherwise; use [`Header::message_type`].
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct Header(pub u16): Debug, FromStorage, IntoStorage {
        /// Set for extended messages, which this stack does not decode.
        pub extended: bool @ 15,
        /// The number of 32 bit data objects that follow the header.
        pub num_objects: u8 [get usize] @ 12..=14,
        /// A rolling counter, maintained by the originator of the message.
        pub message_id: u8 @ 9..=11,
        /// The sender's power role (0 -> sink, 1 -> source).
        pub power_role: bool [get PowerRole, set PowerRole] @ 8,
        /// The specification revision. The reserved value 11b reads as
        /// revision 3.0.
        pub revision: u8 [get Revision, set Revision] @ 6..=7,
        /// The sender's data role (0 -> UFP, 1 -> DFP).
        pub data_role: bool [get DataRole, set DataRole] @ 5,
        /// The raw message type.
        pub message_type_raw: u8 @ 0..=4,
    }
}

impl Header {
    /// Create a header template with the given role and revision attributes.
    ///
    /// The policy engine keeps one template around and stamps type, count
    /// and message ID onto copies of it.
    pub fn new_template(data_role: DataRole, power_role: PowerRole, revision: Revision) -> Self {
        Self(0)
            .with_data_role(data_role)
            .with_power_role(power_role)
            .with_revision(revision)
    }

    /// Create a control message header from a template.
    pub fn new_control(template: Self, message_type: ControlMessageType) -> Self {
        template
            .with_message_type_raw(message_type as u8)
            .with_num_objects(0)
    }

    /// Create a data message header from a template.
    pub fn new_data(template: Self, message_type: DataMessageType, num_objects: u8) -> Self {
        template
            .with_message_type_raw(message_type as u8)
            .with_num_objects(num_objects)
    }

    /// Extract the message type that the header encodes.
    pub fn message_type(&self) -> MessageType {
        if self.num_objects() == 0 {
            MessageType::Control(self.message_type_raw().into())
        } else {
            MessageType::Data(self.message_type_raw().into())
        }
    }
}

/// Specification revisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[allow(non_camel_case_types)]
pub enum Revision {
    /// Revision 1.0 (deprecated).
    R1_0,
    /// Revision 2.0.
    R2_0,
    /// Revision 3.0.
    R3_0,
}

impl From<u8> for Revision {
    fn from(value: u8) -> Self {
        match value {
            0b00 => Self::R1_0,
            0b01 => Self::R2_0,
            _ => Self::R3_0,
        }
    }
}

impl From<Revision> for u8 {
    fn from(revision: Revision) -> Self {
        match revision {
            Revision::R1_0 => 0b00,
            Revision::R2_0 => 0b01,
            Revision::R3_0 => 0b10,
        }
    }
}

/// The type of message that a header encodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// A control message, carrying no data objects. See [6.3]
    Control(ControlMessageType),
    /// A data message. See [6.4]
    Data(DataMessageType),
}

/// Types of control messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ControlMessageType {
    GoodCrc = 0b0_0001,
    Accept = 0b0_0011,
    Reject = 0b0_0100,
    Ping = 0b0_0101,
    PsRdy = 0b0_0110,
    GetSourceCap = 0b0_0111,
    GetSinkCap = 0b0_1000,
    Wait = 0b0_1100,
    SoftReset = 0b0_1101,
    Reserved,
}

impl From<u8> for ControlMessageType {
    fn from(value: u8) -> Self {
        match value {
            0b0_0001 => Self::GoodCrc,
            0b0_0011 => Self::Accept,
            0b0_0100 => Self::Reject,
            0b0_0101 => Self::Ping,
            0b0_0110 => Self::PsRdy,
            0b0_0111 => Self::GetSourceCap,
            0b0_1000 => Self::GetSinkCap,
            0b0_1100 => Self::Wait,
            0b0_1101 => Self::SoftReset,
            _ => Self::Reserved,
        }
    }
}

/// Types of data messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DataMessageType {
    SourceCapabilities = 0b0_0001,
    Request = 0b0_0010,
    SinkCapabilities = 0b0_0100,
    Reserved,
}

impl From<u8> for DataMessageType {
    fn from(value: u8) -> Self {
        match value {
            0b0_0001 => Self::SourceCapabilities,
            0b0_0010 => Self::Request,
            0b0_0100 => Self::SinkCapabilities,
            _ => Self::Reserved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ControlMessageType, DataMessageType, Header, MessageType, Revision};
    use crate::{DataRole, PowerRole};

    #[test]
    fn round_trips_every_field() {
        let header = Header(0)
            .with_extended(true)
            .with_num_objects(5)
            .with_message_id(6)
            .with_power_role(PowerRole::Source)
            .with_revision(Revision::R3_0)
            .with_data_role(DataRole::Dfp)
            .with_message_type_raw(0b1_0110);

        let decoded = Header(header.0);
        assert!(decoded.extended());
        assert_eq!(decoded.num_objects(), 5);
        assert_eq!(decoded.message_id(), 6);
        assert_eq!(decoded.power_role(), PowerRole::Source);
        assert_eq!(decoded.revision(), Revision::R3_0);
        assert_eq!(decoded.data_role(), DataRole::Dfp);
        assert_eq!(decoded.message_type_raw(), 0b1_0110);
    }

    #[test]
    fn setters_leave_other_fields_alone() {
        let header = Header(0xFFFF).with_message_id(0);
        assert_eq!(header.0, 0xFFFF & !(0b111 << 9));

        let header = Header(0).with_num_objects(7);
        assert_eq!(header.0, 0b111 << 12);
    }

    #[test]
    fn type_depends_on_object_count() {
        let template = Header::new_template(DataRole::Ufp, PowerRole::Sink, Revision::R3_0);

        let control = Header::new_control(template, ControlMessageType::Wait);
        assert_eq!(
            control.message_type(),
            MessageType::Control(ControlMessageType::Wait)
        );

        // SourceCapabilities and GoodCRC share the raw value; the count
        // disambiguates.
        let data = Header::new_data(template, DataMessageType::SourceCapabilities, 3);
        assert_eq!(
            data.message_type(),
            MessageType::Data(DataMessageType::SourceCapabilities)
        );
        assert_eq!(
            Header::new_control(template, ControlMessageType::GoodCrc).message_type(),
            MessageType::Control(ControlMessageType::GoodCrc)
        );
    }

    #[test]
    fn unknown_types_are_reserved() {
        assert_eq!(ControlMessageType::from(0b1_1111), ControlMessageType::Reserved);
        assert_eq!(DataMessageType::from(0b0_1111), DataMessageType::Reserved);
    }

    #[test]
    fn reserved_revision_reads_as_r3_0() {
        assert_eq!(Revision::from(0b11), Revision::R3_0);
        assert!(Revision::R2_0 < Revision::R3_0);
        assert_eq!(Revision::R2_0.min(Revision::R3_0), Revision::R2_0);
    }
}
