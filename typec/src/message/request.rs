//! Request data objects (RDOs): the sink's reply selecting one of the
//! source's power data objects.
//!
//! See [6.4.2]

use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;

use super::_20millivolts_mod::_20millivolts;
use super::_50milliamperes_mod::_50milliamperes;
use super::units::{ElectricCurrent, ElectricPotential};

bitfield! {
    /// A request data object of yet undetermined variant.
    ///
    /// Only the object position and the mismatch flag are shared between
    /// the variants; reinterpret as [`FixedRequest`] or [`PpsRequest`]
    /// according to the kind of the selected PDO.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct RawRequest(pub u32): Debug, FromStorage, IntoStorage {
        /// 1-based position into the source capabilities.
        pub object_position: u8 @ 28..=31,
        /// Set when the selected profile cannot fully satisfy the sink.
        pub capability_mismatch: bool @ 26,
    }
}

impl RawRequest {
    /// The all-zero sentinel. Device policy managers return it to indicate
    /// that none of the offered profiles is acceptable.
    pub const EMPTY: Self = Self(0);

    /// Whether this is the empty sentinel.
    pub fn is_empty(self) -> bool {
        self == Self::EMPTY
    }
}

bitfield! {
    /// A request for a fixed (or variable) supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct FixedRequest(pub u32): Debug, FromStorage, IntoStorage {
        /// 1-based position into the source capabilities.
        pub object_position: u8 @ 28..=31,
        /// GiveBack support.
        pub giveback: bool @ 27,
        /// Set when the selected profile cannot fully satisfy the sink.
        pub capability_mismatch: bool @ 26,
        /// USB communications capable.
        pub usb_communications_capable: bool @ 25,
        /// No USB suspend.
        pub no_usb_suspend: bool @ 24,
        /// Unchunked extended messages supported.
        pub unchunked_extended_messages_supported: bool @ 23,
        /// EPR mode capable.
        pub epr_mode_capable: bool @ 22,
        /// Operating current in 10 mA units.
        pub raw_operating_current: u16 @ 10..=19,
        /// Maximum operating current in 10 mA units.
        pub raw_max_operating_current: u16 @ 0..=9,
    }
}

impl Default for FixedRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl FixedRequest {
    /// A blank fixed request.
    pub fn new() -> Self {
        Self(0)
    }

    /// The current the sink intends to draw.
    pub fn operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_operating_current().into())
    }

    /// Set the operating current, truncated to the 10 mA grid.
    pub fn with_operating_current(self, current: ElectricCurrent) -> Self {
        self.with_raw_operating_current((current.get::<centiampere>() & 0x3FF) as u16)
    }

    /// The highest current the sink may ever draw.
    pub fn max_operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_operating_current().into())
    }

    /// Set the maximum operating current, truncated to the 10 mA grid.
    pub fn with_max_operating_current(self, current: ElectricCurrent) -> Self {
        self.with_raw_max_operating_current((current.get::<centiampere>() & 0x3FF) as u16)
    }
}

bitfield! {
    /// A request for a programmable power supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct PpsRequest(pub u32): Debug, FromStorage, IntoStorage {
        /// 1-based position into the source capabilities.
        pub object_position: u8 @ 28..=31,
        /// Set when the selected profile cannot fully satisfy the sink.
        pub capability_mismatch: bool @ 26,
        /// USB communications capable.
        pub usb_communications_capable: bool @ 25,
        /// No USB suspend.
        pub no_usb_suspend: bool @ 24,
        /// Unchunked extended messages supported.
        pub unchunked_extended_messages_supported: bool @ 23,
        /// EPR mode capable.
        pub epr_mode_capable: bool @ 22,
        /// Output voltage in 20 mV units.
        pub raw_output_voltage: u16 @ 9..=20,
        /// Operating current in 50 mA units.
        pub raw_operating_current: u8 @ 0..=6,
    }
}

impl Default for PpsRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl PpsRequest {
    /// A blank programmable supply request.
    pub fn new() -> Self {
        Self(0)
    }

    /// The requested output voltage.
    pub fn output_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_20millivolts>(self.raw_output_voltage().into())
    }

    /// Set the output voltage, truncated to the 20 mV grid.
    pub fn with_output_voltage(self, voltage: ElectricPotential) -> Self {
        self.with_raw_output_voltage((voltage.get::<_20millivolts>() & 0xFFF) as u16)
    }

    /// The current the sink intends to draw.
    pub fn operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<_50milliamperes>(self.raw_operating_current().into())
    }

    /// Set the operating current, truncated to the 50 mA grid.
    pub fn with_operating_current(self, current: ElectricCurrent) -> Self {
        self.with_raw_operating_current((current.get::<_50milliamperes>() & 0x7F) as u8)
    }
}

impl From<FixedRequest> for RawRequest {
    fn from(request: FixedRequest) -> Self {
        Self(request.0)
    }
}

impl From<PpsRequest> for RawRequest {
    fn from(request: PpsRequest) -> Self {
        Self(request.0)
    }
}

#[cfg(test)]
mod tests {
    use uom::si::electric_current::milliampere;
    use uom::si::electric_potential::millivolt;

    use super::{ElectricCurrent, ElectricPotential, FixedRequest, PpsRequest, RawRequest};

    fn mv(value: u32) -> ElectricPotential {
        ElectricPotential::new::<millivolt>(value)
    }

    fn ma(value: u32) -> ElectricCurrent {
        ElectricCurrent::new::<milliampere>(value)
    }

    #[test]
    fn empty_request_selects_nothing() {
        assert!(RawRequest::EMPTY.is_empty());
        assert_eq!(RawRequest::EMPTY.object_position(), 0);
        assert!(!RawRequest(1).is_empty());
    }

    #[test]
    fn fixed_request_round_trips_on_the_grid() {
        for milliamps in (0..=10230).step_by(10) {
            let request = FixedRequest::new()
                .with_operating_current(ma(milliamps))
                .with_max_operating_current(ma(milliamps));
            assert_eq!(request.operating_current().get::<milliampere>(), milliamps);
            assert_eq!(
                request.max_operating_current().get::<milliampere>(),
                milliamps
            );
        }
    }

    #[test]
    fn pps_request_round_trips_on_the_grid() {
        for millivolts in (0..=20000).step_by(20) {
            let request = PpsRequest::new().with_output_voltage(mv(millivolts));
            assert_eq!(request.output_voltage().get::<millivolt>(), millivolts);
        }
        for milliamps in (0..=6350).step_by(50) {
            let request = PpsRequest::new().with_operating_current(ma(milliamps));
            assert_eq!(request.operating_current().get::<milliampere>(), milliamps);
        }
    }

    #[test]
    fn setters_clear_their_field_first() {
        let request = PpsRequest(0xFFFF_FFFF).with_operating_current(ma(1000));
        assert_eq!(request.raw_operating_current(), 20);
        // Everything outside bits 0..=6 is untouched.
        assert_eq!(request.0 & !0x7F, 0xFFFF_FFFF & !0x7F);

        let request = FixedRequest(0xFFFF_FFFF).with_operating_current(ma(500));
        assert_eq!(request.raw_operating_current(), 50);
        assert_eq!(request.0 & !(0x3FF << 10), 0xFFFF_FFFF & !(0x3FF << 10));
    }

    #[test]
    fn variants_share_the_position_bits() {
        let fixed: RawRequest = FixedRequest::new().with_object_position(3).into();
        assert_eq!(fixed.object_position(), 3);

        let pps: RawRequest = PpsRequest::new()
            .with_object_position(2)
            .with_output_voltage(mv(6000))
            .into();
        assert_eq!(pps.object_position(), 2);
        assert_eq!(PpsRequest(pps.0).output_voltage().get::<millivolt>(), 6000);
    }
}
