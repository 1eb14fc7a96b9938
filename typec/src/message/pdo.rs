//! Power data objects (PDOs), each describing one power profile offered by
//! a source.
//!
//! See [6.4.1]

use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;
use uom::si::electric_potential::decivolt;
use uom::si::power::watt;

use super::_50milliamperes_mod::_50milliamperes;
use super::_50millivolts_mod::_50millivolts;
use super::_250milliwatts_mod::_250milliwatts;
use super::units::{ElectricCurrent, ElectricPotential, Power};

bitfield! {
    /// A power data object of yet unknown kind.
    ///
    /// This is the raw form handed to device policy managers; convert with
    /// [`RawPowerDataObject::typed`] to access per-kind fields.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct RawPowerDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// Primary type discriminator.
        pub kind: u8 @ 30..=31,
        /// Sub-discriminator, meaningful for augmented objects only.
        pub augmented_kind: u8 @ 28..=29,
    }
}

impl RawPowerDataObject {
    /// Classify the object by its discriminator bits.
    pub fn typed(self) -> PowerDataObject {
        PowerDataObject::from_raw(self.0)
    }
}

/// A classified power data object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerDataObject {
    /// A fixed supply.
    FixedSupply(FixedSupply),
    /// A battery.
    Battery(Battery),
    /// A variable supply (non-battery).
    VariableSupply(VariableSupply),
    /// A programmable power supply.
    Pps(Pps),
    /// An EPR adjustable voltage supply.
    EprAvs(EprAvs),
    /// An augmented object with a reserved sub-type.
    Unknown(RawPowerDataObject),
}

impl PowerDataObject {
    /// Classify a 32 bit value by its primary type bits and, for augmented
    /// objects, the two sub-type bits.
    pub fn from_raw(value: u32) -> Self {
        let raw = RawPowerDataObject(value);
        match raw.kind() {
            0b00 => Self::FixedSupply(FixedSupply(value)),
            0b01 => Self::Battery(Battery(value)),
            0b10 => Self::VariableSupply(VariableSupply(value)),
            _ => match raw.augmented_kind() {
                0b00 => Self::Pps(Pps(value)),
                0b01 => Self::EprAvs(EprAvs(value)),
                _ => Self::Unknown(raw),
            },
        }
    }
}

bitfield! {
    /// A fixed supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct FixedSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Fixed supply discriminator (00b).
        pub kind: u8 @ 30..=31,
        /// Dual-role power.
        pub dual_role_power: bool @ 29,
        /// USB suspend supported.
        pub usb_suspend_supported: bool @ 28,
        /// Unconstrained power.
        pub unconstrained_power: bool @ 27,
        /// USB communications capable.
        pub usb_communications_capable: bool @ 26,
        /// Dual-role data.
        pub dual_role_data: bool @ 25,
        /// Unchunked extended messages supported.
        pub unchunked_extended_messages_supported: bool @ 24,
        /// EPR mode capable.
        pub epr_mode_capable: bool @ 23,
        /// Peak current capability.
        pub peak_current: u8 @ 20..=21,
        /// Voltage in 50 mV units.
        pub raw_voltage: u16 @ 10..=19,
        /// Maximum current in 10 mA units.
        pub raw_max_current: u16 @ 0..=9,
    }
}

impl Default for FixedSupply {
    fn default() -> Self {
        Self::new()
    }
}

impl FixedSupply {
    /// A blank fixed supply object.
    pub fn new() -> Self {
        Self(0)
    }

    /// The supply's voltage.
    pub fn voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_voltage().into())
    }

    /// Set the voltage, truncated to the 50 mV grid.
    pub fn with_voltage(self, voltage: ElectricPotential) -> Self {
        self.with_raw_voltage((voltage.get::<_50millivolts>() & 0x3FF) as u16)
    }

    /// The maximum current the supply can deliver.
    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_current().into())
    }

    /// Set the maximum current, truncated to the 10 mA grid.
    pub fn with_max_current(self, current: ElectricCurrent) -> Self {
        self.with_raw_max_current((current.get::<centiampere>() & 0x3FF) as u16)
    }
}

bitfield! {
    /// A battery PDO. Classified and displayed, but not negotiated.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Battery(pub u32): Debug, FromStorage, IntoStorage {
        /// Battery discriminator (01b).
        pub kind: u8 @ 30..=31,
        /// Maximum voltage in 50 mV units.
        pub raw_max_voltage: u16 @ 20..=29,
        /// Minimum voltage in 50 mV units.
        pub raw_min_voltage: u16 @ 10..=19,
        /// Maximum allowable power in 250 mW units.
        pub raw_max_power: u16 @ 0..=9,
    }
}

impl Battery {
    /// The highest voltage the battery may present.
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_max_voltage().into())
    }

    /// The lowest voltage the battery may present.
    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_min_voltage().into())
    }

    /// The maximum allowable power.
    pub fn max_power(&self) -> Power {
        Power::new::<_250milliwatts>(self.raw_max_power().into())
    }
}

bitfield! {
    /// A variable supply PDO. Classified and displayed, but not negotiated.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct VariableSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Variable supply discriminator (10b).
        pub kind: u8 @ 30..=31,
        /// Maximum voltage in 50 mV units.
        pub raw_max_voltage: u16 @ 20..=29,
        /// Minimum voltage in 50 mV units.
        pub raw_min_voltage: u16 @ 10..=19,
        /// Maximum current in 10 mA units.
        pub raw_max_current: u16 @ 0..=9,
    }
}

impl VariableSupply {
    /// The highest voltage the supply may present.
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_max_voltage().into())
    }

    /// The lowest voltage the supply may present.
    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_min_voltage().into())
    }

    /// The maximum current the supply can deliver.
    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_current().into())
    }
}

bitfield! {
    /// A programmable power supply (PPS) PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Pps(pub u32): Debug, FromStorage, IntoStorage {
        /// Augmented discriminator (11b).
        pub kind: u8 @ 30..=31,
        /// PPS sub-discriminator (00b).
        pub augmented_kind: u8 @ 28..=29,
        /// Whether the supply limits output power.
        pub power_limited: bool @ 27,
        /// Maximum voltage in 100 mV units.
        pub raw_max_voltage: u8 @ 17..=24,
        /// Minimum voltage in 100 mV units.
        pub raw_min_voltage: u8 @ 8..=15,
        /// Maximum current in 50 mA units.
        pub raw_max_current: u8 @ 0..=6,
    }
}

impl Default for Pps {
    fn default() -> Self {
        Self::new()
    }
}

impl Pps {
    /// A blank PPS object with the augmented discriminator bits set.
    pub fn new() -> Self {
        Self(0).with_kind(0b11).with_augmented_kind(0b00)
    }

    /// The upper end of the programmable voltage range.
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<decivolt>(self.raw_max_voltage().into())
    }

    /// Set the maximum voltage, truncated to the 100 mV grid.
    pub fn with_max_voltage(self, voltage: ElectricPotential) -> Self {
        self.with_raw_max_voltage((voltage.get::<decivolt>() & 0xFF) as u8)
    }

    /// The lower end of the programmable voltage range.
    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<decivolt>(self.raw_min_voltage().into())
    }

    /// Set the minimum voltage, truncated to the 100 mV grid.
    pub fn with_min_voltage(self, voltage: ElectricPotential) -> Self {
        self.with_raw_min_voltage((voltage.get::<decivolt>() & 0xFF) as u8)
    }

    /// The maximum current the supply can deliver.
    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<_50milliamperes>(self.raw_max_current().into())
    }

    /// Set the maximum current, truncated to the 50 mA grid.
    pub fn with_max_current(self, current: ElectricCurrent) -> Self {
        self.with_raw_max_current((current.get::<_50milliamperes>() & 0x7F) as u8)
    }
}

bitfield! {
    /// An EPR adjustable voltage supply PDO. Classified only; EPR operation
    /// is out of scope for this sink.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct EprAvs(pub u32): Debug, FromStorage, IntoStorage {
        /// Augmented discriminator (11b).
        pub kind: u8 @ 30..=31,
        /// EPR AVS sub-discriminator (01b).
        pub augmented_kind: u8 @ 28..=29,
        /// Peak current capability.
        pub peak_current: u8 @ 26..=27,
        /// Maximum voltage in 100 mV units.
        pub raw_max_voltage: u16 @ 17..=25,
        /// Minimum voltage in 100 mV units.
        pub raw_min_voltage: u8 @ 8..=15,
        /// Power delivery power in 1 W units.
        pub raw_pd_power: u8 @ 0..=7,
    }
}

impl EprAvs {
    /// The upper end of the adjustable voltage range.
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<decivolt>(self.raw_max_voltage().into())
    }

    /// The lower end of the adjustable voltage range.
    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<decivolt>(self.raw_min_voltage().into())
    }

    /// The supply's power delivery power rating.
    pub fn pd_power(&self) -> Power {
        Power::new::<watt>(self.raw_pd_power().into())
    }
}

#[cfg(test)]
mod tests {
    use uom::si::electric_current::milliampere;
    use uom::si::electric_potential::millivolt;
    use uom::si::power::milliwatt;

    use super::{Battery, FixedSupply, PowerDataObject, Pps};
    use super::{ElectricCurrent, ElectricPotential};

    fn mv(value: u32) -> ElectricPotential {
        ElectricPotential::new::<millivolt>(value)
    }

    fn ma(value: u32) -> ElectricCurrent {
        ElectricCurrent::new::<milliampere>(value)
    }

    #[test]
    fn fixed_supply_round_trips_on_the_grid() {
        for millivolts in (0..=51150).step_by(50) {
            let supply = FixedSupply::new().with_voltage(mv(millivolts));
            assert_eq!(supply.voltage().get::<millivolt>(), millivolts);
        }
        for milliamps in (0..=10230).step_by(10) {
            let supply = FixedSupply::new().with_max_current(ma(milliamps));
            assert_eq!(supply.max_current().get::<milliampere>(), milliamps);
        }
    }

    #[test]
    fn fixed_supply_setters_truncate_and_mask() {
        // 5120 mV is not on the 50 mV grid; it truncates down.
        let supply = FixedSupply::new().with_voltage(mv(5120));
        assert_eq!(supply.voltage().get::<millivolt>(), 5100);

        // An over-range voltage only touches the voltage field.
        let supply = FixedSupply(0xFFFF_FFFF).with_voltage(mv(60000));
        assert_eq!(supply.0 & !(0x3FF << 10), 0xFFFF_FFFF & !(0x3FF << 10));
        assert_eq!(supply.raw_voltage(), (60000 / 50) & 0x3FF);
    }

    #[test]
    fn pps_round_trips_on_the_grid() {
        for millivolts in (0..=25500).step_by(100) {
            let supply = Pps::new()
                .with_min_voltage(mv(millivolts))
                .with_max_voltage(mv(millivolts));
            assert_eq!(supply.min_voltage().get::<millivolt>(), millivolts);
            assert_eq!(supply.max_voltage().get::<millivolt>(), millivolts);
        }
        for milliamps in (0..=6350).step_by(50) {
            let supply = Pps::new().with_max_current(ma(milliamps));
            assert_eq!(supply.max_current().get::<milliampere>(), milliamps);
        }
    }

    #[test]
    fn fresh_pps_sets_the_augmented_discriminator() {
        let supply = Pps::new();
        assert_eq!(supply.0 >> 30, 0b11);
        assert_eq!((supply.0 >> 28) & 0b11, 0b00);
        assert_eq!(
            PowerDataObject::from_raw(supply.0),
            PowerDataObject::Pps(supply)
        );
    }

    #[test]
    fn classification_follows_the_discriminators() {
        assert!(matches!(
            PowerDataObject::from_raw(0x0801_912C),
            PowerDataObject::FixedSupply(_)
        ));
        assert!(matches!(
            PowerDataObject::from_raw(0b01 << 30),
            PowerDataObject::Battery(_)
        ));
        assert!(matches!(
            PowerDataObject::from_raw(0b10 << 30),
            PowerDataObject::VariableSupply(_)
        ));
        assert!(matches!(
            PowerDataObject::from_raw(0b11 << 30),
            PowerDataObject::Pps(_)
        ));
        assert!(matches!(
            PowerDataObject::from_raw(0b11 << 30 | 0b01 << 28),
            PowerDataObject::EprAvs(_)
        ));
        assert!(matches!(
            PowerDataObject::from_raw(0b11 << 30 | 0b10 << 28),
            PowerDataObject::Unknown(_)
        ));
    }

    #[test]
    fn battery_fields_decode() {
        // 4.2 V to 12.6 V at 45 W.
        let battery = Battery((252 << 20) | (84 << 10) | 180);
        assert_eq!(battery.max_voltage().get::<millivolt>(), 12600);
        assert_eq!(battery.min_voltage().get::<millivolt>(), 4200);
        assert_eq!(battery.max_power().get::<milliwatt>(), 45000);
    }
}
