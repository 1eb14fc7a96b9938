//! Ready-made device policy managers for common use.
//!
//! All policies are pure functions over the offered profile list and can be
//! composed with [`Fallback`] or wrapped in a [`Logger`].

use core::fmt::{self, Write};

use uom::si::electric_current::milliampere;
use uom::si::electric_potential::millivolt;
use uom::si::power::milliwatt;

use crate::message::pdo::{PowerDataObject, Pps, RawPowerDataObject};
use crate::message::request::{FixedRequest, PpsRequest, RawRequest};
use crate::message::units::{ElectricCurrent, ElectricPotential, Power};
use crate::sink::device_policy_manager::CapabilityEvaluator;

/// Current headroom demanded from programmable profiles beyond the
/// operating current, so the supply does not fold back right at the
/// operating point.
const PPS_CURRENT_MARGIN_MA: u32 = 150;

/// A capability evaluator whose parameters can be checked before
/// installation.
pub trait Policy: CapabilityEvaluator {
    /// Check the policy parameters for consistency.
    fn validate(&self) -> Result<(), PolicyError>;
}

/// Errors reported by [`Policy::validate`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    /// A current lies outside the range the policy supports.
    #[error("current outside the supported range")]
    CurrentOutOfRange,

    /// A voltage lies outside 3300 mV..=21000 mV.
    #[error("voltage must be >= 3300 mV and <= 21000 mV")]
    VoltageOutOfRange,

    /// The requested power exceeds what SPR power delivery can provide.
    #[error("power must be <= 100 W")]
    PowerOutOfRange,

    /// The maximum current is below the minimum current.
    #[error("max current must be >= min current")]
    InvertedCurrentRange,

    /// The maximum voltage is below the minimum voltage.
    #[error("max voltage must be >= min voltage")]
    InvertedVoltageRange,
}

fn validate_voltage_window(
    min: ElectricPotential,
    max: ElectricPotential,
) -> Result<(), PolicyError> {
    let min_mv = min.get::<millivolt>();
    let max_mv = max.get::<millivolt>();
    if min_mv < 3300 || max_mv < 3300 || min_mv > 21000 || max_mv > 21000 {
        return Err(PolicyError::VoltageOutOfRange);
    }
    if min_mv > max_mv {
        return Err(PolicyError::InvertedVoltageRange);
    }
    Ok(())
}

/// Clamp a policy's voltage window against a programmable profile's range.
/// `None` if the two do not overlap.
fn clamp_window(min_mv: u32, max_mv: u32, supply: &Pps) -> Option<(u32, u32)> {
    let low = min_mv.max(supply.min_voltage().get::<millivolt>());
    let high = max_mv.min(supply.max_voltage().get::<millivolt>());
    (low <= high).then_some((low, high))
}

/// Strict comparison, so that on equal voltages the earlier object position
/// wins.
fn improves(prefer_lower: bool, voltage: u32, best: u32) -> bool {
    if prefer_lower {
        voltage < best
    } else {
        voltage > best
    }
}

fn initial_best(prefer_lower: bool) -> u32 {
    if prefer_lower {
        u32::MAX
    } else {
        0
    }
}

fn fixed_request(index: usize, current_ma: u32) -> RawRequest {
    FixedRequest::new()
        .with_object_position(index as u8 + 1)
        .with_operating_current(ElectricCurrent::new::<milliampere>(current_ma))
        .with_max_operating_current(ElectricCurrent::new::<milliampere>(current_ma))
        .into()
}

fn pps_request(index: usize, voltage_mv: u32, current_ma: u32) -> RawRequest {
    PpsRequest::new()
        .with_object_position(index as u8 + 1)
        .with_output_voltage(ElectricPotential::new::<millivolt>(voltage_mv))
        .with_operating_current(ElectricCurrent::new::<milliampere>(current_ma))
        .into()
}

/// The best fixed and programmable candidates seen so far, under a voltage
/// preference.
struct BestPick {
    prefer_lower: bool,
    fixed: RawRequest,
    fixed_voltage: u32,
    pps: RawRequest,
    pps_voltage: u32,
}

impl BestPick {
    fn new(prefer_lower: bool) -> Self {
        Self {
            prefer_lower,
            fixed: RawRequest::EMPTY,
            fixed_voltage: initial_best(prefer_lower),
            pps: RawRequest::EMPTY,
            pps_voltage: initial_best(prefer_lower),
        }
    }

    fn offer_fixed(&mut self, voltage: u32, request: RawRequest) {
        if improves(self.prefer_lower, voltage, self.fixed_voltage) {
            self.fixed = request;
            self.fixed_voltage = voltage;
        }
    }

    fn offer_pps(&mut self, voltage: u32, request: RawRequest) {
        if improves(self.prefer_lower, voltage, self.pps_voltage) {
            self.pps = request;
            self.pps_voltage = voltage;
        }
    }

    /// Resolve to one request: whichever class found something, with
    /// `prefer_pps` breaking the tie when both did.
    fn resolve(self, prefer_pps: bool) -> RawRequest {
        if self.fixed.is_empty() {
            return self.pps;
        }
        if self.pps.is_empty() {
            return self.fixed;
        }
        if prefer_pps {
            self.pps
        } else {
            self.fixed
        }
    }
}

/// Constant voltage policy: the source maintains the negotiated voltage and
/// can supply at least the requested current at it.
///
/// Fixed profiles are preferred; when none qualifies, programmable (PPS)
/// profiles are considered with a 150 mA current margin, to keep the supply
/// from folding back near the operating current.
#[derive(Clone, Copy, Debug)]
pub struct CvPolicy {
    /// Minimum accepted voltage.
    pub min_voltage: ElectricPotential,
    /// Maximum accepted voltage.
    pub max_voltage: ElectricPotential,
    /// Current the source must be able to supply at the negotiated voltage.
    pub current: ElectricCurrent,
    /// Prefer lower-voltage profiles within the window over higher ones.
    pub prefer_lower_voltage: bool,
    /// Prefer programmable profiles over fixed ones.
    pub prefer_pps: bool,
}

impl CapabilityEvaluator for CvPolicy {
    fn evaluate_capabilities(&mut self, pdos: &mut [RawPowerDataObject]) -> RawRequest {
        let min_mv = self.min_voltage.get::<millivolt>();
        let max_mv = self.max_voltage.get::<millivolt>();
        let current_ma = self.current.get::<milliampere>();

        let mut best = BestPick::new(self.prefer_lower_voltage);
        for (index, pdo) in pdos.iter().enumerate() {
            match pdo.typed() {
                PowerDataObject::FixedSupply(supply) => {
                    let voltage = supply.voltage().get::<millivolt>();
                    if voltage >= min_mv
                        && voltage <= max_mv
                        && supply.max_current().get::<milliampere>() >= current_ma
                    {
                        best.offer_fixed(voltage, fixed_request(index, current_ma));
                    }
                }
                PowerDataObject::Pps(supply) => {
                    let Some((low, high)) = clamp_window(min_mv, max_mv, &supply) else {
                        continue;
                    };
                    if supply.max_current().get::<milliampere>()
                        >= current_ma + PPS_CURRENT_MARGIN_MA
                    {
                        let voltage = if self.prefer_lower_voltage { low } else { high };
                        best.offer_pps(voltage, pps_request(index, voltage, current_ma));
                    }
                }
                _ => {}
            }
        }
        best.resolve(self.prefer_pps)
    }
}

impl Policy for CvPolicy {
    fn validate(&self) -> Result<(), PolicyError> {
        if self.current.get::<milliampere>() > 5000 {
            return Err(PolicyError::CurrentOutOfRange);
        }
        validate_voltage_window(self.min_voltage, self.max_voltage)
    }
}

/// Constant current policy: the source drops the voltage as needed to keep
/// the current below the negotiated level, and raises it back up to the
/// negotiated voltage under lighter loads. Useful for driving LEDs or
/// charging cells directly.
///
/// Constant current operation only exists on sources that implement the
/// programmable power supply (PPS) part of the standard, and even then not
/// all of them regulate properly. Verify a specific charger under load
/// before relying on it.
#[derive(Clone, Copy, Debug)]
pub struct CcPolicy {
    /// Minimum accepted voltage while the current stays below the maximum.
    pub min_voltage: ElectricPotential,
    /// Maximum accepted voltage while the current stays below the maximum.
    pub max_voltage: ElectricPotential,
    /// Lowest acceptable current limit. Per the standard, PPS currents must
    /// be at least 1000 mA.
    pub min_current: ElectricCurrent,
    /// Highest useful current limit; higher available currents are clamped
    /// to it. Preferred over lower ones.
    pub max_current: ElectricCurrent,
    /// Prefer lower-voltage profiles within the window over higher ones.
    pub prefer_lower_voltage: bool,
}

impl CapabilityEvaluator for CcPolicy {
    fn evaluate_capabilities(&mut self, pdos: &mut [RawPowerDataObject]) -> RawRequest {
        let min_mv = self.min_voltage.get::<millivolt>();
        let max_mv = self.max_voltage.get::<millivolt>();
        let min_ma = self.min_current.get::<milliampere>();
        let max_ma = self.max_current.get::<milliampere>();

        let mut choice = RawRequest::EMPTY;
        let mut best_voltage = initial_best(self.prefer_lower_voltage);
        for (index, pdo) in pdos.iter().enumerate() {
            let PowerDataObject::Pps(supply) = pdo.typed() else {
                continue;
            };
            let Some((low, high)) = clamp_window(min_mv, max_mv, &supply) else {
                continue;
            };
            let available = supply.max_current().get::<milliampere>();
            if available < min_ma {
                continue;
            }

            let current = available.min(max_ma);
            let voltage = if self.prefer_lower_voltage { low } else { high };
            if improves(self.prefer_lower_voltage, voltage, best_voltage) {
                choice = pps_request(index, voltage, current);
                best_voltage = voltage;
            }
        }
        choice
    }
}

impl Policy for CcPolicy {
    fn validate(&self) -> Result<(), PolicyError> {
        let min_ma = self.min_current.get::<milliampere>();
        let max_ma = self.max_current.get::<milliampere>();
        if min_ma < 1000 || max_ma < 1000 || min_ma > 5000 || max_ma > 5000 {
            return Err(PolicyError::CurrentOutOfRange);
        }
        if min_ma > max_ma {
            return Err(PolicyError::InvertedCurrentRange);
        }
        validate_voltage_window(self.min_voltage, self.max_voltage)
    }
}

/// Constant power policy: the source must be able to supply the given power
/// at the negotiated voltage. A special case of [`CvPolicy`] where the
/// current is derived from power and voltage per candidate.
#[derive(Clone, Copy, Debug)]
pub struct CpPolicy {
    /// Minimum accepted voltage.
    pub min_voltage: ElectricPotential,
    /// Maximum accepted voltage.
    pub max_voltage: ElectricPotential,
    /// Power the source must be able to supply at the negotiated voltage.
    pub power: Power,
    /// Prefer lower-voltage profiles within the window over higher ones.
    pub prefer_lower_voltage: bool,
    /// Prefer programmable profiles over fixed ones.
    pub prefer_pps: bool,
}

impl CapabilityEvaluator for CpPolicy {
    fn evaluate_capabilities(&mut self, pdos: &mut [RawPowerDataObject]) -> RawRequest {
        let min_mv = self.min_voltage.get::<millivolt>();
        let max_mv = self.max_voltage.get::<millivolt>();
        let power_mw = self.power.get::<milliwatt>();

        let mut best = BestPick::new(self.prefer_lower_voltage);
        for (index, pdo) in pdos.iter().enumerate() {
            match pdo.typed() {
                PowerDataObject::FixedSupply(supply) => {
                    let voltage = supply.voltage().get::<millivolt>();
                    if voltage == 0 || voltage < min_mv || voltage > max_mv {
                        continue;
                    }
                    // mA = mW * 1000 / mV
                    let required = power_mw * 1000 / voltage;
                    if supply.max_current().get::<milliampere>() >= required {
                        best.offer_fixed(voltage, fixed_request(index, required));
                    }
                }
                PowerDataObject::Pps(supply) => {
                    let Some((low, high)) = clamp_window(min_mv, max_mv, &supply) else {
                        continue;
                    };
                    let available = supply.max_current().get::<milliampere>();
                    if available <= PPS_CURRENT_MARGIN_MA || high == 0 {
                        continue;
                    }

                    if self.prefer_lower_voltage {
                        // The lowest voltage at which the profile still
                        // covers the power, margin included.
                        let voltage = low.max(power_mw * 1000 / (available - PPS_CURRENT_MARGIN_MA));
                        if voltage > 0 && voltage <= high {
                            best.offer_pps(voltage, pps_request(index, voltage, power_mw * 1000 / voltage));
                        }
                    } else {
                        let required = power_mw * 1000 / high + PPS_CURRENT_MARGIN_MA;
                        if required <= available {
                            best.offer_pps(high, pps_request(index, high, required));
                        }
                    }
                }
                _ => {}
            }
        }
        best.resolve(self.prefer_pps)
    }
}

impl Policy for CpPolicy {
    fn validate(&self) -> Result<(), PolicyError> {
        if self.power.get::<milliwatt>() > 100_000 {
            return Err(PolicyError::PowerOutOfRange);
        }
        validate_voltage_window(self.min_voltage, self.max_voltage)
    }
}

/// Consults a list of policies in order; the first non-empty request wins.
pub struct Fallback(pub Vec<Box<dyn Policy + Send>>);

impl CapabilityEvaluator for Fallback {
    fn evaluate_capabilities(&mut self, pdos: &mut [RawPowerDataObject]) -> RawRequest {
        for policy in &mut self.0 {
            let request = policy.evaluate_capabilities(pdos);
            if !request.is_empty() {
                return request;
            }
        }
        RawRequest::EMPTY
    }
}

impl Policy for Fallback {
    fn validate(&self) -> Result<(), PolicyError> {
        for policy in &self.0 {
            policy.validate()?;
        }
        Ok(())
    }
}

/// Rejects every offered profile. Useful as the base of a [`Logger`] that
/// should only observe.
#[derive(Clone, Copy, Debug, Default)]
pub struct RejectAll;

impl CapabilityEvaluator for RejectAll {
    fn evaluate_capabilities(&mut self, _pdos: &mut [RawPowerDataObject]) -> RawRequest {
        RawRequest::EMPTY
    }
}

impl Policy for RejectAll {
    fn validate(&self) -> Result<(), PolicyError> {
        Ok(())
    }
}

/// Passthrough policy that writes a textual description of the offered
/// profiles before delegating to its base. Mostly used for debugging.
pub struct Logger<W: Write, P> {
    writer: W,
    line_sep: &'static str,
    base: P,
}

impl<W: Write, P> Logger<W, P> {
    /// Create a logger that writes to `writer`, terminating each line with
    /// `line_sep` (commonly `"\n"`, or `"\r\n"` for serial consoles).
    pub fn new(writer: W, line_sep: &'static str, base: P) -> Self {
        Self {
            writer,
            line_sep,
            base,
        }
    }

    /// The underlying writer.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    fn dump(&mut self, pdos: &[RawPowerDataObject]) -> fmt::Result {
        write!(
            self.writer,
            "Received {} profiles:{}",
            pdos.len(),
            self.line_sep
        )?;
        for (index, pdo) in pdos.iter().enumerate() {
            write!(self.writer, "  {}) ", index + 1)?;
            match pdo.typed() {
                PowerDataObject::FixedSupply(supply) => write!(
                    self.writer,
                    "Fixed {:.1}V @ max. {:.1}A",
                    supply.voltage().get::<millivolt>() as f32 / 1000.0,
                    supply.max_current().get::<milliampere>() as f32 / 1000.0,
                )?,
                PowerDataObject::Pps(supply) => {
                    let limited = if supply.power_limited() {
                        " (power limited)"
                    } else {
                        ""
                    };
                    write!(
                        self.writer,
                        "Programmable {:.1}-{:.1}V @ max. {:.1}A{}",
                        supply.min_voltage().get::<millivolt>() as f32 / 1000.0,
                        supply.max_voltage().get::<millivolt>() as f32 / 1000.0,
                        supply.max_current().get::<milliampere>() as f32 / 1000.0,
                        limited,
                    )?;
                }
                PowerDataObject::VariableSupply(_) => {
                    write!(self.writer, "Variable (not supported)")?
                }
                PowerDataObject::Battery(_) => write!(self.writer, "Battery (not supported)")?,
                PowerDataObject::EprAvs(_) => write!(self.writer, "EPR AVS (not supported)")?,
                PowerDataObject::Unknown(_) => write!(self.writer, "INVALID!")?,
            }
            self.writer.write_str(self.line_sep)?;
        }
        Ok(())
    }
}

impl<W: Write, P: CapabilityEvaluator> CapabilityEvaluator for Logger<W, P> {
    fn evaluate_capabilities(&mut self, pdos: &mut [RawPowerDataObject]) -> RawRequest {
        if self.dump(pdos).is_err() {
            log::warn!("writing the capability dump failed");
        }
        self.base.evaluate_capabilities(pdos)
    }
}

impl<W: Write, P: Policy> Policy for Logger<W, P> {
    fn validate(&self) -> Result<(), PolicyError> {
        self.base.validate()
    }
}

#[cfg(test)]
mod tests {
    use uom::si::electric_current::milliampere;
    use uom::si::electric_potential::millivolt;
    use uom::si::power::milliwatt;

    use super::{
        CapabilityEvaluator, CcPolicy, CpPolicy, CvPolicy, Fallback, Logger, Policy, PolicyError,
        RejectAll,
    };
    use crate::message::pdo::{FixedSupply, Pps, RawPowerDataObject};
    use crate::message::request::{FixedRequest, PpsRequest};
    use crate::message::units::{ElectricCurrent, ElectricPotential, Power};

    fn mv(value: u32) -> ElectricPotential {
        ElectricPotential::new::<millivolt>(value)
    }

    fn ma(value: u32) -> ElectricCurrent {
        ElectricCurrent::new::<milliampere>(value)
    }

    fn mw(value: u32) -> Power {
        Power::new::<milliwatt>(value)
    }

    fn fixed(millivolts: u32, milliamps: u32) -> RawPowerDataObject {
        RawPowerDataObject(
            FixedSupply::new()
                .with_voltage(mv(millivolts))
                .with_max_current(ma(milliamps))
                .0,
        )
    }

    fn pps(min_mv: u32, max_mv: u32, milliamps: u32) -> RawPowerDataObject {
        RawPowerDataObject(
            Pps::new()
                .with_min_voltage(mv(min_mv))
                .with_max_voltage(mv(max_mv))
                .with_max_current(ma(milliamps))
                .0,
        )
    }

    fn cv(min_mv: u32, max_mv: u32, milliamps: u32) -> CvPolicy {
        CvPolicy {
            min_voltage: mv(min_mv),
            max_voltage: mv(max_mv),
            current: ma(milliamps),
            prefer_lower_voltage: false,
            prefer_pps: false,
        }
    }

    #[test]
    fn cv_picks_the_highest_qualifying_fixed_profile() {
        let mut pdos = [fixed(5000, 3000), fixed(9000, 3000), fixed(20000, 5000)];
        let request = cv(3300, 12000, 3000).evaluate_capabilities(&mut pdos);

        assert_eq!(request.object_position(), 2);
        let request = FixedRequest(request.0);
        assert_eq!(request.operating_current().get::<milliampere>(), 3000);
        assert_eq!(request.max_operating_current().get::<milliampere>(), 3000);
    }

    #[test]
    fn cv_can_prefer_the_lowest_voltage() {
        let mut pdos = [fixed(5000, 3000), fixed(9000, 3000)];
        let mut policy = cv(3300, 12000, 2000);
        policy.prefer_lower_voltage = true;

        assert_eq!(policy.evaluate_capabilities(&mut pdos).object_position(), 1);
    }

    #[test]
    fn cv_first_position_wins_voltage_ties() {
        let mut pdos = [fixed(9000, 3000), fixed(9000, 5000)];
        let request = cv(8000, 10000, 2000).evaluate_capabilities(&mut pdos);
        assert_eq!(request.object_position(), 1);
    }

    #[test]
    fn cv_skips_profiles_with_insufficient_current() {
        let mut pdos = [fixed(5000, 3000), fixed(9000, 1000)];
        let request = cv(3300, 12000, 3000).evaluate_capabilities(&mut pdos);
        assert_eq!(request.object_position(), 1);
    }

    #[test]
    fn cv_rejects_when_nothing_qualifies() {
        let mut pdos = [fixed(5000, 3000)];
        assert!(cv(8000, 10000, 3000)
            .evaluate_capabilities(&mut pdos)
            .is_empty());
    }

    #[test]
    fn cv_falls_back_to_pps_with_margin() {
        // The fixed profile misses the window; PPS must cover the desired
        // current plus 150 mA.
        let mut pdos = [fixed(5000, 3000), pps(3300, 11000, 3150)];
        let request = cv(8000, 10000, 3000).evaluate_capabilities(&mut pdos);

        assert_eq!(request.object_position(), 2);
        let request = PpsRequest(request.0);
        assert_eq!(request.output_voltage().get::<millivolt>(), 10000);
        assert_eq!(request.operating_current().get::<milliampere>(), 3000);

        let mut pdos = [fixed(5000, 3000), pps(3300, 11000, 3100)];
        assert!(cv(8000, 10000, 3000)
            .evaluate_capabilities(&mut pdos)
            .is_empty());
    }

    #[test]
    fn cv_prefers_fixed_over_pps_unless_told_otherwise() {
        let mut pdos = [fixed(9000, 3000), pps(3300, 11000, 5000)];
        let mut policy = cv(8000, 10000, 2000);
        assert_eq!(policy.evaluate_capabilities(&mut pdos).object_position(), 1);

        policy.prefer_pps = true;
        assert_eq!(policy.evaluate_capabilities(&mut pdos).object_position(), 2);
    }

    #[test]
    fn cv_validates_its_parameters() {
        assert_eq!(cv(3300, 21000, 5000).validate(), Ok(()));
        assert_eq!(
            cv(3300, 21000, 5001).validate(),
            Err(PolicyError::CurrentOutOfRange)
        );
        assert_eq!(
            cv(3000, 21000, 1000).validate(),
            Err(PolicyError::VoltageOutOfRange)
        );
        assert_eq!(
            cv(9000, 5000, 1000).validate(),
            Err(PolicyError::InvertedVoltageRange)
        );
    }

    fn cc(min_mv: u32, max_mv: u32, min_ma: u32, max_ma: u32) -> CcPolicy {
        CcPolicy {
            min_voltage: mv(min_mv),
            max_voltage: mv(max_mv),
            min_current: ma(min_ma),
            max_current: ma(max_ma),
            prefer_lower_voltage: false,
        }
    }

    #[test]
    fn cc_requests_the_clamped_current_at_the_window_edge() {
        let mut pdos = [fixed(5000, 3000), pps(3300, 11000, 5000)];
        let request = cc(6000, 7000, 1000, 2000).evaluate_capabilities(&mut pdos);

        assert_eq!(request.object_position(), 2);
        let request = PpsRequest(request.0);
        assert_eq!(request.output_voltage().get::<millivolt>(), 7000);
        assert_eq!(request.operating_current().get::<milliampere>(), 2000);
    }

    #[test]
    fn cc_prefers_the_lower_window_edge_when_asked() {
        let mut pdos = [pps(3300, 11000, 5000)];
        let mut policy = cc(6000, 7000, 1000, 2000);
        policy.prefer_lower_voltage = true;

        let request = PpsRequest(policy.evaluate_capabilities(&mut pdos).0);
        assert_eq!(request.output_voltage().get::<millivolt>(), 6000);
    }

    #[test]
    fn cc_ignores_profiles_below_the_minimum_current() {
        let mut pdos = [pps(3300, 11000, 1000)];
        assert!(cc(6000, 7000, 2000, 3000)
            .evaluate_capabilities(&mut pdos)
            .is_empty());
    }

    #[test]
    fn cc_ignores_fixed_profiles() {
        let mut pdos = [fixed(6500, 5000)];
        assert!(cc(6000, 7000, 1000, 1000)
            .evaluate_capabilities(&mut pdos)
            .is_empty());
    }

    #[test]
    fn cc_validates_its_parameters() {
        assert_eq!(cc(3300, 21000, 1000, 5000).validate(), Ok(()));
        assert_eq!(
            cc(3300, 21000, 900, 5000).validate(),
            Err(PolicyError::CurrentOutOfRange)
        );
        assert_eq!(
            cc(3300, 21000, 1000, 5100).validate(),
            Err(PolicyError::CurrentOutOfRange)
        );
        assert_eq!(
            cc(3300, 21000, 2000, 1000).validate(),
            Err(PolicyError::InvertedCurrentRange)
        );
        assert_eq!(
            cc(3300, 22000, 1000, 1000).validate(),
            Err(PolicyError::VoltageOutOfRange)
        );
    }

    fn cp(min_mv: u32, max_mv: u32, milliwatts: u32) -> CpPolicy {
        CpPolicy {
            min_voltage: mv(min_mv),
            max_voltage: mv(max_mv),
            power: mw(milliwatts),
            prefer_lower_voltage: false,
            prefer_pps: false,
        }
    }

    #[test]
    fn cp_derives_the_current_from_power_and_voltage() {
        let mut pdos = [fixed(9000, 3000), fixed(20000, 5000)];
        let request = cp(15000, 21000, 60000).evaluate_capabilities(&mut pdos);

        assert_eq!(request.object_position(), 2);
        // 60 W at 20 V.
        let request = FixedRequest(request.0);
        assert_eq!(request.operating_current().get::<milliampere>(), 3000);
    }

    #[test]
    fn cp_skips_fixed_profiles_that_cannot_carry_the_power() {
        let mut pdos = [fixed(20000, 2000)];
        assert!(cp(15000, 21000, 60000)
            .evaluate_capabilities(&mut pdos)
            .is_empty());
    }

    #[test]
    fn cp_requests_pps_at_the_upper_window_edge() {
        let mut pdos = [pps(3300, 11000, 5000)];
        let request = cp(5000, 11000, 30000).evaluate_capabilities(&mut pdos);

        assert_eq!(request.object_position(), 1);
        let request = PpsRequest(request.0);
        assert_eq!(request.output_voltage().get::<millivolt>(), 11000);
        // 30 W / 11 V + 150 mA margin = 2877 mA, truncated to the 50 mA grid.
        assert_eq!(request.operating_current().get::<milliampere>(), 2850);
    }

    #[test]
    fn cp_finds_the_lowest_viable_pps_voltage() {
        let mut pdos = [pps(3300, 11000, 5000)];
        let mut policy = cp(3300, 11000, 30000);
        policy.prefer_lower_voltage = true;

        let request = PpsRequest(policy.evaluate_capabilities(&mut pdos).0);
        // 30 W / (5 A - 150 mA) = 6185 mV, truncated to the 20 mV grid.
        assert_eq!(request.output_voltage().get::<millivolt>(), 6180);
        // 30 W / 6185 mV = 4850 mA.
        assert_eq!(request.operating_current().get::<milliampere>(), 4850);
    }

    #[test]
    fn cp_validates_its_parameters() {
        assert_eq!(cp(3300, 21000, 100_000).validate(), Ok(()));
        assert_eq!(
            cp(3300, 21000, 100_001).validate(),
            Err(PolicyError::PowerOutOfRange)
        );
        assert_eq!(
            cp(2000, 21000, 5000).validate(),
            Err(PolicyError::VoltageOutOfRange)
        );
    }

    #[test]
    fn fallback_takes_the_first_non_empty_answer() {
        let mut fallback = Fallback(vec![
            Box::new(cc(6000, 7000, 1000, 1000)),
            Box::new(cv(3300, 12000, 2000)),
        ]);

        // No PPS on offer: the CC policy passes, the CV policy picks 9 V.
        let mut pdos = [fixed(5000, 3000), fixed(9000, 3000)];
        assert_eq!(
            fallback.evaluate_capabilities(&mut pdos).object_position(),
            2
        );

        assert_eq!(fallback.validate(), Ok(()));
        let invalid = Fallback(vec![Box::new(cv(3300, 12000, 9000))]);
        assert_eq!(invalid.validate(), Err(PolicyError::CurrentOutOfRange));
    }

    #[test]
    fn logger_describes_profiles_and_delegates() {
        let mut pdos = [
            fixed(5000, 3000),
            pps(3300, 11000, 5000),
            RawPowerDataObject(0b01 << 30),
            RawPowerDataObject(0b11 << 30 | 0b01 << 28),
        ];
        let mut logger = Logger::new(String::new(), "\n", cv(3300, 12000, 2000));

        let request = logger.evaluate_capabilities(&mut pdos);
        assert_eq!(request.object_position(), 1);

        assert_eq!(
            logger.writer(),
            "Received 4 profiles:\n\
             \x20 1) Fixed 5.0V @ max. 3.0A\n\
             \x20 2) Programmable 3.3-11.0V @ max. 5.0A\n\
             \x20 3) Battery (not supported)\n\
             \x20 4) EPR AVS (not supported)\n"
        );
    }

    #[test]
    fn logger_without_a_base_rejects() {
        let mut pdos = [fixed(5000, 3000)];
        let mut logger = Logger::new(String::new(), "\n", RejectAll);
        assert!(logger.evaluate_capabilities(&mut pdos).is_empty());
        assert_eq!(logger.validate(), Ok(()));
    }
}
