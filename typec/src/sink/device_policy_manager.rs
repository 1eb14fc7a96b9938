//! The device policy manager (DPM) decides which offered power profile, if
//! any, the sink should request.

use uom::si::electric_current::milliampere;
use uom::si::electric_potential::millivolt;

use crate::message::pdo::RawPowerDataObject;
use crate::message::request::RawRequest;
use crate::message::units::{ElectricCurrent, ElectricPotential};

/// Chooses a power profile from received source capabilities.
///
/// The policy engine consults the evaluator every time capabilities arrive,
/// including the synthetic 5 V profile it fabricates for non-PD sources.
/// Implementations must respond promptly, since the call sits in the
/// engine's polling loop, and must not retain the slice past the call,
/// though they are free to scribble on it.
pub trait CapabilityEvaluator {
    /// Evaluate `pdos` (PD position 1 is at index 0) and return the request
    /// to send, or [`RawRequest::EMPTY`] if no profile is acceptable.
    fn evaluate_capabilities(&mut self, pdos: &mut [RawPowerDataObject]) -> RawRequest;
}

impl<F> CapabilityEvaluator for F
where
    F: FnMut(&mut [RawPowerDataObject]) -> RawRequest,
{
    fn evaluate_capabilities(&mut self, pdos: &mut [RawPowerDataObject]) -> RawRequest {
        self(pdos)
    }
}

/// Snapshot of the negotiated supply, delivered through the power-change
/// callback.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PowerStatus {
    /// Whether negotiated power is available.
    pub on: bool,
    /// The negotiated voltage; for programmable supplies, the requested
    /// output voltage.
    pub voltage: ElectricPotential,
    /// The maximum current the source agreed to deliver.
    pub max_current: ElectricCurrent,
    /// True when the supply is programmable and may fold the voltage back
    /// to hold the negotiated current, instead of holding the voltage.
    pub current_source: bool,
}

impl PowerStatus {
    /// The status reported while no contract is in place.
    pub fn off() -> Self {
        Self {
            on: false,
            voltage: ElectricPotential::new::<millivolt>(0),
            max_current: ElectricCurrent::new::<milliampere>(0),
            current_source: false,
        }
    }
}
