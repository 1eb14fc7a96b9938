//! A USB Type-C Power Delivery sink stack.
//!
//! The stack negotiates a voltage/current profile with an attached USB-C
//! power source by exchanging Power Delivery messages through a Type-C port
//! controller IC. It consists of
//! - a bit-exact [message codec](message) for PD headers, power data objects
//!   and request data objects,
//! - a [sink policy engine](sink::policy_engine) that drives the contract
//!   lifecycle against a [`PortController`],
//! - pluggable [device policy managers](dpm) that decide which offered
//!   profile to request.
//!
//! Concrete port controller drivers (such as the FUSB302 driver) live in
//! separate crates and only need to implement [`PortController`].

#![warn(missing_docs)]

pub mod counters;
pub mod dpm;
pub mod event;
pub mod message;
pub mod sink;
pub mod timers;

#[cfg(test)]
pub(crate) mod dummy;

#[macro_use]
extern crate uom;

use embedded_hal::i2c;

pub use crate::event::{Event, EventSet};
pub use crate::message::units;
use crate::message::Message;

/// Errors reported by port controllers.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// All transmission retries failed, or the hardware reported retry
    /// exhaustion.
    #[error("failed to send pd message")]
    TxFailed,

    /// No more messages are queued. This is a normal control-flow signal,
    /// not a failure.
    #[error("no more messages to read")]
    RxEmpty,

    /// CC detection settled on neither of the two sink orientations after
    /// toggling completed.
    #[error("invalid cc state")]
    InvalidCcState,

    /// A lower-level I2C error surfaced from the driver.
    #[error("i2c bus error: {0}")]
    Bus(i2c::ErrorKind),
}

/// Interface to a device, often an IC such as the FUSB302, that operates a
/// USB-C port in Power Delivery sink mode.
///
/// Implementations cover the physical and part of the protocol layer: the
/// whole atomic message sequence including CRC handling, GoodCRC matching
/// and retries. Message ID counters are tracked in the policy engine.
///
/// After [`init`](PortController::init), the port must be configured for
/// sink operation, detect the CC polarity upon attachment, and report host
/// current advertised by non-PD sources as `Power*` events.
///
/// Implementations should avoid heap allocation after construction; they may
/// be running on microcontrollers where allocation is expensive or
/// unavailable.
pub trait PortController {
    /// (Re-)initialize the controller to a known working state.
    ///
    /// Must be called at least once before any other method, and may be
    /// called again later to bring the controller back to its initial state,
    /// for instance after a reset.
    fn init(&mut self) -> Result<(), Error>;

    /// Send a message to the port partner.
    ///
    /// The CRC is calculated and appended by the implementation. Blocks
    /// until a GoodCRC response was received, or fails with
    /// [`Error::TxFailed`] once all retries are exhausted.
    fn tx(&mut self, message: Message) -> Result<(), Error>;

    /// Return a single received message, or [`Error::RxEmpty`] if none are
    /// left.
    ///
    /// GoodCRC messages are discarded internally and never returned.
    fn rx(&mut self) -> Result<Message, Error>;

    /// Send hard reset signalling to the port partner, blocking until the
    /// send is complete.
    fn send_hard_reset(&mut self) -> Result<(), Error>;

    /// Process pending hardware interrupts and report the resulting events.
    ///
    /// The policy engine calls this on every loop iteration. Received
    /// messages must be moved into an internal queue here and announced with
    /// [`Event::Rx`]; events generated outside of `alert` must be cached and
    /// reported on the next call.
    fn alert(&mut self) -> Result<EventSet, Error>;
}

/// Power role of a port, as encoded in message headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerRole {
    /// Consumes power.
    Sink,
    /// Provides power.
    Source,
}

impl From<bool> for PowerRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Sink,
            true => Self::Source,
        }
    }
}

impl From<PowerRole> for bool {
    fn from(role: PowerRole) -> bool {
        match role {
            PowerRole::Sink => false,
            PowerRole::Source => true,
        }
    }
}

/// Data role of a port, as encoded in message headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataRole {
    /// Upstream facing port.
    Ufp,
    /// Downstream facing port.
    Dfp,
}

impl From<bool> for DataRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Ufp,
            true => Self::Dfp,
        }
    }
}

impl From<DataRole> for bool {
    fn from(role: DataRole) -> bool {
        match role {
            DataRole::Ufp => false,
            DataRole::Dfp => true,
        }
    }
}
