//! Policy engine for a power delivery sink.
//!
//! Drives the PD contract lifecycle against a [`PortController`]: discovery,
//! capability evaluation, request, power transition, steady state, hard
//! reset. Profile selection is delegated to a pluggable
//! [`CapabilityEvaluator`]. See [8.3.3.3]
//!
//! The engine polls the port controller from a single blocking loop and
//! tolerates PD timing because its shortest timer is 32 ms. External threads
//! interact with the running loop through a [`Handle`].

use core::time::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, trace, warn};

use super::device_policy_manager::{CapabilityEvaluator, PowerStatus};
use crate::counters::{RxMessageId, TxMessageId};
use crate::dpm::{Policy, PolicyError};
use crate::event::{Event, EventSet};
use crate::message::header::{
    ControlMessageType, DataMessageType, Header, MessageType, Revision,
};
use crate::message::pdo::{FixedSupply, PowerDataObject, RawPowerDataObject};
use crate::message::request::{FixedRequest, PpsRequest, RawRequest};
use crate::message::units::{ElectricCurrent, ElectricPotential};
use crate::message::{Message, MAX_DATA_OBJECTS};
use crate::timers::{Clock, TimerType};
use crate::{DataRole, Error, PortController, PowerRole};


use uom::si::electric_current::milliampere;
use uom::si::electric_potential::millivolt;

/// Pause between polls when nothing is pending.
const LOOP_SLEEP: Duration = Duration::from_millis(3);

/// Sink states. Names follow the specification where one exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Startup,
    Discovery,
    WaitForCapabilities,
    EvaluateCapabilities,
    SelectCapabilities,
    TransitionSink,
    Ready,
    HardReset,
    /// Pseudo-state for non-PD sources: the Rp-advertised 5 V supply is
    /// offered to the device policy manager like any other capability, so
    /// that PD and non-PD sources look alike to device policy.
    NoPd,
}

type EvaluatorSlot = Mutex<Option<Box<dyn CapabilityEvaluator + Send>>>;
type CallbackSlot = Mutex<Option<Box<dyn FnMut(PowerStatus) + Send>>>;

/// State shared between the engine loop and [`Handle`]s on other threads.
struct Shared {
    events: Mutex<EventSet>,
    renegotiate: AtomicBool,
    evaluator: EvaluatorSlot,
    on_power_change: CallbackSlot,
}

impl Shared {
    fn new() -> Self {
        Self {
            events: Mutex::new(EventSet::EMPTY),
            renegotiate: AtomicBool::new(false),
            evaluator: Mutex::new(None),
            on_power_change: Mutex::new(None),
        }
    }

    fn add_event(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(event);
    }

    /// Consult the installed evaluator. Without one, every negotiation is
    /// rejected.
    fn evaluate(&self, pdos: &mut [RawPowerDataObject]) -> RawRequest {
        let mut slot = self.evaluator.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_mut() {
            Some(evaluator) => evaluator.evaluate_capabilities(pdos),
            None => RawRequest::EMPTY,
        }
    }

    fn notify(&self, status: PowerStatus) {
        let mut slot = self
            .on_power_change
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = slot.as_mut() {
            callback(status);
        }
    }
}

/// Cloneable, thread-safe control surface of a [`PolicyEngine`].
///
/// All methods may be called from any thread while the engine loop is
/// running; locks are held for pointer swaps and bit flips only.
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Handle {
    /// Install or remove the capability evaluator.
    ///
    /// With no evaluator installed, the engine rejects all power
    /// negotiations.
    pub fn set_capability_evaluator(
        &self,
        evaluator: Option<Box<dyn CapabilityEvaluator + Send>>,
    ) {
        *self
            .shared
            .evaluator
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = evaluator;
    }

    /// Validate `policy` and install it as the capability evaluator.
    ///
    /// With `renegotiate` set, additionally ask the engine to re-evaluate
    /// the source's capabilities under the new policy.
    pub fn set_policy<P>(&self, policy: P, renegotiate: bool) -> Result<(), PolicyError>
    where
        P: Policy + Send + 'static,
    {
        policy.validate()?;
        self.set_capability_evaluator(Some(Box::new(policy)));
        if renegotiate {
            self.renegotiate();
        }
        Ok(())
    }

    /// Install or remove the callback invoked whenever negotiated power
    /// becomes available or is lost.
    pub fn notify_on_power_change(&self, callback: Option<Box<dyn FnMut(PowerStatus) + Send>>) {
        *self
            .shared
            .on_power_change
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = callback;
    }

    /// Ask the engine to re-run profile selection against the source's last
    /// capabilities, without tearing down the contract.
    ///
    /// Takes effect the next time the engine sits in a steady state; a
    /// pending request is dropped by a reset.
    pub fn renegotiate(&self) {
        self.shared.renegotiate.store(true, Ordering::Relaxed);
    }

    /// Reset the policy engine and, in effect, the port controller. The
    /// contract is torn down and the whole negotiation starts over.
    pub fn reset(&self) {
        self.shared.add_event(Event::SendReset);
    }
}

/// Power delivery policy engine for sink devices.
///
/// The engine owns its port controller exclusively; everything else talks
/// to it through a [`Handle`].
pub struct PolicyEngine<PC: PortController, CLK: Clock> {
    port: PC,
    clock: CLK,
    shared: Arc<Shared>,
    state: State,
    entering: bool,
    /// Deadline of the single engine timer; `None` means no timer runs.
    timer_expiry: Option<CLK::Instant>,
    /// The last received source capabilities message.
    source_caps: Message,
    /// The request chosen by the device policy manager.
    request: RawRequest,
    /// Header template for outbound messages: roles and pinned revision.
    template: Header,
    /// Scratch space handed to the capability evaluator.
    pdo_buf: [RawPowerDataObject; MAX_DATA_OBJECTS],
    /// Whether a successful power negotiation is in effect.
    explicit_contract: bool,
    /// Whether the source answered the last request with Wait.
    waiting_on_source: bool,
    /// Synthetic profile describing a non-PD source's Rp advertisement.
    v5_pdo: FixedSupply,
    tx_id: TxMessageId,
    rx_id: RxMessageId,
}

impl<PC: PortController, CLK: Clock> PolicyEngine<PC, CLK> {
    /// Create a policy engine for the given port controller.
    pub fn new(port: PC, clock: CLK) -> Self {
        Self {
            port,
            clock,
            shared: Arc::new(Shared::new()),
            state: State::Startup,
            entering: true,
            timer_expiry: None,
            source_caps: Message::default(),
            request: RawRequest::EMPTY,
            template: Header::new_template(DataRole::Ufp, PowerRole::Sink, Revision::R3_0),
            pdo_buf: [RawPowerDataObject(0); MAX_DATA_OBJECTS],
            explicit_contract: false,
            waiting_on_source: false,
            v5_pdo: FixedSupply::new().with_voltage(ElectricPotential::new::<millivolt>(5000)),
            tx_id: TxMessageId::new(),
            rx_id: RxMessageId::new(),
        }
    }

    /// A thread-safe handle for controlling the engine.
    pub fn handle(&self) -> Handle {
        Handle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run the event loop: poll the port controller, manage state
    /// transitions and deliver power-change notifications.
    ///
    /// Blocks until `cancel` becomes true, checked at the top of every
    /// iteration. Port controller failures never surface here; they force a
    /// hard reset and renegotiation, observable only through the
    /// power-change callback. The exclusive borrow keeps the loop to a
    /// single invocation per engine.
    pub fn run(&mut self, cancel: &AtomicBool) {
        while !cancel.load(Ordering::Relaxed) {
            self.step();
        }
    }

    /// One loop iteration: either perform the pending state entry, or poll
    /// for and dispatch a single event.
    fn step(&mut self) {
        let outcome = if self.entering {
            self.timer_expiry = None;
            self.entering = false;
            self.enter()
        } else {
            self.poll()
        };

        let next = match outcome {
            Ok(next) => next,
            Err(error) => {
                warn!("port controller error in {:?}: {}", self.state, error);
                Some(State::HardReset)
            }
        };

        if let Some(next) = next {
            trace!("{:?} -> {:?}", self.state, next);
            self.state = next;
            self.entering = true;
        }
    }

    /// Actions on entering the current state. A returned state is switched
    /// to immediately.
    fn enter(&mut self) -> Result<Option<State>, Error> {
        match self.state {
            State::Startup => {
                self.tx_id.reset();
                self.rx_id.reset();
                self.explicit_contract = false;
                self.waiting_on_source = false;
                self.shared.renegotiate.store(false, Ordering::Relaxed);
                self.shared.notify(PowerStatus::off());
                self.port.init()?;
                Ok(Some(State::Discovery))
            }
            State::Discovery => Ok(None),
            State::WaitForCapabilities => {
                self.source_caps = Message::default();
                self.start_timer(TimerType::SinkWaitCap);
                Ok(None)
            }
            State::EvaluateCapabilities => {
                let count = self.source_caps.header.num_objects();
                for (slot, object) in self.pdo_buf.iter_mut().zip(&self.source_caps.data[..count])
                {
                    *slot = RawPowerDataObject(*object);
                }
                self.request = self.shared.evaluate(&mut self.pdo_buf[..count]);
                Ok(Some(State::SelectCapabilities))
            }
            State::SelectCapabilities => {
                let request = if self.request.is_empty() {
                    // The device policy manager wants none of the profiles,
                    // but the source insists on a contract: request a token
                    // 100 mA from the vSafe5V object.
                    default_request()
                } else {
                    self.request
                };
                self.send_request(request)?;
                self.start_timer(TimerType::SenderResponse);
                Ok(None)
            }
            State::TransitionSink => {
                self.start_timer(TimerType::PsTransition);
                Ok(None)
            }
            State::Ready => {
                if !self.request.is_empty() && !self.waiting_on_source {
                    self.shared.notify(self.contract_status());
                }
                if self.waiting_on_source {
                    self.start_timer(TimerType::SinkRequest);
                } else if self.pps_negotiated() {
                    // Programmable contracts expire unless refreshed.
                    self.start_timer(TimerType::SinkPpsPeriodic);
                }
                Ok(None)
            }
            State::HardReset => {
                self.shared.notify(PowerStatus::off());
                self.port.send_hard_reset()?;
                Ok(Some(State::Startup))
            }
            State::NoPd => {
                self.pdo_buf[0] = RawPowerDataObject(self.v5_pdo.0);
                let request = self.shared.evaluate(&mut self.pdo_buf[..1]);
                if request.is_empty() {
                    self.shared.notify(PowerStatus::off());
                } else {
                    debug!(
                        "accepted non-pd source at {} mA",
                        self.v5_pdo.max_current().get::<milliampere>()
                    );
                    self.shared.notify(PowerStatus {
                        on: true,
                        voltage: self.v5_pdo.voltage(),
                        max_current: self.v5_pdo.max_current(),
                        current_source: false,
                    });
                }
                Ok(None)
            }
        }
    }

    /// Wait in the current state: harvest port controller events and
    /// dispatch the highest-priority one, or handle timer expiry.
    fn poll(&mut self) -> Result<Option<State>, Error> {
        // Pending renegotiation requests are honored once the engine sits
        // in a steady state; elsewhere they stay queued.
        if self.shared.renegotiate.load(Ordering::Relaxed) {
            match self.state {
                State::Ready => {
                    self.shared.renegotiate.store(false, Ordering::Relaxed);
                    return Ok(Some(State::EvaluateCapabilities));
                }
                State::NoPd => {
                    self.shared.renegotiate.store(false, Ordering::Relaxed);
                    return Ok(Some(State::NoPd));
                }
                _ => {}
            }
        }

        let alerts = self.port.alert()?;
        let event = {
            let mut events = self.shared.events.lock().unwrap_or_else(PoisonError::into_inner);
            events.merge(alerts);
            events.pop()
        };

        let Some(event) = event else {
            if let Some(expiry) = self.timer_expiry {
                if self.clock.now() > expiry {
                    self.timer_expiry = None; // the timeout fires only once
                    return self.process(Message::default(), Event::TimerTimeout);
                }
            }
            self.clock.sleep(LOOP_SLEEP);
            return Ok(None);
        };

        match event {
            Event::Power0A5 => {
                self.set_non_pd_current(500);
                Ok(None)
            }
            Event::Power1A5 => {
                self.set_non_pd_current(1500);
                Ok(None)
            }
            Event::Power3A0 => {
                self.set_non_pd_current(3000);
                Ok(None)
            }
            Event::Detached | Event::ResetReceived => Ok(Some(State::Startup)),
            Event::SendReset => Ok(Some(State::HardReset)),
            Event::Rx => match self.rx() {
                Ok(message) => {
                    let outcome = self.process(message, Event::Rx);
                    // More messages may be queued; keep draining on the
                    // next iterations.
                    self.shared.add_event(Event::Rx);
                    outcome
                }
                Err(Error::RxEmpty) => Ok(None),
                Err(error) => Err(error),
            },
            other => self.process(Message::default(), other),
        }
    }

    /// React to `event` in the current state. `message` is meaningful for
    /// [`Event::Rx`] only.
    fn process(&mut self, message: Message, event: Event) -> Result<Option<State>, Error> {
        match self.state {
            State::Discovery => {
                if event == Event::Attached {
                    return Ok(Some(State::WaitForCapabilities));
                }
                Ok(None)
            }
            State::WaitForCapabilities => match event {
                Event::TimerTimeout => {
                    // A silent partner that advertised current over Rp is a
                    // non-PD source; anything else is reset and retried.
                    if self.v5_pdo.raw_max_current() > 0 {
                        Ok(Some(State::NoPd))
                    } else {
                        Ok(Some(State::HardReset))
                    }
                }
                Event::Rx
                    if message.header.message_type()
                        == MessageType::Data(DataMessageType::SourceCapabilities) =>
                {
                    self.source_caps = message;
                    // Pin the outbound revision to the lower of ours and
                    // theirs.
                    let revision = message.header.revision().min(Revision::R3_0);
                    self.template = self.template.with_revision(revision);
                    Ok(Some(State::EvaluateCapabilities))
                }
                _ => Ok(None),
            },
            State::SelectCapabilities => match event {
                Event::TimerTimeout => Ok(Some(State::HardReset)),
                Event::Rx => match message.header.message_type() {
                    MessageType::Control(ControlMessageType::Accept) => {
                        self.explicit_contract = true;
                        self.waiting_on_source = false;
                        Ok(Some(State::TransitionSink))
                    }
                    MessageType::Control(ControlMessageType::Reject) => {
                        debug!("source rejected the request");
                        Ok(Some(State::HardReset))
                    }
                    MessageType::Control(ControlMessageType::Wait) => {
                        self.waiting_on_source = true;
                        if self.explicit_contract {
                            Ok(Some(State::Ready))
                        } else {
                            Ok(Some(State::WaitForCapabilities))
                        }
                    }
                    _ => Ok(None),
                },
                _ => Ok(None),
            },
            State::TransitionSink => match event {
                Event::TimerTimeout => Ok(Some(State::HardReset)),
                Event::Rx
                    if message.header.message_type()
                        == MessageType::Control(ControlMessageType::PsRdy) =>
                {
                    Ok(Some(State::Ready))
                }
                _ => Ok(None),
            },
            State::Ready => match event {
                Event::TimerTimeout => Ok(Some(State::SelectCapabilities)),
                Event::Rx
                    if message.header.message_type()
                        == MessageType::Data(DataMessageType::SourceCapabilities) =>
                {
                    self.source_caps = message;
                    Ok(Some(State::EvaluateCapabilities))
                }
                _ => Ok(None),
            },
            // Startup, EvaluateCapabilities and HardReset transition out of
            // their entry actions; NoPd absorbs everything until a detach
            // or reset arrives.
            State::Startup | State::EvaluateCapabilities | State::HardReset | State::NoPd => {
                Ok(None)
            }
        }
    }

    /// Pull one message, discarding link-layer retransmissions.
    fn rx(&mut self) -> Result<Message, Error> {
        loop {
            let message = self.port.rx()?;
            if self.rx_id.accept(message.header.message_id()) {
                return Ok(message);
            }
            trace!(
                "discarded retransmission of message id {}",
                message.header.message_id()
            );
        }
    }

    /// Stamp the next transmit ID onto `message` and send it.
    fn tx(&mut self, mut message: Message) -> Result<(), Error> {
        message.header = message.header.with_message_id(self.tx_id.next());
        self.port.tx(message)
    }

    fn send_request(&mut self, request: RawRequest) -> Result<(), Error> {
        let mut message = Message::new(Header::new_data(self.template, DataMessageType::Request, 1));
        message.data[0] = request.0;
        self.tx(message)
    }

    fn start_timer(&mut self, timer: TimerType) {
        self.timer_expiry = Some(self.clock.deadline(timer.duration()));
    }

    fn set_non_pd_current(&mut self, milliamps: u32) {
        self.v5_pdo = self
            .v5_pdo
            .with_max_current(ElectricCurrent::new::<milliampere>(milliamps));
    }

    /// The source PDO selected by the current request, if any.
    fn selected_pdo(&self) -> Option<PowerDataObject> {
        let position = self.request.object_position() as usize;
        if position == 0 || position > self.source_caps.header.num_objects() {
            return None;
        }
        Some(PowerDataObject::from_raw(self.source_caps.data[position - 1]))
    }

    /// Whether the current contract selects a programmable supply.
    fn pps_negotiated(&self) -> bool {
        matches!(self.selected_pdo(), Some(PowerDataObject::Pps(_)))
    }

    /// Voltage and current of the negotiated contract.
    fn contract_status(&self) -> PowerStatus {
        match self.selected_pdo() {
            Some(PowerDataObject::FixedSupply(supply)) => PowerStatus {
                on: true,
                voltage: supply.voltage(),
                max_current: FixedRequest(self.request.0).max_operating_current(),
                current_source: false,
            },
            Some(PowerDataObject::Pps(_)) => {
                let request = PpsRequest(self.request.0);
                PowerStatus {
                    on: true,
                    voltage: request.output_voltage(),
                    max_current: request.operating_current(),
                    current_source: true,
                }
            }
            _ => PowerStatus::off(),
        }
    }
}

/// The token request sent when the device policy manager accepts nothing:
/// the vSafe5V object at 100 mA.
fn default_request() -> RawRequest {
    FixedRequest::new()
        .with_object_position(1)
        .with_operating_current(ElectricCurrent::new::<milliampere>(100))
        .with_max_operating_current(ElectricCurrent::new::<milliampere>(100))
        .into()
}
