//! Scripted test doubles for the port controller and the engine clock.

use core::time::Duration;
use std::collections::VecDeque;

use crate::event::EventSet;
use crate::message::Message;
use crate::timers::Clock;
use crate::{Error, PortController};

/// A port controller double: alerts and received messages are scripted,
/// transmissions are recorded.
#[derive(Default)]
pub struct DummyPortController {
    /// Event sets served by successive `alert` calls; empty once drained.
    pub alerts: VecDeque<EventSet>,
    /// Messages served by successive `rx` calls.
    pub rx_queue: VecDeque<Message>,
    /// Everything the engine transmitted, in order.
    pub sent: Vec<Message>,
    /// Number of hard resets the engine requested.
    pub hard_resets: usize,
    /// Number of `init` calls.
    pub inits: usize,
    /// Makes the next `tx` call fail.
    pub fail_tx: bool,
    /// Error returned by the next `alert` call.
    pub alert_error: Option<Error>,
}

impl DummyPortController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event set for a future `alert` call.
    pub fn push_alert(&mut self, events: impl Into<EventSet>) {
        self.alerts.push_back(events.into());
    }

    /// Queue a received message.
    pub fn inject_message(&mut self, message: Message) {
        self.rx_queue.push_back(message);
    }
}

impl PortController for DummyPortController {
    fn init(&mut self) -> Result<(), Error> {
        self.inits += 1;
        Ok(())
    }

    fn tx(&mut self, message: Message) -> Result<(), Error> {
        if self.fail_tx {
            return Err(Error::TxFailed);
        }
        self.sent.push(message);
        Ok(())
    }

    fn rx(&mut self) -> Result<Message, Error> {
        self.rx_queue.pop_front().ok_or(Error::RxEmpty)
    }

    fn send_hard_reset(&mut self) -> Result<(), Error> {
        self.hard_resets += 1;
        Ok(())
    }

    fn alert(&mut self) -> Result<EventSet, Error> {
        if let Some(error) = self.alert_error.take() {
            return Err(error);
        }
        Ok(self.alerts.pop_front().unwrap_or(EventSet::EMPTY))
    }
}

/// A deterministic millisecond clock. Sleeping advances time, so idle engine
/// iterations march towards timer deadlines.
#[derive(Clone, Copy, Debug, Default)]
pub struct TestClock {
    now_ms: u64,
}

impl Clock for TestClock {
    type Instant = u64;

    fn now(&mut self) -> u64 {
        self.now_ms
    }

    fn deadline(&mut self, after: Duration) -> u64 {
        self.now_ms + after.as_millis() as u64
    }

    fn sleep(&mut self, duration: Duration) {
        self.now_ms += duration.as_millis() as u64;
    }
}
