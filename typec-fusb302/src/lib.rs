//! Port controller driver for the FUSB302 family of USB Type-C PHYs from
//! ON Semiconductor, attached over I2C.
//!
//! The FUSB302 covers the physical layer and the lower protocol layer: it
//! computes and checks CRCs, answers with GoodCRC, and retries
//! transmissions on its own. This driver maps the remainder onto the
//! [`typec::PortController`] contract: sink-mode initialization, CC
//! polarity detection, framing of transmit packets with the chip's FIFO
//! tokens, two-stage reception, and translation of the interrupt registers
//! into [`Event`]s.

#![warn(missing_docs)]

use byteorder::{ByteOrder, LittleEndian};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Error as I2cError, I2c};
use heapless::Deque;
use log::{trace, warn};

use typec::event::{Event, EventSet};
use typec::message::header::{ControlMessageType, Header, MessageType};
use typec::message::{Message, MAX_DATA_OBJECTS, MAX_MESSAGE_BYTES};
use typec::{Error, PortController};

/// Register map and bit definitions. Names follow the datasheet.
mod regs {
    pub const SWITCHES0: u8 = 0x02;
    pub const SWITCHES0_CC1_PD_EN: u8 = 1 << 0;
    pub const SWITCHES0_CC2_PD_EN: u8 = 1 << 1;
    pub const SWITCHES0_MEAS_CC1: u8 = 1 << 2;
    pub const SWITCHES0_MEAS_CC2: u8 = 1 << 3;

    pub const SWITCHES1: u8 = 0x03;
    pub const SWITCHES1_TX_CC1: u8 = 1 << 0;
    pub const SWITCHES1_TX_CC2: u8 = 1 << 1;
    pub const SWITCHES1_AUTO_GOOD_CRC: u8 = 1 << 2;
    pub const SWITCHES1_SPEC_REV1: u8 = 1 << 6;

    pub const CONTROL0: u8 = 0x06;
    pub const CONTROL0_TX_FLUSH: u8 = 0b0110_0100;

    pub const CONTROL1: u8 = 0x07;
    pub const CONTROL1_RX_FLUSH: u8 = 1 << 2;

    pub const CONTROL2: u8 = 0x08;
    pub const CONTROL2_TOGGLE_SNK: u8 = 0b101;

    pub const CONTROL3: u8 = 0x09;
    pub const CONTROL3_AUTO_RETRY: u8 = 0b111;
    pub const CONTROL3_SEND_HARD_RESET: u8 = 1 << 6;

    pub const POWER: u8 = 0x0B;
    pub const POWER_ALL: u8 = 0x0F;

    pub const RESET: u8 = 0x0C;
    pub const RESET_SW_RESET: u8 = 1 << 0;

    pub const STATUS0A: u8 = 0x3C;
    pub const STATUS0A_RX_HARD_RESET: u8 = 1 << 0;
    pub const STATUS0A_RX_SOFT_RESET: u8 = 1 << 1;

    pub const STATUS1A_TOGGLE_POS: u8 = 3;
    pub const STATUS1A_TOGGLE_MASK: u8 = 0b111;
    pub const STATUS1A_TOGGLE_SNK1: u8 = 0b101;
    pub const STATUS1A_TOGGLE_SNK2: u8 = 0b110;

    pub const INTERRUPTA: u8 = 0x3E;
    pub const INTERRUPTA_HARD_RESET: u8 = 1 << 0;
    pub const INTERRUPTA_SOFT_RESET: u8 = 1 << 1;
    pub const INTERRUPTA_TX_SUCCESS: u8 = 1 << 2;
    pub const INTERRUPTA_HARD_SENT: u8 = 1 << 3;
    pub const INTERRUPTA_RETRY_FAIL: u8 = 1 << 4;
    pub const INTERRUPTA_TOGGLE_DONE: u8 = 1 << 6;

    pub const STATUS0_BC_LVL_MASK: u8 = 0b11;
    pub const STATUS0_VBUS_OK: u8 = 1 << 7;

    pub const STATUS1: u8 = 0x41;
    pub const STATUS1_RX_EMPTY: u8 = 1 << 5;

    pub const INTERRUPT_CRC_CHK: u8 = 1 << 4;
    pub const INTERRUPT_VBUS_OK: u8 = 1 << 7;

    pub const FIFOS: u8 = 0x43;

    pub const TOKEN_SYNC1: u8 = 0x12;
    pub const TOKEN_SYNC2: u8 = 0x13;
    pub const TOKEN_EOP: u8 = 0x14;
    pub const TOKEN_PACK_SYM: u8 = 0x80;
    pub const TOKEN_JAM_CRC: u8 = 0xFF;
    pub const TOKEN_TX_OFF: u8 = 0xFE;
    pub const TOKEN_TX_ON: u8 = 0xA1;
}

/// Manufacturer part numbers, which determine the I2C address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum PartNumber {
    Fusb302Bucx,
    Fusb302Bmpx,
    Fusb302Vmpx,
    Fusb302B01Mpx,
    Fusb302B10Mpx,
    Fusb302B11Mpx,
}

impl PartNumber {
    /// The part's 7 bit I2C address.
    pub const fn address(self) -> u8 {
        match self {
            Self::Fusb302Bucx | Self::Fusb302Bmpx | Self::Fusb302Vmpx => 0b010_0010,
            Self::Fusb302B01Mpx => 0b010_0011,
            Self::Fusb302B10Mpx => 0b010_0100,
            Self::Fusb302B11Mpx => 0b010_0101,
        }
    }
}

/// How many received messages are buffered between
/// [`alert`](PortController::alert) and [`rx`](PortController::rx) calls.
///
/// The newest message is dropped on overflow; PD sessions recover lost
/// state through a soft reset, and with a queue this deep that should never
/// be needed.
const RX_QUEUE_DEPTH: usize = 10;

/// Transmit scratch: FIFO register address, framing tokens, and the largest
/// message.
const SCRATCH_BYTES: usize = MAX_MESSAGE_BYTES + 10;

/// How long to poll for a GoodCRC after a transmission, in 1 ms steps. The
/// chip retries on its own within this window.
const TX_POLL_ATTEMPTS: usize = 10;

/// How long to poll for hard reset signalling to leave the chip, in 1 ms
/// steps.
const RESET_POLL_ATTEMPTS: usize = 5;

/// FUSB302 port controller.
///
/// All buffers are allocated at construction. The I2C bus must run at
/// 1 MHz or below.
pub struct Fusb302<I2C, DELAY> {
    i2c: I2C,
    delay: DELAY,
    address: u8,
    /// InterruptA bits observed while polling for completion, replayed into
    /// the next `alert`.
    cached_interrupt_a: u8,
    queue: Deque<Message, RX_QUEUE_DEPTH>,
    scratch: [u8; SCRATCH_BYTES],
}

fn bus_error<E: I2cError>(error: E) -> Error {
    Error::Bus(error.kind())
}

impl<I2C: I2c, DELAY: DelayNs> Fusb302<I2C, DELAY> {
    /// Create a driver for the part at its factory I2C address.
    pub fn new(i2c: I2C, delay: DELAY, part: PartNumber) -> Self {
        Self {
            i2c,
            delay,
            address: part.address(),
            cached_interrupt_a: 0,
            queue: Deque::new(),
            scratch: [0; SCRATCH_BYTES],
        }
    }

    /// Release the bus and delay resources.
    pub fn release(self) -> (I2C, DELAY) {
        (self.i2c, self.delay)
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), Error> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(bus_error)
    }

    fn read_register(&mut self, register: u8) -> Result<u8, Error> {
        let mut value = [0u8; 1];
        self.i2c
            .write_read(self.address, &[register], &mut value)
            .map_err(bus_error)?;
        Ok(value[0])
    }

    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        self.i2c
            .write_read(self.address, &[regs::FIFOS], buf)
            .map_err(bus_error)
    }

    /// Read one frame out of the receive FIFO, or [`Error::RxEmpty`].
    ///
    /// Reception is two-staged: the SOP token and header come first, then a
    /// remainder whose length depends on the header's data object count,
    /// followed by a CRC that the chip has already checked and which is
    /// discarded here.
    fn read_message(&mut self) -> Result<Message, Error> {
        if self.read_register(regs::STATUS1)? & regs::STATUS1_RX_EMPTY != 0 {
            return Err(Error::RxEmpty);
        }

        let mut prelude = [0u8; 3];
        self.read_fifo(&mut prelude)?;
        let header = Header(u16::from(prelude[2]) << 8 | u16::from(prelude[1]));

        let mut message = Message::new(header);
        let count = header.num_objects();
        let mut payload = [0u8; 4 * MAX_DATA_OBJECTS + 4];
        self.read_fifo(&mut payload[..4 * count + 4])?;
        for (index, object) in message.data[..count].iter_mut().enumerate() {
            *object = LittleEndian::read_u32(&payload[4 * index..]);
        }

        trace!("received {:?}", header);
        Ok(message)
    }

    /// Move every waiting frame into the message queue, absorbing GoodCRC.
    fn drain_rx(&mut self) -> Result<(), Error> {
        loop {
            let message = match self.read_message() {
                Ok(message) => message,
                Err(Error::RxEmpty) => return Ok(()),
                Err(error) => return Err(error),
            };

            if message.header.message_type()
                == MessageType::Control(ControlMessageType::GoodCrc)
            {
                continue;
            }

            if self.queue.push_back(message).is_err() {
                warn!("receive queue full, dropping message");
            }
        }
    }
}

impl<I2C: I2c, DELAY: DelayNs> PortController for Fusb302<I2C, DELAY> {
    fn init(&mut self) -> Result<(), Error> {
        // Reset the chip and registers to their defaults, and flush both
        // the hardware FIFO and our own queue.
        self.write_register(regs::RESET, regs::RESET_SW_RESET)?;
        self.write_register(regs::CONTROL1, regs::CONTROL1_RX_FLUSH)?;
        self.queue.clear();
        self.cached_interrupt_a = 0;

        self.write_register(regs::POWER, regs::POWER_ALL)?;
        // Auto-detect CC polarity, sink mode only.
        self.write_register(regs::CONTROL2, regs::CONTROL2_TOGGLE_SNK)?;
        // Three hardware retransmissions.
        self.write_register(regs::CONTROL3, regs::CONTROL3_AUTO_RETRY)?;
        Ok(())
    }

    fn tx(&mut self, message: Message) -> Result<(), Error> {
        self.write_register(regs::CONTROL0, regs::CONTROL0_TX_FLUSH)?;

        // Frame the message between the chip's FIFO tokens: three Sync-1,
        // one Sync-2, a PackSym carrying the payload length, then the CRC,
        // EOP and transmitter control trailer.
        self.scratch[0] = regs::FIFOS;
        self.scratch[1..5].copy_from_slice(&[
            regs::TOKEN_SYNC1,
            regs::TOKEN_SYNC1,
            regs::TOKEN_SYNC1,
            regs::TOKEN_SYNC2,
        ]);
        let length = message
            .to_bytes(&mut self.scratch[6..6 + MAX_MESSAGE_BYTES])
            .map_err(|_| Error::TxFailed)?; // cannot fail, scratch holds the largest message
        self.scratch[5] = regs::TOKEN_PACK_SYM | length as u8;
        let trailer = 6 + length;
        self.scratch[trailer..trailer + 4].copy_from_slice(&[
            regs::TOKEN_JAM_CRC,
            regs::TOKEN_EOP,
            regs::TOKEN_TX_OFF,
            regs::TOKEN_TX_ON,
        ]);

        let frame = &self.scratch[..trailer + 4];
        self.i2c.write(self.address, frame).map_err(bus_error)?;

        // Wait until either a GoodCRC arrived, the chip ran out of retries,
        // or the deadline elapsed.
        for _ in 0..TX_POLL_ATTEMPTS {
            let interrupt_a = self.read_register(regs::INTERRUPTA)?;
            self.cached_interrupt_a |= interrupt_a;
            if interrupt_a & regs::INTERRUPTA_TX_SUCCESS != 0 {
                return Ok(());
            }
            if interrupt_a & regs::INTERRUPTA_RETRY_FAIL != 0 {
                return Err(Error::TxFailed);
            }
            self.delay.delay_ms(1);
        }
        Err(Error::TxFailed)
    }

    fn rx(&mut self) -> Result<Message, Error> {
        self.queue.pop_front().ok_or(Error::RxEmpty)
    }

    fn send_hard_reset(&mut self) -> Result<(), Error> {
        let control3 = self.read_register(regs::CONTROL3)?;
        self.write_register(regs::CONTROL3, control3 | regs::CONTROL3_SEND_HARD_RESET)?;

        for _ in 0..RESET_POLL_ATTEMPTS {
            let interrupt_a = self.read_register(regs::INTERRUPTA)?;
            self.cached_interrupt_a |= interrupt_a;
            if interrupt_a & regs::INTERRUPTA_HARD_SENT != 0 {
                return Ok(());
            }
            self.delay.delay_ms(1);
        }
        Err(Error::TxFailed)
    }

    fn alert(&mut self) -> Result<EventSet, Error> {
        // Burst-read Status0A through Interrupt and fold in interrupt bits
        // consumed by earlier polling.
        let mut registers = [0u8; 7];
        self.i2c
            .write_read(self.address, &[regs::STATUS0A], &mut registers)
            .map_err(bus_error)?;
        let [status0a, status1a, interrupt_a, _interrupt_b, status0, _status1, interrupt] =
            registers;
        let interrupt_a = interrupt_a | self.cached_interrupt_a;
        self.cached_interrupt_a = 0;

        let mut events = EventSet::EMPTY;

        if interrupt_a & regs::INTERRUPTA_SOFT_RESET != 0
            && status0a & regs::STATUS0A_RX_SOFT_RESET != 0
        {
            events.add(Event::ResetReceived);
        }
        if interrupt_a & regs::INTERRUPTA_HARD_RESET != 0
            && status0a & regs::STATUS0A_RX_HARD_RESET != 0
        {
            events.add(Event::ResetReceived);
        }

        // CC detection has settled: report the partner's current
        // advertisement and route the transceiver to the detected CC line.
        if interrupt_a & regs::INTERRUPTA_TOGGLE_DONE != 0 {
            match status0 & regs::STATUS0_BC_LVL_MASK {
                1 => events.add(Event::Power0A5),
                2 => events.add(Event::Power1A5),
                3 => events.add(Event::Power3A0),
                _ => {}
            }

            // Toggling is done for good; turn it off.
            self.write_register(regs::CONTROL2, 0)?;

            let toggle = (status1a >> regs::STATUS1A_TOGGLE_POS) & regs::STATUS1A_TOGGLE_MASK;
            let (tx_enable, measure) = match toggle {
                regs::STATUS1A_TOGGLE_SNK1 => (regs::SWITCHES1_TX_CC1, regs::SWITCHES0_MEAS_CC1),
                regs::STATUS1A_TOGGLE_SNK2 => (regs::SWITCHES1_TX_CC2, regs::SWITCHES0_MEAS_CC2),
                _ => return Err(Error::InvalidCcState),
            };
            self.write_register(
                regs::SWITCHES1,
                regs::SWITCHES1_SPEC_REV1 | regs::SWITCHES1_AUTO_GOOD_CRC | tx_enable,
            )?;
            self.write_register(
                regs::SWITCHES0,
                measure | regs::SWITCHES0_CC1_PD_EN | regs::SWITCHES0_CC2_PD_EN,
            )?;
        }

        if interrupt & regs::INTERRUPT_VBUS_OK != 0 {
            if status0 & regs::STATUS0_VBUS_OK != 0 {
                events.add(Event::Attached);
            } else {
                events.add(Event::Detached);
            }
        }

        // Frames arrived: queue them all right away, so the FIFO never
        // overflows between polls.
        if interrupt & regs::INTERRUPT_CRC_CHK != 0 {
            self.drain_rx()?;
            events.add(Event::Rx);
        }

        Ok(events)
    }
}
