//! Message switch between machines.
//!
//! Every machine attached to a [`Switch`] gets a [`Port`] in one of its
//! device slots. Programs send by filling the outgoing registers of their
//! port and writing the trigger register; the destination port stores the
//! message in its own machine's memory the next time that machine yields,
//! then resumes it through the port's callback registers.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

use super::{Attachment, Device, DeviceError};
use crate::constants as C;
use crate::runtime::{Doorbell, Memory, MmioError, Processor};

/// Value of register 0 of a port
pub const DEVICE_TYPE: u8 = 0x01;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SwitchError {
    #[error("no port {0} on the switch")]
    UnknownPort(u8),

    #[error("the machine behind port {0} is gone")]
    Disconnected(u8),

    #[error("no port left on the switch")]
    Full,

    #[error(transparent)]
    Slot(#[from] MmioError),
}

/// A message in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub source: u8,
    pub signal: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct Link {
    inbox: Sender<Envelope>,
    doorbell: Doorbell,
}

/// Routes messages between ports.
///
/// Port ids are handed out densely as machines get attached, and stay valid
/// for as long as the switch lives.
#[derive(Debug, Default)]
pub struct Switch {
    links: Mutex<Vec<Link>>,
}

impl Switch {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    fn links(&self) -> MutexGuard<'_, Vec<Link>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of ports attached so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.links().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links().is_empty()
    }

    /// Plug a new port in a device slot of the machine
    ///
    /// # Errors
    ///
    /// Fails if the device slot does not exist or if all 256 port ids are
    /// taken.
    #[tracing::instrument(skip(self, processor))]
    pub fn attach(
        self: &Arc<Self>,
        slot: usize,
        processor: &mut Processor,
    ) -> Result<u8, SwitchError> {
        let vector = u8::try_from(slot)
            .ok()
            .filter(|&slot| usize::from(slot) < C::DEVICE_SLOTS)
            .map(|slot| u16::from_be_bytes([C::DEVICE_PAGE, (slot << 4) | 0x0B]))
            .ok_or(MmioError::InvalidSlot(slot))?;

        let mut links = self.links();
        let id = u8::try_from(links.len()).map_err(|_| SwitchError::Full)?;
        let (inbox, queue) = channel();
        let port = Port {
            id,
            vector,
            switch: Arc::clone(self),
            queue,
            registers: PortRegisters::default(),
        };
        processor.attach(slot, Box::new(port))?;
        links.push(Link {
            inbox,
            doorbell: processor.doorbell(),
        });

        debug!(id, vector, "Port attached");
        Ok(id)
    }

    /// Attach a port to a machine when it gets spawned
    #[must_use]
    pub fn attachment(self: &Arc<Self>, slot: usize) -> Attachment {
        let switch = Arc::clone(self);
        Box::new(move |processor: &mut Processor| -> Result<(), DeviceError> {
            switch.attach(slot, processor)?;
            Ok(())
        })
    }

    /// Queue a message for a port and wake its machine up.
    ///
    /// Delivery happens on the destination machine's next `yield`. Nothing
    /// is acknowledged.
    ///
    /// # Errors
    ///
    /// Fails if the destination port does not exist or its machine is gone.
    /// The message is dropped in both cases.
    pub fn send(
        &self,
        source: u8,
        destination: u8,
        signal: u8,
        payload: Vec<u8>,
    ) -> Result<(), SwitchError> {
        let links = self.links();
        let link = links
            .get(usize::from(destination))
            .ok_or(SwitchError::UnknownPort(destination))?;

        debug!(source, destination, signal, len = payload.len(), "Routing message");
        link.inbox
            .send(Envelope {
                source,
                signal,
                payload,
            })
            .map_err(|_| SwitchError::Disconnected(destination))?;
        link.doorbell
            .ring()
            .map_err(|_| SwitchError::Disconnected(destination))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct PortRegisters {
    destination: u8,
    sender: u8,
    signal: u8,
    received_signal: u8,
    length: u8,
    address: u16,
    buffer: u16,
    callback: u16,
    trigger: u8,
    received_length: u8,
}

fn set_high(word: &mut u16, value: u8) {
    *word = u16::from_be_bytes([value, word.to_be_bytes()[1]]);
}

fn set_low(word: &mut u16, value: u8) {
    *word = u16::from_be_bytes([word.to_be_bytes()[0], value]);
}

/// The end of a switch living in a machine's device window.
///
/// | register | meaning                                    |
/// |----------|--------------------------------------------|
/// | 0        | device type (`0x01`)                       |
/// | 1        | own port id                                |
/// | 2        | destination port                           |
/// | 3        | sender of the last message received        |
/// | 4        | outgoing signal                            |
/// | 5        | signal of the last message received        |
/// | 6        | outgoing payload length                    |
/// | 7, 8     | outgoing payload address                   |
/// | 9, 10    | receive buffer address                     |
/// | 11, 12   | interrupt handler address                  |
/// | 13       | send trigger                               |
/// | 14       | length of the last message received        |
pub struct Port {
    id: u8,
    vector: u16,
    switch: Arc<Switch>,
    queue: Receiver<Envelope>,
    registers: PortRegisters,
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("vector", &format_args!("{:#06x}", self.vector))
            .field("registers", &self.registers)
            .finish_non_exhaustive()
    }
}

impl Port {
    #[must_use]
    pub fn id(&self) -> u8 {
        self.id
    }

    fn send(&self, memory: &Memory) {
        let r = &self.registers;
        let payload = memory.read_block(r.address, r.length.into());
        if let Err(e) = self.switch.send(self.id, r.destination, r.signal, payload) {
            warn!(port = self.id, error = %e, "Message dropped");
        }
    }
}

impl Device for Port {
    fn read(&self, register: u8) -> u8 {
        let r = &self.registers;
        match register {
            0x0 => DEVICE_TYPE,
            0x1 => self.id,
            0x2 => r.destination,
            0x3 => r.sender,
            0x4 => r.signal,
            0x5 => r.received_signal,
            0x6 => r.length,
            0x7 => r.address.to_be_bytes()[0],
            0x8 => r.address.to_be_bytes()[1],
            0x9 => r.buffer.to_be_bytes()[0],
            0xA => r.buffer.to_be_bytes()[1],
            0xB => r.callback.to_be_bytes()[0],
            0xC => r.callback.to_be_bytes()[1],
            0xD => r.trigger,
            0xE => r.received_length,
            _ => 0,
        }
    }

    fn write(&mut self, register: u8, value: u8, memory: &mut Memory) {
        let r = &mut self.registers;
        match register {
            0x2 => r.destination = value,
            0x4 => r.signal = value,
            0x6 => r.length = value,
            0x7 => set_high(&mut r.address, value),
            0x8 => set_low(&mut r.address, value),
            0x9 => set_high(&mut r.buffer, value),
            0xA => set_low(&mut r.buffer, value),
            0xB => set_high(&mut r.callback, value),
            0xC => set_low(&mut r.callback, value),
            0xD => {
                r.trigger = value;
                self.send(memory);
            }
            // Read-only
            _ => {}
        }
    }

    fn poll(&mut self, memory: &mut Memory) -> Option<u16> {
        let Envelope {
            source,
            signal,
            payload,
        } = self.queue.try_recv().ok()?;

        let r = &mut self.registers;
        let written = memory.write_block(r.buffer, &payload);
        if written < payload.len() {
            warn!(port = self.id, written, "Payload truncated at the end of memory");
        }

        r.sender = source;
        r.received_signal = signal;
        r.received_length = u8::try_from(payload.len()).unwrap_or(u8::MAX);
        debug!(port = self.id, source, signal, "Message delivered");
        Some(self.vector)
    }
}
