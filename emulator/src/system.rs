//! Process manager.
//!
//! A [`System`] spawns machines on their own threads and hands out their
//! ids, reusing the ids of the machines it got rid of.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;
use tracing::{debug, info};

use crate::constants as C;
use crate::devices::{Attachment, DeviceError};
use crate::runtime::{Control, Disconnected, Doorbell, Processor, RunState};

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("no machine id left")]
    Capacity,

    #[error("no machine with id {0}")]
    NotFound(u8),

    #[error("could not attach devices to machine {id}")]
    Attachment {
        id: u8,
        #[source]
        inner: DeviceError,
    },

    #[error("could not start machine {id}")]
    Start {
        id: u8,
        #[source]
        inner: std::io::Error,
    },

    #[error("machine {0} panicked")]
    Panicked(u8),
}

/// Handle on a running machine
#[derive(Debug)]
pub struct Machine {
    id: u8,
    control: Arc<Control>,
    doorbell: Doorbell,
    thread: JoinHandle<Processor>,
}

impl Machine {
    #[must_use]
    pub fn id(&self) -> u8 {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.control.state()
    }

    /// Ask the machine to stop, waking it up if it waits for an interrupt
    pub fn stop(&self) {
        self.control.request_stop();
        if self.doorbell.ring().is_err() {
            debug!(id = self.id, "Machine already gone");
        }
    }

    /// Queue an interrupt for the machine's next `yield`
    ///
    /// # Errors
    ///
    /// Fails if the machine is gone.
    pub fn interrupt(&self, vector: u16) -> Result<(), Disconnected> {
        self.doorbell.interrupt(vector)
    }

    /// Whether the machine's thread has ended
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    fn join(self) -> Result<Processor, SystemError> {
        let id = self.id;
        self.thread.join().map_err(|_| SystemError::Panicked(id))
    }
}

#[derive(Debug, Default)]
pub struct System {
    machines: BTreeMap<u8, Machine>,
    next: u16,
    reclaimed: BTreeSet<u8>,
}

impl System {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowest reclaimed id, else the next fresh one
    fn allocate(&mut self) -> Result<u8, SystemError> {
        if let Some(id) = self.reclaimed.pop_first() {
            return Ok(id);
        }

        let id = u8::try_from(self.next)
            .ok()
            .filter(|&id| id <= C::MAX_MACHINE_ID)
            .ok_or(SystemError::Capacity)?;
        self.next += 1;
        Ok(id)
    }

    /// Create a machine, load the image, apply the attachments in order and
    /// start it.
    ///
    /// # Errors
    ///
    /// Fails if no id is left, an attachment fails or the thread could not
    /// be started. The id is given back in every case.
    #[tracing::instrument(skip(self, image, attachments), fields(len = image.len()))]
    pub fn spawn<I>(&mut self, image: &[u8], attachments: I) -> Result<u8, SystemError>
    where
        I: IntoIterator<Item = Attachment>,
    {
        let id = self.allocate()?;
        let mut processor = Processor::new();
        processor.load(image);

        for attach in attachments {
            if let Err(inner) = attach(&mut processor) {
                self.reclaimed.insert(id);
                return Err(SystemError::Attachment { id, inner });
            }
        }

        let control = processor.control();
        let doorbell = processor.doorbell();
        let thread = match processor.start(format!("machine-{id}")) {
            Ok(thread) => thread,
            Err(inner) => {
                self.reclaimed.insert(id);
                return Err(SystemError::Start { id, inner });
            }
        };

        self.machines.insert(
            id,
            Machine {
                id,
                control,
                doorbell,
                thread,
            },
        );
        info!(id, "Machine spawned");
        Ok(id)
    }

    /// Stop a machine and give its id back.
    ///
    /// The machine's thread is left to wind down on its own.
    ///
    /// # Errors
    ///
    /// Fails if there is no such machine.
    #[tracing::instrument(skip(self))]
    pub fn kill(&mut self, id: u8) -> Result<(), SystemError> {
        let machine = self.machines.remove(&id).ok_or(SystemError::NotFound(id))?;
        machine.stop();
        self.reclaimed.insert(id);
        info!(id, "Machine killed");
        Ok(())
    }

    /// Wait for a machine to stop by itself, give its id back and return the
    /// processor in its final state
    ///
    /// # Errors
    ///
    /// Fails if there is no such machine or if its thread panicked.
    pub fn join(&mut self, id: u8) -> Result<Processor, SystemError> {
        let machine = self.machines.remove(&id).ok_or(SystemError::NotFound(id))?;
        self.reclaimed.insert(id);
        machine.join()
    }

    /// # Errors
    ///
    /// Fails if there is no such machine.
    pub fn machine(&self, id: u8) -> Result<&Machine, SystemError> {
        self.machines.get(&id).ok_or(SystemError::NotFound(id))
    }

    /// Ids of the live machines, in ascending order
    pub fn ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.machines.keys().copied()
    }

    pub fn machines(&self) -> impl Iterator<Item = &Machine> {
        self.machines.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.machines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}

impl Drop for System {
    fn drop(&mut self) {
        for machine in self.machines.values() {
            machine.stop();
        }
    }
}
