use thiserror::Error;
use tracing::trace;

use crate::constants::{self as C, Address};
use crate::devices::Device;

/// Represents errors related to memory-mapped devices
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MmioError {
    /// The given device slot does not exist
    #[error("invalid device slot {0}")]
    InvalidSlot(usize),
}

/// Plain storage of a machine: 65536 octets.
///
/// Every [`Address`] is valid here. The block primitives never go through
/// the device window and are cut short at the end of memory.
pub struct Memory {
    inner: Box<[u8]>,
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            inner: vec![0; C::MEMORY_SIZE].into_boxed_slice(),
        }
    }
}

impl Clone for Memory {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Memory {{ size: {}, .. }}", self.inner.len())
    }
}

impl Memory {
    #[must_use]
    pub fn read(&self, address: Address) -> u8 {
        self.inner[usize::from(address)]
    }

    pub fn write(&mut self, address: Address, value: u8) {
        self.inner[usize::from(address)] = value;
    }

    /// Borrow `len` octets starting at `address`, or less if it runs past the
    /// end of memory
    #[must_use]
    pub fn slice(&self, address: Address, len: usize) -> &[u8] {
        let start = usize::from(address);
        let end = start.saturating_add(len).min(self.inner.len());
        &self.inner[start..end]
    }

    /// Copy `len` octets out of memory
    #[must_use]
    pub fn read_block(&self, address: Address, len: usize) -> Vec<u8> {
        self.slice(address, len).to_vec()
    }

    /// Copy octets into memory, returning how many were actually written
    pub fn write_block(&mut self, address: Address, octets: &[u8]) -> usize {
        let start = usize::from(address);
        let len = octets.len().min(self.inner.len() - start);
        self.inner[start..start + len].copy_from_slice(&octets[..len]);
        len
    }
}

/// An address space with its device window.
///
/// Addresses whose high octet is [`C::DEVICE_PAGE`] are routed to one of the
/// 16 device slots: bits 4–7 pick the slot, bits 0–3 the device register.
#[derive(Debug, Default)]
pub struct Mmio {
    memory: Memory,
    devices: [Option<Box<dyn Device>>; C::DEVICE_SLOTS],
}

/// Split a device window address into its slot and register
fn route(address: Address) -> Option<(usize, u8)> {
    let [page, low] = address.to_be_bytes();
    (page == C::DEVICE_PAGE).then_some((usize::from(low >> 4), low & 0x0F))
}

impl Mmio {
    #[must_use]
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Read an octet, asking the device if it lands in the device window.
    ///
    /// Vacant slots read as zero.
    #[must_use]
    pub fn read(&self, address: Address) -> u8 {
        match route(address) {
            Some((slot, register)) => self.devices[slot]
                .as_ref()
                .map_or(0, |device| device.read(register)),
            None => self.memory.read(address),
        }
    }

    /// Write an octet, handing it to the device if it lands in the device
    /// window.
    ///
    /// Writes to vacant slots are dropped.
    pub fn write(&mut self, address: Address, value: u8) {
        match route(address) {
            Some((slot, register)) => {
                if let Some(device) = self.devices[slot].as_mut() {
                    trace!(slot, register, value, "Device write");
                    device.write(register, value, &mut self.memory);
                }
            }
            None => self.memory.write(address, value),
        }
    }

    /// Install a device in a slot, returning the one it replaces
    ///
    /// # Errors
    ///
    /// Fails if the slot does not exist.
    pub fn attach(
        &mut self,
        slot: usize,
        device: Box<dyn Device>,
    ) -> Result<Option<Box<dyn Device>>, MmioError> {
        let entry = self
            .devices
            .get_mut(slot)
            .ok_or(MmioError::InvalidSlot(slot))?;
        Ok(entry.replace(device))
    }

    /// Remove the device from a slot
    ///
    /// # Errors
    ///
    /// Fails if the slot does not exist.
    pub fn detach(&mut self, slot: usize) -> Result<Option<Box<dyn Device>>, MmioError> {
        let entry = self
            .devices
            .get_mut(slot)
            .ok_or(MmioError::InvalidSlot(slot))?;
        Ok(entry.take())
    }

    /// Give every device a chance to raise an interrupt, in slot order.
    ///
    /// Returns the vector-slot address of the first one raised.
    pub fn poll_devices(&mut self) -> Option<Address> {
        let memory = &mut self.memory;
        self.devices
            .iter_mut()
            .flatten()
            .find_map(|device| device.poll(memory))
    }
}
