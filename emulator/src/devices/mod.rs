//! Peripherals living in the device window.
//!
//! Each of the 16 slots of page `0x03` can hold one [`Device`], which then
//! answers the 16 registers `0x03S0..=0x03SF`.

use thiserror::Error;

use crate::runtime::{Memory, MmioError, Processor};

mod switch;
mod terminal;

pub use self::switch::{Envelope, Port, Switch, SwitchError};
pub use self::terminal::Terminal;

/// A memory-mapped peripheral
pub trait Device: Send + std::fmt::Debug {
    /// Read one of the 16 registers of the device
    fn read(&self, register: u8) -> u8;

    /// Write one of the 16 registers of the device.
    ///
    /// `memory` is the plain storage of the machine the device is attached
    /// to, for devices doing bulk transfers.
    fn write(&mut self, register: u8, value: u8, memory: &mut Memory);

    /// Called while the machine waits for an interrupt.
    ///
    /// Returns the vector-slot address the machine should resume through, if
    /// the device has something to deliver.
    fn poll(&mut self, _memory: &mut Memory) -> Option<u16> {
        None
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Mmio(#[from] MmioError),

    #[error(transparent)]
    Switch(#[from] SwitchError),
}

/// Deferred setup of a machine, applied before it starts
pub type Attachment = Box<dyn FnOnce(&mut Processor) -> Result<(), DeviceError> + Send>;
