use std::io::Write;

use tracing::warn;

use super::{Attachment, Device, DeviceError};
use crate::runtime::{Memory, Processor};

/// Value of register 0 of a terminal
pub const DEVICE_TYPE: u8 = 0x05;

/// Text sink.
///
/// Programs point registers 1 and 2 at some text, put its length in
/// register 3, then write anything to register 4 to have it written out.
pub struct Terminal {
    address: u16,
    length: u8,
    trigger: u8,
    sink: Box<dyn Write + Send>,
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("address", &format_args!("{:#06x}", self.address))
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

impl Terminal {
    pub fn new<W>(sink: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            address: 0,
            length: 0,
            trigger: 0,
            sink: Box::new(sink),
        }
    }

    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// Plug the terminal in a device slot of a machine when it gets spawned
    #[must_use]
    pub fn attachment(self, slot: usize) -> Attachment {
        Box::new(move |processor: &mut Processor| -> Result<(), DeviceError> {
            processor.attach(slot, Box::new(self))?;
            Ok(())
        })
    }

    fn emit(&mut self, memory: &Memory) {
        let text = memory.slice(self.address, self.length.into());
        let res = self.sink.write_all(text).and_then(|()| self.sink.flush());
        if let Err(e) = res {
            warn!(error = %e, "Could not write to the terminal");
        }
    }
}

impl Device for Terminal {
    fn read(&self, register: u8) -> u8 {
        match register {
            0 => DEVICE_TYPE,
            1 => self.address.to_be_bytes()[0],
            2 => self.address.to_be_bytes()[1],
            3 => self.length,
            4 => self.trigger,
            _ => 0,
        }
    }

    fn write(&mut self, register: u8, value: u8, memory: &mut Memory) {
        let [high, low] = self.address.to_be_bytes();
        match register {
            1 => self.address = u16::from_be_bytes([value, low]),
            2 => self.address = u16::from_be_bytes([high, value]),
            3 => self.length = value,
            4 => {
                self.trigger = value;
                self.emit(memory);
            }
            _ => {}
        }
    }
}
