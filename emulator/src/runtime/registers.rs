use bitflags::bitflags;
use parse_display::Display;

use super::fault::Fault;
use crate::constants as C;

bitflags! {
    /// Status register, stored in memory at [`C::STATUS`]
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusRegister: u8 {
        const FAULT                  = 0b0000_0001;
        const WAITING                = 0b0000_0010;
        const STACK_OVERFLOW         = 0b0000_0100;
        const STACK_UNDERFLOW        = 0b0000_1000;
        const RETURN_STACK_OVERFLOW  = 0b0001_0000;
        const RETURN_STACK_UNDERFLOW = 0b0010_0000;
        const DIVIDE_BY_ZERO         = 0b0100_0000;

        /// Everything `halt` clears
        const FAULTS = Self::FAULT.bits()
            | Self::STACK_OVERFLOW.bits()
            | Self::STACK_UNDERFLOW.bits()
            | Self::RETURN_STACK_OVERFLOW.bits()
            | Self::RETURN_STACK_UNDERFLOW.bits()
            | Self::DIVIDE_BY_ZERO.bits();
    }
}

impl std::fmt::Debug for StatusRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010b}", self.bits())
    }
}

/// The two stacks living in the address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "lowercase")]
pub enum Stack {
    /// Operands of every instruction
    Data,

    /// Return addresses and manually managed frames
    Return,
}

impl Stack {
    /// Address of the octet holding the depth of the stack
    #[must_use]
    pub const fn pointer(self) -> C::Address {
        match self {
            Self::Data => C::STACK_POINTER,
            Self::Return => C::RETURN_STACK_POINTER,
        }
    }

    /// First address of the stack storage
    #[must_use]
    pub const fn start(self) -> C::Address {
        match self {
            Self::Data => C::STACK_START,
            Self::Return => C::RETURN_STACK_START,
        }
    }

    pub(crate) const fn overflow(self) -> Fault {
        Fault::Overflow(self)
    }

    pub(crate) const fn underflow(self) -> Fault {
        Fault::Underflow(self)
    }
}
