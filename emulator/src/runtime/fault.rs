use thiserror::Error;

use super::registers::{Stack, StatusRegister};

/// Conditions that stop a machine and stick in its status register
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    #[error("{0} stack overflow")]
    Overflow(Stack),

    #[error("{0} stack underflow")]
    Underflow(Stack),

    #[error("division by zero")]
    DivideByZero,
}

impl Fault {
    /// Flag set in the status register, along with [`StatusRegister::FAULT`]
    #[must_use]
    pub const fn flag(self) -> StatusRegister {
        match self {
            Self::Overflow(Stack::Data) => StatusRegister::STACK_OVERFLOW,
            Self::Underflow(Stack::Data) => StatusRegister::STACK_UNDERFLOW,
            Self::Overflow(Stack::Return) => StatusRegister::RETURN_STACK_OVERFLOW,
            Self::Underflow(Stack::Return) => StatusRegister::RETURN_STACK_UNDERFLOW,
            Self::DivideByZero => StatusRegister::DIVIDE_BY_ZERO,
        }
    }
}
