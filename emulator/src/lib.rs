//! A networked stack machine.
//!
//! Machines run bytecode over a 64 KiB address space holding their stacks,
//! status register and a window of memory-mapped devices. A [`System`] runs
//! several of them on their own threads, and a [`devices::Switch`] lets them
//! exchange messages.

pub mod compiler;
pub mod constants;
pub mod devices;
mod parser;
pub mod runtime;
pub mod system;

pub use self::compiler::{assemble, disassemble};
pub use self::runtime::{Processor, RunState};
pub use self::system::System;
