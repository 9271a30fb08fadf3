//! The processor core.
//!
//! A [`Processor`] owns its whole address space, including both stacks and
//! the status register. It runs either synchronously through [`Processor::run`]
//! or on its own thread with [`Processor::start`], in which case it parks
//! on its mailbox whenever a `yield` leaves it with nothing to do.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use parse_display::Display;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::constants::{self as C, Address};
use crate::devices::Device;

mod fault;
mod instructions;
mod memory;
mod registers;

pub use self::fault::Fault;
pub use self::instructions::{DecodeError, Instruction, Opcode, Operand, UnknownOpcode};
pub use self::memory::{Memory, Mmio, MmioError};
pub use self::registers::{Stack, StatusRegister};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("CPU fault: {0}")]
    Fault(#[from] Fault),

    #[error("invalid instruction {opcode:#04x} at {address:#06x}")]
    InvalidInstruction { address: Address, opcode: u8 },

    #[error("machine halted")]
    Halted,
}

type Result<T> = std::result::Result<T, ProcessorError>;

/// Observable lifecycle of a processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "lowercase")]
#[repr(u8)]
pub enum RunState {
    /// Loaded but never ran
    Idle,
    Running,
    /// Parked on a `yield`, waiting for an interrupt
    Waiting,
    /// Stopped by a `halt`
    Halted,
    /// Stopped by a fault or an invalid instruction
    Faulted,
    /// Stopped from the outside
    Stopped,
}

impl RunState {
    /// Whether the processor will never execute anything again
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Halted | Self::Faulted | Self::Stopped)
    }

    const fn from_repr(repr: u8) -> Self {
        match repr {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Waiting,
            3 => Self::Halted,
            4 => Self::Faulted,
            _ => Self::Stopped,
        }
    }
}

/// State shared between a processor and whoever supervises it
#[derive(Debug)]
pub struct Control {
    stop: AtomicBool,
    state: AtomicU8,
}

impl Default for Control {
    fn default() -> Self {
        Self {
            stop: AtomicBool::new(false),
            state: AtomicU8::new(RunState::Idle as u8),
        }
    }
}

impl Control {
    #[must_use]
    pub fn state(&self) -> RunState {
        RunState::from_repr(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RunState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Ask the processor to stop before its next instruction
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    /// Resume through the pointer stored at this vector-slot address
    Interrupt(Address),

    /// Re-check devices and the stop flag
    Wake,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("the machine is gone")]
pub struct Disconnected;

/// Handle to reach a processor from other threads.
///
/// Nothing here ever blocks: signals are queued and picked up by the
/// processor the next time it yields.
#[derive(Debug, Clone)]
pub struct Doorbell {
    sender: Sender<Signal>,
}

impl Doorbell {
    /// Queue an interrupt, delivered on the next `yield`
    ///
    /// # Errors
    ///
    /// Fails if the processor was dropped.
    pub fn interrupt(&self, vector: Address) -> std::result::Result<(), Disconnected> {
        self.sender
            .send(Signal::Interrupt(vector))
            .map_err(|_| Disconnected)
    }

    /// Wake the processor up if it is parked
    ///
    /// # Errors
    ///
    /// Fails if the processor was dropped.
    pub fn ring(&self) -> std::result::Result<(), Disconnected> {
        self.sender.send(Signal::Wake).map_err(|_| Disconnected)
    }
}

pub struct Processor {
    pub(crate) mmio: Mmio,
    pub(crate) pc: Address,
    interrupts: VecDeque<Address>,
    mailbox: Receiver<Signal>,
    doorbell: Doorbell,
    control: Arc<Control>,
    trace: bool,
    cycles: usize,
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Processor {{ pc: {:#06x}, status: {:?}, state: {}, cycles: {}, mmio: [...] }}",
            self.pc,
            self.status(),
            self.control.state(),
            self.cycles
        )
    }
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor {
    #[must_use]
    pub fn new() -> Self {
        let (sender, mailbox) = channel();
        Self {
            mmio: Mmio::default(),
            pc: C::ENTRYPOINT,
            interrupts: VecDeque::new(),
            mailbox,
            doorbell: Doorbell { sender },
            control: Arc::default(),
            trace: false,
            cycles: 0,
        }
    }

    /// Copy a program image at [`C::PROGRAM_START`] and point the entry
    /// vector at it
    #[tracing::instrument(skip(self, image), fields(len = image.len()))]
    pub fn load(&mut self, image: &[u8]) {
        let memory = self.mmio.memory_mut();
        let written = memory.write_block(C::PROGRAM_START, image);
        if written < image.len() {
            warn!(written, "Program image truncated at the end of memory");
        }

        let [high, low] = C::PROGRAM_START.to_be_bytes();
        memory.write(C::ENTRYPOINT, high);
        memory.write(C::ENTRYPOINT + 1, low);
    }

    /// Install a device in one of the 16 slots of the device window
    ///
    /// # Errors
    ///
    /// Fails if the slot does not exist.
    pub fn attach(
        &mut self,
        slot: usize,
        device: Box<dyn Device>,
    ) -> std::result::Result<Option<Box<dyn Device>>, MmioError> {
        debug!(slot, ?device, "Attaching device");
        self.mmio.attach(slot, device)
    }

    #[must_use]
    pub fn mmio(&self) -> &Mmio {
        &self.mmio
    }

    pub fn mmio_mut(&mut self) -> &mut Mmio {
        &mut self.mmio
    }

    #[must_use]
    pub fn pc(&self) -> Address {
        self.pc
    }

    /// Number of instructions executed so far
    #[must_use]
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    /// Log every executed instruction at the `info` level
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    #[must_use]
    pub fn doorbell(&self) -> Doorbell {
        self.doorbell.clone()
    }

    #[must_use]
    pub fn control(&self) -> Arc<Control> {
        Arc::clone(&self.control)
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.control.state()
    }

    #[must_use]
    pub fn status(&self) -> StatusRegister {
        StatusRegister::from_bits_retain(self.mmio.memory().read(C::STATUS))
    }

    pub(crate) fn update_status<F>(&mut self, f: F)
    where
        F: FnOnce(&mut StatusRegister),
    {
        let mut status = self.status();
        f(&mut status);
        self.mmio.memory_mut().write(C::STATUS, status.bits());
    }

    /// Current content of a stack, bottom first
    #[must_use]
    pub fn stack(&self, stack: Stack) -> &[u8] {
        let memory = self.mmio.memory();
        let depth = memory.read(stack.pointer());
        memory.slice(stack.start(), depth.into())
    }

    fn push_octets(&mut self, stack: Stack, octets: &[u8]) -> std::result::Result<(), Fault> {
        let memory = self.mmio.memory_mut();
        let depth = memory.read(stack.pointer());
        let new_depth = Some(usize::from(depth) + octets.len())
            .filter(|&depth| depth <= usize::from(C::STACK_CAPACITY))
            .and_then(|depth| u8::try_from(depth).ok())
            .ok_or_else(|| stack.overflow())?;

        memory.write_block(stack.start() + u16::from(depth), octets);
        memory.write(stack.pointer(), new_depth);
        Ok(())
    }

    fn pop_octets<const N: usize>(&mut self, stack: Stack) -> std::result::Result<[u8; N], Fault> {
        let memory = self.mmio.memory_mut();
        let depth = memory.read(stack.pointer());
        let new_depth = usize::from(depth)
            .checked_sub(N)
            .and_then(|depth| u8::try_from(depth).ok())
            .ok_or_else(|| stack.underflow())?;

        let mut octets = [0; N];
        octets.copy_from_slice(memory.slice(stack.start() + u16::from(new_depth), N));
        memory.write(stack.pointer(), new_depth);
        Ok(octets)
    }

    #[tracing::instrument(skip(self), level = "trace")]
    pub(crate) fn push(&mut self, value: u8) -> std::result::Result<(), Fault> {
        self.push_octets(Stack::Data, &[value])
    }

    #[tracing::instrument(skip(self), level = "trace")]
    pub(crate) fn pop(&mut self) -> std::result::Result<u8, Fault> {
        let [value] = self.pop_octets(Stack::Data)?;
        trace!("Popping value: {:#04x}", value);
        Ok(value)
    }

    /// Push a 16-bit value, high octet at the lower slot
    pub(crate) fn push16(&mut self, value: u16) -> std::result::Result<(), Fault> {
        self.push_octets(Stack::Data, &value.to_be_bytes())
    }

    pub(crate) fn pop16(&mut self) -> std::result::Result<u16, Fault> {
        self.pop_octets(Stack::Data).map(u16::from_be_bytes)
    }

    pub(crate) fn push_return(&mut self, address: Address) -> std::result::Result<(), Fault> {
        self.push_octets(Stack::Return, &address.to_be_bytes())
    }

    pub(crate) fn pop_return(&mut self) -> std::result::Result<Address, Fault> {
        self.pop_octets(Stack::Return).map(u16::from_be_bytes)
    }

    fn jump(&mut self, address: Address) {
        debug!("Jumping to address {:#06x}", address);
        self.pc = address;
    }

    /// Read a big-endian 16-bit value through the device window
    fn read16(&self, address: Address) -> u16 {
        u16::from_be_bytes([
            self.mmio.read(address),
            self.mmio.read(address.wrapping_add(1)),
        ])
    }

    fn decode_instruction(&mut self) -> Result<Instruction> {
        let address = self.pc;
        let mut octets = [0; 3];
        for (offset, octet) in (0..).zip(octets.iter_mut()) {
            *octet = self.mmio.read(address.wrapping_add(offset));
        }

        let instruction =
            Instruction::decode(&octets).map_err(|_| ProcessorError::InvalidInstruction {
                address,
                opcode: octets[0],
            })?;

        self.pc = address.wrapping_add(instruction.encoded_len());
        Ok(instruction)
    }

    /// Fetch, decode and execute one instruction
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::Halted`] on a `halt`. On a fault, the fault
    /// flags are set and the program counter is left on the faulting
    /// instruction.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn step(&mut self) -> Result<()> {
        let address = self.pc;
        let instruction = match self.decode_instruction() {
            Ok(instruction) => instruction,
            Err(e) => {
                self.update_status(|status| status.insert(StatusRegister::FAULT));
                return Err(e);
            }
        };

        if self.trace {
            info!(pc = address, "{}", instruction);
        } else {
            debug!(pc = address, "Executing instruction \"{}\"", instruction);
        }

        self.cycles += 1;
        match instruction.execute(self) {
            Err(ProcessorError::Fault(fault)) => {
                self.pc = address;
                self.update_status(|status| status.insert(StatusRegister::FAULT | fault.flag()));
                Err(fault.into())
            }
            Err(e) => Err(e),
            Ok(()) => {
                // A yield stays on itself until an interrupt moves it
                if self.status().contains(StatusRegister::WAITING) {
                    self.pc = address;
                }
                Ok(())
            }
        }
    }

    fn accept(&mut self, signal: Signal) {
        if let Signal::Interrupt(vector) = signal {
            self.interrupts.push_back(vector);
        }
    }

    /// Leave the waiting state if an interrupt is pending.
    ///
    /// Interrupts queued through the [`Doorbell`] go first, then devices are
    /// polled. Returns whether the processor resumed.
    fn resume(&mut self) -> bool {
        while let Ok(signal) = self.mailbox.try_recv() {
            self.accept(signal);
        }

        let Some(vector) = self
            .interrupts
            .pop_front()
            .or_else(|| self.mmio.poll_devices())
        else {
            return false;
        };

        let handler = self.read16(vector);
        debug!(vector, handler, "Resuming from interrupt");
        self.pc = handler;
        self.update_status(|status| status.remove(StatusRegister::WAITING));
        true
    }

    /// Run until the program halts, faults, gets stopped or parks on a
    /// `yield` with no interrupt pending.
    ///
    /// # Errors
    ///
    /// Returns the fault or invalid instruction that stopped the processor.
    #[tracing::instrument(skip(self))]
    pub fn run(&mut self) -> Result<RunState> {
        if self.control.state() == RunState::Idle {
            self.pc = self.read16(C::ENTRYPOINT);
            debug!(pc = self.pc, "Starting");
        }

        self.control.set_state(RunState::Running);
        let res = self.run_until_blocked();
        self.control.set_state(match res {
            Ok(state) => state,
            Err(_) => RunState::Faulted,
        });
        res
    }

    fn run_until_blocked(&mut self) -> Result<RunState> {
        loop {
            if self.control.stop_requested() {
                return Ok(RunState::Stopped);
            }

            if self.status().contains(StatusRegister::WAITING) {
                if self.resume() {
                    continue;
                }
                return Ok(RunState::Waiting);
            }

            match self.step() {
                Ok(()) => {}
                Err(ProcessorError::Halted) => return Ok(RunState::Halted),
                Err(e) => return Err(e),
            }
        }
    }

    /// Block until something is sent through the [`Doorbell`]
    fn park(&mut self) {
        trace!("Parking");
        if let Ok(signal) = self.mailbox.recv() {
            self.accept(signal);
        }
    }

    /// Move the processor to its own thread.
    ///
    /// The thread ends once the processor halts, faults or is stopped through
    /// its [`Control`], and gives the processor back.
    ///
    /// # Errors
    ///
    /// Fails if the thread could not be spawned.
    pub fn start(mut self, name: String) -> std::io::Result<JoinHandle<Self>> {
        std::thread::Builder::new().name(name).spawn(move || {
            loop {
                match self.run() {
                    Ok(RunState::Waiting) => self.park(),
                    Ok(state) => {
                        info!(%state, pc = self.pc, cycles = self.cycles, "Machine stopped");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, pc = self.pc, status = ?self.status(), "Machine faulted");
                        break;
                    }
                }
            }
            self
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn push(value: u8) -> Instruction {
        Instruction {
            opcode: Opcode::Push,
            operand: Operand::Byte(value),
        }
    }

    fn push16(value: u16) -> Instruction {
        Instruction {
            opcode: Opcode::Push16,
            operand: Operand::Word(value),
        }
    }

    fn op(opcode: Opcode) -> Instruction {
        opcode.into()
    }

    fn machine(program: &[Instruction]) -> Processor {
        let image: Vec<u8> = program.iter().flat_map(Instruction::encode).collect();
        let mut processor = Processor::new();
        processor.load(&image);
        processor
    }

    #[test]
    fn load_test() {
        let processor = machine(&[op(Opcode::Halt)]);
        let memory = processor.mmio().memory();
        assert_eq!(memory.slice(C::ENTRYPOINT, 2), &[0x04, 0x00]);
        assert_eq!(memory.read(C::PROGRAM_START), 0x01);
        assert_eq!(processor.state(), RunState::Idle);

        // Whatever does not fit is dropped
        let mut processor = Processor::new();
        processor.load(&vec![0x01; 0x1_0000]);
        assert_eq!(processor.mmio().memory().read(0xFFFF), 0x01);
    }

    #[test]
    fn arithmetic_test() {
        let mut processor = machine(&[push(5), push(3), op(Opcode::Sub), op(Opcode::Halt)]);
        assert_eq!(processor.run(), Ok(RunState::Halted));
        assert_eq!(processor.stack(Stack::Data), &[2]);
        assert_eq!(processor.cycles(), 4);

        let mut processor = machine(&[push(0xFF), push(2), op(Opcode::Add), op(Opcode::Halt)]);
        assert_eq!(processor.run(), Ok(RunState::Halted));
        assert_eq!(processor.stack(Stack::Data), &[1]);

        let mut processor = machine(&[push(0x81), push(1), op(Opcode::Shl), op(Opcode::Halt)]);
        assert_eq!(processor.run(), Ok(RunState::Halted));
        assert_eq!(processor.stack(Stack::Data), &[0x02]);
    }

    #[test]
    fn assembled_program_test() {
        let image = crate::compiler::assemble("PUSH 0x10\nPUSH 0x05\nADD\nHALT").unwrap();
        let mut processor = Processor::new();
        processor.load(&image);
        assert_eq!(processor.run(), Ok(RunState::Halted));
        assert_eq!(processor.stack(Stack::Data), &[0x15]);
    }

    #[test]
    fn wide_arithmetic_test() {
        let mut processor = machine(&[
            push16(0x1234),
            push16(0x0001),
            op(Opcode::Add16),
            op(Opcode::Inc16),
            op(Opcode::Halt),
        ]);
        assert_eq!(processor.run(), Ok(RunState::Halted));
        // High octet at the lower slot
        assert_eq!(processor.stack(Stack::Data), &[0x12, 0x36]);

        let mut processor = machine(&[
            push16(0x0300),
            push16(0x0200),
            op(Opcode::Gt16),
            op(Opcode::Halt),
        ]);
        assert_eq!(processor.run(), Ok(RunState::Halted));
        assert_eq!(processor.stack(Stack::Data), &[1]);
    }

    #[test]
    fn underflow_test() {
        let mut processor = machine(&[op(Opcode::Drop)]);
        assert_eq!(
            processor.run(),
            Err(ProcessorError::Fault(Fault::Underflow(Stack::Data)))
        );
        assert_eq!(
            processor.status(),
            StatusRegister::FAULT | StatusRegister::STACK_UNDERFLOW
        );
        assert_eq!(processor.pc(), C::PROGRAM_START);
        assert_eq!(processor.state(), RunState::Faulted);

        let mut processor = machine(&[op(Opcode::Ret)]);
        assert_eq!(
            processor.run(),
            Err(ProcessorError::Fault(Fault::Underflow(Stack::Return)))
        );
        assert_eq!(
            processor.status(),
            StatusRegister::FAULT | StatusRegister::RETURN_STACK_UNDERFLOW
        );

        // A 16-bit pop needs two octets
        let mut processor = machine(&[push(1), op(Opcode::Inc16)]);
        assert_eq!(
            processor.run(),
            Err(ProcessorError::Fault(Fault::Underflow(Stack::Data)))
        );
        assert_eq!(processor.stack(Stack::Data), &[1]);
        assert_eq!(processor.pc(), C::PROGRAM_START + 2);
    }

    #[test]
    fn overflow_test() {
        let mut processor = machine(&[push(1), push(2)]);
        processor.mmio_mut().memory_mut().write(C::STACK_POINTER, 0xFE);
        assert_eq!(
            processor.run(),
            Err(ProcessorError::Fault(Fault::Overflow(Stack::Data)))
        );
        assert_eq!(processor.stack(Stack::Data).len(), 0xFF);
        assert_eq!(processor.pc(), C::PROGRAM_START + 2);
        assert_eq!(
            processor.status(),
            StatusRegister::FAULT | StatusRegister::STACK_OVERFLOW
        );

        let mut processor = machine(&[push16(0x0400), op(Opcode::Call)]);
        processor
            .mmio_mut()
            .memory_mut()
            .write(C::RETURN_STACK_POINTER, 0xFE);
        assert_eq!(
            processor.run(),
            Err(ProcessorError::Fault(Fault::Overflow(Stack::Return)))
        );
        assert!(processor
            .status()
            .contains(StatusRegister::RETURN_STACK_OVERFLOW));
    }

    #[test]
    fn divide_by_zero_test() {
        let mut processor = machine(&[push(1), push(0), op(Opcode::Div)]);
        assert_eq!(
            processor.run(),
            Err(ProcessorError::Fault(Fault::DivideByZero))
        );
        assert_eq!(
            processor.status(),
            StatusRegister::FAULT | StatusRegister::DIVIDE_BY_ZERO
        );

        let mut processor = machine(&[push16(7), push16(0), op(Opcode::Mod16)]);
        assert_eq!(
            processor.run(),
            Err(ProcessorError::Fault(Fault::DivideByZero))
        );

        let mut processor = machine(&[push(17), push(5), op(Opcode::Mod), op(Opcode::Halt)]);
        assert_eq!(processor.run(), Ok(RunState::Halted));
        assert_eq!(processor.stack(Stack::Data), &[2]);
    }

    #[test]
    fn opcode_semantics_test() {
        use Opcode as O;

        let ok = StatusRegister::empty();
        let divide_by_zero = StatusRegister::FAULT | StatusRegister::DIVIDE_BY_ZERO;
        let scratch = 0x8000;

        #[rustfmt::skip]
        let cases: Vec<(Vec<Instruction>, Vec<u8>, StatusRegister)> = vec![
            // Stack words
            (vec![push(7), op(O::Dup)], vec![7, 7], ok),
            (vec![push(1), push(2), op(O::Drop)], vec![1], ok),
            (vec![push(1), push(2), op(O::Swap)], vec![2, 1], ok),
            (vec![push(1), push(2), push(3), op(O::Rot)], vec![2, 3, 1], ok),
            (vec![push(1), push(2), op(O::Over)], vec![1, 2, 1], ok),
            (vec![push(1), push(2), op(O::Nip)], vec![2], ok),
            (vec![push(1), push(2), op(O::Tuck)], vec![2, 1, 2], ok),
            (vec![push16(0xBEEF), op(O::ToR), op(O::FromR)], vec![0xBE, 0xEF], ok),
            (vec![push16(0xBEEF), op(O::ToR), op(O::FetchR)], vec![0xBE, 0xEF], ok),

            // Arithmetic
            (vec![push(5), push(3), op(O::Add)], vec![8], ok),
            (vec![push16(0x00FF), push16(0x0001), op(O::Add16)], vec![0x01, 0x00], ok),
            (vec![push(3), push(5), op(O::Sub)], vec![0xFE], ok),
            (vec![push16(0x0100), push16(0x0001), op(O::Sub16)], vec![0x00, 0xFF], ok),
            (vec![push(6), push(7), op(O::Mul)], vec![42], ok),
            (vec![push16(0x0100), push16(0x0002), op(O::Mul16)], vec![0x02, 0x00], ok),
            (vec![push(7), push(2), op(O::Div)], vec![3], ok),
            (vec![push16(0x0100), push16(0x0010), op(O::Div16)], vec![0x00, 0x10], ok),
            (vec![push(17), push(5), op(O::Mod)], vec![2], ok),
            (vec![push16(0x0105), push16(0x0010), op(O::Mod16)], vec![0x00, 0x05], ok),

            // Logic
            (vec![push(0b1100), push(0b1010), op(O::And)], vec![0b1000], ok),
            (vec![push16(0xFF00), push16(0x0FF0), op(O::And16)], vec![0x0F, 0x00], ok),
            (vec![push(0b1100), push(0b1010), op(O::Or)], vec![0b1110], ok),
            (vec![push16(0xF000), push16(0x000F), op(O::Or16)], vec![0xF0, 0x0F], ok),
            (vec![push(0b1100), push(0b1010), op(O::Xor)], vec![0b0110], ok),
            (vec![push16(0xFFFF), push16(0x00FF), op(O::Xor16)], vec![0xFF, 0x00], ok),
            (vec![push(0x0F), op(O::Not)], vec![0xF0], ok),
            (vec![push16(0x00FF), op(O::Not16)], vec![0xFF, 0x00], ok),
            (vec![push(0xFF), op(O::Inc)], vec![0x00], ok),
            (vec![push16(0x00FF), op(O::Inc16)], vec![0x01, 0x00], ok),
            (vec![push(0), op(O::Dec)], vec![0xFF], ok),
            (vec![push16(0), op(O::Dec16)], vec![0xFF, 0xFF], ok),
            (vec![push(0x01), push(3), op(O::Shl)], vec![0x08], ok),
            (vec![push16(0x0001), push(8), op(O::Shl16)], vec![0x01, 0x00], ok),
            (vec![push(0x80), push(3), op(O::Shr)], vec![0x10], ok),
            (vec![push16(0x8000), push(15), op(O::Shr16)], vec![0x00, 0x01], ok),

            // Comparisons
            (vec![push(3), push(3), op(O::Eq)], vec![1], ok),
            (vec![push16(0x1234), push16(0x1235), op(O::Eq16)], vec![0], ok),
            (vec![push(3), push(4), op(O::Nq)], vec![1], ok),
            (vec![push16(0x1234), push16(0x1234), op(O::Nq16)], vec![0], ok),
            (vec![push(2), push(1), op(O::Gt)], vec![1], ok),
            (vec![push16(0x0100), push16(0x0200), op(O::Gt16)], vec![0], ok),
            (vec![push(1), push(2), op(O::Lt)], vec![1], ok),
            (vec![push16(0x0200), push16(0x0100), op(O::Lt16)], vec![0], ok),

            // Control flow, the halt sits at PROGRAM_START + 8
            (vec![push16(C::PROGRAM_START + 8), push(0), op(O::Jz), push(9)], vec![], ok),
            (vec![push16(C::PROGRAM_START + 8), push(0), op(O::Jnz), push(9)], vec![9], ok),
            (vec![push16(C::PROGRAM_START + 5), op(O::Call), op(O::Halt), push(1), op(O::Ret)], vec![1], ok),

            // Memory
            (vec![push16(scratch), push(0x2A), op(O::Store), push16(scratch), op(O::Load)], vec![0x2A], ok),
            (vec![push16(scratch), push16(0xBEEF), op(O::Store16), push16(scratch), op(O::Load16)], vec![0xBE, 0xEF], ok),

            // Faults leave nothing behind
            (vec![push(4), push(0), op(O::Div)], vec![], divide_by_zero),
            (vec![push16(4), push16(0), op(O::Div16)], vec![], divide_by_zero),
            (vec![push(4), push(0), op(O::Mod)], vec![], divide_by_zero),
            (vec![push16(4), push16(0), op(O::Mod16)], vec![], divide_by_zero),
        ];

        for (mut program, stack, status) in cases {
            let listing: Vec<String> = program.iter().map(ToString::to_string).collect();
            let listing = listing.join("; ");

            program.push(op(O::Halt));
            let mut processor = machine(&program);
            let res = processor.run();

            assert_eq!(processor.stack(Stack::Data), stack.as_slice(), "{listing}");
            assert_eq!(processor.status(), status, "{listing}");
            if status.contains(StatusRegister::FAULT) {
                assert_eq!(res, Err(ProcessorError::Fault(Fault::DivideByZero)), "{listing}");
                assert_eq!(processor.state(), RunState::Faulted, "{listing}");
            } else {
                assert_eq!(res, Ok(RunState::Halted), "{listing}");
            }
        }
    }

    #[test]
    fn halt_clears_faults_test() {
        let mut processor = machine(&[op(Opcode::Halt)]);
        processor.update_status(|status| {
            status.insert(StatusRegister::FAULT | StatusRegister::STACK_UNDERFLOW);
        });
        assert_eq!(processor.run(), Ok(RunState::Halted));
        assert_eq!(processor.status(), StatusRegister::empty());
        // The program counter stays past the halt
        assert_eq!(processor.pc(), C::PROGRAM_START + 1);
    }

    #[test]
    fn invalid_instruction_test() {
        let mut processor = Processor::new();
        processor.load(&[0x60]);
        assert_eq!(
            processor.run(),
            Err(ProcessorError::InvalidInstruction {
                address: 0x0400,
                opcode: 0x60
            })
        );
        assert_eq!(processor.status(), StatusRegister::FAULT);
        assert_eq!(processor.state(), RunState::Faulted);
    }

    #[test]
    fn call_test() {
        let mut processor = machine(&[
            push16(0x0405),   // 0x0400
            op(Opcode::Call), // 0x0403
            op(Opcode::Halt), // 0x0404
            push(0x2A),       // 0x0405
            op(Opcode::Ret),  // 0x0407
        ]);
        assert_eq!(processor.run(), Ok(RunState::Halted));
        assert_eq!(processor.stack(Stack::Data), &[0x2A]);
        assert_eq!(processor.stack(Stack::Return), &[] as &[u8]);
        assert_eq!(processor.pc(), 0x0405);
    }

    #[test]
    fn conditional_jump_test() {
        let program = |jump| {
            [
                push16(0x0409),   // 0x0400
                push(0),          // 0x0403
                op(jump),         // 0x0405
                push(1),          // 0x0406
                op(Opcode::Halt), // 0x0408
                push(2),          // 0x0409
                op(Opcode::Halt), // 0x040B
            ]
        };

        let mut processor = machine(&program(Opcode::Jz));
        assert_eq!(processor.run(), Ok(RunState::Halted));
        assert_eq!(processor.stack(Stack::Data), &[2]);

        let mut processor = machine(&program(Opcode::Jnz));
        assert_eq!(processor.run(), Ok(RunState::Halted));
        assert_eq!(processor.stack(Stack::Data), &[1]);
    }

    #[test]
    fn return_stack_test() {
        let mut processor = machine(&[push16(0xBEEF), op(Opcode::ToR), op(Opcode::Halt)]);
        assert_eq!(processor.run(), Ok(RunState::Halted));
        assert_eq!(processor.stack(Stack::Data), &[] as &[u8]);
        assert_eq!(processor.stack(Stack::Return), &[0xBE, 0xEF]);

        let mut processor = machine(&[
            push16(0xBEEF),
            op(Opcode::ToR),
            op(Opcode::FetchR),
            op(Opcode::FromR),
            op(Opcode::Halt),
        ]);
        assert_eq!(processor.run(), Ok(RunState::Halted));
        assert_eq!(processor.stack(Stack::Data), &[0xBE, 0xEF, 0xBE, 0xEF]);
        assert_eq!(processor.stack(Stack::Return), &[] as &[u8]);
    }

    #[test]
    fn memory_access_test() {
        let mut processor = machine(&[
            push16(0x0800),
            push16(0xCAFE),
            op(Opcode::Store16),
            push16(0x0800),
            op(Opcode::Load16),
            push16(0x0801),
            op(Opcode::Load),
            op(Opcode::Halt),
        ]);
        assert_eq!(processor.run(), Ok(RunState::Halted));
        assert_eq!(processor.mmio().memory().slice(0x0800, 2), &[0xCA, 0xFE]);
        assert_eq!(processor.stack(Stack::Data), &[0xCA, 0xFE, 0xFE]);
    }

    #[test]
    fn yield_test() {
        let mut processor = machine(&[
            op(Opcode::Yield), // 0x0400
            op(Opcode::Halt),  // 0x0401
            push(7),           // 0x0402
            op(Opcode::Halt),  // 0x0404
        ]);
        processor.mmio_mut().memory_mut().write_block(0x0900, &[0x04, 0x02]);

        assert_eq!(processor.run(), Ok(RunState::Waiting));
        assert_eq!(processor.pc(), C::PROGRAM_START);
        assert!(processor.status().contains(StatusRegister::WAITING));

        // Nothing pending, still waiting
        assert_eq!(processor.run(), Ok(RunState::Waiting));

        processor.doorbell().interrupt(0x0900).unwrap();
        assert_eq!(processor.run(), Ok(RunState::Halted));
        assert_eq!(processor.stack(Stack::Data), &[7]);
        assert!(!processor.status().contains(StatusRegister::WAITING));
    }

    #[test]
    fn stop_test() {
        let processor = machine(&[push16(0x0400), push(0), op(Opcode::Jz)]);
        let control = processor.control();
        let doorbell = processor.doorbell();
        let handle = processor.start("looping".to_owned()).unwrap();

        control.request_stop();
        doorbell.ring().ok();
        let processor = handle.join().unwrap();
        assert_eq!(processor.state(), RunState::Stopped);
    }

    #[test]
    fn threaded_interrupt_test() {
        let mut processor = machine(&[op(Opcode::Yield), op(Opcode::Halt), push(9), op(Opcode::Halt)]);
        processor.mmio_mut().memory_mut().write_block(0x0900, &[0x04, 0x02]);
        let doorbell = processor.doorbell();
        let handle = processor.start("waiting".to_owned()).unwrap();

        doorbell.interrupt(0x0900).unwrap();
        let processor = handle.join().unwrap();
        assert_eq!(processor.state(), RunState::Halted);
        assert_eq!(processor.stack(Stack::Data), &[9]);

        // The mailbox goes away with the processor
        drop(processor);
        assert_eq!(doorbell.ring(), Err(Disconnected));
    }

    #[test]
    fn parked_stop_test() {
        let processor = machine(&[op(Opcode::Yield)]);
        let control = processor.control();
        let doorbell = processor.doorbell();
        let handle = processor.start("parked".to_owned()).unwrap();

        control.request_stop();
        doorbell.ring().unwrap();
        let processor = handle.join().unwrap();
        assert_eq!(processor.state(), RunState::Stopped);
        assert_eq!(processor.pc(), C::PROGRAM_START);
    }
}
