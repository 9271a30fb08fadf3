use parse_display::{Display, FromStr};
use thiserror::Error;
use tracing::debug;

use super::{registers::StatusRegister, Fault, Processor, ProcessorError};

/// The instruction set.
///
/// Each variant's discriminant is the octet it is encoded with. Most
/// arithmetic and logic operations come in pairs: `op` works on octets,
/// `op + 1` on big-endian 16-bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromStr)]
#[repr(u8)]
pub enum Opcode {
    /// Suspend the machine until an interrupt is delivered
    #[display("yield")]
    Yield = 0x00,

    /// Clear the fault flags and stop the machine
    #[display("halt")]
    Halt = 0x01,

    #[display("dup")]
    Dup = 0x02,

    #[display("drop")]
    Drop = 0x03,

    #[display("swap")]
    Swap = 0x04,

    #[display("rot")]
    Rot = 0x05,

    #[display("over")]
    Over = 0x06,

    #[display("nip")]
    Nip = 0x07,

    #[display("tuck")]
    Tuck = 0x08,

    /// Move a 16-bit value from the data stack to the return stack
    #[display("tor")]
    ToR = 0x09,

    /// Move a 16-bit value from the return stack to the data stack
    #[display("fromr")]
    FromR = 0x0a,

    /// Copy the top of the return stack to the data stack
    #[display("fetchr")]
    FetchR = 0x0b,

    #[display("add")]
    Add = 0x10,

    #[display("add16")]
    Add16 = 0x11,

    #[display("sub")]
    Sub = 0x12,

    #[display("sub16")]
    Sub16 = 0x13,

    #[display("mul")]
    Mul = 0x14,

    #[display("mul16")]
    Mul16 = 0x15,

    #[display("div")]
    Div = 0x16,

    #[display("div16")]
    Div16 = 0x17,

    #[display("mod")]
    Mod = 0x18,

    #[display("mod16")]
    Mod16 = 0x19,

    #[display("and")]
    And = 0x20,

    #[display("and16")]
    And16 = 0x21,

    #[display("or")]
    Or = 0x22,

    #[display("or16")]
    Or16 = 0x23,

    #[display("xor")]
    Xor = 0x24,

    #[display("xor16")]
    Xor16 = 0x25,

    #[display("not")]
    Not = 0x26,

    #[display("not16")]
    Not16 = 0x27,

    #[display("inc")]
    Inc = 0x28,

    #[display("inc16")]
    Inc16 = 0x29,

    #[display("dec")]
    Dec = 0x2a,

    #[display("dec16")]
    Dec16 = 0x2b,

    #[display("shl")]
    Shl = 0x2c,

    #[display("shl16")]
    Shl16 = 0x2d,

    #[display("shr")]
    Shr = 0x2e,

    #[display("shr16")]
    Shr16 = 0x2f,

    /// Jump if the condition is zero
    #[display("jz")]
    Jz = 0x40,

    /// Jump if the condition is not zero
    #[display("jnz")]
    Jnz = 0x41,

    /// Push the return address and jump
    #[display("call")]
    Call = 0x42,

    /// Return from a `call`
    #[display("ret")]
    Ret = 0x43,

    #[display("eq")]
    Eq = 0x44,

    #[display("eq16")]
    Eq16 = 0x45,

    #[display("nq")]
    Nq = 0x46,

    #[display("nq16")]
    Nq16 = 0x47,

    #[display("gt")]
    Gt = 0x48,

    #[display("gt16")]
    Gt16 = 0x49,

    #[display("lt")]
    Lt = 0x4a,

    #[display("lt16")]
    Lt16 = 0x4b,

    /// Push the 8-bit immediate
    #[display("push")]
    Push = 0x50,

    /// Push the 16-bit immediate
    #[display("push16")]
    Push16 = 0x51,

    #[display("store")]
    Store = 0x52,

    #[display("store16")]
    Store16 = 0x53,

    #[display("load")]
    Load = 0x54,

    #[display("load16")]
    Load16 = 0x55,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unknown opcode {0:#04x}")]
pub struct UnknownOpcode(pub u8);

impl TryFrom<u8> for Opcode {
    type Error = UnknownOpcode;

    fn try_from(octet: u8) -> std::result::Result<Self, Self::Error> {
        let opcode = match octet {
            0x00 => Self::Yield,
            0x01 => Self::Halt,
            0x02 => Self::Dup,
            0x03 => Self::Drop,
            0x04 => Self::Swap,
            0x05 => Self::Rot,
            0x06 => Self::Over,
            0x07 => Self::Nip,
            0x08 => Self::Tuck,
            0x09 => Self::ToR,
            0x0a => Self::FromR,
            0x0b => Self::FetchR,
            0x10 => Self::Add,
            0x11 => Self::Add16,
            0x12 => Self::Sub,
            0x13 => Self::Sub16,
            0x14 => Self::Mul,
            0x15 => Self::Mul16,
            0x16 => Self::Div,
            0x17 => Self::Div16,
            0x18 => Self::Mod,
            0x19 => Self::Mod16,
            0x20 => Self::And,
            0x21 => Self::And16,
            0x22 => Self::Or,
            0x23 => Self::Or16,
            0x24 => Self::Xor,
            0x25 => Self::Xor16,
            0x26 => Self::Not,
            0x27 => Self::Not16,
            0x28 => Self::Inc,
            0x29 => Self::Inc16,
            0x2a => Self::Dec,
            0x2b => Self::Dec16,
            0x2c => Self::Shl,
            0x2d => Self::Shl16,
            0x2e => Self::Shr,
            0x2f => Self::Shr16,
            0x40 => Self::Jz,
            0x41 => Self::Jnz,
            0x42 => Self::Call,
            0x43 => Self::Ret,
            0x44 => Self::Eq,
            0x45 => Self::Eq16,
            0x46 => Self::Nq,
            0x47 => Self::Nq16,
            0x48 => Self::Gt,
            0x49 => Self::Gt16,
            0x4a => Self::Lt,
            0x4b => Self::Lt16,
            0x50 => Self::Push,
            0x51 => Self::Push16,
            0x52 => Self::Store,
            0x53 => Self::Store16,
            0x54 => Self::Load,
            0x55 => Self::Load16,
            other => return Err(UnknownOpcode(other)),
        };
        Ok(opcode)
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        opcode as u8
    }
}

impl Opcode {
    /// Every opcode, in encoding order
    pub const ALL: [Opcode; 56] = [
        Self::Yield,
        Self::Halt,
        Self::Dup,
        Self::Drop,
        Self::Swap,
        Self::Rot,
        Self::Over,
        Self::Nip,
        Self::Tuck,
        Self::ToR,
        Self::FromR,
        Self::FetchR,
        Self::Add,
        Self::Add16,
        Self::Sub,
        Self::Sub16,
        Self::Mul,
        Self::Mul16,
        Self::Div,
        Self::Div16,
        Self::Mod,
        Self::Mod16,
        Self::And,
        Self::And16,
        Self::Or,
        Self::Or16,
        Self::Xor,
        Self::Xor16,
        Self::Not,
        Self::Not16,
        Self::Inc,
        Self::Inc16,
        Self::Dec,
        Self::Dec16,
        Self::Shl,
        Self::Shl16,
        Self::Shr,
        Self::Shr16,
        Self::Jz,
        Self::Jnz,
        Self::Call,
        Self::Ret,
        Self::Eq,
        Self::Eq16,
        Self::Nq,
        Self::Nq16,
        Self::Gt,
        Self::Gt16,
        Self::Lt,
        Self::Lt16,
        Self::Push,
        Self::Push16,
        Self::Store,
        Self::Store16,
        Self::Load,
        Self::Load16,
    ];

    /// Number of immediate octets following the opcode
    #[must_use]
    pub const fn immediate_len(self) -> u16 {
        match self {
            Self::Push => 1,
            Self::Push16 => 2,
            _ => 0,
        }
    }

    /// Total length of the encoded instruction
    #[must_use]
    pub const fn encoded_len(self) -> u16 {
        1 + self.immediate_len()
    }

    /// Whether this is the 16-bit variant of an operation.
    ///
    /// The assembler emits two operand octets for those.
    #[must_use]
    pub const fn is_wide(self) -> bool {
        matches!(
            self,
            Self::Add16
                | Self::Sub16
                | Self::Mul16
                | Self::Div16
                | Self::Mod16
                | Self::And16
                | Self::Or16
                | Self::Xor16
                | Self::Not16
                | Self::Inc16
                | Self::Dec16
                | Self::Shl16
                | Self::Shr16
                | Self::Eq16
                | Self::Nq16
                | Self::Gt16
                | Self::Lt16
                | Self::Push16
                | Self::Store16
                | Self::Load16
        )
    }
}

/// Immediate operand of a decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Byte(u8),
    Word(u16),
}

impl Operand {
    fn byte(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Byte(byte) => byte,
            Self::Word(word) => word.to_be_bytes()[1],
        }
    }

    fn word(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Byte(byte) => byte.into(),
            Self::Word(word) => word,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error(transparent)]
    UnknownOpcode(#[from] UnknownOpcode),

    #[error("instruction \"{0}\" is truncated")]
    Truncated(Opcode),

    #[error("nothing to decode")]
    Empty,
}

/// An opcode along with its immediate operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: Operand,
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.operand {
            Operand::None => write!(f, "{}", self.opcode),
            Operand::Byte(byte) => write!(f, "{} {byte:#04x}", self.opcode),
            Operand::Word(word) => write!(f, "{} {word:#06x}", self.opcode),
        }
    }
}

impl From<Opcode> for Instruction {
    fn from(opcode: Opcode) -> Self {
        Self {
            opcode,
            operand: Operand::None,
        }
    }
}

type Result<T> = std::result::Result<T, ProcessorError>;

impl Instruction {
    /// Decode the instruction at the start of `octets`
    ///
    /// # Errors
    ///
    /// Fails if the first octet is not a known opcode or if `octets` is too
    /// short to hold the immediate operand.
    pub fn decode(octets: &[u8]) -> std::result::Result<Self, DecodeError> {
        let (&first, rest) = octets.split_first().ok_or(DecodeError::Empty)?;
        let opcode = Opcode::try_from(first)?;
        let operand = match (opcode.immediate_len(), rest) {
            (0, _) => Operand::None,
            (1, [byte, ..]) => Operand::Byte(*byte),
            (2, [high, low, ..]) => Operand::Word(u16::from_be_bytes([*high, *low])),
            _ => return Err(DecodeError::Truncated(opcode)),
        };
        Ok(Self { opcode, operand })
    }

    /// Length of the instruction once encoded
    #[must_use]
    pub const fn encoded_len(&self) -> u16 {
        self.opcode.encoded_len()
    }

    /// Encode the instruction
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut octets = vec![self.opcode.into()];
        match self.operand {
            Operand::None => {}
            Operand::Byte(byte) => octets.push(byte),
            Operand::Word(word) => octets.extend(word.to_be_bytes()),
        }
        octets
    }

    /// Execute the instruction
    ///
    /// The program counter already points past the instruction: control
    /// transfers overwrite it, everything else leaves it alone.
    #[allow(clippy::too_many_lines)]
    #[tracing::instrument(skip(processor), level = "trace")]
    pub(crate) fn execute(self, processor: &mut Processor) -> Result<()> {
        match self.opcode {
            Opcode::Yield => {
                processor.update_status(|status| status.insert(StatusRegister::WAITING));
            }

            Opcode::Halt => {
                processor.update_status(|status| status.remove(StatusRegister::FAULTS));
                return Err(ProcessorError::Halted);
            }

            Opcode::Dup => {
                let a = processor.pop()?;
                processor.push(a)?;
                processor.push(a)?;
            }

            Opcode::Drop => {
                processor.pop()?;
            }

            Opcode::Swap => {
                let a = processor.pop()?;
                let b = processor.pop()?;
                processor.push(a)?;
                processor.push(b)?;
            }

            Opcode::Rot => {
                let c = processor.pop()?;
                let b = processor.pop()?;
                let a = processor.pop()?;
                processor.push(b)?;
                processor.push(c)?;
                processor.push(a)?;
            }

            Opcode::Over => {
                let a = processor.pop()?;
                let b = processor.pop()?;
                processor.push(b)?;
                processor.push(a)?;
                processor.push(b)?;
            }

            Opcode::Nip => {
                let a = processor.pop()?;
                processor.pop()?;
                processor.push(a)?;
            }

            Opcode::Tuck => {
                let a = processor.pop()?;
                let b = processor.pop()?;
                processor.push(a)?;
                processor.push(b)?;
                processor.push(a)?;
            }

            Opcode::ToR => {
                let value = processor.pop16()?;
                processor.push_return(value)?;
            }

            Opcode::FromR => {
                let value = processor.pop_return()?;
                processor.push16(value)?;
            }

            Opcode::FetchR => {
                let value = processor.pop_return()?;
                processor.push16(value)?;
                processor.push_return(value)?;
            }

            Opcode::Add => binary(processor, |b, a| Ok(b.wrapping_add(a)))?,
            Opcode::Add16 => binary16(processor, |b, a| Ok(b.wrapping_add(a)))?,
            Opcode::Sub => binary(processor, |b, a| Ok(b.wrapping_sub(a)))?,
            Opcode::Sub16 => binary16(processor, |b, a| Ok(b.wrapping_sub(a)))?,
            Opcode::Mul => binary(processor, |b, a| Ok(b.wrapping_mul(a)))?,
            Opcode::Mul16 => binary16(processor, |b, a| Ok(b.wrapping_mul(a)))?,
            Opcode::Div => binary(processor, |b, a| {
                b.checked_div(a).ok_or(Fault::DivideByZero)
            })?,
            Opcode::Div16 => binary16(processor, |b, a| {
                b.checked_div(a).ok_or(Fault::DivideByZero)
            })?,
            Opcode::Mod => binary(processor, |b, a| {
                b.checked_rem(a).ok_or(Fault::DivideByZero)
            })?,
            Opcode::Mod16 => binary16(processor, |b, a| {
                b.checked_rem(a).ok_or(Fault::DivideByZero)
            })?,
            Opcode::And => binary(processor, |b, a| Ok(b & a))?,
            Opcode::And16 => binary16(processor, |b, a| Ok(b & a))?,
            Opcode::Or => binary(processor, |b, a| Ok(b | a))?,
            Opcode::Or16 => binary16(processor, |b, a| Ok(b | a))?,
            Opcode::Xor => binary(processor, |b, a| Ok(b ^ a))?,
            Opcode::Xor16 => binary16(processor, |b, a| Ok(b ^ a))?,

            Opcode::Not => {
                let a = processor.pop()?;
                processor.push(!a)?;
            }

            Opcode::Not16 => {
                let a = processor.pop16()?;
                processor.push16(!a)?;
            }

            Opcode::Inc => {
                let a = processor.pop()?;
                processor.push(a.wrapping_add(1))?;
            }

            Opcode::Inc16 => {
                let a = processor.pop16()?;
                processor.push16(a.wrapping_add(1))?;
            }

            Opcode::Dec => {
                let a = processor.pop()?;
                processor.push(a.wrapping_sub(1))?;
            }

            Opcode::Dec16 => {
                let a = processor.pop16()?;
                processor.push16(a.wrapping_sub(1))?;
            }

            // The shift amount is always a single octet
            Opcode::Shl => {
                let amount = processor.pop()?;
                let value = processor.pop()?;
                let res = value.checked_shl(amount.into()).unwrap_or(0);
                debug!("{} << {} = {}", value, amount, res);
                processor.push(res)?;
            }

            Opcode::Shl16 => {
                let amount = processor.pop()?;
                let value = processor.pop16()?;
                let res = value.checked_shl(amount.into()).unwrap_or(0);
                debug!("{} << {} = {}", value, amount, res);
                processor.push16(res)?;
            }

            Opcode::Shr => {
                let amount = processor.pop()?;
                let value = processor.pop()?;
                let res = value.checked_shr(amount.into()).unwrap_or(0);
                debug!("{} >> {} = {}", value, amount, res);
                processor.push(res)?;
            }

            Opcode::Shr16 => {
                let amount = processor.pop()?;
                let value = processor.pop16()?;
                let res = value.checked_shr(amount.into()).unwrap_or(0);
                debug!("{} >> {} = {}", value, amount, res);
                processor.push16(res)?;
            }

            Opcode::Jz => {
                let condition = processor.pop()?;
                let target = processor.pop16()?;
                if condition == 0 {
                    processor.jump(target);
                }
            }

            Opcode::Jnz => {
                let condition = processor.pop()?;
                let target = processor.pop16()?;
                if condition != 0 {
                    processor.jump(target);
                }
            }

            Opcode::Call => {
                let target = processor.pop16()?;
                let ret = processor.pc;
                processor.push_return(ret)?;
                processor.jump(target);
            }

            Opcode::Ret => {
                let ret = processor.pop_return()?;
                debug!("Returning to {:#06x}", ret);
                processor.pc = ret;
            }

            // Comparisons push an octet, whatever the width of their operands
            Opcode::Eq => compare(processor, |b, a| b == a)?,
            Opcode::Eq16 => compare16(processor, |b, a| b == a)?,
            Opcode::Nq => compare(processor, |b, a| b != a)?,
            Opcode::Nq16 => compare16(processor, |b, a| b != a)?,
            Opcode::Gt => compare(processor, |b, a| b > a)?,
            Opcode::Gt16 => compare16(processor, |b, a| b > a)?,
            Opcode::Lt => compare(processor, |b, a| b < a)?,
            Opcode::Lt16 => compare16(processor, |b, a| b < a)?,

            Opcode::Push => processor.push(self.operand.byte())?,
            Opcode::Push16 => processor.push16(self.operand.word())?,

            Opcode::Store => {
                let value = processor.pop()?;
                let address = processor.pop16()?;
                processor.mmio.write(address, value);
            }

            Opcode::Store16 => {
                let low = processor.pop()?;
                let high = processor.pop()?;
                let address = processor.pop16()?;
                processor.mmio.write(address, high);
                processor.mmio.write(address.wrapping_add(1), low);
            }

            Opcode::Load => {
                let address = processor.pop16()?;
                let value = processor.mmio.read(address);
                processor.push(value)?;
            }

            // Goes through the 8-bit push twice, so a full stack may end up
            // holding only the high octet.
            Opcode::Load16 => {
                let address = processor.pop16()?;
                let high = processor.mmio.read(address);
                let low = processor.mmio.read(address.wrapping_add(1));
                processor.push(high)?;
                processor.push(low)?;
            }
        };

        Ok(())
    }
}

fn binary<F>(processor: &mut Processor, op: F) -> std::result::Result<(), Fault>
where
    F: FnOnce(u8, u8) -> std::result::Result<u8, Fault>,
{
    let a = processor.pop()?;
    let b = processor.pop()?;
    let res = op(b, a)?;
    debug!(a, b, res, "8-bit operation");
    processor.push(res)
}

fn binary16<F>(processor: &mut Processor, op: F) -> std::result::Result<(), Fault>
where
    F: FnOnce(u16, u16) -> std::result::Result<u16, Fault>,
{
    let a = processor.pop16()?;
    let b = processor.pop16()?;
    let res = op(b, a)?;
    debug!(a, b, res, "16-bit operation");
    processor.push16(res)
}

fn compare<F>(processor: &mut Processor, op: F) -> std::result::Result<(), Fault>
where
    F: FnOnce(u8, u8) -> bool,
{
    let a = processor.pop()?;
    let b = processor.pop()?;
    processor.push(op(b, a).into())
}

fn compare16<F>(processor: &mut Processor, op: F) -> std::result::Result<(), Fault>
where
    F: FnOnce(u16, u16) -> bool,
{
    let a = processor.pop16()?;
    let b = processor.pop16()?;
    processor.push(op(b, a).into())
}
