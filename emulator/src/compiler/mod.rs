//! Turn assembly source into a program image, and back.

use miette::{Diagnostic, SourceSpan};
use nom::{Finish, Offset};
use thiserror::Error;
use tracing::debug;

use crate::parser::{parse_line, Literal, Statement};
use crate::runtime::Opcode;

mod listing;

pub use self::listing::{disassemble, Listing};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssembleErrorKind {
    #[error("unknown mnemonic \"{0}\"")]
    UnknownMnemonic(String),

    #[error("invalid syntax")]
    Syntax,

    #[error("{0:#x} does not fit in a single octet")]
    OperandTooWide(u16),
}

#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
#[error("line {line}: {kind}")]
#[diagnostic(code(switchboard::assemble))]
pub struct AssembleError {
    /// Line number, starting at 1
    pub line: usize,

    pub kind: AssembleErrorKind,

    /// Offending part of the source
    #[label("here")]
    pub span: SourceSpan,
}

/// An error within a line, located relative to that line
struct LineError {
    kind: AssembleErrorKind,
    offset: usize,
    len: usize,
}

fn assemble_line(line: &str, image: &mut Vec<u8>) -> Result<(), LineError> {
    let (_, parsed) = parse_line(line)
        .finish()
        .map_err(|e: nom::error::Error<&str>| LineError {
            kind: AssembleErrorKind::Syntax,
            offset: line.offset(e.input),
            len: e.input.len(),
        })?;

    let Some(Statement { mnemonic, operand }) = parsed.statement else {
        return Ok(());
    };

    let opcode: Opcode = mnemonic
        .to_ascii_lowercase()
        .parse()
        .map_err(|_| LineError {
            kind: AssembleErrorKind::UnknownMnemonic(mnemonic.to_owned()),
            offset: line.offset(mnemonic),
            len: mnemonic.len(),
        })?;
    image.push(opcode.into());

    match operand {
        None => {}
        Some((_, Literal::Text(text))) => image.extend_from_slice(text.as_bytes()),
        Some((_, Literal::Number(value))) if opcode.is_wide() => {
            image.extend(value.to_be_bytes());
        }
        Some((source, Literal::Number(value))) => {
            let octet = u8::try_from(value).map_err(|_| LineError {
                kind: AssembleErrorKind::OperandTooWide(value),
                offset: line.offset(source),
                len: source.len(),
            })?;
            image.push(octet);
        }
    }

    Ok(())
}

/// Assemble a program.
///
/// Every line holds at most one mnemonic, optionally followed by an operand
/// and a `//` comment. Operands are emitted right after the opcode: quoted
/// text as is, numbers on two octets (high first) for 16-bit mnemonics and
/// on one octet otherwise.
///
/// # Errors
///
/// Returns the first line that could not be assembled.
#[tracing::instrument(skip(source), fields(len = source.len()))]
pub fn assemble(source: &str) -> Result<Vec<u8>, AssembleError> {
    let mut image = Vec::new();
    let mut start = 0;

    for (index, raw) in source.split('\n').enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        assemble_line(line, &mut image).map_err(|e| AssembleError {
            line: index + 1,
            kind: e.kind,
            span: (start + e.offset, e.len).into(),
        })?;
        start += raw.len() + 1;
    }

    debug!(len = image.len(), "Program assembled");
    Ok(image)
}
