//! Assembly source parsing, built on `nom`.

mod line;
mod literal;

pub(crate) use self::line::{parse_line, Statement};
pub(crate) use self::literal::Literal;
