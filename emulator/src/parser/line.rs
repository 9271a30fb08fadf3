//! Source line parsing
//!
//! A line holds at most one statement (a mnemonic and an optional operand),
//! optionally followed by a `//` comment. Every part borrows from the line
//! itself, so its offset can be recovered from it.

use nom::{
    bytes::complete::tag,
    character::complete::{alphanumeric1, not_line_ending, space0, space1},
    combinator::{consumed, eof, opt},
    sequence::preceded,
    IResult,
};

use super::literal::{parse_literal, Literal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Statement<'a> {
    pub mnemonic: &'a str,
    /// The operand, along with its source text
    pub operand: Option<(&'a str, Literal<'a>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Line<'a> {
    pub statement: Option<Statement<'a>>,
    pub comment: Option<&'a str>,
}

fn parse_comment(input: &str) -> IResult<&str, &str> {
    preceded(tag("//"), not_line_ending)(input)
}

fn parse_statement(input: &str) -> IResult<&str, Statement<'_>> {
    let (input, mnemonic) = alphanumeric1(input)?;
    let (input, operand) = opt(preceded(space1, consumed(parse_literal)))(input)?;
    Ok((input, Statement { mnemonic, operand }))
}

/// Parse a whole line, which must not contain any line ending
pub(crate) fn parse_line(input: &str) -> IResult<&str, Line<'_>> {
    let (input, _) = space0(input)?;
    let (input, statement) = opt(parse_statement)(input)?;
    let (input, _) = space0(input)?;
    let (input, comment) = opt(parse_comment)(input)?;
    let (input, _) = eof(input)?;
    Ok((input, Line { statement, comment }))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parse_statement_test() {
        assert_eq!(
            parse_line("PUSH16 0x0400"),
            Ok((
                "",
                Line {
                    statement: Some(Statement {
                        mnemonic: "PUSH16",
                        operand: Some(("0x0400", Literal::Number(0x0400))),
                    }),
                    comment: None,
                }
            ))
        );

        assert_eq!(
            parse_line("\tpush 'hi there'   // greet"),
            Ok((
                "",
                Line {
                    statement: Some(Statement {
                        mnemonic: "push",
                        operand: Some(("'hi there'", Literal::Text("hi there"))),
                    }),
                    comment: Some(" greet"),
                }
            ))
        );

        assert_eq!(
            parse_line("halt // done"),
            Ok((
                "",
                Line {
                    statement: Some(Statement {
                        mnemonic: "halt",
                        operand: None,
                    }),
                    comment: Some(" done"),
                }
            ))
        );
    }

    #[test]
    fn parse_empty_line_test() {
        assert_eq!(parse_line(""), Ok(("", Line::default())));
        assert_eq!(parse_line("    "), Ok(("", Line::default())));
        assert_eq!(
            parse_line("// just a comment"),
            Ok((
                "",
                Line {
                    statement: None,
                    comment: Some(" just a comment"),
                }
            ))
        );
    }

    #[test]
    fn parse_invalid_line_test() {
        assert!(parse_line("push 0x10 0x20").is_err());
        assert!(parse_line("push 'oops").is_err());
        assert!(parse_line("push, 1").is_err());
    }
}
