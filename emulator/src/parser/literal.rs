//! Operand literals.
//!
//! Numbers are written in base 10, base 16 (`0x`), base 8 (`0o`) or base 2
//! (`0b`) and must fit in 16 bits. Text goes between single quotes and is
//! taken as is, without any escape sequence.

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while, take_while1},
    character::complete::{char, digit1},
    combinator::{map, map_res},
    sequence::{delimited, preceded},
    IResult,
};

/// An operand as written in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Literal<'a> {
    Number(u16),
    Text(&'a str),
}

/// Digits in the given radix, after a prefix
fn prefixed<'a>(
    prefix: &'static str,
    radix: u32,
) -> impl FnMut(&'a str) -> IResult<&'a str, u16> {
    map_res(
        preceded(tag_no_case(prefix), take_while1(move |c: char| c.is_digit(radix))),
        move |digits| u16::from_str_radix(digits, radix),
    )
}

/// Parse a number literal
pub(crate) fn parse_number(input: &str) -> IResult<&str, u16> {
    alt((
        prefixed("0x", 16),
        prefixed("0o", 8),
        prefixed("0b", 2),
        map_res(digit1, |digits: &str| digits.parse::<u16>()),
    ))(input)
}

/// Parse quoted text
pub(crate) fn parse_text(input: &str) -> IResult<&str, &str> {
    delimited(char('\''), take_while(|c: char| c != '\''), char('\''))(input)
}

pub(crate) fn parse_literal(input: &str) -> IResult<&str, Literal<'_>> {
    alt((
        map(parse_text, Literal::Text),
        map(parse_number, Literal::Number),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_number_test() {
        // Decimal
        assert_eq!(parse_number("42"), Ok(("", 42)));
        assert_eq!(parse_number("65535"), Ok(("", 0xffff))); // Upper bound
        assert!(parse_number("65536").is_err());

        // Hexadecimal
        assert_eq!(parse_number("0x4f"), Ok(("", 0x4f)));
        assert_eq!(parse_number("0X041A"), Ok(("", 0x041a)));
        assert_eq!(parse_number("0x10000"), Ok(("x10000", 0))); // Too wide, only eats the first digit

        // Octal
        assert_eq!(parse_number("0o17"), Ok(("", 0o17)));
        assert_eq!(parse_number("0o8"), Ok(("o8", 0)));

        // Binary
        assert_eq!(parse_number("0b101"), Ok(("", 5)));
        assert_eq!(parse_number("0b2"), Ok(("b2", 0)));

        assert!(parse_number("abc").is_err());
    }

    #[test]
    fn parse_text_test() {
        assert_eq!(parse_text("'A'"), Ok(("", "A")));
        assert_eq!(parse_text("'hello world' // x"), Ok((" // x", "hello world")));
        assert_eq!(parse_text("''"), Ok(("", "")));
        assert!(parse_text("'unterminated").is_err());
        assert!(parse_text("A").is_err());
    }

    #[test]
    fn parse_literal_test() {
        assert_eq!(parse_literal("'0x10'"), Ok(("", Literal::Text("0x10"))));
        assert_eq!(parse_literal("0x10"), Ok(("", Literal::Number(0x10))));
    }
}
