//! Operand layouts of the 16-bit instruction word.
//!
//! ```text
//!  15    12 11     8 7      4 3      0
//! +--------+--------+--------+--------+
//! | opcode |   x    |   y    |   n    |
//! +--------+--------+--------+--------+
//!          |           nnn            |
//!                   |       nn        |
//! ```

use std::fmt;

use crate::error::OperandError;
use crate::symbol::REGISTER_COUNT;

/// Operand shape of an instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Layout {
    NoArg,
    /// `nnn`
    Address12,
    /// `x`, `nn`
    RegImm8,
    /// `x`, `y`
    RegReg,
    /// `x`
    Reg,
    /// `x`, `y`, `n`
    RegRegImm4,
}

/// Decoded operand values, tagged by layout.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Operands {
    None,
    Address(u16),
    RegImm { x: u8, nn: u8 },
    RegReg { x: u8, y: u8 },
    Reg { x: u8 },
    RegRegImm { x: u8, y: u8, n: u8 },
}

impl Layout {
    /// Bits of the word which are fixed by the instruction, rather than its operands.
    pub fn mask(&self) -> u16 {
        match self {
            Layout::NoArg => 0xFFFF,
            Layout::Address12 => 0xF000,
            Layout::RegImm8 => 0xF000,
            Layout::RegReg => 0xF00F,
            Layout::Reg => 0xF0FF,
            Layout::RegRegImm4 => 0xF000,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Layout::NoArg => 0,
            Layout::Address12 | Layout::Reg => 1,
            Layout::RegImm8 | Layout::RegReg => 2,
            Layout::RegRegImm4 => 3,
        }
    }

    /// Extract operand fields from `word` by fixed bit position.
    pub fn decode(&self, word: u16) -> Operands {
        let x = ((word >> 8) & 0xF) as u8;
        let y = ((word >> 4) & 0xF) as u8;
        match self {
            Layout::NoArg => Operands::None,
            Layout::Address12 => Operands::Address(word & 0x0FFF),
            Layout::RegImm8 => Operands::RegImm {
                x,
                nn: (word & 0xFF) as u8,
            },
            Layout::RegReg => Operands::RegReg { x, y },
            Layout::Reg => Operands::Reg { x },
            Layout::RegRegImm4 => Operands::RegRegImm {
                x,
                y,
                n: (word & 0xF) as u8,
            },
        }
    }

    /// Parse operand tokens (mnemonic excluded) for this layout.
    pub fn parse(&self, tokens: &[&str]) -> Result<Operands, OperandError> {
        if tokens.len() != self.arity() {
            return Err(OperandError::WrongCount {
                expected: self.arity(),
                found: tokens.len(),
            });
        }
        Ok(match self {
            Layout::NoArg => Operands::None,
            Layout::Address12 => Operands::Address(parse_literal(tokens[0], 12)? as u16),
            Layout::RegImm8 => Operands::RegImm {
                x: parse_register(tokens[0])?,
                nn: parse_literal(tokens[1], 8)? as u8,
            },
            Layout::RegReg => Operands::RegReg {
                x: parse_register(tokens[0])?,
                y: parse_register(tokens[1])?,
            },
            Layout::Reg => Operands::Reg {
                x: parse_register(tokens[0])?,
            },
            Layout::RegRegImm4 => Operands::RegRegImm {
                x: parse_register(tokens[0])?,
                y: parse_register(tokens[1])?,
                n: parse_literal(tokens[2], 4)? as u8,
            },
        })
    }
}

impl Operands {
    /// Operand bits, shifted into place. OR with the fixed bits of an instruction to encode.
    pub fn bits(&self) -> u16 {
        match *self {
            Operands::None => 0,
            Operands::Address(nnn) => nnn & 0x0FFF,
            Operands::RegImm { x, nn } => (x as u16 & 0xF) << 8 | nn as u16,
            Operands::RegReg { x, y } => (x as u16 & 0xF) << 8 | (y as u16 & 0xF) << 4,
            Operands::Reg { x } => (x as u16 & 0xF) << 8,
            Operands::RegRegImm { x, y, n } => {
                (x as u16 & 0xF) << 8 | (y as u16 & 0xF) << 4 | (n as u16 & 0xF)
            }
        }
    }

    pub fn layout(&self) -> Layout {
        match self {
            Operands::None => Layout::NoArg,
            Operands::Address(_) => Layout::Address12,
            Operands::RegImm { .. } => Layout::RegImm8,
            Operands::RegReg { .. } => Layout::RegReg,
            Operands::Reg { .. } => Layout::Reg,
            Operands::RegRegImm { .. } => Layout::RegRegImm4,
        }
    }

    // Field accessors return 0 for fields the layout does not carry.

    pub fn x(&self) -> u8 {
        match *self {
            Operands::RegImm { x, .. }
            | Operands::RegReg { x, .. }
            | Operands::Reg { x }
            | Operands::RegRegImm { x, .. } => x,
            _ => 0,
        }
    }

    pub fn y(&self) -> u8 {
        match *self {
            Operands::RegReg { y, .. } | Operands::RegRegImm { y, .. } => y,
            _ => 0,
        }
    }

    pub fn n(&self) -> u8 {
        match *self {
            Operands::RegRegImm { n, .. } => n,
            _ => 0,
        }
    }

    pub fn nn(&self) -> u8 {
        match *self {
            Operands::RegImm { nn, .. } => nn,
            _ => 0,
        }
    }

    pub fn nnn(&self) -> u16 {
        match *self {
            Operands::Address(nnn) => nnn,
            _ => 0,
        }
    }
}

/// Renders operands as assembly text, e.g. `v1, 0xFF`.
impl fmt::Display for Operands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Operands::None => Ok(()),
            Operands::Address(nnn) => write!(f, "0x{:X}", nnn),
            Operands::RegImm { x, nn } => write!(f, "v{}, 0x{:X}", x, nn),
            Operands::RegReg { x, y } => write!(f, "v{}, v{}", x, y),
            Operands::Reg { x } => write!(f, "v{}", x),
            Operands::RegRegImm { x, y, n } => write!(f, "v{}, v{}, 0x{:X}", x, y, n),
        }
    }
}

/// Split an assembly line into tokens. Commas are whitespace.
pub fn tokenize(line: &str) -> Vec<&str> {
    line.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .collect()
}

/// Parse a decimal or `0x`-prefixed hexadecimal literal, without range check.
pub fn parse_number(token: &str) -> Result<u32, OperandError> {
    let (digits, radix) = match token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        Some(hex) => (hex, 16),
        None => (token, 10),
    };
    // `from_str_radix` would take a leading `+`
    if digits.starts_with('+') {
        return Err(OperandError::InvalidLiteral(token.to_string()));
    }
    u32::from_str_radix(digits, radix)
        .map_err(|_| OperandError::InvalidLiteral(token.to_string()))
}

/// Parse a literal which must fit in `bits` bits.
pub fn parse_literal(token: &str, bits: u32) -> Result<u32, OperandError> {
    let value = parse_number(token)?;
    if value >> bits != 0 {
        return Err(OperandError::Overflow { value, bits });
    }
    Ok(value)
}

/// Parse a register token `v<digits>`.
pub fn parse_register(token: &str) -> Result<u8, OperandError> {
    let digits = token
        .strip_prefix('v')
        .filter(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        .ok_or_else(|| OperandError::InvalidRegister(token.to_string()))?;
    let value = digits
        .parse::<u32>()
        .map_err(|_| OperandError::InvalidRegister(token.to_string()))?;
    if value as usize >= REGISTER_COUNT {
        return Err(OperandError::Overflow { value, bits: 4 });
    }
    Ok(value as u8)
}
