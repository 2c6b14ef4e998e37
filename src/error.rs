use std::{error::Error, fmt};

use miette::{miette, LabeledSpan, Report, Severity};

use crate::symbol::Register;

/// Error parsing the operands of a single instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperandError {
    WrongCount { expected: usize, found: usize },
    InvalidRegister(String),
    InvalidLiteral(String),
    /// Value does not fit the width of its field.
    Overflow { value: u32, bits: u32 },
}

impl Error for OperandError {}

impl fmt::Display for OperandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongCount { expected, found } => write!(
                f,
                "expected {} operand{}, found {}",
                expected,
                if *expected == 1 { "" } else { "s" },
                found
            ),
            Self::InvalidRegister(token) => write!(f, "`{}` is not a register", token),
            Self::InvalidLiteral(token) => write!(f, "`{}` is not a numeric literal", token),
            Self::Overflow { value, bits } => {
                write!(f, "operand overflow: 0x{:X} does not fit in {} bits", value, bits)
            }
        }
    }
}

/// Assembly failure, tagged with the 1-based source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AsmError {
    pub line: usize,
    pub kind: AsmErrorKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AsmErrorKind {
    InvalidMnemonic(String),
    InvalidOperands {
        mnemonic: &'static str,
        error: OperandError,
    },
    /// `db` value wider than a byte.
    ByteOverflow(u32),
    /// `db` token that is not a literal.
    InvalidByte(String),
}

impl AsmError {
    pub fn new(line: usize, kind: AsmErrorKind) -> Self {
        Self { line, kind }
    }

    pub fn line(&self) -> usize {
        self.line
    }
}

impl Error for AsmError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            AsmErrorKind::InvalidOperands { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.kind)
    }
}

impl fmt::Display for AsmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMnemonic(name) => write!(f, "invalid mnemonic `{}`", name),
            Self::InvalidOperands { mnemonic, error } => {
                write!(f, "invalid operands to instruction `{}`: {}", mnemonic, error)
            }
            Self::ByteOverflow(value) => {
                write!(f, "number passed overflows byte: 0x{:X}", value)
            }
            Self::InvalidByte(token) => write!(f, "`{}` is not a byte literal", token),
        }
    }
}

/// Failure while the machine is running. Machine state is left as it was before the step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuntimeError {
    NotLoaded,
    Decode { address: u16, opcode: u16 },
    OutOfBounds { address: usize },
    InvalidRegister(usize),
    RegisterOverflow { register: Register, value: u16 },
}

impl Error for RuntimeError {}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotLoaded => write!(f, "no program is loaded"),
            Self::Decode { address, opcode } => write!(
                f,
                "cannot decode instruction 0x{:04X} at address 0x{:04X}",
                opcode, address
            ),
            Self::OutOfBounds { address } => {
                write!(f, "memory access out of bounds at 0x{:X}", address)
            }
            Self::InvalidRegister(index) => write!(f, "no register with index {}", index),
            Self::RegisterOverflow { register, value } => {
                write!(f, "value 0x{:X} does not fit register {}", value, register)
            }
        }
    }
}

/// Failure to begin a session. No session exists afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartError {
    Asm(AsmError),
    Load(RuntimeError),
}

impl Error for StartError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Asm(error) => Some(error),
            Self::Load(error) => Some(error),
        }
    }
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asm(error) => write!(f, "{}", error),
            Self::Load(error) => write!(f, "cannot load program: {}", error),
        }
    }
}

impl From<AsmError> for StartError {
    fn from(error: AsmError) -> Self {
        Self::Asm(error)
    }
}

impl From<RuntimeError> for StartError {
    fn from(error: RuntimeError) -> Self {
        Self::Load(error)
    }
}

// Diagnostics

/// Span of the 1-based `line` within `src`, excluding the line terminator.
fn line_span(src: &str, line: usize) -> (usize, usize) {
    let mut offset = 0;
    for (i, text) in src.split('\n').enumerate() {
        if i + 1 == line {
            return (offset, text.trim_end_matches('\r').len());
        }
        offset += text.len() + 1;
    }
    (src.len().saturating_sub(1), 0)
}

pub fn asm_report(error: &AsmError, src: &str) -> Report {
    let (offs, len) = line_span(src, error.line);
    let (code, help, label) = match &error.kind {
        AsmErrorKind::InvalidMnemonic(_) => (
            "asm::mnemonic",
            "check the list of available instructions in the documentation.",
            "unknown instruction",
        ),
        AsmErrorKind::InvalidOperands { .. } => (
            "asm::operands",
            "registers are written `v0`-`v15`, literals as decimal or `0x` hex.",
            "incorrect operands",
        ),
        AsmErrorKind::ByteOverflow(_) => (
            "asm::db",
            "`db` values range from 0 to 255.",
            "value too large",
        ),
        AsmErrorKind::InvalidByte(_) => (
            "asm::db",
            "`db` takes a list of decimal or `0x` hex literals.",
            "not a literal",
        ),
    };
    miette!(
        severity = Severity::Error,
        code = code,
        help = help,
        labels = vec![LabeledSpan::at(offs..offs + len, label)],
        "{}",
        error.kind,
    )
    .with_source_code(src.to_string())
}

pub fn runtime_report(error: &RuntimeError) -> Report {
    let help = match error {
        RuntimeError::Decode { .. } => "the bytes at this address are data, not an instruction.",
        RuntimeError::OutOfBounds { .. } => "memory ranges from 0x000 to 0xFFF.",
        _ => "this is a bug in the program being run.",
    };
    miette!(
        severity = Severity::Error,
        code = "runtime",
        help = help,
        "{}",
        error,
    )
}
