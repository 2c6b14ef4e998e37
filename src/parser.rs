use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::air::{Air, AirStmt, Program};
use crate::disasm;
use crate::error::{AsmError, AsmErrorKind};
use crate::isa::{self, Instruction};
use crate::operand::{parse_number, tokenize};

/// Pseudo-mnemonic emitting raw bytes.
const DB: &str = "db";

lazy_static! {
    /// A comment runs from `#` to the next `#`, across lines if needed. A `#` which is never
    /// closed comments out the rest of its line.
    static ref COMMENT: Regex = Regex::new(r"#[^#]*#|#[^\n]*").unwrap();
    /// Position annotation generated at the start of listing lines.
    static ref ANNOTATION: Regex = Regex::new(r"^#@[^#]+#").unwrap();
}

/// Remove comments, keeping the line breaks they span so line numbers hold.
pub fn strip_comments(src: &str) -> String {
    COMMENT
        .replace_all(src, |caps: &Captures| {
            "\n".repeat(caps[0].matches('\n').count())
        })
        .into_owned()
}

/// Remove a leading `#@ ... #` annotation from a single line.
pub fn strip_annotation(line: &str) -> &str {
    match ANNOTATION.find(line) {
        Some(found) => &line[found.end()..],
        None => line,
    }
}

/// Transforms source text into AIR
pub struct AsmParser<'a> {
    /// Reference to the source file
    src: &'a str,
    air: Air,
}

impl<'a> AsmParser<'a> {
    pub fn new(src: &'a str) -> Self {
        AsmParser {
            src,
            air: Air::new(),
        }
    }

    /// Create AIR out of the whole source. Fails on the first bad line.
    pub fn parse(mut self) -> Result<Air, AsmError> {
        // Annotations go first, so one starting a line cannot close a comment opened above
        let unannotated: Vec<&str> = self.src.split('\n').map(strip_annotation).collect();
        let stripped = strip_comments(&unannotated.join("\n"));
        for (idx, text) in stripped.split('\n').enumerate() {
            let line = idx + 1;
            if let Some(stmt) = Self::parse_line(line, text)? {
                self.air.add_stmt(line, stmt);
            }
        }
        Ok(self.air)
    }

    fn parse_line(line: usize, text: &str) -> Result<Option<AirStmt>, AsmError> {
        let tokens = tokenize(text);
        let Some((&mnemonic, operands)) = tokens.split_first() else {
            return Ok(None);
        };
        if mnemonic == DB {
            return Self::parse_bytes(line, operands).map(|bytes| Some(AirStmt::Bytes(bytes)));
        }

        let entry = isa::lookup_by_mnemonic(mnemonic).ok_or_else(|| {
            AsmError::new(line, AsmErrorKind::InvalidMnemonic(mnemonic.to_string()))
        })?;
        let operands = entry.layout.parse(operands).map_err(|error| {
            AsmError::new(
                line,
                AsmErrorKind::InvalidOperands {
                    mnemonic: entry.mnemonic,
                    error,
                },
            )
        })?;
        Ok(Some(AirStmt::Instr(Instruction::new(entry, operands))))
    }

    fn parse_bytes(line: usize, tokens: &[&str]) -> Result<Vec<u8>, AsmError> {
        tokens
            .iter()
            .map(|token| {
                let value = parse_number(token).map_err(|_| {
                    AsmError::new(line, AsmErrorKind::InvalidByte(token.to_string()))
                })?;
                u8::try_from(value)
                    .map_err(|_| AsmError::new(line, AsmErrorKind::ByteOverflow(value)))
            })
            .collect()
    }
}

pub fn assemble(src: &str) -> Result<Air, AsmError> {
    AsmParser::new(src).parse()
}

pub fn generate_bytecode(src: &str) -> Result<Program, AsmError> {
    assemble(src).map(|air| air.generate_bytecode())
}

/// Rewrite the position annotation of every line from a fresh assemble of the whole text.
/// Lines which emit nothing lose their annotation.
pub fn fix_offsets(src: &str) -> Result<String, AsmError> {
    let lines: Vec<&str> = src.lines().map(strip_annotation).collect();
    let air = assemble(&lines.join("\n"))?;

    let mut emitted = air.iter().peekable();
    let mut offset = 0;
    let mut out = String::with_capacity(src.len());
    for (idx, text) in lines.iter().enumerate() {
        let bytes = match emitted.next_if(|asm_line| asm_line.line == idx + 1) {
            Some(asm_line) => asm_line.stmt.emit(),
            None => Vec::new(),
        };
        if !bytes.is_empty() {
            out.push_str(&disasm::annotation(offset, &bytes));
            if !text.is_empty() && !text.starts_with(char::is_whitespace) {
                out.push(' ');
            }
            offset += bytes.len();
        }
        out.push_str(text);
        out.push('\n');
    }
    Ok(out)
}

/// Bytes emitted by a single line, assembled on its own.
fn line_bytes(line: usize, text: &str) -> Result<Vec<u8>, AsmError> {
    let stmt = AsmParser::parse_line(line, &strip_comments(strip_annotation(text)))?;
    Ok(stmt.map(|stmt| stmt.emit()).unwrap_or_default())
}

/// Re-disassemble the bytes of 1-based `line` as code. A single data byte is first joined
/// with the bytes of the following line. Unsuitable lines leave the text as it was.
pub fn recompile_as_code(line: usize, src: &str) -> Result<String, AsmError> {
    let lines: Vec<&str> = src.lines().collect();
    let Some(idx) = line.checked_sub(1).filter(|idx| *idx < lines.len()) else {
        return Ok(src.to_string());
    };

    let mut bytes = line_bytes(line, lines[idx])?;
    let mut rest = idx + 1;
    if bytes.is_empty() {
        return Ok(src.to_string());
    }
    if bytes.len() == 1 && rest < lines.len() {
        let next = line_bytes(line + 1, lines[rest])?;
        if !(1..=2).contains(&next.len()) {
            return Ok(src.to_string());
        }
        bytes.extend(next);
        rest += 1;
    }

    let listing = disasm::disassemble(&bytes);
    let merged: Vec<&str> = lines[..idx]
        .iter()
        .copied()
        .chain(listing.lines())
        .chain(lines[rest..].iter().copied())
        .collect();
    fix_offsets(&merged.join("\n"))
}

/// Replace an instruction on 1-based `line` by one `db` line per byte.
pub fn recompile_as_data(line: usize, src: &str) -> Result<String, AsmError> {
    let lines: Vec<&str> = src.lines().collect();
    let Some(idx) = line.checked_sub(1).filter(|idx| *idx < lines.len()) else {
        return Ok(src.to_string());
    };

    let bytes = line_bytes(line, lines[idx])?;
    if bytes.len() < 2 {
        return Ok(src.to_string());
    }

    let data: Vec<String> = bytes
        .iter()
        .enumerate()
        .map(|(offset, byte)| disasm::render_data(offset, *byte))
        .collect();
    let merged: Vec<&str> = lines[..idx]
        .iter()
        .copied()
        .chain(data.iter().map(String::as_str))
        .chain(lines[idx + 1..].iter().copied())
        .collect();
    fix_offsets(&merged.join("\n"))
}
