use crate::isa::Instruction;

/// Assembly intermediate representation: one statement per source line which emits bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Air {
    lines: Vec<AsmLine>,
}

/// Statement along with its 1-based source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AsmLine {
    pub line: usize,
    pub stmt: AirStmt,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AirStmt {
    /// Catalog instruction, always 2 bytes.
    Instr(Instruction),
    /// `db` directive
    Bytes(Vec<u8>),
}

impl AirStmt {
    /// Serialized form, big-endian for instructions.
    pub fn emit(&self) -> Vec<u8> {
        match self {
            AirStmt::Instr(instr) => instr.encode().to_be_bytes().to_vec(),
            AirStmt::Bytes(bytes) => bytes.clone(),
        }
    }
}

impl Air {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stmt(&mut self, line: usize, stmt: AirStmt) {
        self.lines.push(AsmLine { line, stmt })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AsmLine> {
        self.lines.iter()
    }

    /// Flatten into a byte buffer and the source line of every byte.
    pub fn generate_bytecode(&self) -> Program {
        let mut program = Program::default();
        for asm_line in &self.lines {
            let bytes = asm_line.stmt.emit();
            program
                .lines
                .extend(std::iter::repeat(asm_line.line).take(bytes.len()));
            program.bytes.extend(bytes);
        }
        program
    }
}

impl IntoIterator for Air {
    type Item = AsmLine;
    type IntoIter = std::vec::IntoIter<AsmLine>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.into_iter()
    }
}

impl<'a> IntoIterator for &'a Air {
    type Item = &'a AsmLine;
    type IntoIter = std::slice::Iter<'a, AsmLine>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter()
    }
}

/// Assembled bytes plus a parallel table mapping each byte offset to its source line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    pub bytes: Vec<u8>,
    pub lines: Vec<usize>,
}

impl Program {
    /// Source line of the byte at `offset`.
    pub fn line_at(&self, offset: usize) -> Option<usize> {
        self.lines.get(offset).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::lookup_by_opcode;

    #[test]
    fn bytecode_and_line_table() {
        let mut air = Air::new();
        air.add_stmt(1, AirStmt::Instr(lookup_by_opcode(0x1204).unwrap()));
        air.add_stmt(3, AirStmt::Bytes(vec![0xAB, 0xCD, 0xEF]));
        air.add_stmt(4, AirStmt::Instr(lookup_by_opcode(0x6005).unwrap()));
        air.add_stmt(5, AirStmt::Bytes(vec![]));

        let program = air.generate_bytecode();
        assert_eq!(program.bytes, vec![0x12, 0x04, 0xAB, 0xCD, 0xEF, 0x60, 0x05]);
        assert_eq!(program.lines, vec![1, 1, 3, 3, 3, 4, 4]);
        assert_eq!(program.line_at(4), Some(3));
        assert_eq!(program.line_at(7), None);
    }
}
