//! Binary to annotated listing.
//!
//! Bytes carry no length prefixes, so decoding sequentially would go out of step after any
//! embedded data. Instead only offsets reachable from the entry point are decoded as code.

use std::collections::VecDeque;

use fxhash::FxHashSet;

use crate::isa::{self, Instruction};
use crate::symbol::PROGRAM_START;

/// `#@ <offset> <address> : <bytes> #` prefix of a listing line.
pub fn annotation(offset: usize, bytes: &[u8]) -> String {
    let address = offset + PROGRAM_START as usize;
    match bytes {
        [byte] => format!("#@ {:04X} {:04X} : {:02X}    #", offset, address, byte),
        _ => {
            let hex: Vec<String> = bytes.iter().map(|byte| format!("{:02X}", byte)).collect();
            format!("#@ {:04X} {:04X} : {} #", offset, address, hex.join(" "))
        }
    }
}

/// Listing line for a single data byte.
pub fn render_data(offset: usize, byte: u8) -> String {
    format!("{} db 0x{:X}", annotation(offset, &[byte]), byte)
}

/// Listing line for an instruction occupying `offset` and `offset + 1`.
pub fn render_instr(offset: usize, instr: &Instruction) -> String {
    format!(
        "{} {}",
        annotation(offset, &instr.encode().to_be_bytes()),
        instr
    )
}

/// Byte offsets which start an instruction reachable from offset 0.
pub fn code_coverage(bytes: &[u8]) -> FxHashSet<usize> {
    let mut covered = FxHashSet::default();
    let mut queue = VecDeque::from([0usize]);

    while let Some(offset) = queue.pop_front() {
        // Incomplete instruction at the end ends this path only
        if offset + 1 >= bytes.len() || covered.contains(&offset) {
            continue;
        }
        covered.insert(offset);

        let word = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
        let Some(instr) = isa::lookup_by_opcode(word) else {
            continue;
        };
        let ip = (offset + PROGRAM_START as usize) as u16;
        for next in instr.next_ips(ip) {
            // Targets below the program are not part of the buffer
            if let Some(next) = (next as usize).checked_sub(PROGRAM_START as usize) {
                queue.push_back(next);
            }
        }
    }
    covered
}

/// Render `bytes` as a listing which assembles back to the same bytes.
pub fn disassemble(bytes: &[u8]) -> String {
    let covered = code_coverage(bytes);
    let mut lines = Vec::new();

    let mut offset = 0;
    while offset < bytes.len() {
        if covered.contains(&offset) {
            let word = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
            match isa::lookup_by_opcode(word) {
                Some(instr) => lines.push(render_instr(offset, &instr)),
                // Reachable, but not code
                None => {
                    lines.push(render_data(offset, bytes[offset]));
                    lines.push(render_data(offset + 1, bytes[offset + 1]));
                }
            }
            offset += 2;
        } else {
            lines.push(render_data(offset, bytes[offset]));
            offset += 1;
        }
    }
    lines.iter().map(|line| format!("{line}\n")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::generate_bytecode;

    fn sorted(set: FxHashSet<usize>) -> Vec<usize> {
        let mut offsets: Vec<usize> = set.into_iter().collect();
        offsets.sort();
        offsets
    }

    #[test]
    fn annotations() {
        assert_eq!(annotation(0, &[0x12, 0x04]), "#@ 0000 0200 : 12 04 #");
        assert_eq!(annotation(0x1F, &[0xAB]), "#@ 001F 021F : AB    #");
        assert_eq!(annotation(3, &[1, 2, 3]), "#@ 0003 0203 : 01 02 03 #");
        assert_eq!(render_data(2, 0x0A), "#@ 0002 0202 : 0A    # db 0xA");
    }

    #[test]
    fn coverage_follows_control_flow() {
        // jmp 0x204 ; (data) ; skeqi v0, 1 ; ret ; li v1, 2 ; 0xFFFF
        let bytes = [0x12, 0x04, 0x60, 0x05, 0x30, 0x01, 0x00, 0xEE, 0x61, 0x02, 0xFF, 0xFF];
        assert_eq!(sorted(code_coverage(&bytes)), vec![0, 4, 6, 8, 10]);
    }

    #[test]
    fn coverage_of_calls() {
        // call 0x206 ; jmp 0x202 ; (data) ; ret
        let bytes = [0x02, 0x06, 0x12, 0x02, 0xAA, 0xBB, 0x00, 0xEE];
        assert_eq!(sorted(code_coverage(&bytes)), vec![0, 2, 6]);
    }

    #[test]
    fn coverage_stops_at_buffer_end() {
        // Jump past the end, then the skip target is odd but complete
        assert_eq!(sorted(code_coverage(&[0x13, 0x00])), vec![0]);
        assert_eq!(sorted(code_coverage(&[0x60, 0x01, 0x61])), vec![0]);
        assert!(code_coverage(&[0x60]).is_empty());
        assert!(code_coverage(&[]).is_empty());
        // Jump below the program
        assert_eq!(sorted(code_coverage(&[0x10, 0x00, 0x60, 0x01])), vec![0]);
    }

    #[test]
    fn data_that_looks_like_code() {
        // jmp 0x203 skips a byte which would misalign decoding
        let bytes = generate_bytecode("jmp 0x203\ndb 0xAB\nli v0, 5\n").unwrap().bytes;
        assert_eq!(
            disassemble(&bytes),
            "#@ 0000 0200 : 12 03 # jmp 0x203\n\
             #@ 0002 0202 : AB    # db 0xAB\n\
             #@ 0003 0203 : 60 05 # li v0, 0x5\n"
        );
    }

    #[test]
    fn unreached_code_is_data() {
        // `li` lies at 0x203, the jump lands beyond the buffer
        let bytes = generate_bytecode("jmp 0x204\ndb 0xAB\nli v0, 5\n").unwrap().bytes;
        assert_eq!(
            disassemble(&bytes),
            "#@ 0000 0200 : 12 04 # jmp 0x204\n\
             #@ 0002 0202 : AB    # db 0xAB\n\
             #@ 0003 0203 : 60    # db 0x60\n\
             #@ 0004 0204 : 05    # db 0x5\n"
        );
    }

    #[test]
    fn misaligned_bytes_are_not_decoded() {
        // `ret`, then bytes which at offset 3 would read as `jmp 0x234`
        let bytes = [0x00, 0xEE, 0xA1, 0x12, 0x34];
        assert_eq!(
            disassemble(&bytes),
            "#@ 0000 0200 : 00 EE # ret\n\
             #@ 0002 0202 : A1    # db 0xA1\n\
             #@ 0003 0203 : 12    # db 0x12\n\
             #@ 0004 0204 : 34    # db 0x34\n"
        );
    }

    #[test]
    fn reachable_undecodable_word() {
        assert_eq!(
            disassemble(&[0xF0, 0xFF, 0x00]),
            "#@ 0000 0200 : F0    # db 0xF0\n\
             #@ 0001 0201 : FF    # db 0xFF\n\
             #@ 0002 0202 : 00    # db 0x0\n"
        );
    }

    #[test]
    fn listing_reassembles() {
        let src = "li v0, 5\ncall 0x208\njmp 0x204\ndb 1, 2\ndraw v0, v1, 3\nret\n";
        let bytes = generate_bytecode(src).unwrap().bytes;
        let listing = disassemble(&bytes);
        assert_eq!(generate_bytecode(&listing).unwrap().bytes, bytes);
        assert!(listing.contains("# draw v0, v1, 0x3\n"));
        assert!(listing.contains("# db 0x1\n"));
    }
}
