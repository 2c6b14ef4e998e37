// Encoding
pub mod isa;
pub mod operand;
pub mod symbol;

// Parsing
mod parser;
pub use parser::{
    assemble, fix_offsets, generate_bytecode, recompile_as_code, recompile_as_data, AsmParser,
};
mod air;
pub use air::{Air, AirStmt, AsmLine, Program};
mod disasm;
pub use disasm::{code_coverage, disassemble};

// Running
mod runtime;
pub use runtime::{Alert, Frontend, Machine, MachineOptions, Timers};
mod session;
pub use session::{Headless, Outcome, Session};
#[macro_use]
pub mod output;

pub mod error;
pub mod env;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;
