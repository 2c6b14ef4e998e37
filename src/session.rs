use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::air::Program;
use crate::dprintln;
use crate::error::{RuntimeError, StartError};
use crate::isa::Instruction;
use crate::parser::generate_bytecode;
use crate::runtime::{Frontend, Machine};
use crate::symbol::PROGRAM_START;

/// Why a run loop handed control back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Requested amount of execution finished.
    Stepped,
    /// Stop flag was raised.
    Stopped,
    /// Step limit was reached.
    StepLimit,
    /// An instruction left `ip` unchanged, so nothing further can happen without outside
    /// input. Jumping to itself, or waiting for a key.
    Stalled { ip: u16 },
}

/// Frontend which shows nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct Headless;

impl Frontend for Headless {
    fn render_pixel(&mut self, _x: usize, _y: usize, _value: u32) {}
}

/// A loaded program with run control, as driven by a debugger or frontend.
pub struct Session {
    machine: Machine,
    program: Program,
    /// Checked between steps. May be raised from another thread.
    stop: Arc<AtomicBool>,
    trace: bool,
    /// Instructions executed since start.
    steps: u64,
}

impl Session {
    /// Assemble `src` and load it into `machine`.
    pub fn start(src: &str, machine: Machine) -> Result<Self, StartError> {
        let program = generate_bytecode(src)?;
        Self::from_program(program, machine)
    }

    /// Load raw bytes, without any source line information.
    pub fn from_bytes(bytes: Vec<u8>, machine: Machine) -> Result<Self, StartError> {
        Self::from_program(
            Program {
                bytes,
                lines: Vec::new(),
            },
            machine,
        )
    }

    pub fn from_program(program: Program, mut machine: Machine) -> Result<Self, StartError> {
        machine.load(&program.bytes)?;
        Ok(Self {
            machine,
            program,
            stop: Arc::new(AtomicBool::new(false)),
            trace: false,
            steps: 0,
        })
    }

    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Direct access for register writes and key presses between steps.
    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Handle which stops a running `cont` or `step_over` before its next step.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Source line of the instruction at `ip`.
    pub fn current_line(&self) -> Option<usize> {
        let offset = self.machine.ip().checked_sub(PROGRAM_START)?;
        self.program.line_at(offset as usize)
    }

    fn step(&mut self, frontend: &mut dyn Frontend) -> Result<Outcome, RuntimeError> {
        let ip = self.machine.ip();
        let (instr, _) = match self.machine.step_with(frontend) {
            Ok(stepped) => stepped,
            Err(err) => {
                if self.trace {
                    dprintln!(Sometimes, Error, "0x{:04X} {}", ip, err);
                }
                return Err(err);
            }
        };
        self.steps += 1;
        if self.trace {
            self.trace_instr(ip, &instr);
        }
        if self.machine.ip() == ip {
            return Ok(Outcome::Stalled { ip });
        }
        Ok(Outcome::Stepped)
    }

    fn trace_instr(&self, ip: u16, instr: &Instruction) {
        dprintln!(
            Sometimes,
            Info,
            "0x{:04X} {:04X} {}",
            ip,
            instr.encode(),
            instr
        );
    }

    /// Execute a single instruction.
    pub fn step_in(&mut self, frontend: &mut dyn Frontend) -> Result<Outcome, RuntimeError> {
        self.step(frontend)
    }

    /// Execute a single instruction, running whole subroutines for calls.
    pub fn step_over(&mut self, frontend: &mut dyn Frontend) -> Result<Outcome, RuntimeError> {
        let instr = self.machine.fetch()?;
        if !matches!(instr.mnemonic(), "call" | "callptr") {
            return self.step(frontend);
        }
        let return_addr = self.machine.ip().wrapping_add(2);
        self.stop.store(false, Ordering::Relaxed);
        loop {
            let outcome = self.step(frontend)?;
            if self.machine.ip() == return_addr {
                return Ok(Outcome::Stepped);
            }
            if outcome != Outcome::Stepped {
                return Ok(outcome);
            }
            if self.stop.load(Ordering::Relaxed) {
                return Ok(Outcome::Stopped);
            }
        }
    }

    /// Execute until stopped, stalled, an error, or `limit` instructions.
    pub fn cont(
        &mut self,
        frontend: &mut dyn Frontend,
        limit: Option<u64>,
    ) -> Result<Outcome, RuntimeError> {
        self.stop.store(false, Ordering::Relaxed);
        let mut count = 0;
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(Outcome::Stopped);
            }
            if limit.is_some_and(|limit| count >= limit) {
                return Ok(Outcome::StepLimit);
            }
            let outcome = self.step(frontend)?;
            count += 1;
            if outcome != Outcome::Stepped {
                return Ok(outcome);
            }
        }
    }
}
