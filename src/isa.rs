//! Instruction catalog: one entry per mnemonic, carrying its bit pattern, operand layout,
//! execution semantics and static control flow.

use std::cmp::Reverse;
use std::fmt;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use lazy_static::lazy_static;

use crate::error::RuntimeError;
use crate::operand::{Layout, Operands};
use crate::runtime::Machine;
use crate::symbol::{GLYPH_SIZE, PIXEL_OFF, PIXEL_ON};

type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

type ExecuteFn = fn(&mut Machine, Operands) -> Result<Effect, RuntimeError>;
type NextIpsFn = fn(Operands, u16) -> Vec<u16>;

/// Side effect of an executed instruction which a frontend must know about.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Effect {
    None,
    /// Framebuffer was modified and should be rendered again.
    Redraw,
}

/// Catalog entry. `value` holds the fixed bits selected by the layout mask.
pub struct Entry {
    pub mnemonic: &'static str,
    pub value: u16,
    pub layout: Layout,
    execute: ExecuteFn,
    next_ips: NextIpsFn,
}

impl Entry {
    const fn new(
        mnemonic: &'static str,
        value: u16,
        layout: Layout,
        execute: ExecuteFn,
        next_ips: NextIpsFn,
    ) -> Self {
        Self {
            mnemonic,
            value,
            layout,
            execute,
            next_ips,
        }
    }

    pub fn mask(&self) -> u16 {
        self.layout.mask()
    }

    /// Amount of fixed bits. Decoding tries more specific entries first.
    pub fn specificity(&self) -> u32 {
        self.mask().count_ones()
    }

    pub fn matches(&self, word: u16) -> bool {
        word & self.mask() == self.value
    }

    pub fn encode(&self, operands: Operands) -> u16 {
        self.value | operands.bits()
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("mnemonic", &self.mnemonic)
            .field("value", &format_args!("0x{:04X}", self.value))
            .field("layout", &self.layout)
            .finish()
    }
}

#[rustfmt::skip]
static ENTRIES: [Entry; 35] = [
    Entry::new("call",     0x0000, Layout::Address12,  call,      next_call),
    Entry::new("clear",    0x00E0, Layout::NoArg,      clear,     next_straight),
    Entry::new("ret",      0x00EE, Layout::NoArg,      ret,       next_unknown),
    Entry::new("jmp",      0x1000, Layout::Address12,  jmp,       next_jump),
    Entry::new("callptr",  0x2000, Layout::Address12,  call,      next_call),
    Entry::new("skeqi",    0x3000, Layout::RegImm8,    skeqi,     next_skip),
    Entry::new("skneqi",   0x4000, Layout::RegImm8,    skneqi,    next_skip),
    Entry::new("skeqr",    0x5000, Layout::RegReg,     skeqr,     next_skip),
    Entry::new("li",       0x6000, Layout::RegImm8,    li,        next_straight),
    Entry::new("addi",     0x7000, Layout::RegImm8,    addi,      next_straight),
    Entry::new("mov",      0x8000, Layout::RegReg,     mov,       next_straight),
    Entry::new("or",       0x8001, Layout::RegReg,     or,        next_straight),
    Entry::new("and",      0x8002, Layout::RegReg,     and,       next_straight),
    Entry::new("xor",      0x8003, Layout::RegReg,     xor,       next_straight),
    Entry::new("add",      0x8004, Layout::RegReg,     add,       next_straight),
    Entry::new("sub",      0x8005, Layout::RegReg,     sub,       next_straight),
    Entry::new("shr1",     0x8006, Layout::Reg,        shr1,      next_straight),
    Entry::new("subr",     0x8007, Layout::RegReg,     subr,      next_straight),
    Entry::new("shl1",     0x800E, Layout::Reg,        shl1,      next_straight),
    Entry::new("skneqr",   0x9000, Layout::RegReg,     skneqr,    next_skip),
    Entry::new("loadI",    0xA000, Layout::Address12,  load_i,    next_straight),
    Entry::new("brelv0",   0xB000, Layout::Address12,  brelv0,    next_unknown),
    Entry::new("rand",     0xC000, Layout::RegImm8,    rand,      next_straight),
    Entry::new("draw",     0xD000, Layout::RegRegImm4, draw,      next_straight),
    Entry::new("skeqkey",  0xE09E, Layout::Reg,        skeqkey,   next_skip),
    Entry::new("skneqkey", 0xE0A1, Layout::Reg,        skneqkey,  next_skip),
    Entry::new("gdtc",     0xF007, Layout::Reg,        gdtc,      next_straight),
    Entry::new("gkey",     0xF00A, Layout::Reg,        gkey,      next_straight),
    Entry::new("sdtc",     0xF015, Layout::Reg,        sdtc,      next_straight),
    Entry::new("sstc",     0xF018, Layout::Reg,        sstc,      next_straight),
    Entry::new("addI",     0xF01E, Layout::Reg,        add_i,     next_straight),
    Entry::new("gsprite",  0xF029, Layout::Reg,        gsprite,   next_straight),
    Entry::new("sbcd",     0xF033, Layout::Reg,        sbcd,      next_straight),
    Entry::new("regdump",  0xF055, Layout::Reg,        regdump,   next_straight),
    Entry::new("regload",  0xF065, Layout::Reg,        regload,   next_straight),
];

struct Catalog {
    /// Sorted by descending specificity; ties keep table order.
    by_opcode: Vec<&'static Entry>,
    by_mnemonic: FxMap<&'static str, &'static Entry>,
}

impl Catalog {
    fn new() -> Self {
        let mut by_opcode: Vec<&'static Entry> = ENTRIES.iter().collect();
        by_opcode.sort_by_key(|entry| Reverse(entry.specificity()));
        let by_mnemonic = ENTRIES
            .iter()
            .map(|entry| (entry.mnemonic, entry))
            .collect();
        Catalog {
            by_opcode,
            by_mnemonic,
        }
    }
}

lazy_static! {
    static ref CATALOG: Catalog = Catalog::new();
}

/// Every catalog entry, in decode order.
pub fn entries() -> impl Iterator<Item = &'static Entry> {
    CATALOG.by_opcode.iter().copied()
}

pub fn lookup_by_mnemonic(name: &str) -> Option<&'static Entry> {
    CATALOG.by_mnemonic.get(name).copied()
}

/// Decode `word` with the most specific matching entry.
pub fn lookup_by_opcode(word: u16) -> Option<Instruction> {
    entries()
        .find(|entry| entry.matches(word))
        .map(|entry| Instruction::new(entry, entry.layout.decode(word)))
}

/// A decoded instruction: operand values plus the catalog entry giving its behaviour.
#[derive(Clone, Copy, Debug)]
pub struct Instruction {
    entry: &'static Entry,
    operands: Operands,
}

impl Instruction {
    pub fn new(entry: &'static Entry, operands: Operands) -> Self {
        debug_assert_eq!(entry.layout, operands.layout());
        Self { entry, operands }
    }

    pub fn entry(&self) -> &'static Entry {
        self.entry
    }

    pub fn mnemonic(&self) -> &'static str {
        self.entry.mnemonic
    }

    pub fn operands(&self) -> Operands {
        self.operands
    }

    pub fn encode(&self) -> u16 {
        self.entry.encode(self.operands)
    }

    /// Apply the instruction. Every instruction sets `ip` itself.
    pub fn execute(&self, machine: &mut Machine) -> Result<Effect, RuntimeError> {
        (self.entry.execute)(machine, self.operands)
    }

    /// Addresses control may reach after this instruction at `ip`, for static analysis.
    ///
    /// Empty when the target depends on runtime state.
    pub fn next_ips(&self, ip: u16) -> Vec<u16> {
        (self.entry.next_ips)(self.operands, ip)
    }
}

impl PartialEq for Instruction {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.entry, other.entry) && self.operands == other.operands
    }
}

impl Eq for Instruction {}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operands {
            Operands::None => write!(f, "{}", self.entry.mnemonic),
            operands => write!(f, "{} {}", self.entry.mnemonic, operands),
        }
    }
}

// Static control flow

fn next_straight(_: Operands, ip: u16) -> Vec<u16> {
    vec![ip.wrapping_add(2)]
}

fn next_jump(ops: Operands, _: u16) -> Vec<u16> {
    vec![ops.nnn()]
}

fn next_call(ops: Operands, ip: u16) -> Vec<u16> {
    vec![ops.nnn(), ip.wrapping_add(2)]
}

fn next_skip(_: Operands, ip: u16) -> Vec<u16> {
    vec![ip.wrapping_add(2), ip.wrapping_add(4)]
}

fn next_unknown(_: Operands, _: u16) -> Vec<u16> {
    Vec::new()
}

// Execution

fn call(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.call(ops.nnn());
    Ok(Effect::None)
}

fn clear(m: &mut Machine, _: Operands) -> Result<Effect, RuntimeError> {
    m.clear_screen();
    m.advance();
    Ok(Effect::Redraw)
}

fn ret(m: &mut Machine, _: Operands) -> Result<Effect, RuntimeError> {
    m.ret();
    Ok(Effect::None)
}

fn jmp(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.jump(ops.nnn());
    Ok(Effect::None)
}

fn skeqi(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.skip_if(m.reg(ops.x()) == ops.nn());
    Ok(Effect::None)
}

fn skneqi(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.skip_if(m.reg(ops.x()) != ops.nn());
    Ok(Effect::None)
}

fn skeqr(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.skip_if(m.reg(ops.x()) == m.reg(ops.y()));
    Ok(Effect::None)
}

fn skneqr(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.skip_if(m.reg(ops.x()) != m.reg(ops.y()));
    Ok(Effect::None)
}

fn li(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.set_reg(ops.x(), ops.nn());
    m.advance();
    Ok(Effect::None)
}

fn addi(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    let val = m.reg(ops.x()).wrapping_add(ops.nn());
    m.set_reg(ops.x(), val);
    m.advance();
    Ok(Effect::None)
}

fn mov(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.set_reg(ops.x(), m.reg(ops.y()));
    m.advance();
    Ok(Effect::None)
}

fn or(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.set_reg(ops.x(), m.reg(ops.x()) | m.reg(ops.y()));
    m.advance();
    Ok(Effect::None)
}

fn and(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.set_reg(ops.x(), m.reg(ops.x()) & m.reg(ops.y()));
    m.advance();
    Ok(Effect::None)
}

fn xor(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.set_reg(ops.x(), m.reg(ops.x()) ^ m.reg(ops.y()));
    m.advance();
    Ok(Effect::None)
}

// Flag is written before the result, so with `vF` as destination the result wins.

fn add(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    let (res, carry) = m.reg(ops.x()).overflowing_add(m.reg(ops.y()));
    m.set_flag(carry);
    m.set_reg(ops.x(), res);
    m.advance();
    Ok(Effect::None)
}

fn sub(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    let (res, borrow) = m.reg(ops.x()).overflowing_sub(m.reg(ops.y()));
    m.set_flag(borrow);
    m.set_reg(ops.x(), res);
    m.advance();
    Ok(Effect::None)
}

fn subr(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    let (res, borrow) = m.reg(ops.y()).overflowing_sub(m.reg(ops.x()));
    m.set_flag(borrow);
    m.set_reg(ops.x(), res);
    m.advance();
    Ok(Effect::None)
}

fn shr1(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    let val = m.reg(ops.x());
    m.set_flag(val & 1 != 0);
    m.set_reg(ops.x(), val >> 1);
    m.advance();
    Ok(Effect::None)
}

fn shl1(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    let val = m.reg(ops.x());
    m.set_flag(val & 0x80 != 0);
    m.set_reg(ops.x(), val << 1);
    m.advance();
    Ok(Effect::None)
}

fn load_i(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.set_i(ops.nnn());
    m.advance();
    Ok(Effect::None)
}

fn brelv0(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.jump(m.reg(0) as u16 + ops.nnn());
    Ok(Effect::None)
}

fn rand(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    let val = m.random() & ops.nn();
    m.set_reg(ops.x(), val);
    m.advance();
    Ok(Effect::None)
}

fn draw(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    let x = m.reg(ops.x()) as usize;
    let y = m.reg(ops.y()) as usize;
    let sprite = m.mem_slice(m.i() as usize, ops.n() as usize)?.to_vec();

    let mut collision = false;
    for (row, bits) in sprite.into_iter().enumerate() {
        for col in 0..8 {
            if (bits >> (7 - col)) & 1 == 0 {
                continue;
            }
            // Collision samples each pixel before it is flipped
            let was_on = m.get_pixel(x + col, y + row) & 1 != 0;
            collision |= was_on;
            m.set_pixel(x + col, y + row, if was_on { PIXEL_OFF } else { PIXEL_ON });
        }
    }
    m.set_flag(collision);
    m.advance();
    Ok(Effect::Redraw)
}

fn skeqkey(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.skip_if(m.is_key_pressed(m.reg(ops.x())));
    Ok(Effect::None)
}

fn skneqkey(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.skip_if(!m.is_key_pressed(m.reg(ops.x())));
    Ok(Effect::None)
}

fn gdtc(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.set_reg(ops.x(), m.delay_timer());
    m.advance();
    Ok(Effect::None)
}

/// Waits by leaving `ip` in place until a key is held.
fn gkey(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    if let Some(key) = m.pressed_key() {
        m.set_reg(ops.x(), key);
        m.advance();
    }
    Ok(Effect::None)
}

fn sdtc(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.set_delay_timer(m.reg(ops.x()));
    m.advance();
    Ok(Effect::None)
}

fn sstc(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    m.set_sound_timer(m.reg(ops.x()));
    m.advance();
    Ok(Effect::None)
}

fn add_i(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    let val = m.i() as u32 + m.reg(ops.x()) as u32;
    m.set_flag(val > 0xFFF);
    m.set_i(val as u16);
    m.advance();
    Ok(Effect::None)
}

fn gsprite(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    let digit = m.reg(ops.x()) as u16;
    m.set_i(if digit < 16 { digit * GLYPH_SIZE } else { 0 });
    m.advance();
    Ok(Effect::None)
}

fn sbcd(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    let val = m.reg(ops.x());
    m.write_mem(m.i() as usize, &[val / 100, (val / 10) % 10, val % 10])?;
    m.advance();
    Ok(Effect::None)
}

fn regdump(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    let regs: Vec<u8> = (0..=ops.x()).map(|n| m.reg(n)).collect();
    m.write_mem(m.i() as usize, &regs)?;
    m.advance();
    Ok(Effect::None)
}

fn regload(m: &mut Machine, ops: Operands) -> Result<Effect, RuntimeError> {
    let vals = m
        .mem_slice(m.i() as usize, ops.x() as usize + 1)?
        .to_vec();
    for (n, val) in vals.into_iter().enumerate() {
        m.set_reg(n as u8, val);
    }
    m.advance();
    Ok(Effect::None)
}
