use std::{fmt, str::FromStr};

/// Machine can address 4KB of memory.
pub const MEMORY_SIZE: usize = 0x1000;
/// Programs are loaded at this address, below it lives the interpreter area.
pub const PROGRAM_START: u16 = 0x200;
/// Amount of general purpose registers.
pub const REGISTER_COUNT: usize = 16;
/// `vF` doubles as the carry, borrow and collision flag.
pub const FLAG_REGISTER: u8 = 0xF;

pub const SCREEN_WIDTH: usize = 64;
pub const SCREEN_HEIGHT: usize = 32;
/// Colour stored for a lit pixel. Only the lowest bit is significant to the machine.
pub const PIXEL_ON: u32 = 0xFFFFFF;
pub const PIXEL_OFF: u32 = 0x000000;

pub const KEY_COUNT: usize = 16;

/// Built-in hexadecimal glyphs, 5 bytes each, loaded at address 0.
#[rustfmt::skip]
pub const GLYPHS: [u8; 80] = [
    0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
    0x20, 0x60, 0x20, 0x20, 0x70, // 1
    0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
    0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
    0x90, 0x90, 0xF0, 0x10, 0x10, // 4
    0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
    0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
    0xF0, 0x10, 0x20, 0x40, 0x40, // 7
    0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
    0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
    0xF0, 0x90, 0xF0, 0x90, 0x90, // A
    0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
    0xF0, 0x80, 0x80, 0x80, 0xF0, // C
    0xE0, 0x90, 0x90, 0x90, 0xE0, // D
    0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
    0xF0, 0x80, 0xF0, 0x80, 0x80, // F
];
pub const GLYPH_SIZE: u16 = 5;

/// Registers addressable by a debugger.
///
/// Index 0 to 15 select `v0`-`v15`, 16 selects `I` and 17 selects `ip`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Register {
    /// General purpose 8-bit register, always `< 16`.
    V(u8),
    /// 16-bit index register.
    I,
    /// Instruction pointer.
    Ip,
}

impl Register {
    pub const COUNT: usize = REGISTER_COUNT + 2;

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0..=15 => Some(Register::V(index as u8)),
            16 => Some(Register::I),
            17 => Some(Register::Ip),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Register::V(n) => *n as usize,
            Register::I => 16,
            Register::Ip => 17,
        }
    }

    /// Every register in index order.
    pub fn all() -> impl Iterator<Item = Register> {
        (0..Self::COUNT).filter_map(Register::from_index)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::V(n) => write!(f, "v{}", n),
            Register::I => write!(f, "I"),
            Register::Ip => write!(f, "ip"),
        }
    }
}

impl FromStr for Register {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "I" | "i" => Ok(Register::I),
            "ip" | "IP" => Ok(Register::Ip),
            _ => {
                let digits = s.strip_prefix('v').ok_or(())?;
                match digits.parse::<u8>() {
                    Ok(n) if (n as usize) < REGISTER_COUNT => Ok(Register::V(n)),
                    _ => Err(()),
                }
            }
        }
    }
}

/// Default host keyboard layout for the hexadecimal keypad.
///
/// ```text
/// 1 2 3 4      1 2 3 C
/// q w e r  ->  4 5 6 D
/// a s d f      7 8 9 E
/// z x c v      A 0 B F
/// ```
const DEFAULT_KEYMAP: [(char, u8); KEY_COUNT] = [
    ('1', 0x1),
    ('2', 0x2),
    ('3', 0x3),
    ('4', 0xC),
    ('q', 0x4),
    ('w', 0x5),
    ('e', 0x6),
    ('r', 0xD),
    ('a', 0x7),
    ('s', 0x8),
    ('d', 0x9),
    ('f', 0xE),
    ('z', 0xA),
    ('x', 0x0),
    ('c', 0xB),
    ('v', 0xF),
];

/// Mapping from host characters to keypad indexes.
#[derive(Clone, Debug)]
pub struct Keymap(Vec<(char, u8)>);

impl Keymap {
    pub fn key(&self, host: char) -> Option<u8> {
        let host = host.to_ascii_lowercase();
        self.0
            .iter()
            .find(|(ch, _)| *ch == host)
            .map(|(_, key)| *key)
    }
}

impl Default for Keymap {
    fn default() -> Self {
        Self(DEFAULT_KEYMAP.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_indexes() {
        for register in Register::all() {
            assert_eq!(Register::from_index(register.index()), Some(register));
        }
        assert_eq!(Register::from_index(16), Some(Register::I));
        assert_eq!(Register::from_index(17), Some(Register::Ip));
        assert_eq!(Register::from_index(18), None);
        assert_eq!(Register::all().count(), 18);
    }

    #[test]
    fn register_names() {
        assert_eq!("v0".parse(), Ok(Register::V(0)));
        assert_eq!("v15".parse(), Ok(Register::V(15)));
        assert_eq!("I".parse(), Ok(Register::I));
        assert_eq!("ip".parse(), Ok(Register::Ip));
        assert_eq!("v16".parse::<Register>(), Err(()));
        assert_eq!("r1".parse::<Register>(), Err(()));
        assert_eq!(Register::V(12).to_string(), "v12");
    }

    #[test]
    fn default_keymap() {
        let map = Keymap::default();
        assert_eq!(map.key('1'), Some(0x1));
        assert_eq!(map.key('X'), Some(0x0));
        assert_eq!(map.key('v'), Some(0xF));
        assert_eq!(map.key('p'), None);
    }
}
