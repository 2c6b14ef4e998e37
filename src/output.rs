use std::cell::RefCell;
use std::str::Chars;

use colored::{ColoredString, Colorize};

use crate::runtime::Machine;
use crate::symbol::{Register, PIXEL_OFF};

#[macro_export]
macro_rules! dprintln {
    ( $cond:expr, $cat:expr, $fmt:literal $($tt:tt)* ) => {{
        #[allow(unused_imports)]
        use $crate::output::{Category::*, Condition::*};
        let s = format!(
            concat!($fmt, "\n")
            $($tt)*
        );
        $crate::output::Output::Debugger($cond, $cat).print_str(&s);
    }};
    // Trigger type error if missing condition
    ( $fmt:literal $($tt:tt)* ) => {{
        $crate::output::Output::Debugger($fmt);
    }};
}

/// Where output goes: program-facing to stdout, diagnostics to stderr.
#[derive(Clone, Copy, Debug)]
pub enum Output {
    Normal,
    Debugger(Condition, Category),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    /// Printed in every mode.
    Always,
    /// Suppressed with `--minimal`.
    Sometimes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Info,
    Error,
}

impl Category {
    fn paint(&self, string: &str) -> ColoredString {
        match self {
            Self::Info => string.blue(),
            Self::Error => string.red(),
        }
    }
}

struct Decolored<'a> {
    chars: Chars<'a>,
}

impl Output {
    thread_local! {
        static IS_MINIMAL: RefCell<bool> = const { RefCell::new(false) };
    }

    pub fn set_minimal(new_value: bool) -> bool {
        Self::IS_MINIMAL.with(|value| value.replace(new_value))
    }
    pub fn is_minimal() -> bool {
        Self::IS_MINIMAL.with(|value| *value.borrow())
    }

    pub fn print_str(&self, string: &str) {
        match self {
            Self::Normal => {
                if Self::is_minimal() {
                    print!("{}", Decolored::new(string).collect::<String>());
                } else {
                    print!("{}", string);
                }
            }

            Self::Debugger(condition, category) => match (Self::is_minimal(), *condition) {
                (false, _) => eprint!("{}", category.paint(string)),
                // Always remove color if `--minimal`
                (true, Condition::Always) => eprint_colorless(string),
                (true, Condition::Sometimes) => (),
            },
        }
    }

    pub fn print_registers(&self, machine: &Machine) {
        if Self::is_minimal() {
            for register in Register::all() {
                // Indexes from `Register::all` are always valid
                let value = machine.get_register(register.index()).unwrap_or_default();
                self.print_str(&format!("{} {}\n", register, value));
            }
            return;
        }

        self.print_str("\x1b[2m┌──────────────────────────────────────────┐\x1b[0m\n");
        for row in 0..8u8 {
            self.print_str("\x1b[2m│\x1b[0m");
            for n in [row, row + 8] {
                let value = machine.reg(n);
                self.print_str(&format!(" \x1b[1m{:>3}\x1b[0m  ", format!("v{}", n)));
                self.print_str(&format!("0x{:02X} {:>4}     ", value, value));
            }
            self.print_str("\x1b[2m│\x1b[0m\n");
        }
        let timers = machine.timers();
        self.print_str("\x1b[2m│\x1b[0m");
        self.print_str(&format!(" \x1b[1m  I\x1b[0m  0x{:04X}       ", machine.i()));
        self.print_str(&format!(" \x1b[1m ip\x1b[0m  0x{:04X}       ", machine.ip()));
        self.print_str("\x1b[2m│\x1b[0m\n");
        self.print_str("\x1b[2m│\x1b[0m");
        self.print_str(&format!(" \x1b[1m DT\x1b[0m  {:>4}         ", timers.delay));
        self.print_str(&format!(" \x1b[1m ST\x1b[0m  {:>4}         ", timers.sound));
        self.print_str("\x1b[2m│\x1b[0m\n");
        self.print_str("\x1b[2m└──────────────────────────────────────────┘\x1b[0m\n");
    }

    /// Framebuffer as text, one character per pixel.
    pub fn print_screen(&self, machine: &Machine) {
        let (on, off) = if Self::is_minimal() {
            ('#', '.')
        } else {
            ('█', ' ')
        };
        for row in machine.screen().iter() {
            let line: String = row
                .iter()
                .map(|pixel| if *pixel == PIXEL_OFF { off } else { on })
                .collect();
            self.print_str(&line);
            self.print_str("\n");
        }
    }
}

impl<'a> Decolored<'a> {
    pub fn new(string: &'a str) -> Self {
        Self {
            chars: string.chars(),
        }
    }
}

impl<'a> Iterator for Decolored<'a> {
    type Item = char;
    fn next(&mut self) -> Option<Self::Item> {
        while let Some(ch) = self.chars.next() {
            // Skip everything between '\x1b' and 'm' (inclusive)
            if ch == '\x1b' {
                while self.chars.next().is_some_and(|ch| ch != 'm') {}
                continue;
            }
            return Some(ch);
        }
        None
    }
}

fn eprint_colorless(string: &str) {
    eprint!("{}", Decolored::new(string).collect::<String>());
}
