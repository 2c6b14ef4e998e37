use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::error::RuntimeError;
use crate::isa::{self, Effect, Instruction};
use crate::symbol::{
    Register, FLAG_REGISTER, GLYPHS, KEY_COUNT, MEMORY_SIZE, PIXEL_OFF, PROGRAM_START,
    REGISTER_COUNT, SCREEN_HEIGHT, SCREEN_WIDTH,
};

/// Timers count down at this rate while non-zero.
const TIMER_HZ: u64 = 60;

pub type Screen = [[u32; SCREEN_WIDTH]; SCREEN_HEIGHT];

/// Callback fired when the sound timer expires. Runs on the ticker thread.
pub type Alert = Arc<dyn Fn() + Send + Sync>;

/// Presentation collaborator, notified of visible state changes.
pub trait Frontend {
    fn render_pixel(&mut self, x: usize, y: usize, value: u32);

    fn report_error(&mut self, _message: &str) {}
}

#[derive(Clone, Copy, Debug)]
pub struct MachineOptions {
    /// Fixed seed for the random source, otherwise seeded from OS entropy.
    pub seed: Option<u64>,
    /// Spawn a 60 Hz thread ticking the timers. When disabled, timers only move through
    /// [`Machine::tick`].
    pub realtime_timers: bool,
}

impl Default for MachineOptions {
    fn default() -> Self {
        Self {
            seed: None,
            realtime_timers: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timers {
    pub delay: u8,
    pub sound: u8,
}

impl Timers {
    /// Count both timers down once. Returns whether the sound timer just expired.
    pub fn tick(&mut self) -> bool {
        self.delay = self.delay.saturating_sub(1);
        let sounding = self.sound > 0;
        self.sound = self.sound.saturating_sub(1);
        sounding && self.sound == 0
    }
}

fn lock(timers: &Mutex<Timers>) -> MutexGuard<'_, Timers> {
    // Timers stay consistent even if a holder panicked
    timers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Background thread ticking the timers. Stops when dropped.
struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    fn spawn(timers: Arc<Mutex<Timers>>, alert: Alert) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let period = Duration::from_micros(1_000_000 / TIMER_HZ);
            while !flag.load(Ordering::Relaxed) {
                thread::sleep(period);
                let expired = lock(&timers).tick();
                if expired {
                    alert();
                }
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Complete machine state, idle until a program is loaded.
pub struct Machine {
    /// 4KB memory. Glyphs at 0, program at 0x200.
    mem: Box<[u8; MEMORY_SIZE]>,
    /// `v0`-`vF`
    reg: [u8; REGISTER_COUNT],
    i: u16,
    ip: u16,
    /// Return addresses
    stack: Vec<u16>,
    screen: Box<Screen>,
    timers: Arc<Mutex<Timers>>,
    keys: [bool; KEY_COUNT],
    rng: StdRng,
    options: MachineOptions,
    alert: Alert,
    ticker: Option<Ticker>,
    loaded: bool,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self::with_options(MachineOptions::default())
    }

    pub fn with_options(options: MachineOptions) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            mem: Box::new([0; MEMORY_SIZE]),
            reg: [0; REGISTER_COUNT],
            i: 0,
            ip: PROGRAM_START,
            stack: Vec::new(),
            screen: Box::new([[PIXEL_OFF; SCREEN_WIDTH]; SCREEN_HEIGHT]),
            timers: Arc::new(Mutex::new(Timers::default())),
            keys: [false; KEY_COUNT],
            rng,
            options,
            alert: Arc::new(|| ()),
            ticker: None,
            loaded: false,
        }
    }

    /// Replace the sound expiry callback. Takes effect on next `load`.
    pub fn set_alert(&mut self, alert: Alert) {
        self.alert = alert;
    }

    /// Reset the machine and copy `program` to 0x200.
    pub fn load(&mut self, program: &[u8]) -> Result<(), RuntimeError> {
        let start = PROGRAM_START as usize;
        if start + program.len() > MEMORY_SIZE {
            return Err(RuntimeError::OutOfBounds {
                address: start + program.len() - 1,
            });
        }
        self.unload();

        self.mem.fill(0);
        self.mem[..GLYPHS.len()].copy_from_slice(&GLYPHS);
        self.mem[start..start + program.len()].copy_from_slice(program);
        self.reg = [0; REGISTER_COUNT];
        self.i = 0;
        self.ip = PROGRAM_START;
        self.stack.clear();
        self.clear_screen();
        *lock(&self.timers) = Timers::default();
        self.keys = [false; KEY_COUNT];

        if self.options.realtime_timers {
            self.ticker = Some(Ticker::spawn(
                Arc::clone(&self.timers),
                Arc::clone(&self.alert),
            ));
        }
        self.loaded = true;
        Ok(())
    }

    /// Return to the idle state, stopping the timer thread.
    pub fn unload(&mut self) {
        self.ticker = None;
        self.loaded = false;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Decode the instruction at `ip`, without executing it.
    pub fn fetch(&self) -> Result<Instruction, RuntimeError> {
        if !self.loaded {
            return Err(RuntimeError::NotLoaded);
        }
        let bytes = self.mem_slice(self.ip as usize, 2)?;
        let word = u16::from_be_bytes([bytes[0], bytes[1]]);
        isa::lookup_by_opcode(word).ok_or(RuntimeError::Decode {
            address: self.ip,
            opcode: word,
        })
    }

    /// Execute one instruction. State is untouched on error.
    pub fn step(&mut self) -> Result<(Instruction, Effect), RuntimeError> {
        let instr = self.fetch()?;
        let effect = instr.execute(self)?;
        Ok((instr, effect))
    }

    /// Like [`Machine::step`], reporting redraws and errors to `frontend`.
    pub fn step_with(
        &mut self,
        frontend: &mut dyn Frontend,
    ) -> Result<(Instruction, Effect), RuntimeError> {
        match self.step() {
            Ok((instr, effect)) => {
                if effect == Effect::Redraw {
                    self.render(frontend);
                }
                Ok((instr, effect))
            }
            Err(err) => {
                frontend.report_error(&err.to_string());
                Err(err)
            }
        }
    }

    /// Push the whole framebuffer to `frontend`.
    pub fn render(&self, frontend: &mut dyn Frontend) {
        for (y, row) in self.screen.iter().enumerate() {
            for (x, value) in row.iter().enumerate() {
                frontend.render_pixel(x, y, *value);
            }
        }
    }

    /// Count the timers down once, as the ticker thread does.
    pub fn tick(&self) {
        let expired = lock(&self.timers).tick();
        if expired {
            (self.alert)();
        }
    }

    // Debugger access

    pub fn get_register(&self, index: usize) -> Result<u16, RuntimeError> {
        match Register::from_index(index) {
            Some(Register::V(n)) => Ok(self.reg[n as usize] as u16),
            Some(Register::I) => Ok(self.i),
            Some(Register::Ip) => Ok(self.ip),
            None => Err(RuntimeError::InvalidRegister(index)),
        }
    }

    pub fn set_register(&mut self, index: usize, value: u16) -> Result<(), RuntimeError> {
        match Register::from_index(index) {
            Some(register @ Register::V(n)) => {
                let value = u8::try_from(value)
                    .map_err(|_| RuntimeError::RegisterOverflow { register, value })?;
                self.reg[n as usize] = value;
            }
            Some(Register::I) => self.i = value,
            Some(Register::Ip) => self.ip = value,
            None => return Err(RuntimeError::InvalidRegister(index)),
        }
        Ok(())
    }

    pub fn read_memory(&self, address: usize) -> Result<u8, RuntimeError> {
        self.mem_slice(address, 1).map(|bytes| bytes[0])
    }

    pub fn write_memory(&mut self, address: usize, value: u8) -> Result<(), RuntimeError> {
        self.write_mem(address, &[value])
    }

    pub fn memory(&self) -> &[u8] {
        &self.mem[..]
    }

    /// Pixel value, or 0 outside the screen.
    pub fn get_pixel(&self, x: usize, y: usize) -> u32 {
        self.screen
            .get(y)
            .and_then(|row| row.get(x))
            .copied()
            .unwrap_or(PIXEL_OFF)
    }

    /// Writes outside the screen are ignored.
    pub fn set_pixel(&mut self, x: usize, y: usize, value: u32) {
        if let Some(pixel) = self.screen.get_mut(y).and_then(|row| row.get_mut(x)) {
            *pixel = value;
        }
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn press(&mut self, key: u8) {
        if let Some(held) = self.keys.get_mut(key as usize) {
            *held = true;
        }
    }

    pub fn release(&mut self, key: u8) {
        if let Some(held) = self.keys.get_mut(key as usize) {
            *held = false;
        }
    }

    pub fn is_key_pressed(&self, key: u8) -> bool {
        self.keys.get(key as usize).copied().unwrap_or(false)
    }

    /// Lowest held key.
    pub fn pressed_key(&self) -> Option<u8> {
        self.keys.iter().position(|held| *held).map(|key| key as u8)
    }

    pub fn timers(&self) -> Timers {
        *lock(&self.timers)
    }

    pub fn ip(&self) -> u16 {
        self.ip
    }

    pub fn i(&self) -> u16 {
        self.i
    }

    pub fn reg(&self, n: u8) -> u8 {
        self.reg[(n & 0xF) as usize]
    }

    pub fn stack(&self) -> &[u16] {
        &self.stack
    }

    // Instruction primitives

    pub(crate) fn set_reg(&mut self, n: u8, value: u8) {
        self.reg[(n & 0xF) as usize] = value;
    }

    pub(crate) fn set_flag(&mut self, set: bool) {
        self.reg[FLAG_REGISTER as usize] = set as u8;
    }

    pub(crate) fn set_i(&mut self, value: u16) {
        self.i = value;
    }

    pub(crate) fn advance(&mut self) {
        self.ip = self.ip.wrapping_add(2);
    }

    pub(crate) fn skip_if(&mut self, cond: bool) {
        self.ip = self.ip.wrapping_add(if cond { 4 } else { 2 });
    }

    pub(crate) fn jump(&mut self, address: u16) {
        self.ip = address;
    }

    pub(crate) fn call(&mut self, address: u16) {
        self.stack.push(self.ip.wrapping_add(2));
        self.ip = address;
    }

    /// Empty stack leaves `ip` where it is.
    pub(crate) fn ret(&mut self) {
        if let Some(address) = self.stack.pop() {
            self.ip = address;
        }
    }

    pub(crate) fn clear_screen(&mut self) {
        for row in self.screen.iter_mut() {
            row.fill(PIXEL_OFF);
        }
    }

    pub(crate) fn mem_slice(&self, address: usize, len: usize) -> Result<&[u8], RuntimeError> {
        self.mem
            .get(address..address + len)
            .ok_or(RuntimeError::OutOfBounds {
                address: (address + len).saturating_sub(1),
            })
    }

    pub(crate) fn write_mem(&mut self, address: usize, bytes: &[u8]) -> Result<(), RuntimeError> {
        let end = address + bytes.len();
        let dest = self
            .mem
            .get_mut(address..end)
            .ok_or(RuntimeError::OutOfBounds {
                address: end.saturating_sub(1),
            })?;
        dest.copy_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn random(&mut self) -> u8 {
        self.rng.next_u32() as u8
    }

    pub(crate) fn delay_timer(&self) -> u8 {
        lock(&self.timers).delay
    }

    pub(crate) fn set_delay_timer(&mut self, value: u8) {
        lock(&self.timers).delay = value;
    }

    pub(crate) fn set_sound_timer(&mut self, value: u8) {
        lock(&self.timers).sound = value;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::symbol::{GLYPH_SIZE, PIXEL_ON};

    fn machine(program: &[u16]) -> Machine {
        let bytes: Vec<u8> = program.iter().flat_map(|word| word.to_be_bytes()).collect();
        let mut machine = Machine::with_options(MachineOptions {
            seed: Some(1),
            realtime_timers: false,
        });
        machine.load(&bytes).unwrap();
        machine
    }

    fn run(machine: &mut Machine, steps: usize) {
        for _ in 0..steps {
            machine.step().unwrap();
        }
    }

    #[derive(Default)]
    struct Recorder {
        pixels: usize,
        lit: usize,
        errors: Vec<String>,
    }

    impl Frontend for Recorder {
        fn render_pixel(&mut self, _x: usize, _y: usize, value: u32) {
            self.pixels += 1;
            if value == PIXEL_ON {
                self.lit += 1;
            }
        }

        fn report_error(&mut self, message: &str) {
            self.errors.push(message.to_string());
        }
    }

    #[test]
    fn idle_machine_does_not_step() {
        let mut machine = Machine::new();
        assert!(!machine.is_loaded());
        assert_eq!(machine.step().unwrap_err(), RuntimeError::NotLoaded);
    }

    #[test]
    fn load_resets_state() {
        let mut m = machine(&[0x6005]);
        m.step().unwrap();
        m.press(3);
        m.load(&[0x12, 0x00]).unwrap();
        assert_eq!(m.ip(), 0x200);
        assert_eq!(m.reg(0), 0);
        assert!(!m.is_key_pressed(3));
        assert_eq!(&m.memory()[..GLYPHS.len()], &GLYPHS[..]);
        assert_eq!(&m.memory()[0x200..0x202], &[0x12, 0x00]);
        assert_eq!(m.memory()[0x202], 0);
    }

    #[test]
    fn oversized_program() {
        let mut m = Machine::with_options(MachineOptions {
            seed: None,
            realtime_timers: false,
        });
        assert!(m.load(&vec![0; MEMORY_SIZE - 0x200]).is_ok());
        assert!(matches!(
            m.load(&vec![0; MEMORY_SIZE - 0x1FF]),
            Err(RuntimeError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn two_steps() {
        // li v0, 5 ; addi v0, 3
        let mut m = machine(&[0x6005, 0x7003]);
        run(&mut m, 2);
        assert_eq!(m.reg(0), 8);
        assert_eq!(m.ip(), 0x204);
    }

    #[test]
    fn carry_and_borrow() {
        // li v0, 0xFF ; li v1, 1 ; add v0, v1
        let mut m = machine(&[0x60FF, 0x6101, 0x8014]);
        run(&mut m, 3);
        assert_eq!(m.reg(0), 0x00);
        assert_eq!(m.reg(0xF), 1);

        // li v0, 0 ; li v1, 1 ; sub v0, v1
        let mut m = machine(&[0x6000, 0x6101, 0x8015]);
        run(&mut m, 3);
        assert_eq!(m.reg(0), 0xFF);
        assert_eq!(m.reg(0xF), 1);

        // li v0, 3 ; li v1, 1 ; sub v0, v1 ; subr v1, v0
        let mut m = machine(&[0x6003, 0x6101, 0x8015, 0x8107]);
        run(&mut m, 3);
        assert_eq!(m.reg(0), 2);
        assert_eq!(m.reg(0xF), 0);
        run(&mut m, 1);
        assert_eq!(m.reg(1), 1);
        assert_eq!(m.reg(0xF), 0);
    }

    #[test]
    fn addi_leaves_flag() {
        // li vF, 7 ; li v0, 0xFF ; addi v0, 2
        let mut m = machine(&[0x6F07, 0x60FF, 0x7002]);
        run(&mut m, 3);
        assert_eq!(m.reg(0), 1);
        assert_eq!(m.reg(0xF), 7);
    }

    #[test]
    fn shifts() {
        // li v2, 0x81 ; shr1 v2 ; shl1 v2
        let mut m = machine(&[0x6281, 0x8206, 0x820E, 0x820E]);
        run(&mut m, 2);
        assert_eq!(m.reg(2), 0x40);
        assert_eq!(m.reg(0xF), 1);
        run(&mut m, 1);
        assert_eq!(m.reg(2), 0x80);
        assert_eq!(m.reg(0xF), 0);
        run(&mut m, 1);
        assert_eq!(m.reg(2), 0x00);
        assert_eq!(m.reg(0xF), 1);
    }

    #[test]
    fn flag_register_as_destination_keeps_result() {
        // li vF, 0xFF ; li v1, 2 ; add vF, v1
        let mut m = machine(&[0x6FFF, 0x6102, 0x8F14]);
        run(&mut m, 3);
        assert_eq!(m.reg(0xF), 1);
    }

    #[test]
    fn skips_are_relative_to_instruction() {
        // li v0, 5 ; skeqi v0, 5 ; (skipped) ; skneqi v0, 5
        let mut m = machine(&[0x6005, 0x3005, 0x0000, 0x4005]);
        run(&mut m, 2);
        assert_eq!(m.ip(), 0x206);
        run(&mut m, 1);
        assert_eq!(m.ip(), 0x208);
        assert_eq!(m.reg(0xF), 0);
    }

    #[test]
    fn call_and_return() {
        // call 0x206 ; jmp 0x200 ; (pad) ; ret
        let mut m = machine(&[0x0206, 0x1200, 0x0000, 0x00EE]);
        run(&mut m, 1);
        assert_eq!(m.ip(), 0x206);
        assert_eq!(m.stack(), &[0x202]);
        run(&mut m, 1);
        assert_eq!(m.ip(), 0x202);
        assert!(m.stack().is_empty());
    }

    #[test]
    fn return_with_empty_stack() {
        let mut m = machine(&[0x00EE]);
        run(&mut m, 1);
        assert_eq!(m.ip(), 0x200);
    }

    #[test]
    fn branch_relative_to_v0() {
        // li v0, 4 ; brelv0 0x200
        let mut m = machine(&[0x6004, 0xB200]);
        run(&mut m, 2);
        assert_eq!(m.ip(), 0x204);
    }

    #[test]
    fn undecodable_word_leaves_state() {
        // li v3, 9 ; 0xFFFF
        let mut m = machine(&[0x6309, 0xFFFF]);
        run(&mut m, 1);
        assert_eq!(
            m.step().unwrap_err(),
            RuntimeError::Decode {
                address: 0x202,
                opcode: 0xFFFF
            }
        );
        assert_eq!(m.ip(), 0x202);
        assert_eq!(m.reg(3), 9);
    }

    #[test]
    fn out_of_bounds_leaves_state() {
        // loadI 0xFFF ; li v2, 1 ; regdump v2
        let mut m = machine(&[0xAFFF, 0x6201, 0xF255]);
        run(&mut m, 2);
        assert!(matches!(
            m.step(),
            Err(RuntimeError::OutOfBounds { .. })
        ));
        assert_eq!(m.ip(), 0x204);
        assert_eq!(m.memory()[0xFFF], 0);
    }

    #[test]
    fn draw_glyph() {
        // li v0, 0 ; li v1, 0 ; gsprite v0 ; draw v0, v1, 5
        let mut m = machine(&[0x6000, 0x6100, 0xF029, 0xD015]);
        run(&mut m, 3);
        assert_eq!(m.i(), 0);
        let (_, effect) = m.step().unwrap();
        assert_eq!(effect, Effect::Redraw);
        // Glyph 0 starts with 0xF0
        for x in 0..4 {
            assert_eq!(m.get_pixel(x, 0), PIXEL_ON);
        }
        assert_eq!(m.get_pixel(4, 0), PIXEL_OFF);
        assert_eq!(m.get_pixel(0, 1), PIXEL_ON);
        assert_eq!(m.get_pixel(1, 1), PIXEL_OFF);
        assert_eq!(m.reg(0xF), 0);
    }

    #[test]
    fn draw_twice_erases_and_collides() {
        // gsprite v0 ; draw v0, v0, 5 ; draw v0, v0, 5
        let mut m = machine(&[0xF029, 0xD005, 0xD005]);
        run(&mut m, 2);
        assert_eq!(m.reg(0xF), 0);
        run(&mut m, 1);
        assert_eq!(m.reg(0xF), 1);
        assert!(m.screen().iter().flatten().all(|pixel| *pixel == PIXEL_OFF));
    }

    #[test]
    fn collision_samples_each_pixel_before_drawing() {
        // Sprite 0b1000_0000 on a single lit pixel elsewhere does not collide
        let mut m = machine(&[0xA300, 0xD011]);
        m.write_memory(0x300, 0x80).unwrap();
        m.set_pixel(1, 0, PIXEL_ON);
        run(&mut m, 2);
        assert_eq!(m.reg(0xF), 0);
        assert_eq!(m.get_pixel(0, 0), PIXEL_ON);
        assert_eq!(m.get_pixel(1, 0), PIXEL_ON);

        // Lit pixel in the second row, under the sprite's second row
        let mut m = machine(&[0xA300, 0xD012]);
        m.write_memory(0x300, 0x80).unwrap();
        m.write_memory(0x301, 0x80).unwrap();
        m.set_pixel(0, 1, PIXEL_ON);
        run(&mut m, 2);
        assert_eq!(m.reg(0xF), 1);
        assert_eq!(m.get_pixel(0, 0), PIXEL_ON);
        assert_eq!(m.get_pixel(0, 1), PIXEL_OFF);
    }

    #[test]
    fn draw_clips_at_edge() {
        // li v0, 62 ; li v1, 31 ; loadI 0x300 ; draw v0, v1, 2
        let mut m = machine(&[0x603E, 0x611F, 0xA300, 0xD012]);
        m.write_memory(0x300, 0xFF).unwrap();
        m.write_memory(0x301, 0xFF).unwrap();
        run(&mut m, 4);
        assert_eq!(m.get_pixel(62, 31), PIXEL_ON);
        assert_eq!(m.get_pixel(63, 31), PIXEL_ON);
        assert_eq!(m.get_pixel(0, 31), PIXEL_OFF);
        assert_eq!(m.get_pixel(62, 0), PIXEL_OFF);
    }

    #[test]
    fn clear_redraws() {
        let mut m = machine(&[0x00E0]);
        m.set_pixel(3, 3, PIXEL_ON);
        let mut recorder = Recorder::default();
        m.step_with(&mut recorder).unwrap();
        assert_eq!(m.get_pixel(3, 3), PIXEL_OFF);
        assert_eq!(recorder.pixels, SCREEN_WIDTH * SCREEN_HEIGHT);
        assert_eq!(recorder.lit, 0);
    }

    #[test]
    fn frontend_hears_only_visible_changes() {
        let mut m = machine(&[0x6005, 0xFFFF]);
        let mut recorder = Recorder::default();
        m.step_with(&mut recorder).unwrap();
        assert_eq!(recorder.pixels, 0);
        assert!(m.step_with(&mut recorder).is_err());
        assert_eq!(recorder.errors.len(), 1);
        assert!(recorder.errors[0].contains("cannot decode instruction"));
    }

    #[test]
    fn pixels_out_of_range() {
        let mut m = Machine::new();
        m.set_pixel(SCREEN_WIDTH, 0, PIXEL_ON);
        m.set_pixel(0, SCREEN_HEIGHT, PIXEL_ON);
        assert_eq!(m.get_pixel(SCREEN_WIDTH, 0), 0);
        assert_eq!(m.get_pixel(1000, 1000), 0);
        assert!(m.screen().iter().flatten().all(|pixel| *pixel == PIXEL_OFF));
    }

    #[test]
    fn registers_by_index() {
        let mut m = machine(&[]);
        m.set_register(3, 0xAB).unwrap();
        m.set_register(16, 0x123).unwrap();
        m.set_register(17, 0x204).unwrap();
        assert_eq!(m.get_register(3), Ok(0xAB));
        assert_eq!(m.i(), 0x123);
        assert_eq!(m.ip(), 0x204);
        assert_eq!(
            m.set_register(0, 0x100),
            Err(RuntimeError::RegisterOverflow {
                register: Register::V(0),
                value: 0x100
            })
        );
        assert_eq!(m.get_register(18), Err(RuntimeError::InvalidRegister(18)));
    }

    #[test]
    fn keys() {
        // gkey v4 ; skeqkey v4
        let mut m = machine(&[0xF40A, 0xE49E]);
        run(&mut m, 1);
        assert_eq!(m.ip(), 0x200);
        m.press(0xB);
        m.press(0xE);
        run(&mut m, 1);
        assert_eq!(m.reg(4), 0xB);
        assert_eq!(m.ip(), 0x202);
        run(&mut m, 1);
        assert_eq!(m.ip(), 0x206);
        m.release(0xB);
        assert_eq!(m.pressed_key(), Some(0xE));
        m.press(0x20);
        assert!(!m.is_key_pressed(0x20));
    }

    #[test]
    fn bcd_and_register_transfer() {
        // li v0, 254 ; loadI 0x300 ; sbcd v0 ; regload v2
        let mut m = machine(&[0x60FE, 0xA300, 0xF033, 0xF265]);
        run(&mut m, 3);
        assert_eq!(&m.memory()[0x300..0x303], &[2, 5, 4]);
        run(&mut m, 1);
        assert_eq!((m.reg(0), m.reg(1), m.reg(2)), (2, 5, 4));
        assert_eq!(m.i(), 0x300);

        // li v0, 1 ; li v1, 2 ; loadI 0x310 ; regdump v1
        let mut m = machine(&[0x6001, 0x6102, 0xA310, 0xF155]);
        run(&mut m, 4);
        assert_eq!(&m.memory()[0x310..0x313], &[1, 2, 0]);
    }

    #[test]
    fn index_register_arithmetic() {
        // loadI 0xFFE ; li v0, 3 ; addI v0
        let mut m = machine(&[0xAFFE, 0x6003, 0xF01E]);
        run(&mut m, 3);
        assert_eq!(m.i(), 0x1001);
        assert_eq!(m.reg(0xF), 1);

        // li v5, 0x1F ; gsprite v5
        let mut m = machine(&[0x651F, 0xF529]);
        m.set_register(16, 0x40).unwrap();
        run(&mut m, 2);
        assert_eq!(m.i(), 0);

        let mut m = machine(&[0x650A, 0xF529]);
        run(&mut m, 2);
        assert_eq!(m.i(), 10 * GLYPH_SIZE);
    }

    #[test]
    fn random_is_masked_and_seeded() {
        // rand v0, 0x0F ; rand v1, 0
        let program = [0xC00F, 0xC100];
        let mut a = machine(&program);
        let mut b = machine(&program);
        run(&mut a, 2);
        run(&mut b, 2);
        assert_eq!(a.reg(0), b.reg(0));
        assert!(a.reg(0) <= 0x0F);
        assert_eq!(a.reg(1), 0);
    }

    #[test]
    fn random_follows_seed() {
        // rand v0, 0xFF, eight times over
        let program = [0xC0FF; 8];
        let mut m = machine(&program);
        let mut expected = StdRng::seed_from_u64(1);
        for _ in 0..8 {
            m.step().unwrap();
            assert_eq!(m.reg(0), expected.next_u32() as u8);
        }
    }

    #[test]
    fn timers_and_alert() {
        // li v0, 2 ; sdtc v0 ; sstc v0 ; gdtc v1
        let mut m = machine(&[0x6002, 0xF015, 0xF018, 0xF107]);
        let alerts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&alerts);
        m.set_alert(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        run(&mut m, 3);
        m.tick();
        run(&mut m, 1);
        assert_eq!(m.reg(1), 1);
        assert_eq!(alerts.load(Ordering::SeqCst), 0);
        m.tick();
        assert_eq!(alerts.load(Ordering::SeqCst), 1);
        m.tick();
        assert_eq!(alerts.load(Ordering::SeqCst), 1);
        assert_eq!(m.timers(), Timers::default());
    }

    #[test]
    fn realtime_ticker_counts_down() {
        let mut m = Machine::with_options(MachineOptions {
            seed: Some(1),
            realtime_timers: true,
        });
        // li v0, 0xFF ; sdtc v0
        m.load(&[0x60, 0xFF, 0xF0, 0x15]).unwrap();
        run(&mut m, 2);
        thread::sleep(Duration::from_millis(200));
        assert!(m.timers().delay < 0xFF);
        m.unload();
        let frozen = m.timers();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(m.timers(), frozen);
    }
}
