use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::{bail, IntoDiagnostic, Result};

use chasm::error::{asm_report, runtime_report, StartError};
use chasm::output::Output;
use chasm::symbol::Keymap;
use chasm::{Headless, Machine, MachineOptions, Outcome, Session};

/// Chasm assembles, disassembles and runs programs for a 16-bit CHIP-8 style machine.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.asm` or `.ch8` file to run
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run text `.asm` or binary `.ch8` file headless and print the final machine state
    Run {
        /// `.asm` or `.ch8` file to run
        name: PathBuf,
        /// Stop after this many instructions
        #[arg(short, long)]
        steps: Option<u64>,
        /// Host keys held down for the whole run, e.g. `qw`
        #[arg(short, long)]
        keys: Option<String>,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
        /// Print the framebuffer after running
        #[arg(long)]
        screen: bool,
    },
    /// Create binary `.ch8` file from a `.asm` file
    Assemble {
        /// `.asm` file to assemble
        name: PathBuf,
        /// Destination to output .ch8 file
        dest: Option<PathBuf>,
    },
    /// Create an annotated `.asm` listing from a binary file
    Disassemble {
        /// Binary file to disassemble
        name: PathBuf,
        /// Destination to output listing
        dest: Option<PathBuf>,
    },
    /// Check a `.asm` file without running or outputting binary
    Check {
        /// File to check
        name: PathBuf,
    },
    /// Rewrite the position annotations of a `.asm` listing in place
    Fix {
        /// Listing to update
        name: PathBuf,
    },
}

fn main() -> Result<()> {
    use MsgColor::*;
    let args = Args::parse();
    chasm::env::init();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(chasm::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    let Some(command) = args.command else {
        if let Some(path) = args.path {
            return run(&path, RunOptions::default());
        }
        println!("\n~ chasm v{VERSION} ~");
        println!("{SHORT_INFO}");
        std::process::exit(0);
    };

    match command {
        Command::Run {
            name,
            steps,
            keys,
            minimal,
            screen,
        } => run(
            &name,
            RunOptions {
                steps,
                keys,
                minimal,
                screen,
            },
        ),
        Command::Assemble { name, dest } => {
            file_message(Green, "Assembling", &name);
            let src = fs::read_to_string(&name).into_diagnostic()?;
            let program =
                chasm::generate_bytecode(&src).map_err(|err| asm_report(&err, &src))?;

            let dest = dest.unwrap_or_else(|| name.with_extension("ch8"));
            fs::write(&dest, &program.bytes).into_diagnostic()?;

            message(Green, "Finished", &format!("emit {} bytes", program.bytes.len()));
            file_message(Green, "Saved", &dest);
            Ok(())
        }
        Command::Disassemble { name, dest } => {
            file_message(Green, "Reading", &name);
            let bytes = fs::read(&name).into_diagnostic()?;
            let listing = chasm::disassemble(&bytes);

            let dest = dest.unwrap_or_else(|| name.with_extension("asm"));
            fs::write(&dest, listing).into_diagnostic()?;

            message(Green, "Finished", "disassembly");
            file_message(Green, "Saved", &dest);
            Ok(())
        }
        Command::Check { name } => {
            file_message(Green, "Checking", &name);
            let src = fs::read_to_string(&name).into_diagnostic()?;
            chasm::assemble(&src).map_err(|err| asm_report(&err, &src))?;
            message(Green, "Success", "no errors found!");
            Ok(())
        }
        Command::Fix { name } => {
            file_message(Green, "Fixing", &name);
            let src = fs::read_to_string(&name).into_diagnostic()?;
            let fixed = chasm::fix_offsets(&src).map_err(|err| asm_report(&err, &src))?;
            fs::write(&name, fixed).into_diagnostic()?;
            file_message(Green, "Saved", &name);
            Ok(())
        }
    }
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

fn message(color: MsgColor, left: &str, right: &str) {
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

#[derive(Default)]
struct RunOptions {
    steps: Option<u64>,
    keys: Option<String>,
    minimal: bool,
    screen: bool,
}

fn run(name: &Path, opts: RunOptions) -> Result<()> {
    Output::set_minimal(opts.minimal);

    let mut machine = Machine::with_options(MachineOptions {
        seed: chasm::env::seed(),
        realtime_timers: chasm::env::timers_enabled(),
    });
    // Terminal bell
    machine.set_alert(Arc::new(|| eprint!("\x07")));

    let ext = name.extension().and_then(|ext| ext.to_str());
    let (session, src) = match ext {
        Some("ch8" | "bin") => {
            file_message(MsgColor::Green, "Loading", name);
            let bytes = fs::read(name).into_diagnostic()?;
            (Session::from_bytes(bytes, machine), String::new())
        }
        Some("asm") => {
            file_message(MsgColor::Green, "Assembling", name);
            let src = fs::read_to_string(name).into_diagnostic()?;
            (Session::start(&src, machine), src)
        }
        Some(_) => bail!("File has unknown extension. Exiting..."),
        None => bail!("File has no extension. Exiting..."),
    };
    let mut session = session.map_err(|err| match err {
        StartError::Asm(err) => asm_report(&err, &src),
        StartError::Load(err) => runtime_report(&err),
    })?;
    session.set_trace(chasm::env::is_trace_enabled());

    if let Some(keys) = &opts.keys {
        let keymap = Keymap::default();
        for host in keys.chars() {
            let Some(key) = keymap.key(host) else {
                bail!("Key `{}` is not mapped to the keypad.", host);
            };
            session.machine_mut().press(key);
        }
    }

    message(MsgColor::Green, "Running", "loaded program");
    let result = session.cont(&mut Headless, opts.steps);

    match &result {
        Ok(Outcome::Stalled { ip }) => message(
            MsgColor::Cyan,
            "Halted",
            &format!("no progress at 0x{:04X}", ip),
        ),
        Ok(Outcome::StepLimit) => message(MsgColor::Cyan, "Halted", "step limit reached"),
        Ok(Outcome::Stopped | Outcome::Stepped) => message(MsgColor::Cyan, "Halted", "stopped"),
        Err(_) => message(MsgColor::Red, "Halted", "runtime error"),
    }
    message(
        MsgColor::Green,
        "Executed",
        &format!("{} instructions", session.steps()),
    );

    Output::Normal.print_registers(session.machine());
    if opts.screen {
        Output::Normal.print_screen(session.machine());
    }

    result.map_err(|err| runtime_report(&err))?;
    file_message(MsgColor::Green, "Completed", name);
    Ok(())
}

const SHORT_INFO: &str = r"
Welcome to chasm, an assembler, disassembler and interpreter for a
16-bit CHIP-8 style instruction set.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
