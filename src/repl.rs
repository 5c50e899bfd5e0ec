//! Line-oriented debugger shell over an [`Interpreter`].

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::interp::{DebugError, Interpreter, StopReason};
use crate::machine::MachineError;

const HELP: &str = "\
Commands:
    help (h)
    quit (q)
    run (r)
    break (b) ADDRESS
    delete (d) ADDRESS
    step (s)
    print (p) ADDRESS
    assign (a) ADDRESS BYTE
    jump (j) ADDRESS
    select ADDRESS";

/// One parsed shell command. Addresses are instruction addresses for
/// `Break`, `Delete` and `Jump`, tape addresses for the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    Run,
    Break(usize),
    Delete(usize),
    Step,
    Print(usize),
    Assign(usize, u8),
    Jump(usize),
    Select(usize),
}

#[derive(Debug, Error)]
pub enum ReplError {
    #[error("Invalid syntax!")]
    Syntax,
    #[error("Invalid address: {0}")]
    Address(String),
    #[error("Invalid byte: {0}")]
    Byte(String),
    #[error("Unrecognized command: {0}")]
    Unrecognized(String),
    #[error(transparent)]
    Debug(#[from] DebugError),
    #[error(transparent)]
    Machine(#[from] MachineError),
    #[error(transparent)]
    Console(#[from] io::Error),
}

fn address(word: &str) -> Result<usize, ReplError> {
    word.parse().map_err(|_| ReplError::Address(word.to_string()))
}

fn byte(word: &str) -> Result<u8, ReplError> {
    word.parse().map_err(|_| ReplError::Byte(word.to_string()))
}

/// Parse one trimmed input line.
pub fn parse_command(line: &str) -> Result<Command, ReplError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&name, args)) = words.split_first() else {
        return Err(ReplError::Unrecognized(line.to_string()));
    };

    let nullary = |command: Command| -> Result<Command, ReplError> {
        match args {
            [] => Ok(command),
            _ => Err(ReplError::Syntax),
        }
    };
    let unary = |make: fn(usize) -> Command| -> Result<Command, ReplError> {
        match args {
            [word] => Ok(make(address(word)?)),
            _ => Err(ReplError::Syntax),
        }
    };

    match name {
        "help" | "h" => nullary(Command::Help),
        "quit" | "q" => nullary(Command::Quit),
        "run" | "r" => nullary(Command::Run),
        "step" | "s" => nullary(Command::Step),
        "break" | "b" => unary(Command::Break),
        "delete" | "d" => unary(Command::Delete),
        "print" | "p" => unary(Command::Print),
        "jump" | "j" => unary(Command::Jump),
        "select" => unary(Command::Select),
        "assign" | "a" => match args {
            [at, value] => Ok(Command::Assign(address(at)?, byte(value)?)),
            _ => Err(ReplError::Syntax),
        },
        _ => Err(ReplError::Unrecognized(line.to_string())),
    }
}

/// Carry out `command`, writing its reply to `console`.
///
/// # Safety
///
/// `Run` and `Step` execute the program; see [`Interpreter::run`].
pub unsafe fn execute<R: Read, W: Write>(
    interp: &mut Interpreter<R, W>,
    command: Command,
    console: &mut impl Write,
) -> Result<(), ReplError> {
    match command {
        Command::Help => writeln!(console, "{HELP}")?,
        Command::Quit => writeln!(console, "OK")?,
        Command::Run => match unsafe { interp.run()? } {
            StopReason::Breakpoint(address) => {
                let insn = interp.program().get(address);
                match insn {
                    Some(insn) => writeln!(console, "Hit breakpoint at {address} ({insn:?})")?,
                    None => writeln!(console, "Hit breakpoint at {address}")?,
                }
            }
            StopReason::Done => writeln!(console, "OK")?,
        },
        Command::Step => unsafe { interp.step()? },
        Command::Break(address) => {
            interp.set_breakpoint(address)?;
            writeln!(console, "OK")?;
        }
        Command::Delete(address) => {
            interp.delete_breakpoint(address);
            writeln!(console, "OK")?;
        }
        Command::Print(address) => writeln!(console, "{}", interp.peek(address)?)?,
        Command::Assign(address, value) => {
            interp.poke(address, value)?;
            writeln!(console, "OK")?;
        }
        Command::Jump(address) => {
            interp.jump(address)?;
            writeln!(console, "OK")?;
        }
        Command::Select(address) => {
            interp.select(address)?;
            writeln!(console, "OK")?;
        }
    }
    Ok(())
}

/// Prompt on `console` and execute lines from `next_line` until `quit` or end
/// of input. Rejected commands are reported on stderr and the shell goes on.
///
/// `next_line` appends one line to its buffer and returns the byte count, like
/// [`io::Stdin::read_line`]. The shell holds no lock between lines, so the
/// program's own READs can share stdin with it.
///
/// # Safety
///
/// See [`Interpreter::run`].
pub unsafe fn run_repl<R: Read, W: Write>(
    interp: &mut Interpreter<R, W>,
    mut next_line: impl FnMut(&mut String) -> io::Result<usize>,
    console: &mut impl Write,
) -> io::Result<()> {
    writeln!(console, "Welcome to guardtape! Type `help` for more information.")?;
    let mut buffer = String::new();
    loop {
        write!(console, "> ")?;
        console.flush()?;

        buffer.clear();
        if next_line(&mut buffer)? == 0 {
            return Ok(());
        }
        let line = buffer.trim();
        if line.is_empty() {
            continue;
        }

        let result = parse_command(line).and_then(|command| {
            unsafe { execute(interp, command, console)? };
            Ok(command)
        });
        match result {
            Ok(Command::Quit) => return Ok(()),
            Ok(_) => {}
            Err(ReplError::Console(e)) => return Err(e),
            Err(e) => eprintln!("{e}"),
        }
    }
}
