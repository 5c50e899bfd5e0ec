use std::io::{self, Read, Write};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use guardtape::interp::{Interpreter, StopReason};
use guardtape::listing::{disassemble, parse_listing};
use guardtape::machine::{EofBehavior, MachineConfig, MachineError};
use guardtape::program::Program;
use guardtape::repl::run_repl;

#[derive(Parser)]
#[command(name = "guardtape", about = "Run tape-machine instruction listings on a guard-paged tape")]
struct Cli {
    /// Instruction listing to execute (ADJUST, SELECT, READ, WRITE, SET, MADD,
    /// OPEN, CLOSE, SCAN_LEFT, SCAN_RIGHT).
    file: PathBuf,

    /// Tape length in bytes. Rounded up to whole pages.
    #[arg(long, default_value_t = 30000)]
    tape_size: usize,

    /// Value READ stores once input is exhausted.
    #[arg(long, value_enum, default_value_t = EofArg::Ff)]
    eof: EofArg,

    /// Print the normalized listing instead of running it.
    #[arg(long)]
    disasm: bool,

    /// Report tape state on stderr each time this instruction address is reached.
    #[arg(long = "break", value_name = "ADDRESS")]
    breakpoints: Vec<usize>,

    /// Print executed-instruction count and elapsed time on stderr.
    #[arg(long)]
    stats: bool,

    /// Start a debugger shell (break, step, print, assign, jump, select, run).
    #[arg(short, long)]
    interactive: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum EofArg {
    /// Store 255, as C's getchar EOF does.
    Ff,
    /// Store 0.
    Zero,
    /// Leave the cell unchanged.
    Unchanged,
}

impl From<EofArg> for EofBehavior {
    fn from(arg: EofArg) -> Self {
        match arg {
            EofArg::Ff => EofBehavior::Sentinel(0xFF),
            EofArg::Zero => EofBehavior::Sentinel(0),
            EofArg::Unchanged => EofBehavior::Unchanged,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let source = match std::fs::read_to_string(&cli.file) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{}: {e}", cli.file.display());
            std::process::exit(1);
        }
    };
    let program = match parse_listing(&source) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("{}: {e}", cli.file.display());
            std::process::exit(1);
        }
    };

    if cli.disasm {
        print!("{}", disassemble(&program));
        return;
    }

    let config = MachineConfig {
        tape_size: cli.tape_size,
        eof: cli.eof.into(),
    };
    let result = if cli.interactive {
        interactive(program, &config, &cli)
    } else {
        run(program, &config, &cli)
    };
    if let Err(e) = result {
        match e {
            MachineError::Region(e) => eprintln!("Assertion failed: {e}"),
            MachineError::Io(e) => eprintln!("I/O error: {e}"),
        }
        std::process::exit(1);
    }
}

fn set_breakpoints<R: Read, W: Write>(interp: &mut Interpreter<R, W>, cli: &Cli) {
    for &address in &cli.breakpoints {
        if let Err(e) = interp.set_breakpoint(address) {
            eprintln!("--break {address}: {e}");
            std::process::exit(1);
        }
    }
}

fn run(program: Program, config: &MachineConfig, cli: &Cli) -> Result<(), MachineError> {
    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    let mut interp = Interpreter::new(program, config, stdin, stdout)?;
    set_breakpoints(&mut interp, cli);

    let start = std::time::Instant::now();
    // SAFETY: the listing comes from a code generator that keeps every access
    // on the tape. An access that lands in a guard page (including a scan
    // started from a failed scan's landing cell) faults the process.
    while let StopReason::Breakpoint(address) = unsafe { interp.run()? } {
        report_breakpoint(&interp, address);
    }
    let elapsed = start.elapsed();

    if cli.stats {
        let steps = interp.steps();
        let per_sec = steps as f64 / elapsed.as_secs_f64();
        eprintln!("Run statistics:");
        eprintln!("  Instructions:      {}", interp.program().len());
        eprintln!("  Max loop depth:    {}", interp.program().max_depth());
        eprintln!("  Steps executed:    {steps}");
        eprintln!("  Elapsed:           {elapsed:.2?}");
        eprintln!("  Steps/sec:         {per_sec:.0}");
    }

    interp.finish()?;
    Ok(())
}

/// The shell reads commands and the program reads input from the same stdin,
/// so neither side holds the stdin lock across calls.
fn interactive(program: Program, config: &MachineConfig, cli: &Cli) -> Result<(), MachineError> {
    let mut interp = Interpreter::new(program, config, io::stdin(), io::stdout())?;
    set_breakpoints(&mut interp, cli);

    let stdin = io::stdin();
    // SAFETY: as in `run`.
    unsafe { run_repl(&mut interp, |line| stdin.read_line(line), &mut io::stdout())? };

    interp.finish()?;
    Ok(())
}

fn report_breakpoint<R: Read, W: Write>(interp: &Interpreter<R, W>, address: usize) {
    let dp = interp.data_pointer();
    let cell = usize::try_from(dp)
        .ok()
        .and_then(|i| interp.peek(i).ok())
        .map_or_else(|| "--".to_string(), |v| v.to_string());
    let insn = interp
        .program()
        .get(address)
        .map_or_else(String::new, |i| format!("{i:?}"));
    eprintln!("Hit breakpoint at {address} ({insn}): dp={dp} *dp={cell}");
}
