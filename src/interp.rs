//! An enum-dispatch interpreter over a decoded program, with breakpoints.

use std::collections::HashSet;
use std::io::{Read, Write};

use thiserror::Error;

use crate::machine::{MachineConfig, MachineError, TapeMachine};
use crate::program::{Instruction, Program};
use crate::region::RegionError;

/// Why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The instruction at this address has a breakpoint and has not run yet.
    Breakpoint(usize),
    /// The program ran to completion.
    Done,
}

/// Rejected debugger request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebugError {
    #[error("Address out of bounds: {0}")]
    OutOfBounds(usize),
}

/// Runs a `Program` against a `TapeMachine`.
///
/// The instruction pointer and breakpoints are debugger state; the tape
/// machine itself only ever holds `dp`.
pub struct Interpreter<R, W> {
    machine: TapeMachine<R, W>,
    program: Program,
    instruction_pointer: usize,
    breakpoints: HashSet<usize>,
    paused_at: Option<usize>,
    steps: u64,
}

impl<R: Read, W: Write> Interpreter<R, W> {
    pub fn new(
        program: Program,
        config: &MachineConfig,
        input: R,
        output: W,
    ) -> Result<Self, RegionError> {
        Ok(Self {
            machine: TapeMachine::new(config, input, output)?,
            program,
            instruction_pointer: 0,
            breakpoints: HashSet::new(),
            paused_at: None,
            steps: 0,
        })
    }

    /// Set a breakpoint at `address`. Returns false if one was already set.
    pub fn set_breakpoint(&mut self, address: usize) -> Result<bool, DebugError> {
        if address >= self.program.len() {
            Err(DebugError::OutOfBounds(address))
        } else {
            Ok(self.breakpoints.insert(address))
        }
    }

    /// Remove the breakpoint at `address`. Returns false if there was none.
    pub fn delete_breakpoint(&mut self, address: usize) -> bool {
        self.breakpoints.remove(&address)
    }

    /// Run until the program finishes or reaches a breakpoint.
    ///
    /// Execution stops before an instruction with a breakpoint. Calling `run`
    /// again executes that instruction and continues.
    ///
    /// # Safety
    ///
    /// Every tape access the program performs must stay within the tape.
    /// Accesses that land in a guard page fault the process; accesses that
    /// skip past a guard page are undefined behavior.
    pub unsafe fn run(&mut self) -> Result<StopReason, MachineError> {
        while self.instruction_pointer < self.program.len() {
            let ip = self.instruction_pointer;
            if self.paused_at != Some(ip) && self.breakpoints.contains(&ip) {
                self.paused_at = Some(ip);
                return Ok(StopReason::Breakpoint(ip));
            }
            unsafe { self.step()? };
        }
        Ok(StopReason::Done)
    }

    /// Execute exactly one instruction. Does nothing once the program is done.
    ///
    /// # Safety
    ///
    /// Same contract as [`Interpreter::run`].
    pub unsafe fn step(&mut self) -> Result<(), MachineError> {
        let ip = self.instruction_pointer;
        let Some(insn) = self.program.get(ip) else {
            return Ok(());
        };
        let mut next = ip + 1;
        let m = &mut self.machine;

        unsafe {
            match insn {
                Instruction::Adjust { offset, delta } => m.adjust(offset, delta),
                Instruction::Select(delta) => m.select(delta),
                Instruction::Read(offset) => m.read(offset)?,
                Instruction::Write(offset) => m.write(offset)?,
                Instruction::Set { offset, value } => m.set(offset, value),
                Instruction::MultiplyAdd { offset, factor } => m.multiply_add(offset, factor),
                Instruction::Open => {
                    if !m.is_nonzero() {
                        next = self.program.jump_target(ip);
                    }
                }
                Instruction::Close => {
                    if m.is_nonzero() {
                        next = self.program.jump_target(ip);
                    }
                }
                Instruction::ScanLeft => m.scan_left(),
                Instruction::ScanRight => m.scan_right(),
            }
        }

        self.instruction_pointer = next;
        self.paused_at = None;
        self.steps += 1;
        Ok(())
    }

    /// Read the tape cell at `address`.
    pub fn peek(&self, address: usize) -> Result<u8, DebugError> {
        self.machine
            .tape()
            .get(address)
            .copied()
            .ok_or(DebugError::OutOfBounds(address))
    }

    /// Write `value` to the tape cell at `address`, returning the old value.
    pub fn poke(&mut self, address: usize, value: u8) -> Result<u8, DebugError> {
        let cell = self
            .machine
            .tape_mut()
            .get_mut(address)
            .ok_or(DebugError::OutOfBounds(address))?;
        Ok(std::mem::replace(cell, value))
    }

    /// Move the instruction pointer to `address`.
    pub fn jump(&mut self, address: usize) -> Result<(), DebugError> {
        if address >= self.program.len() {
            return Err(DebugError::OutOfBounds(address));
        }
        self.instruction_pointer = address;
        self.paused_at = None;
        Ok(())
    }

    /// Move the data pointer to `address`.
    pub fn select(&mut self, address: usize) -> Result<(), DebugError> {
        if address >= self.machine.len() {
            return Err(DebugError::OutOfBounds(address));
        }
        self.machine.set_data_pointer(address);
        Ok(())
    }

    pub fn instruction_pointer(&self) -> usize {
        self.instruction_pointer
    }

    pub fn data_pointer(&self) -> isize {
        self.machine.data_pointer()
    }

    /// Instructions executed so far. An `Open` or `Close` counts as one.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn is_done(&self) -> bool {
        self.instruction_pointer >= self.program.len()
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn machine(&self) -> &TapeMachine<R, W> {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut TapeMachine<R, W> {
        &mut self.machine
    }

    /// Release the tape, handing back the output stream.
    pub fn finish(self) -> Result<W, RegionError> {
        self.machine.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::parse_listing;
    use std::io;

    type TestInterpreter = Interpreter<io::Cursor<Vec<u8>>, Vec<u8>>;

    fn interpreter(listing: &str, tape_size: usize, input: &[u8]) -> TestInterpreter {
        let config = MachineConfig {
            tape_size,
            ..Default::default()
        };
        let program = parse_listing(listing).unwrap();
        Interpreter::new(program, &config, io::Cursor::new(input.to_vec()), Vec::new()).unwrap()
    }

    const MOVE_LOOP: &str = "\
SET(0, 5)
OPEN()
    ADJUST(1, 1)
    ADJUST(0, -1)
CLOSE()
WRITE(1)
";

    #[test]
    fn test_move_loop() {
        let mut subject = interpreter(MOVE_LOOP, 2, b"");

        assert_eq!(unsafe { subject.run() }.unwrap(), StopReason::Done);

        assert_eq!(subject.machine().tape(), &[0, 5]);
        assert_eq!(subject.data_pointer(), 0);
        assert_eq!(subject.finish().unwrap(), vec![5]);
    }

    #[test]
    fn test_loop_skipped_when_zero() {
        let mut subject = interpreter("OPEN()\nSET(1, 9)\nCLOSE()\nADJUST(2, 1)", 4, b"");
        assert_eq!(unsafe { subject.run() }.unwrap(), StopReason::Done);
        assert_eq!(subject.machine().tape(), &[0, 0, 1, 0]);
        // Open jumps straight past its Close.
        assert_eq!(subject.steps(), 2);
    }

    #[test]
    fn test_nested_loops() {
        // 3 * 4 = 12 via nested decrement loops.
        let listing = "\
SET(0, 3)
OPEN()
    SET(1, 4)
    SELECT(1)
    OPEN()
        ADJUST(1, 1)
        ADJUST(0, -1)
    CLOSE()
    SELECT(-1)
    ADJUST(0, -1)
CLOSE()
";
        let mut subject = interpreter(listing, 3, b"");
        assert_eq!(unsafe { subject.run() }.unwrap(), StopReason::Done);
        assert_eq!(subject.machine().tape(), &[0, 0, 12]);
        assert_eq!(subject.program().max_depth(), 2);
    }

    #[test]
    fn test_deep_nesting() {
        let depth = 200;
        let mut listing = String::from("SET(0, 1)\n");
        for _ in 0..depth {
            listing.push_str("OPEN()\n");
        }
        listing.push_str("SET(0, 0)\n");
        for _ in 0..depth {
            listing.push_str("CLOSE()\n");
        }
        let mut subject = interpreter(&listing, 1, b"");
        assert_eq!(unsafe { subject.run() }.unwrap(), StopReason::Done);
        assert_eq!(subject.program().max_depth(), depth);
        assert_eq!(subject.peek(0), Ok(0));
    }

    #[test]
    fn test_loop_condition_retested_each_iteration() {
        // The body moves dp, so each test reads a different cell.
        let mut subject = interpreter("OPEN()\nSELECT(1)\nCLOSE()\n", 8, b"");
        for i in 0..3 {
            subject.poke(i, 1).unwrap();
        }
        assert_eq!(unsafe { subject.run() }.unwrap(), StopReason::Done);
        assert_eq!(subject.data_pointer(), 3);
    }

    #[test]
    fn test_echo_until_eof() {
        let listing = "\
READ(0)
ADJUST(0, 1)
OPEN()
    ADJUST(0, -1)
    WRITE(0)
    READ(0)
    ADJUST(0, 1)
CLOSE()
";
        let mut subject = interpreter(listing, 1, b"hello");
        assert_eq!(unsafe { subject.run() }.unwrap(), StopReason::Done);
        assert_eq!(subject.finish().unwrap(), b"hello");
    }

    #[test]
    fn test_scan_instructions() {
        let mut subject = interpreter("SCAN_RIGHT()\nSELECT(-1)\nSCAN_LEFT()\n", 5, b"");
        for (i, v) in [1, 2, 0, 3, 0].into_iter().enumerate() {
            subject.poke(i, v).unwrap();
        }
        subject.select(0).unwrap();
        unsafe { subject.step() }.unwrap();
        assert_eq!(subject.data_pointer(), 2);
        unsafe { subject.run() }.unwrap();
        assert_eq!(subject.data_pointer(), -1);
    }

    #[test]
    fn test_scan_from_rounding_tail_stays_put() {
        // 200 is past the 100-byte tape but inside the same accessible page.
        let mut subject = interpreter("SELECT(200)\nSCAN_RIGHT()\nWRITE(0)\n", 100, b"");
        unsafe { subject.run() }.unwrap();
        assert_eq!(subject.data_pointer(), 200);
        assert_eq!(subject.machine().output(), &[0]);
    }

    #[test]
    fn test_multiply_add_instruction() {
        let mut subject = interpreter("SET(0, 3)\nSET(2, 5)\nMADD(2, 4)\n", 3, b"");
        unsafe { subject.run() }.unwrap();
        assert_eq!(subject.machine().tape(), &[3, 0, 17]);
    }

    #[test]
    fn test_set_breakpoint() {
        let mut subject = interpreter(MOVE_LOOP, 2, b"");
        assert_eq!(subject.set_breakpoint(3), Ok(true));
        assert_eq!(subject.set_breakpoint(3), Ok(false));
        assert!(subject.breakpoints.contains(&3));
    }

    #[test]
    fn test_set_breakpoint_out_of_bounds() {
        let mut subject = interpreter(MOVE_LOOP, 2, b"");
        assert_eq!(subject.set_breakpoint(6), Err(DebugError::OutOfBounds(6)));
    }

    #[test]
    fn test_delete_breakpoint() {
        let mut subject = interpreter(MOVE_LOOP, 2, b"");
        subject.breakpoints.insert(3);
        assert!(subject.delete_breakpoint(3));
        assert!(!subject.delete_breakpoint(3));
    }

    #[test]
    fn test_run_stops_for_breakpoints() {
        let mut subject = interpreter(MOVE_LOOP, 2, b"");
        subject.set_breakpoint(3).unwrap();

        // The loop body runs five times, stopping before ADJUST(0, -1) each time.
        for remaining in (1..=5).rev() {
            assert_eq!(unsafe { subject.run() }.unwrap(), StopReason::Breakpoint(3));
            assert_eq!(subject.peek(0), Ok(remaining));
        }
        assert_eq!(unsafe { subject.run() }.unwrap(), StopReason::Done);
        assert_eq!(subject.machine().tape(), &[0, 5]);
    }

    #[test]
    fn test_breakpoint_on_first_instruction() {
        let mut subject = interpreter("ADJUST(0, 1)\n", 1, b"");
        subject.set_breakpoint(0).unwrap();
        assert_eq!(unsafe { subject.run() }.unwrap(), StopReason::Breakpoint(0));
        assert_eq!(subject.peek(0), Ok(0));
        assert_eq!(unsafe { subject.run() }.unwrap(), StopReason::Done);
        assert_eq!(subject.peek(0), Ok(1));
    }

    #[test]
    fn test_step() {
        let mut subject = interpreter("ADJUST(0, 1)\nADJUST(0, 1)\nADJUST(0, 1)", 1, b"");
        for expected in 1..=3 {
            unsafe { subject.step() }.unwrap();
            assert_eq!(subject.peek(0), Ok(expected));
        }
        assert!(subject.is_done());
        unsafe { subject.step() }.unwrap();
        assert_eq!(subject.steps(), 3);
    }

    #[test]
    fn test_peek_and_poke() {
        let mut subject = interpreter("", 64, b"");
        assert_eq!(subject.poke(42, 12), Ok(0));
        assert_eq!(subject.poke(42, 42), Ok(12));
        assert_eq!(subject.peek(42), Ok(42));
        assert_eq!(subject.peek(64), Err(DebugError::OutOfBounds(64)));
        assert_eq!(subject.poke(100000000, 1), Err(DebugError::OutOfBounds(100000000)));
        assert_eq!(
            subject.peek(100000000).unwrap_err().to_string(),
            "Address out of bounds: 100000000"
        );
    }

    #[test]
    fn test_jump() {
        let mut subject = interpreter("ADJUST(0, 1)\nADJUST(0, 2)\nADJUST(0, 4)", 1, b"");
        assert_eq!(subject.jump(2), Ok(()));
        assert_eq!(subject.instruction_pointer(), 2);
        unsafe { subject.run() }.unwrap();
        assert_eq!(subject.peek(0), Ok(4));
        assert_eq!(subject.jump(3), Err(DebugError::OutOfBounds(3)));
    }

    #[test]
    fn test_select() {
        let mut subject = interpreter("ADJUST(0, 1)", 8, b"");
        assert_eq!(subject.select(7), Ok(()));
        assert_eq!(subject.data_pointer(), 7);
        assert_eq!(subject.select(8), Err(DebugError::OutOfBounds(8)));
        assert_eq!(subject.data_pointer(), 7);
        unsafe { subject.run() }.unwrap();
        assert_eq!(subject.peek(7), Ok(1));
    }
}
