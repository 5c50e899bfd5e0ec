use thiserror::Error;

/// One primitive of the tape machine, with its generation-time operands.
///
/// Offsets are relative to the data pointer. Byte operands are stored modulo
/// 256; under 8-bit wrapping arithmetic a delta of `-1` and `255` are the
/// same instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// `*(dp + offset) += delta`
    Adjust { offset: isize, delta: u8 },
    /// `dp += delta`
    Select(isize),
    /// `*(dp + offset) = next input byte`
    Read(isize),
    /// Emit `*(dp + offset)` and flush.
    Write(isize),
    /// `*(dp + offset) = value`
    Set { offset: isize, value: u8 },
    /// `*(dp + offset) += *dp * factor`
    MultiplyAdd { offset: isize, factor: u8 },
    /// `while *dp != 0 {`
    Open,
    /// `}`
    Close,
    /// Move dp left to the nearest zero cell, inclusive.
    ScanLeft,
    /// Move dp right to the nearest zero cell, inclusive.
    ScanRight,
}

impl Instruction {
    /// Listing mnemonic for this instruction.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Adjust { .. } => "ADJUST",
            Instruction::Select(_) => "SELECT",
            Instruction::Read(_) => "READ",
            Instruction::Write(_) => "WRITE",
            Instruction::Set { .. } => "SET",
            Instruction::MultiplyAdd { .. } => "MADD",
            Instruction::Open => "OPEN",
            Instruction::Close => "CLOSE",
            Instruction::ScanLeft => "SCAN_LEFT",
            Instruction::ScanRight => "SCAN_RIGHT",
        }
    }
}

/// A loop in the instruction stream has no partner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
    #[error("OPEN at instruction {0} has no matching CLOSE")]
    UnmatchedOpen(usize),
    #[error("CLOSE at instruction {0} has no matching OPEN")]
    UnmatchedClose(usize),
}

/// A decoded instruction stream ready to execute.
///
/// Construction pairs every `Open` with its `Close`; that is the only
/// validation performed. Operands are never checked against the tape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    code: Vec<Instruction>,
    jumps: Vec<usize>,
}

impl Program {
    pub fn new(code: Vec<Instruction>) -> Result<Self, ProgramError> {
        let jumps = build_jump_table(&code)?;
        Ok(Self { code, jumps })
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.code
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn get(&self, address: usize) -> Option<Instruction> {
        self.code.get(address).copied()
    }

    /// Where control continues when the loop instruction at `address` jumps.
    ///
    /// For an `Open` this is the instruction after its `Close`; for a `Close`
    /// the instruction after its `Open`. Meaningless for other instructions.
    #[inline(always)]
    pub fn jump_target(&self, address: usize) -> usize {
        self.jumps[address]
    }

    /// Deepest loop nesting in the program.
    pub fn max_depth(&self) -> usize {
        let mut depth = 0usize;
        let mut max = 0;
        for insn in &self.code {
            match insn {
                Instruction::Open => {
                    depth += 1;
                    max = max.max(depth);
                }
                Instruction::Close => depth -= 1,
                _ => {}
            }
        }
        max
    }
}

/// Build the loop jump table.
///
/// `result[i]` is the jump destination for a loop instruction at `i`, and `i`
/// itself for everything else.
fn build_jump_table(code: &[Instruction]) -> Result<Vec<usize>, ProgramError> {
    let mut table: Vec<usize> = (0..code.len()).collect();
    let mut stack = Vec::new();

    for (i, insn) in code.iter().enumerate() {
        match insn {
            Instruction::Open => stack.push(i),
            Instruction::Close => {
                let open = stack.pop().ok_or(ProgramError::UnmatchedClose(i))?;
                table[open] = i + 1;
                table[i] = open + 1;
            }
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        return Err(ProgramError::UnmatchedOpen(open));
    }

    Ok(table)
}
