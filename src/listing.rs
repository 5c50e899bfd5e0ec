//! The textual instruction listing emitted by the code generator.
//!
//! One invocation per line, in the generator's macro spelling:
//!
//! ```text
//! SET(0, 5)
//! OPEN()
//!     ADJUST(1, 1)
//!     ADJUST(0, -1)
//! CLOSE()
//! WRITE(1)
//! ```
//!
//! Indentation, blank lines, a trailing `;` and `#` or `//` comments are
//! ignored. Integers are signed decimal; byte operands accept `-255..=255`
//! and are reduced modulo 256.

use thiserror::Error;

use crate::program::{Instruction, Program, ProgramError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("unknown instruction `{0}`")]
    UnknownMnemonic(String),
    #[error("expected `(` after `{0}`")]
    MissingOpenParen(String),
    #[error("missing `)`")]
    MissingCloseParen,
    #[error("unexpected text after `)`: `{0}`")]
    TrailingText(String),
    #[error("`{mnemonic}` takes {expected} operand(s), got {found}")]
    Arity {
        mnemonic: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("invalid integer `{0}`")]
    InvalidInteger(String),
    #[error("byte operand {0} is outside -255..=255")]
    ByteOutOfRange(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListingError {
    #[error("line {line}: {kind}")]
    Syntax { line: usize, kind: SyntaxError },
    #[error(transparent)]
    Structure(#[from] ProgramError),
}

/// Parse a listing into a ready-to-run program.
pub fn parse_listing(source: &str) -> Result<Program, ListingError> {
    let mut code = Vec::new();
    for (index, raw) in source.lines().enumerate() {
        let parsed = parse_line(raw).map_err(|kind| ListingError::Syntax {
            line: index + 1,
            kind,
        })?;
        if let Some(insn) = parsed {
            code.push(insn);
        }
    }
    Ok(Program::new(code)?)
}

/// Parse one listing line. Returns `None` for blank and comment-only lines.
pub fn parse_line(raw: &str) -> Result<Option<Instruction>, SyntaxError> {
    let line = strip_comment(raw).trim();
    let line = line.strip_suffix(';').unwrap_or(line).trim_end();
    if line.is_empty() {
        return Ok(None);
    }

    let (name, rest) = match line.find('(') {
        Some(i) => (line[..i].trim(), &line[i + 1..]),
        None => {
            let name = line.split_whitespace().next().unwrap_or(line);
            return Err(match mnemonic_arity(name) {
                Some(_) => SyntaxError::MissingOpenParen(name.to_string()),
                None => SyntaxError::UnknownMnemonic(name.to_string()),
            });
        }
    };
    let close = rest.find(')').ok_or(SyntaxError::MissingCloseParen)?;
    let trailing = rest[close + 1..].trim();
    if !trailing.is_empty() {
        return Err(SyntaxError::TrailingText(trailing.to_string()));
    }

    let inner = rest[..close].trim();
    let args: Vec<&str> = if inner.is_empty() {
        Vec::new()
    } else {
        inner.split(',').map(str::trim).collect()
    };

    let (mnemonic, expected) =
        mnemonic_arity(name).ok_or_else(|| SyntaxError::UnknownMnemonic(name.to_string()))?;
    if args.len() != expected {
        return Err(SyntaxError::Arity {
            mnemonic,
            expected,
            found: args.len(),
        });
    }

    let insn = match mnemonic {
        "ADJUST" => Instruction::Adjust {
            offset: offset(args[0])?,
            delta: byte(args[1])?,
        },
        "SELECT" => Instruction::Select(offset(args[0])?),
        "READ" => Instruction::Read(offset(args[0])?),
        "WRITE" => Instruction::Write(offset(args[0])?),
        "SET" => Instruction::Set {
            offset: offset(args[0])?,
            value: byte(args[1])?,
        },
        "MADD" => Instruction::MultiplyAdd {
            offset: offset(args[0])?,
            factor: byte(args[1])?,
        },
        "OPEN" => Instruction::Open,
        "CLOSE" => Instruction::Close,
        "SCAN_LEFT" => Instruction::ScanLeft,
        _ => Instruction::ScanRight,
    };
    Ok(Some(insn))
}

/// Render a program as a listing, indenting loop bodies four spaces per level.
///
/// Deltas and factors print as signed bytes, set values as unsigned, so the
/// output reads the way a generator would have written it and parses back to
/// the same program.
pub fn disassemble(program: &Program) -> String {
    let mut out = String::new();
    let mut level = 0usize;

    for insn in program.instructions() {
        if let Instruction::Close = insn {
            level = level.saturating_sub(1);
        }
        for _ in 0..level {
            out.push_str("    ");
        }
        out.push_str(insn.mnemonic());
        match *insn {
            Instruction::Adjust { offset, delta } => {
                out.push_str(&format!("({offset}, {})", delta as i8))
            }
            Instruction::Select(delta) => out.push_str(&format!("({delta})")),
            Instruction::Read(offset) | Instruction::Write(offset) => {
                out.push_str(&format!("({offset})"))
            }
            Instruction::Set { offset, value } => out.push_str(&format!("({offset}, {value})")),
            Instruction::MultiplyAdd { offset, factor } => {
                out.push_str(&format!("({offset}, {})", factor as i8))
            }
            Instruction::Open | Instruction::Close | Instruction::ScanLeft | Instruction::ScanRight => {
                out.push_str("()")
            }
        }
        out.push('\n');
        if let Instruction::Open = insn {
            level += 1;
        }
    }

    out
}

fn strip_comment(line: &str) -> &str {
    let cut = [line.find('#'), line.find("//")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(line.len());
    &line[..cut]
}

fn mnemonic_arity(name: &str) -> Option<(&'static str, usize)> {
    let entry = match name {
        "ADJUST" => ("ADJUST", 2),
        "SELECT" => ("SELECT", 1),
        "READ" => ("READ", 1),
        "WRITE" => ("WRITE", 1),
        "SET" => ("SET", 2),
        "MADD" => ("MADD", 2),
        "OPEN" => ("OPEN", 0),
        "CLOSE" => ("CLOSE", 0),
        "SCAN_LEFT" => ("SCAN_LEFT", 0),
        "SCAN_RIGHT" => ("SCAN_RIGHT", 0),
        _ => return None,
    };
    Some(entry)
}

fn integer(text: &str) -> Result<i64, SyntaxError> {
    text.parse::<i64>()
        .map_err(|_| SyntaxError::InvalidInteger(text.to_string()))
}

fn offset(text: &str) -> Result<isize, SyntaxError> {
    isize::try_from(integer(text)?).map_err(|_| SyntaxError::InvalidInteger(text.to_string()))
}

fn byte(text: &str) -> Result<u8, SyntaxError> {
    let value = integer(text)?;
    if !(-255..=255).contains(&value) {
        return Err(SyntaxError::ByteOutOfRange(value));
    }
    Ok(value.rem_euclid(256) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use Instruction::*;

    #[test]
    fn test_parse_move_loop() {
        let program = parse_listing(
            "SET(0, 5)\nOPEN()\n    ADJUST(1, 1)\n    ADJUST(0, -1)\nCLOSE()\nWRITE(1)\n",
        )
        .unwrap();
        assert_eq!(
            program.instructions(),
            &[
                Set { offset: 0, value: 5 },
                Open,
                Adjust { offset: 1, delta: 1 },
                Adjust { offset: 0, delta: 255 },
                Close,
                Write(1),
            ]
        );
    }

    #[test]
    fn test_parse_ignores_comments_blank_lines_and_semicolons() {
        let program = parse_listing(
            "# header\n\n  SELECT(-3);  // back up\nSCAN_RIGHT ( )\nMADD( 2 , -4 )\n",
        )
        .unwrap();
        assert_eq!(
            program.instructions(),
            &[Select(-3), ScanRight, MultiplyAdd { offset: 2, factor: 252 }]
        );
    }

    #[test]
    fn test_parse_all_mnemonics() {
        let program = parse_listing(
            "ADJUST(0, 3)\nSELECT(1)\nREAD(0)\nWRITE(-1)\nSET(2, 255)\nMADD(1, 2)\nOPEN()\nCLOSE()\nSCAN_LEFT()\nSCAN_RIGHT()",
        )
        .unwrap();
        assert_eq!(program.len(), 10);
        assert_eq!(program.get(3), Some(Write(-1)));
        assert_eq!(program.get(4), Some(Set { offset: 2, value: 255 }));
    }

    #[test]
    fn test_unknown_mnemonic() {
        let err = parse_listing("ADJUST(0, 1)\nJUMP(3)\n").unwrap_err();
        assert_eq!(
            err,
            ListingError::Syntax {
                line: 2,
                kind: SyntaxError::UnknownMnemonic("JUMP".into())
            }
        );
        assert_eq!(err.to_string(), "line 2: unknown instruction `JUMP`");
    }

    #[test]
    fn test_missing_parens() {
        assert_eq!(
            parse_line("OPEN").unwrap_err(),
            SyntaxError::MissingOpenParen("OPEN".into())
        );
        assert_eq!(parse_line("READ(0").unwrap_err(), SyntaxError::MissingCloseParen);
        assert_eq!(
            parse_line("READ(0) READ(1)").unwrap_err(),
            SyntaxError::TrailingText("READ(1)".into())
        );
    }

    #[test]
    fn test_arity() {
        assert_eq!(
            parse_line("ADJUST(1)").unwrap_err(),
            SyntaxError::Arity {
                mnemonic: "ADJUST",
                expected: 2,
                found: 1
            }
        );
        assert_eq!(
            parse_line("CLOSE(0)").unwrap_err(),
            SyntaxError::Arity {
                mnemonic: "CLOSE",
                expected: 0,
                found: 1
            }
        );
    }

    #[test]
    fn test_operand_errors() {
        assert_eq!(
            parse_line("SET(0, 256)").unwrap_err(),
            SyntaxError::ByteOutOfRange(256)
        );
        assert_eq!(
            parse_line("SELECT(x)").unwrap_err(),
            SyntaxError::InvalidInteger("x".into())
        );
        assert_eq!(parse_line("ADJUST(0, -255)").unwrap(), Some(Adjust { offset: 0, delta: 1 }));
    }

    #[test]
    fn test_unbalanced_loops_rejected() {
        let err = parse_listing("OPEN()\nSELECT(1)\n").unwrap_err();
        assert_eq!(err, ListingError::Structure(ProgramError::UnmatchedOpen(0)));
    }

    #[test]
    fn test_disassemble_indents_loops() {
        let program = Program::new(vec![
            Adjust { offset: 0, delta: 3 },
            Open,
            Select(1),
            Open,
            MultiplyAdd { offset: 1, factor: 255 },
            Close,
            Select(-1),
            Adjust { offset: 0, delta: 255 },
            Close,
            ScanLeft,
        ])
        .unwrap();

        let expected = [
            "ADJUST(0, 3)",
            "OPEN()",
            "    SELECT(1)",
            "    OPEN()",
            "        MADD(1, -1)",
            "    CLOSE()",
            "    SELECT(-1)",
            "    ADJUST(0, -1)",
            "CLOSE()",
            "SCAN_LEFT()",
        ]
        .iter()
        .fold(String::new(), |acc, line| acc + line + "\n");

        assert_eq!(disassemble(&program), expected);
    }
}
