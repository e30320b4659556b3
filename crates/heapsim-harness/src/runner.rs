//! Line-based scenario scripts.
//!
//! A script drives one arena, one operation per line:
//!
//! ```text
//! # comments and blank lines are skipped
//! malloc 24
//! malloc 2000
//! free 0          # frees the pointer returned by the first malloc
//! free null       # exercises the null-release error path
//! consolidate
//! ```
//!
//! Slots number the `malloc` lines in order; `free <slot>` may name any
//! earlier slot, including one already freed (the double-free error path is
//! part of what the simulator demonstrates).

use thiserror::Error;

use heapsim_core::Arena;

/// One scripted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Malloc { bytes: usize },
    Free { slot: usize },
    FreeNull,
    Consolidate,
}

/// Script parse failure, with the 1-based line number.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("line {line}: unknown command `{word}`")]
    UnknownCommand { line: usize, word: String },
    #[error("line {line}: `{cmd}` needs an argument")]
    MissingArgument { line: usize, cmd: &'static str },
    #[error("line {line}: invalid number `{raw}`")]
    BadNumber { line: usize, raw: String },
    #[error("line {line}: slot {slot} has not been allocated yet")]
    UnknownSlot { line: usize, slot: usize },
}

/// Parses a scenario script into operations.
pub fn parse_script(text: &str) -> Result<Vec<Op>, ScriptError> {
    let mut ops = Vec::new();
    let mut slots = 0usize;
    for (idx, raw_line) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw_line.split('#').next().unwrap_or("").trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut words = trimmed.split_whitespace();
        let cmd = words.next().unwrap_or("");
        match cmd {
            "malloc" => {
                let raw = words.next().ok_or(ScriptError::MissingArgument {
                    line,
                    cmd: "malloc",
                })?;
                let bytes = raw.parse().map_err(|_| ScriptError::BadNumber {
                    line,
                    raw: raw.to_string(),
                })?;
                ops.push(Op::Malloc { bytes });
                slots += 1;
            }
            "free" => {
                let raw = words.next().ok_or(ScriptError::MissingArgument {
                    line,
                    cmd: "free",
                })?;
                if raw == "null" {
                    ops.push(Op::FreeNull);
                } else {
                    let slot: usize = raw.parse().map_err(|_| ScriptError::BadNumber {
                        line,
                        raw: raw.to_string(),
                    })?;
                    if slot >= slots {
                        return Err(ScriptError::UnknownSlot { line, slot });
                    }
                    ops.push(Op::Free { slot });
                }
            }
            "consolidate" => ops.push(Op::Consolidate),
            other => {
                return Err(ScriptError::UnknownCommand {
                    line,
                    word: other.to_string(),
                })
            }
        }
    }
    Ok(ops)
}

/// Applies one operation, recording malloc results in `slots`.
pub fn apply_op(arena: &mut Arena, slots: &mut Vec<Option<usize>>, op: Op) {
    match op {
        Op::Malloc { bytes } => slots.push(arena.allocate(bytes)),
        Op::Free { slot } => {
            if let Some(Some(ptr)) = slots.get(slot) {
                arena.release(*ptr);
            }
        }
        Op::FreeNull => arena.release(0),
        Op::Consolidate => arena.consolidate(),
    }
}

/// Applies operations to an arena, returning the pointer per malloc slot.
pub fn run_ops(arena: &mut Arena, ops: &[Op]) -> Vec<Option<usize>> {
    let mut slots: Vec<Option<usize>> = Vec::new();
    for op in ops {
        apply_op(arena, &mut slots, *op);
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapsim_core::Event;

    #[test]
    fn test_parse_full_script() {
        let ops = parse_script(
            "# demo\n\
             malloc 24\n\
             malloc 2000   # big one\n\
             free 0\n\
             free null\n\
             consolidate\n",
        )
        .unwrap();
        assert_eq!(
            ops,
            vec![
                Op::Malloc { bytes: 24 },
                Op::Malloc { bytes: 2000 },
                Op::Free { slot: 0 },
                Op::FreeNull,
                Op::Consolidate,
            ]
        );
    }

    #[test]
    fn test_parse_rejects_unknown_command() {
        let err = parse_script("malloc 24\nrealloc 0 16\n").unwrap_err();
        assert!(matches!(err, ScriptError::UnknownCommand { line: 2, .. }));
    }

    #[test]
    fn test_parse_rejects_forward_slot() {
        let err = parse_script("free 0\n").unwrap_err();
        assert!(matches!(err, ScriptError::UnknownSlot { line: 1, slot: 0 }));
    }

    #[test]
    fn test_parse_rejects_bad_number() {
        let err = parse_script("malloc lots\n").unwrap_err();
        assert!(matches!(err, ScriptError::BadNumber { line: 1, .. }));
        let err = parse_script("malloc\n").unwrap_err();
        assert!(matches!(err, ScriptError::MissingArgument { line: 1, .. }));
    }

    #[test]
    fn test_error_messages_carry_line_numbers() {
        let err = parse_script("malloc 24\nfree 7\n").unwrap_err();
        assert_eq!(err.to_string(), "line 2: slot 7 has not been allocated yet");
    }

    #[test]
    fn test_run_ops_tracks_slots() {
        let mut arena = Arena::new(32768);
        let ops = parse_script("malloc 24\nmalloc 100\nfree 0\nmalloc 24\n").unwrap();
        let slots = run_ops(&mut arena, &ops);
        assert_eq!(slots.len(), 3);
        // Slot 2 reuses slot 0's chunk via the tcache.
        assert_eq!(slots[2], slots[0]);
    }

    #[test]
    fn test_run_ops_double_free_records_error() {
        let mut arena = Arena::new(32768);
        let ops = parse_script("malloc 24\nfree 0\nfree 0\n").unwrap();
        run_ops(&mut arena, &ops);
        assert!(arena
            .events()
            .iter()
            .any(|ev| matches!(ev, Event::Error { .. })));
    }
}
