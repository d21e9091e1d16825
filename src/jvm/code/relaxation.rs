//! This module is responsible for fixing branches that require bigger relative offsets than the
//! short branch instructions support. Every branch starts out in its 3-byte form, and is switched
//! to a 32-bit offset form once its offset no longer fits in a signed 16-bit integer.
//!
//! ### Termination
//!
//! Widening a branch makes it longer, which pushes everything after it further away and may in
//! turn make other branches oversized. The process still finishes, because the set of widened
//! branches only ever grows: a widened branch has a 32-bit offset, which is enough for any method
//! body, so it is never considered again. Once a round widens nothing, the layout is final.
//!
//! Switch instructions need no widening (their offsets are always 32-bit) but their padding
//! depends on where they start, so it is recomputed from the current layout in every round.
//!
//! ### Rewriting
//!
//! `goto` and `jsr` have direct wide counterparts:
//!
//! ```text,ignore,no_run
//!     goto L2               goto_w L2
//! L1: ...         =>    L1: ...
//! ```
//!
//! Conditional branches have no wide form, so the condition is inverted to jump over a `goto_w`:
//!
//! ```text,ignore,no_run
//!                           ifnot* L1
//!     if* L2                goto_w L2
//! L1: ...         =>    L1: ...
//! ```
//!
//! The inverted branch always jumps exactly 8 bytes forward, to the instruction after the
//! `goto_w`.

use crate::jvm::code::stream::{Chunk, Position};
use crate::jvm::code::Label;
use crate::jvm::Error;
use log::trace;
use std::collections::HashMap;
use std::ops::Range;

/// Range of relative jump offsets supported by `goto` and `if*` branch instructions
pub const SIGNED_16BIT_JUMP_RANGE: Range<isize> = Range {
    start: i16::MIN as isize,
    end: i16::MAX as isize + 1,
};

/// Final placement of every chunk
#[derive(Debug)]
pub struct Layout {
    /// Start of every chunk, followed by the total code length
    starts: Vec<usize>,

    /// Number of layout passes made (at least one)
    pub rounds: usize,

    /// Number of branches switched to their wide form
    pub widened: usize,
}

impl Layout {
    /// Final program counter of a position
    pub fn pc_of(&self, position: Position) -> usize {
        self.starts[position.chunk] + position.offset
    }

    /// Start of the chunk at the given index
    pub fn chunk_start(&self, chunk: usize) -> usize {
        self.starts[chunk]
    }

    pub fn code_length(&self) -> usize {
        self.starts.last().copied().unwrap_or(0)
    }
}

/// Widen oversized branches until every branch fits its encoding
///
/// The `small_jump_range` parameter should always be `SIGNED_16BIT_JUMP_RANGE` - it is a
/// parameter only for testing purposes.
pub fn relax(
    chunks: &mut [Chunk],
    labels: &HashMap<Label, Position>,
    small_jump_range: Range<isize>,
) -> Result<Layout, Error> {
    let mut rounds = 0;
    let mut widened = 0;

    loop {
        rounds += 1;
        let starts = chunk_starts(chunks);
        let mut changed = false;

        for (index, chunk) in chunks.iter_mut().enumerate() {
            if let Chunk::Branch {
                opcode,
                target,
                wide: wide @ false,
            } = chunk
            {
                let position = labels
                    .get(target)
                    .ok_or_else(|| Error::UnresolvedLabels(vec![*target]))?;
                let target_pc = starts[position.chunk] + position.offset;
                let offset = target_pc as isize - starts[index] as isize;
                if !small_jump_range.contains(&offset) {
                    trace!(
                        "widening branch 0x{:02x} at {} to {:?} (offset {})",
                        opcode,
                        starts[index],
                        target,
                        offset
                    );
                    *wide = true;
                    changed = true;
                    widened += 1;
                }
            }
        }

        if !changed {
            return Ok(Layout {
                starts,
                rounds,
                widened,
            });
        }
    }
}

fn chunk_starts(chunks: &[Chunk]) -> Vec<usize> {
    let mut starts = Vec::with_capacity(chunks.len() + 1);
    let mut pc = 0;
    for chunk in chunks {
        starts.push(pc);
        pc += chunk.width_at(pc);
    }
    starts.push(pc);
    starts
}
