use crate::jvm::code::opcodes::{
    branch_stack_delta, invert_condition, is_short_branch, is_terminator, wide_form, GOTO,
    GOTO_W, JSR, JSR_W, LOOKUPSWITCH, TABLESWITCH, WIDE,
};
use crate::jvm::code::relaxation::{relax, Layout, SIGNED_16BIT_JUMP_RANGE};
use crate::jvm::code::{Label, LabelGenerator};
use crate::jvm::{Error, IllegalState, StackSnapshot};
use byteorder::{BigEndian, WriteBytesExt};
use log::debug;
use std::collections::HashMap;
use std::ops::Range;

/// Longest method body the `Code` attribute can describe
pub const MAX_CODE_LENGTH: usize = 65535;

/// A switch is compiled to a `tableswitch` when its value range is at most this many times larger
/// than its number of entries (ie. at least 5% of the table is used)
pub const MAX_TABLE_SPREAD: i64 = 20;

/// How the stream folds stack deltas into its own max stack estimate
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum StackCalculation {
    /// Follow the running depth, which decreases on pops
    Optimistic,

    /// Only ever add the positive deltas, so the estimate never goes down
    #[default]
    Pessimistic,
}

/// Lifecycle of a method body
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamState {
    /// Accepting instructions
    Open,

    /// Resolving branch widths
    Relaxing,

    /// Dumped, immutable
    Closed,
}

/// How a switch should be encoded
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SwitchForm {
    /// `tableswitch` when dense enough, `lookupswitch` otherwise
    Auto,
    Table,
    Lookup,
}

/// Piece of code whose width is either fixed or depends only on where it starts
#[derive(Debug, Clone)]
pub enum Chunk {
    /// Straight-line instructions
    Code(Vec<u8>),

    /// Branch whose offset is resolved at layout time
    ///
    /// The opcode is always the short form (`goto`, `jsr`, or a condition). Once `wide` is set, it
    /// is encoded as `goto_w`/`jsr_w`, or as an inverted condition over a `goto_w`.
    Branch {
        opcode: u8,
        target: Label,
        wide: bool,
    },

    Switch {
        default: Label,
        table: SwitchTable,
    },
}

#[derive(Debug, Clone)]
pub enum SwitchTable {
    /// One target per value in `low..=low + targets.len() - 1`
    Table { low: i32, targets: Vec<Label> },

    /// Match values in increasing order
    Lookup { pairs: Vec<(i32, Label)> },
}

impl Chunk {
    /// Width in bytes of the chunk, if it starts at `pc`
    pub fn width_at(&self, pc: usize) -> usize {
        match self {
            Chunk::Code(bytes) => bytes.len(),
            Chunk::Branch { wide: false, .. } => 3,
            Chunk::Branch { opcode, wide: true, .. } => {
                if invert_condition(*opcode).is_some() {
                    8
                } else {
                    5
                }
            }
            Chunk::Switch { table, .. } => {
                let entries = match table {
                    SwitchTable::Table { targets, .. } => 12 + 4 * targets.len(),
                    SwitchTable::Lookup { pairs } => 8 + 8 * pairs.len(),
                };
                1 + switch_padding(pc) + entries
            }
        }
    }

    fn encode(
        &self,
        pc: usize,
        resolve: impl Fn(Label) -> Result<usize, Error>,
        code: &mut Vec<u8>,
    ) -> Result<(), Error> {
        let offset_to = |label: Label, from: usize| -> Result<i32, Error> {
            Ok((resolve(label)? as isize - from as isize) as i32)
        };

        match self {
            Chunk::Code(bytes) => code.extend_from_slice(bytes),
            Chunk::Branch {
                opcode,
                target,
                wide: false,
            } => {
                code.push(*opcode);
                code.write_i16::<BigEndian>(offset_to(*target, pc)? as i16)?;
            }
            Chunk::Branch {
                opcode,
                target,
                wide: true,
            } => match (wide_form(*opcode), invert_condition(*opcode)) {
                (Some(wide_opcode), _) => {
                    code.push(wide_opcode);
                    code.write_i32::<BigEndian>(offset_to(*target, pc)?)?;
                }
                (None, Some(inverted)) => {
                    code.push(inverted);
                    code.write_i16::<BigEndian>(8)?;
                    code.push(GOTO_W);
                    code.write_i32::<BigEndian>(offset_to(*target, pc + 3)?)?;
                }
                (None, None) => return Err(Error::UnexpectedOpcode(*opcode)),
            },
            Chunk::Switch { default, table } => {
                let opcode = match table {
                    SwitchTable::Table { .. } => TABLESWITCH,
                    SwitchTable::Lookup { .. } => LOOKUPSWITCH,
                };
                code.push(opcode);
                code.extend(std::iter::repeat(0).take(switch_padding(pc)));
                code.write_i32::<BigEndian>(offset_to(*default, pc)?)?;
                match table {
                    SwitchTable::Table { low, targets } => {
                        code.write_i32::<BigEndian>(*low)?;
                        code.write_i32::<BigEndian>(*low + targets.len() as i32 - 1)?;
                        for target in targets {
                            code.write_i32::<BigEndian>(offset_to(*target, pc)?)?;
                        }
                    }
                    SwitchTable::Lookup { pairs } => {
                        code.write_i32::<BigEndian>(pairs.len() as i32)?;
                        for (value, target) in pairs {
                            code.write_i32::<BigEndian>(*value)?;
                            code.write_i32::<BigEndian>(offset_to(*target, pc)?)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Zero bytes after a switch opcode at `pc`, so that its operands are 4-byte aligned
pub fn switch_padding(pc: usize) -> usize {
    (4 - (pc + 1) % 4) % 4
}

/// Location in the chunk list
///
/// Positions survive relaxation: the start of the chunk moves, but not the offset inside it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub chunk: usize,
    pub offset: usize,
}

/// Handle for a code position recorded with [`InstructionStream::mark`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Anchor(usize);

#[derive(Debug, Default)]
struct LabelState {
    declared: bool,
    position: Option<Position>,

    /// Stack expected at the label: from the first forward branch, then from placement
    snapshot: Option<StackSnapshot>,
}

/// Final code of a method, with every position resolved
#[derive(Debug)]
pub struct ResolvedCode {
    pub bytes: Vec<u8>,
    anchors: Vec<usize>,
    labels: HashMap<Label, usize>,

    /// Max stack as computed from the stack deltas
    pub max_stack_estimate: usize,
    pub relaxation_rounds: usize,
    pub widened_branches: usize,
}

impl ResolvedCode {
    pub fn anchor_pc(&self, anchor: Anchor) -> usize {
        self.anchors[anchor.0]
    }

    pub fn label_pc(&self, label: Label) -> Option<usize> {
        self.labels.get(&label).copied()
    }
}

/// Bytes, labels, and pending branches of one method body
///
/// Instructions are appended one at a time. Branches and switches are kept symbolic until
/// [`InstructionStream::finish`], which lays the code out, widens branches that don't fit in 16
/// bits, and only then writes out the bytes. Until then, [`InstructionStream::pc`] is provisional:
/// it assumes no branch will need widening.
///
/// The stream also enforces two control-flow rules. Code after an unconditional transfer is only
/// accepted after a label (otherwise it would be unreachable), and every path reaching a label
/// must agree on the shape of the stack.
#[derive(Debug)]
pub struct InstructionStream {
    state: StreamState,
    chunks: Vec<Chunk>,
    labels: HashMap<Label, LabelState>,
    anchors: Vec<Position>,
    next_fresh_label: Label,

    /// Provisional program counter
    pc: usize,

    /// Set after an unconditional transfer of control
    label_required: bool,

    stack_calculation: StackCalculation,
    estimated_depth: i32,
    estimated_max: i32,
}

impl InstructionStream {
    pub fn new(stack_calculation: StackCalculation) -> InstructionStream {
        InstructionStream {
            state: StreamState::Open,
            chunks: vec![],
            labels: HashMap::new(),
            anchors: vec![],
            next_fresh_label: Label(1 << 31),
            pc: 0,
            label_required: false,
            stack_calculation,
            estimated_depth: 0,
            estimated_max: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Provisional program counter of the next instruction
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Is the previous instruction an unconditional transfer of control?
    pub fn is_label_required(&self) -> bool {
        self.label_required
    }

    /// Fail unless an instruction can be appended now
    pub fn check_accepting(&self) -> Result<(), Error> {
        self.check_open()?;
        if self.label_required {
            return Err(Error::DeadCode { pc: self.pc });
        }
        Ok(())
    }

    /// Declare a label, so that it can later be placed
    pub fn declare_label(&mut self, label: Label) -> Result<(), Error> {
        self.check_open()?;
        let state = self.labels.entry(label).or_default();
        if state.declared {
            return Err(Error::DuplicateLabel(label));
        }
        state.declared = true;
        Ok(())
    }

    /// Record the current position
    pub fn mark(&mut self) -> Anchor {
        let anchor = Anchor(self.anchors.len());
        self.anchors.push(self.position());
        anchor
    }

    /// Append one instruction
    ///
    /// The first byte must be the opcode (or `wide`): it decides whether control can fall through
    /// to the next instruction. Branches and switches must go through [`Self::register_branch`]
    /// and [`Self::put_switch`] instead.
    pub fn put_command(&mut self, stack_delta: i32, bytes: &[u8]) -> Result<(), Error> {
        self.check_accepting()?;
        let opcode = match bytes {
            [] => return Err(Error::EmptyCommand { pc: self.pc }),
            [WIDE, opcode, ..] => *opcode,
            [opcode, ..] => *opcode,
        };

        match self.chunks.last_mut() {
            Some(Chunk::Code(code)) => code.extend_from_slice(bytes),
            _ => self.chunks.push(Chunk::Code(bytes.to_vec())),
        }
        self.pc += bytes.len();
        self.record_delta(stack_delta);
        if is_terminator(opcode) {
            self.label_required = true;
        }
        Ok(())
    }

    /// Bind a label to the current position
    ///
    /// `current` is the stack as the previous instruction left it, and is checked against the
    /// stack of any earlier forward branch to the label. After an unconditional transfer there is
    /// no previous instruction reaching the label, so the stack is instead taken from the forward
    /// branches. The stack in effect at the label is returned.
    pub fn put_label(
        &mut self,
        label: Label,
        current: StackSnapshot,
    ) -> Result<StackSnapshot, Error> {
        self.check_open()?;
        let position = self.position();
        let label_required = self.label_required;

        let state = match self.labels.get_mut(&label) {
            Some(state) if state.declared => state,
            _ => return Err(Error::UndeclaredLabel(label)),
        };
        if state.position.is_some() {
            return Err(Error::DuplicateLabel(label));
        }

        let snapshot = if label_required {
            state
                .snapshot
                .clone()
                .ok_or(Error::UnknownStackState(label))?
        } else {
            match &state.snapshot {
                Some(expected) if *expected != current => {
                    return Err(Error::IncompatibleFrames {
                        label,
                        expected: expected.clone(),
                        found: current,
                    })
                }
                _ => current,
            }
        };

        state.position = Some(position);
        state.snapshot = Some(snapshot.clone());
        self.label_required = false;
        self.estimated_depth = snapshot.depth() as i32;
        self.estimated_max = self.estimated_max.max(self.estimated_depth);
        Ok(snapshot)
    }

    /// Append a branch to a label
    ///
    /// The label may be placed before or after the branch, and may even be declared later.
    /// `snapshot` is the stack the branch leaves behind. Backward branches are checked against the
    /// stack at the label right away, forward branches against each other and later against the
    /// label. With `is_short_form` unset, the branch starts out wide.
    pub fn register_branch(
        &mut self,
        opcode: u8,
        label: Label,
        is_short_form: bool,
        snapshot: StackSnapshot,
    ) -> Result<(), Error> {
        self.check_accepting()?;
        let (opcode, wide) = match opcode {
            GOTO_W => (GOTO, true),
            JSR_W => (JSR, true),
            _ if is_short_branch(opcode) => (opcode, !is_short_form),
            _ => return Err(Error::UnexpectedOpcode(opcode)),
        };
        self.check_target(label, &snapshot)?;

        let chunk = Chunk::Branch {
            opcode,
            target: label,
            wide,
        };
        self.pc += chunk.width_at(self.pc);
        self.chunks.push(chunk);
        self.record_delta(branch_stack_delta(opcode));
        if opcode == GOTO {
            self.label_required = true;
        }
        Ok(())
    }

    /// Append a `tableswitch` or `lookupswitch`
    ///
    /// Values missing from a table's range jump to `default`. `snapshot` is the stack after the
    /// key has been popped.
    pub fn put_switch(
        &mut self,
        form: SwitchForm,
        pairs: &[(i32, Label)],
        default: Label,
        snapshot: StackSnapshot,
    ) -> Result<(), Error> {
        self.check_accepting()?;

        let mut pairs = pairs.to_vec();
        pairs.sort_by_key(|(value, _)| *value);
        if let Some(window) = pairs.windows(2).find(|window| window[0].0 == window[1].0) {
            return Err(Error::DuplicateSwitchValue(window[0].0));
        }

        let bounds = pairs.first().zip(pairs.last()).map(|(first, last)| (first.0, last.0));
        let table = match (form, bounds) {
            (SwitchForm::Table, None) => return Err(Error::EmptyTableSwitch),
            (SwitchForm::Table, Some((low, high))) => {
                if !is_dense(low, high, pairs.len()) {
                    return Err(Error::SparseTableSwitch {
                        low,
                        high,
                        count: pairs.len(),
                    });
                }
                table_of(&pairs, low, high, default)
            }
            (SwitchForm::Auto, Some((low, high))) if is_dense(low, high, pairs.len()) => {
                table_of(&pairs, low, high, default)
            }
            _ => SwitchTable::Lookup { pairs },
        };

        self.check_target(default, &snapshot)?;
        match &table {
            SwitchTable::Table { targets, .. } => {
                for target in targets {
                    self.check_target(*target, &snapshot)?;
                }
            }
            SwitchTable::Lookup { pairs } => {
                for (_, target) in pairs {
                    self.check_target(*target, &snapshot)?;
                }
            }
        }

        let chunk = Chunk::Switch { default, table };
        self.pc += chunk.width_at(self.pc);
        self.chunks.push(chunk);
        self.record_delta(-1);
        self.label_required = true;
        Ok(())
    }

    /// Check that a handler can start at the current position
    ///
    /// The stack at a handler holds only the caught exception, which the stack of a path falling
    /// into it from the previous instruction does not match. So the previous instruction must be an
    /// unconditional transfer.
    pub fn check_handler_entry(&self) -> Result<(), Error> {
        self.check_open()?;
        if !self.label_required {
            return Err(Error::FallThroughIntoHandler { pc: self.pc });
        }
        Ok(())
    }

    /// Continue at an exception handler
    ///
    /// Handlers are reached through the exception table rather than through a branch, so they
    /// follow an unconditional transfer. The stack holds only the caught exception.
    pub fn enter_handler(&mut self) -> Result<(), Error> {
        self.check_handler_entry()?;
        self.label_required = false;
        self.estimated_depth = 1;
        self.estimated_max = self.estimated_max.max(1);
        Ok(())
    }

    /// Lay out the code and produce its bytes
    pub fn finish(&mut self) -> Result<ResolvedCode, Error> {
        self.finish_with_jump_range(SIGNED_16BIT_JUMP_RANGE)
    }

    /// Same as [`Self::finish`], with a custom range for short branch offsets
    ///
    /// The `small_jump_range` parameter should always be `SIGNED_16BIT_JUMP_RANGE` - it is a
    /// parameter only for testing purposes.
    pub fn finish_with_jump_range(
        &mut self,
        small_jump_range: Range<isize>,
    ) -> Result<ResolvedCode, Error> {
        self.check_open()?;
        self.state = StreamState::Relaxing;
        let result = self.resolve(small_jump_range);
        self.state = StreamState::Closed;
        result
    }

    fn resolve(&mut self, small_jump_range: Range<isize>) -> Result<ResolvedCode, Error> {
        let mut unresolved: Vec<Label> = self
            .labels
            .iter()
            .filter(|(_, state)| !state.declared || state.position.is_none())
            .map(|(label, _)| *label)
            .collect();
        if !unresolved.is_empty() {
            unresolved.sort();
            return Err(Error::UnresolvedLabels(unresolved));
        }

        let positions: HashMap<Label, Position> = self
            .labels
            .iter()
            .filter_map(|(label, state)| state.position.map(|position| (*label, position)))
            .collect();
        let layout = relax(&mut self.chunks, &positions, small_jump_range)?;
        if layout.code_length() > MAX_CODE_LENGTH {
            return Err(Error::MethodCodeOverflow(layout.code_length()));
        }

        let bytes = self.encode(&layout, &positions)?;
        let labels = positions
            .iter()
            .map(|(label, position)| (*label, layout.pc_of(*position)))
            .collect();
        let anchors = self
            .anchors
            .iter()
            .map(|position| layout.pc_of(*position))
            .collect();

        debug!(
            "laid out {} bytes of code in {} rounds ({} branches widened)",
            bytes.len(),
            layout.rounds,
            layout.widened
        );
        Ok(ResolvedCode {
            bytes,
            anchors,
            labels,
            max_stack_estimate: self.estimated_max.max(0) as usize,
            relaxation_rounds: layout.rounds,
            widened_branches: layout.widened,
        })
    }

    fn encode(
        &self,
        layout: &Layout,
        positions: &HashMap<Label, Position>,
    ) -> Result<Vec<u8>, Error> {
        let resolve = |label: Label| -> Result<usize, Error> {
            positions
                .get(&label)
                .map(|position| layout.pc_of(*position))
                .ok_or_else(|| Error::UnresolvedLabels(vec![label]))
        };

        let mut code = Vec::with_capacity(layout.code_length());
        for (index, chunk) in self.chunks.iter().enumerate() {
            chunk.encode(layout.chunk_start(index), &resolve, &mut code)?;
        }
        Ok(code)
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.state == StreamState::Open {
            Ok(())
        } else {
            Err(Error::IllegalState(IllegalState::StreamClosed))
        }
    }

    /// Check the stack carried by a branch against the stack expected at its target
    fn check_target(&mut self, label: Label, snapshot: &StackSnapshot) -> Result<(), Error> {
        let state = self.labels.entry(label).or_default();
        match &state.snapshot {
            Some(expected) if expected != snapshot => Err(Error::IncompatibleFrames {
                label,
                expected: expected.clone(),
                found: snapshot.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                state.snapshot = Some(snapshot.clone());
                Ok(())
            }
        }
    }

    fn position(&self) -> Position {
        match self.chunks.last() {
            Some(Chunk::Code(code)) => Position {
                chunk: self.chunks.len() - 1,
                offset: code.len(),
            },
            _ => Position {
                chunk: self.chunks.len(),
                offset: 0,
            },
        }
    }

    fn record_delta(&mut self, stack_delta: i32) {
        match self.stack_calculation {
            StackCalculation::Optimistic => self.estimated_depth += stack_delta,
            StackCalculation::Pessimistic if stack_delta > 0 => {
                self.estimated_depth += stack_delta
            }
            StackCalculation::Pessimistic => (),
        }
        self.estimated_max = self.estimated_max.max(self.estimated_depth);
    }
}

impl LabelGenerator for InstructionStream {
    /// Declare a label no one else uses
    fn fresh_label(&mut self) -> Label {
        while self.labels.contains_key(&self.next_fresh_label) {
            self.next_fresh_label = self.next_fresh_label.next();
        }
        let label = self.next_fresh_label;
        self.next_fresh_label = label.next();
        self.labels.insert(
            label,
            LabelState {
                declared: true,
                ..LabelState::default()
            },
        );
        label
    }
}

fn is_dense(low: i32, high: i32, count: usize) -> bool {
    (high as i64 - low as i64) / count as i64 <= MAX_TABLE_SPREAD
}

fn table_of(pairs: &[(i32, Label)], low: i32, high: i32, default: Label) -> SwitchTable {
    let mut targets = vec![default; (high as i64 - low as i64 + 1) as usize];
    for (value, target) in pairs {
        targets[(*value as i64 - low as i64) as usize] = *target;
    }
    SwitchTable::Table { low, targets }
}
