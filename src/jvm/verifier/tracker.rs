use crate::jvm::verifier::{DupKind, Operand, Receiver, SlotType, StackEffect, StackSnapshot};
use crate::jvm::{Error, FieldType, IllegalState, SymbolId, VerifierErrorKind};
use crate::util::{Offset, OffsetResult, OffsetVec, Width};

/// Local variable tracked by the verifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Var {
    pub slot_type: SlotType,

    /// Position at which the variable was declared
    pub pc: usize,

    /// Is this the implicit `this` parameter?
    pub is_this: bool,

    /// Has a value been stored in the variable (parameters hold one on entry)?
    pub assigned: bool,

    /// Position of the first load emitted while the variable was still unassigned
    pub read_before_store: Option<usize>,
}

impl Width for Var {
    fn width(&self) -> usize {
        self.slot_type.width()
    }
}

/// Value copy of every open variable scope
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VarSnapshot {
    frames: Vec<OffsetVec<Var>>,
}

impl VarSnapshot {
    /// Number of variable slots in use
    pub fn len(&self) -> usize {
        self.frames.last().map_or(0, |frame| frame.offset_len().0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Type of every slot, with `Top` filling the upper half of wide variables
    pub fn slots(&self) -> Vec<SlotType> {
        let mut slots = Vec::with_capacity(self.len());
        for frame in &self.frames {
            for (_, _, var) in frame {
                slots.push(var.slot_type);
                if var.slot_type.is_wide() {
                    slots.push(SlotType::Top);
                }
            }
        }
        slots
    }
}

/// Abstract interpreter for the operand stack and local variables of one method
///
/// Every instruction appended to a method is first run through the tracker, which checks that the
/// instruction's operands are present and well-typed and then applies its effect. Checks are done
/// before anything is modified, so a failed instruction leaves the tracker untouched.
///
/// Wide values are stored flat: a `long` is a `Long` slot followed by a `Top` slot. No effect is
/// allowed to separate the two.
///
/// Local variables live in nested scopes. Each scope is an [`OffsetVec`] starting where its parent
/// ended, so variable indices are global across the open scopes.
#[derive(Debug, Default)]
pub struct StackTracker {
    stack: Vec<SlotType>,
    max_stack: usize,
    frames: Vec<OffsetVec<Var>>,
    max_vars: usize,
}

impl StackTracker {
    pub fn new() -> StackTracker {
        StackTracker::default()
    }

    /// Check and apply the effect of an instruction at `pc`
    pub fn process_changes(&mut self, pc: usize, effect: &StackEffect) -> Result<(), Error> {
        self.apply(effect).map_err(|kind| Error::Verifier { pc, kind })
    }

    /// Type at an offset from the top of the stack (0 is the top)
    pub fn select_stack_item_type(
        &self,
        offset_from_top: usize,
    ) -> Result<SlotType, VerifierErrorKind> {
        self.require_depth(offset_from_top + 1)?;
        Ok(self.select(offset_from_top))
    }

    pub fn current_stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn max_stack_depth(&self) -> usize {
        self.max_stack
    }

    pub fn make_stack_snapshot(&self) -> StackSnapshot {
        StackSnapshot(self.stack.clone())
    }

    pub fn load_stack_snapshot(&mut self, snapshot: &StackSnapshot) {
        self.stack.clone_from(&snapshot.0);
        self.max_stack = self.max_stack.max(self.stack.len());
    }

    /// Go back to an earlier stack, forgetting the maximum depth reached since
    pub fn rewind_stack(&mut self, snapshot: &StackSnapshot, max_stack: usize) {
        self.stack.clone_from(&snapshot.0);
        self.max_stack = max_stack;
    }

    /// Handler entry state: nothing but the caught exception on the stack
    pub fn prepare_catch(&mut self, caught: SymbolId) {
        self.stack.clear();
        self.push_unchecked(SlotType::Reference(Some(caught)));
    }

    /// Open a nested variable scope
    pub fn push_var_frame(&mut self) {
        let start = Offset(self.var_slot_count());
        self.frames.push(OffsetVec::new_starting_at(start));
    }

    /// Close the innermost variable scope, returning its variables
    ///
    /// Fails when one of the variables was loaded but never stored anywhere in the scope, since
    /// no path through the code gives it a value.
    pub fn pop_var_frame(&mut self) -> Result<OffsetVec<Var>, Error> {
        let frame = self
            .frames
            .pop()
            .ok_or(Error::IllegalState(IllegalState::VarFrameUnderflow))?;
        for (Offset(index), _, var) in &frame {
            if let (false, Some(pc)) = (var.assigned, var.read_before_store) {
                return Err(Error::Verifier {
                    pc,
                    kind: VerifierErrorKind::UnassignedVariable(index),
                });
            }
        }
        Ok(frame)
    }

    /// Number of open variable scopes
    pub fn var_frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Declare a variable in the innermost scope, returning its index
    pub fn add_var(
        &mut self,
        slot_type: SlotType,
        pc: usize,
        is_this: bool,
    ) -> Result<usize, Error> {
        if slot_type == SlotType::Top {
            return Err(Error::Verifier {
                pc,
                kind: VerifierErrorKind::InvalidPush(slot_type),
            });
        }
        let frame = self
            .frames
            .last_mut()
            .ok_or(Error::IllegalState(IllegalState::VarFrameUnderflow))?;
        let Offset(index) = frame.push(Var {
            slot_type,
            pc,
            is_this,
            assigned: is_this,
            read_before_store: None,
        });
        self.max_vars = self.max_vars.max(frame.offset_len().0);
        Ok(index)
    }

    /// Type of the variable slot at a global index
    ///
    /// The upper half of a wide variable reads as `Top`.
    pub fn get_var_type(&self, index: usize) -> Result<SlotType, VerifierErrorKind> {
        for frame in self.frames.iter().rev() {
            match frame.get_offset(Offset(index)) {
                OffsetResult::Ok(var) => return Ok(var.slot_type),
                OffsetResult::InsideOf(_) => return Ok(SlotType::Top),
                OffsetResult::TooSmall => continue,
                OffsetResult::TooLarge => break,
            }
        }
        Err(VerifierErrorKind::InvalidVarIndex(index))
    }

    /// Number of variable slots in the open scopes
    pub fn var_slot_count(&self) -> usize {
        self.frames.last().map_or(0, |frame| frame.offset_len().0)
    }

    pub fn max_var_slot_count(&self) -> usize {
        self.max_vars
    }

    pub fn make_var_snapshot(&self) -> VarSnapshot {
        VarSnapshot {
            frames: self.frames.clone(),
        }
    }

    pub fn load_var_snapshot(&mut self, snapshot: &VarSnapshot) {
        self.frames.clone_from(&snapshot.frames);
        self.max_vars = self.max_vars.max(self.var_slot_count());
    }

    /// Mark a variable as holding a value, as parameters do on entry
    pub fn assign_var(&mut self, index: usize) {
        if let Some(var) = self.var_mut(index) {
            var.assigned = true;
        }
    }

    /// `iload`, `aload`, etc.
    pub fn load_var(&mut self, pc: usize, index: usize, expected: Operand) -> Result<(), Error> {
        let wrap = |kind| Error::Verifier { pc, kind };
        let found = self.typed_var(index, expected).map_err(wrap)?;
        self.note_read(pc, index);
        self.push_unchecked(found);
        Ok(())
    }

    /// `istore`, `astore`, etc.
    ///
    /// Variables keep their declared type, except that `astore` of a return address or of an
    /// uninitialized value retypes the variable.
    pub fn store_var(&mut self, pc: usize, index: usize, expected: Operand) -> Result<(), Error> {
        let wrap = |kind| Error::Verifier { pc, kind };
        let declared = self.typed_var(index, expected).map_err(wrap)?;
        let width = self.check_value(0, expected).map_err(wrap)?;
        let value = self.select(width - 1);
        self.pop_slots(width);

        let keeps_declared = matches!(value, SlotType::Reference(_) | SlotType::Null)
            && matches!(declared, SlotType::Reference(_));
        if !keeps_declared && value != declared {
            self.retype_var(index, value);
        }
        self.assign_var(index);
        Ok(())
    }

    /// `iinc`
    pub fn increment_var(&mut self, pc: usize, index: usize) -> Result<(), Error> {
        self.typed_var(index, Operand::Int)
            .map_err(|kind| Error::Verifier { pc, kind })?;
        self.note_read(pc, index);
        Ok(())
    }

    fn note_read(&mut self, pc: usize, index: usize) {
        if let Some(var) = self.var_mut(index) {
            if !var.assigned && var.read_before_store.is_none() {
                var.read_before_store = Some(pc);
            }
        }
    }

    fn typed_var(&self, index: usize, expected: Operand) -> Result<SlotType, VerifierErrorKind> {
        let found = self.get_var_type(index)?;
        if found.satisfies(expected) {
            Ok(found)
        } else {
            Err(VerifierErrorKind::InvalidVarType {
                index,
                expected,
                found,
            })
        }
    }

    fn retype_var(&mut self, index: usize, slot_type: SlotType) {
        if let Some(var) = self.var_mut(index) {
            var.slot_type = slot_type;
        }
    }

    fn var_mut(&mut self, index: usize) -> Option<&mut Var> {
        self.frames
            .iter_mut()
            .rev()
            .find_map(|frame| frame.get_offset_mut(Offset(index)))
    }

    fn apply(&mut self, effect: &StackEffect) -> Result<(), VerifierErrorKind> {
        match effect {
            StackEffect::None => (),
            StackEffect::Push(slot_type) => {
                let slot_type = pushable(*slot_type)?;
                self.push_unchecked(slot_type);
            }
            StackEffect::PushNull => self.push_unchecked(SlotType::Null),
            StackEffect::Pop(count) => {
                self.require_depth(*count)?;
                if *count > 0 && self.select(count - 1) == SlotType::Top {
                    return Err(VerifierErrorKind::WideValueSplit);
                }
                self.pop_slots(*count);
            }
            StackEffect::Dup(kind) => self.dup(*kind)?,
            StackEffect::Swap => {
                self.require_depth(2)?;
                if self.select(0) == SlotType::Top || self.select(1) == SlotType::Top {
                    return Err(VerifierErrorKind::WideValueSplit);
                }
                let len = self.stack.len();
                self.stack.swap(len - 1, len - 2);
            }
            StackEffect::Convert { from, to } => {
                let to = pushable(*to)?;
                let width = self.check_value(0, *from)?;
                self.pop_slots(width);
                self.push_unchecked(to);
            }
            StackEffect::Operate { operands, result } => {
                let result = result.map(pushable).transpose()?;
                let width = self.check_values(operands.iter().copied())?;
                self.pop_slots(width);
                if let Some(result) = result {
                    self.push_unchecked(result);
                }
            }
            StackEffect::PushField(field_type) => {
                self.check_value(0, Operand::Reference)?;
                self.pop_slots(1);
                self.push_unchecked(field_type.slot_type());
            }
            StackEffect::PopField(field_type) => {
                let width = self.check_value(0, field_type.operand())?;
                self.check_value(width, Operand::Reference)?;
                self.pop_slots(width + 1);
            }
            StackEffect::PushStatic(field_type) => self.push_unchecked(field_type.slot_type()),
            StackEffect::PopStatic(field_type) => {
                let width = self.check_value(0, field_type.operand())?;
                self.pop_slots(width);
            }
            StackEffect::Call {
                parameters,
                return_type,
                receiver,
            } => self.call(parameters, return_type.as_ref(), *receiver)?,
            StackEffect::MultiArray { dimensions, class } => {
                if *dimensions == 0 {
                    return Err(VerifierErrorKind::InvalidDimensions(*dimensions));
                }
                let count = *dimensions as usize;
                let width = self.check_values(vec![Operand::Int; count].into_iter())?;
                self.pop_slots(width);
                self.push_unchecked(SlotType::Reference(Some(*class)));
            }
            StackEffect::ChangeType(class) => {
                self.check_value(0, Operand::Reference)?;
                self.pop_slots(1);
                self.push_unchecked(SlotType::Reference(Some(*class)));
            }
            StackEffect::Clear => self.stack.clear(),
        }
        Ok(())
    }

    fn dup(&mut self, kind: DupKind) -> Result<(), VerifierErrorKind> {
        let copied = kind.copied();
        let skipped = kind.skipped();
        self.require_depth(copied + skipped)?;

        // The copied block and the skipped block must both start on a value boundary
        if self.select(copied - 1) == SlotType::Top
            || self.select(copied + skipped - 1) == SlotType::Top
        {
            return Err(VerifierErrorKind::WideValueSplit);
        }

        let len = self.stack.len();
        let copy: Vec<SlotType> = self.stack[len - copied..].to_vec();
        let insert_at = len - copied - skipped;
        self.stack.splice(insert_at..insert_at, copy);
        self.max_stack = self.max_stack.max(self.stack.len());
        Ok(())
    }

    fn call(
        &mut self,
        parameters: &[FieldType],
        return_type: Option<&FieldType>,
        receiver: Receiver,
    ) -> Result<(), VerifierErrorKind> {
        let width = self.check_values(parameters.iter().map(FieldType::operand))?;
        match receiver {
            Receiver::Static => self.pop_slots(width),
            Receiver::Instance => {
                self.require_depth(width + 1)?;
                let found = self.select(width);
                if !matches!(found, SlotType::Reference(_) | SlotType::Null) {
                    return Err(VerifierErrorKind::UnexpectedReceiver(found));
                }
                self.pop_slots(width + 1);
            }
            Receiver::Constructor => {
                self.require_depth(width + 1)?;
                let found = self.select(width);
                let initialized = match found {
                    SlotType::Uninitialized(class) | SlotType::UninitializedThis(class) => {
                        SlotType::Reference(Some(class))
                    }
                    other => return Err(VerifierErrorKind::UnexpectedReceiver(other)),
                };
                self.pop_slots(width + 1);
                self.replace_everywhere(found, initialized);
            }
        }
        if let Some(return_type) = return_type {
            self.push_unchecked(return_type.slot_type());
        }
        Ok(())
    }

    /// Once a constructor returns, every copy of the uninitialized value is initialized
    fn replace_everywhere(&mut self, from: SlotType, to: SlotType) {
        for slot in self.stack.iter_mut().filter(|slot| **slot == from) {
            *slot = to;
        }
        for frame in &mut self.frames {
            for (_, var) in frame.iter_mut() {
                if var.slot_type == from {
                    var.slot_type = to;
                }
            }
        }
    }

    /// Check a value of the given type sits `offset` slots under the top, returning its width
    fn check_value(&self, offset: usize, expected: Operand) -> Result<usize, VerifierErrorKind> {
        let width = expected.width();
        self.require_depth(offset + width)?;

        let upper = self.select(offset);
        if width == 2 && upper != SlotType::Top {
            return Err(VerifierErrorKind::InvalidType {
                offset,
                expected,
                found: upper,
            });
        }
        if width == 1 && upper == SlotType::Top {
            return Err(VerifierErrorKind::InvalidType {
                offset,
                expected,
                found: self.select(offset + 1),
            });
        }

        let value_offset = offset + width - 1;
        let found = self.select(value_offset);
        if !found.satisfies(expected) {
            return Err(VerifierErrorKind::InvalidType {
                offset: value_offset,
                expected,
                found,
            });
        }
        Ok(width)
    }

    /// Check operands (given in push order), returning their total width
    fn check_values(
        &self,
        operands: impl DoubleEndedIterator<Item = Operand>,
    ) -> Result<usize, VerifierErrorKind> {
        let mut offset = 0;
        for operand in operands.rev() {
            offset += self.check_value(offset, operand)?;
        }
        Ok(offset)
    }

    fn require_depth(&self, needed: usize) -> Result<(), VerifierErrorKind> {
        let depth = self.stack.len();
        if depth < needed {
            Err(VerifierErrorKind::StackExhausted { needed, depth })
        } else {
            Ok(())
        }
    }

    /// Callers must check the depth first
    fn select(&self, offset_from_top: usize) -> SlotType {
        self.stack[self.stack.len() - 1 - offset_from_top]
    }

    fn pop_slots(&mut self, count: usize) {
        let len = self.stack.len();
        self.stack.truncate(len - count);
    }

    fn push_unchecked(&mut self, slot_type: SlotType) {
        self.stack.push(slot_type);
        if slot_type.is_wide() {
            self.stack.push(SlotType::Top);
        }
        self.max_stack = self.max_stack.max(self.stack.len());
    }
}

fn pushable(slot_type: SlotType) -> Result<SlotType, VerifierErrorKind> {
    if slot_type == SlotType::Top {
        Err(VerifierErrorKind::InvalidPush(slot_type))
    } else {
        Ok(slot_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::{SymbolResolver, SymbolTable};

    const INT_PAIR: &[Operand] = &[Operand::Int, Operand::Int];

    fn verifier_kind(result: Result<(), Error>) -> VerifierErrorKind {
        match result {
            Err(Error::Verifier { kind, .. }) => kind,
            other => panic!("expected a verification error, got {:?}", other),
        }
    }

    #[test]
    fn depth_follows_pushes_and_pops() {
        let mut tracker = StackTracker::new();
        let pushes = [
            SlotType::Int,
            SlotType::Long,
            SlotType::Float,
            SlotType::Double,
            SlotType::Null,
        ];
        let mut expected_depth = 0;
        for (pc, slot_type) in pushes.iter().enumerate() {
            tracker.process_changes(pc, &StackEffect::Push(*slot_type)).unwrap();
            expected_depth += slot_type.width();
            assert_eq!(tracker.current_stack_depth(), expected_depth);
        }

        assert_eq!(tracker.select_stack_item_type(0), Ok(SlotType::Null));
        assert_eq!(tracker.select_stack_item_type(1), Ok(SlotType::Top));
        assert_eq!(tracker.select_stack_item_type(2), Ok(SlotType::Double));
        assert_eq!(tracker.select_stack_item_type(3), Ok(SlotType::Float));
        assert_eq!(tracker.select_stack_item_type(5), Ok(SlotType::Long));
        assert_eq!(tracker.select_stack_item_type(6), Ok(SlotType::Int));
        assert!(tracker.select_stack_item_type(7).is_err());

        tracker.process_changes(9, &StackEffect::Pop(1)).unwrap();
        tracker.process_changes(10, &StackEffect::Pop(2)).unwrap();
        assert_eq!(tracker.current_stack_depth(), 4);
        assert_eq!(tracker.max_stack_depth(), 7);
    }

    #[test]
    fn snapshots_round_trip() {
        let symbols = SymbolTable::new();
        let string = symbols.intern_name("java.lang.String");

        let mut tracker = StackTracker::new();
        tracker.process_changes(0, &StackEffect::Push(SlotType::Long)).unwrap();
        tracker
            .process_changes(1, &StackEffect::Push(SlotType::Reference(Some(string))))
            .unwrap();
        let snapshot = tracker.make_stack_snapshot();

        tracker.process_changes(2, &StackEffect::Clear).unwrap();
        assert_eq!(tracker.current_stack_depth(), 0);

        tracker.load_stack_snapshot(&snapshot);
        assert_eq!(tracker.current_stack_depth(), 3);
        assert_eq!(tracker.make_stack_snapshot(), snapshot);
        assert_eq!(
            tracker.select_stack_item_type(0),
            Ok(SlotType::Reference(Some(string)))
        );
    }

    #[test]
    fn wide_values_cannot_be_split() {
        let mut tracker = StackTracker::new();
        tracker.process_changes(0, &StackEffect::Push(SlotType::Int)).unwrap();
        tracker.process_changes(1, &StackEffect::Push(SlotType::Long)).unwrap();

        for kind in [DupKind::Dup, DupKind::DupX1, DupKind::DupX2] {
            let result = tracker.process_changes(2, &StackEffect::Dup(kind));
            assert_eq!(verifier_kind(result), VerifierErrorKind::WideValueSplit);
        }
        let result = tracker.process_changes(2, &StackEffect::Swap);
        assert_eq!(verifier_kind(result), VerifierErrorKind::WideValueSplit);
        let result = tracker.process_changes(2, &StackEffect::Pop(1));
        assert_eq!(verifier_kind(result), VerifierErrorKind::WideValueSplit);
        let result = tracker.process_changes(2, &StackEffect::Pop(3));
        assert!(result.is_ok());
        assert_eq!(tracker.current_stack_depth(), 0);
    }

    #[test]
    fn wide_dups_keep_pairs_together() {
        let mut tracker = StackTracker::new();
        tracker.process_changes(0, &StackEffect::Push(SlotType::Int)).unwrap();
        tracker.process_changes(1, &StackEffect::Push(SlotType::Long)).unwrap();

        // dup2_x1, form 2
        tracker.process_changes(2, &StackEffect::Dup(DupKind::Dup2X1)).unwrap();
        assert_eq!(
            tracker.make_stack_snapshot().slots(),
            &[
                SlotType::Long,
                SlotType::Top,
                SlotType::Int,
                SlotType::Long,
                SlotType::Top
            ]
        );

        // Inserting a value between the halves of a long
        tracker.process_changes(3, &StackEffect::Pop(2)).unwrap();
        tracker.process_changes(4, &StackEffect::Pop(1)).unwrap();
        tracker.process_changes(5, &StackEffect::Push(SlotType::Float)).unwrap();
        let result = tracker.process_changes(6, &StackEffect::Dup(DupKind::DupX1));
        assert_eq!(verifier_kind(result), VerifierErrorKind::WideValueSplit);

        // dup_x2, form 2
        tracker.process_changes(7, &StackEffect::Dup(DupKind::DupX2)).unwrap();
        assert_eq!(
            tracker.make_stack_snapshot().slots(),
            &[SlotType::Float, SlotType::Long, SlotType::Top, SlotType::Float]
        );
    }

    #[test]
    fn rewinding_forgets_the_maximum() {
        let mut tracker = StackTracker::new();
        tracker.process_changes(0, &StackEffect::Push(SlotType::Int)).unwrap();
        let snapshot = tracker.make_stack_snapshot();
        tracker.process_changes(1, &StackEffect::Push(SlotType::Long)).unwrap();
        assert_eq!(tracker.max_stack_depth(), 3);

        tracker.rewind_stack(&snapshot, 1);
        assert_eq!(tracker.make_stack_snapshot(), snapshot);
        assert_eq!(tracker.max_stack_depth(), 1);
    }

    #[test]
    fn empty_stack_errors() {
        let mut tracker = StackTracker::new();
        let result = tracker.process_changes(4, &StackEffect::Pop(1));
        assert!(matches!(
            result,
            Err(Error::Verifier {
                pc: 4,
                kind: VerifierErrorKind::StackExhausted { needed: 1, depth: 0 }
            })
        ));
        assert_eq!(
            tracker.select_stack_item_type(0),
            Err(VerifierErrorKind::StackExhausted {
                needed: 1,
                depth: 0
            })
        );
    }

    #[test]
    fn failed_effects_leave_the_stack_alone() {
        let mut tracker = StackTracker::new();
        tracker.process_changes(0, &StackEffect::Push(SlotType::Int)).unwrap();
        tracker.process_changes(1, &StackEffect::Push(SlotType::Float)).unwrap();
        let before = tracker.make_stack_snapshot();

        let result = tracker.process_changes(
            2,
            &StackEffect::Operate {
                operands: INT_PAIR,
                result: Some(SlotType::Int),
            },
        );
        assert_eq!(
            verifier_kind(result),
            VerifierErrorKind::InvalidType {
                offset: 0,
                expected: Operand::Int,
                found: SlotType::Float
            }
        );
        assert_eq!(tracker.make_stack_snapshot(), before);

        let result = tracker.process_changes(3, &StackEffect::Push(SlotType::Top));
        assert_eq!(verifier_kind(result), VerifierErrorKind::InvalidPush(SlotType::Top));
        assert_eq!(tracker.make_stack_snapshot(), before);
    }

    #[test]
    fn nested_var_frames() {
        let mut tracker = StackTracker::new();
        for depth in 0..40 {
            tracker.push_var_frame();
            let index = tracker.add_var(SlotType::Int, depth, false).unwrap();
            assert_eq!(index, depth);
            for k in 0..=depth {
                assert_eq!(tracker.get_var_type(k), Ok(SlotType::Int));
            }
            assert_eq!(tracker.make_var_snapshot().len(), depth + 1);
        }
        assert_eq!(tracker.get_var_type(40), Err(VerifierErrorKind::InvalidVarIndex(40)));

        for _ in 0..40 {
            tracker.pop_var_frame().unwrap();
        }
        assert_eq!(tracker.var_slot_count(), 0);
        assert_eq!(tracker.max_var_slot_count(), 40);
        assert!(matches!(
            tracker.pop_var_frame(),
            Err(Error::IllegalState(IllegalState::VarFrameUnderflow))
        ));
    }

    #[test]
    fn loads_need_some_store() -> Result<(), Error> {
        let mut tracker = StackTracker::new();
        tracker.push_var_frame();
        let parameter = tracker.add_var(SlotType::Int, 0, false)?;
        tracker.assign_var(parameter);

        tracker.push_var_frame();
        let later = tracker.add_var(SlotType::Int, 0, false)?;
        let never = tracker.add_var(SlotType::Int, 0, false)?;
        tracker.load_var(1, parameter, Operand::Int)?;

        // A store emitted after the load still counts, it may run first at runtime
        tracker.load_var(2, later, Operand::Int)?;
        tracker.store_var(3, later, Operand::Int)?;
        tracker.increment_var(4, never)?;
        tracker.load_var(5, never, Operand::Int)?;
        assert!(matches!(
            tracker.pop_var_frame(),
            Err(Error::Verifier {
                pc: 4,
                kind: VerifierErrorKind::UnassignedVariable(2),
            })
        ));
        assert!(tracker.pop_var_frame().is_ok());
        Ok(())
    }

    #[test]
    fn wide_variables_take_two_slots() {
        let mut tracker = StackTracker::new();
        tracker.push_var_frame();
        assert_eq!(tracker.add_var(SlotType::Double, 0, false).unwrap(), 0);
        assert_eq!(tracker.add_var(SlotType::Int, 0, false).unwrap(), 2);
        assert_eq!(tracker.get_var_type(1), Ok(SlotType::Top));
        assert_eq!(
            tracker.make_var_snapshot().slots(),
            vec![SlotType::Double, SlotType::Top, SlotType::Int]
        );

        tracker.load_var(1, 0, Operand::Double).unwrap();
        assert_eq!(tracker.current_stack_depth(), 2);
        let result = tracker.store_var(2, 2, Operand::Int);
        assert!(matches!(
            result,
            Err(Error::Verifier {
                kind: VerifierErrorKind::InvalidType { .. },
                ..
            })
        ));
        let result = tracker.load_var(3, 1, Operand::Int);
        assert!(matches!(
            result,
            Err(Error::Verifier {
                kind: VerifierErrorKind::InvalidVarType { index: 1, .. },
                ..
            })
        ));
        tracker.increment_var(4, 2).unwrap();
        assert!(tracker.increment_var(5, 0).is_err());
    }

    #[test]
    fn constructor_initializes_every_copy() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let builder = symbols.intern_name("java.lang.StringBuilder");

        let mut tracker = StackTracker::new();
        tracker.push_var_frame();
        tracker.process_changes(0, &StackEffect::Push(SlotType::Uninitialized(builder)))?;
        tracker.process_changes(3, &StackEffect::Dup(DupKind::Dup))?;
        tracker.process_changes(
            4,
            &StackEffect::Call {
                parameters: vec![],
                return_type: None,
                receiver: Receiver::Constructor,
            },
        )?;
        assert_eq!(tracker.current_stack_depth(), 1);
        assert_eq!(
            tracker.select_stack_item_type(0),
            Ok(SlotType::Reference(Some(builder)))
        );

        let result = tracker.process_changes(
            7,
            &StackEffect::Call {
                parameters: vec![FieldType::int()],
                return_type: None,
                receiver: Receiver::Instance,
            },
        );
        assert!(matches!(
            result,
            Err(Error::Verifier {
                pc: 7,
                kind: VerifierErrorKind::InvalidType {
                    offset: 0,
                    expected: Operand::Int,
                    ..
                },
            })
        ));
        Ok(())
    }

    #[test]
    fn fields_need_their_receiver() -> Result<(), Error> {
        let mut tracker = StackTracker::new();
        tracker.process_changes(0, &StackEffect::Push(SlotType::Reference(None)))?;
        tracker.process_changes(1, &StackEffect::Push(SlotType::Long))?;
        tracker.process_changes(2, &StackEffect::PopField(FieldType::long()))?;
        assert_eq!(tracker.current_stack_depth(), 0);

        tracker.process_changes(3, &StackEffect::Push(SlotType::Int))?;
        tracker.process_changes(4, &StackEffect::Push(SlotType::Long))?;
        let result = tracker.process_changes(5, &StackEffect::PopField(FieldType::long()));
        assert!(matches!(
            result,
            Err(Error::Verifier {
                kind: VerifierErrorKind::InvalidType {
                    offset: 2,
                    expected: Operand::Reference,
                    found: SlotType::Int
                },
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn catch_state_replaces_the_stack() {
        let symbols = SymbolTable::new();
        let throwable = symbols.intern_name("java.lang.Throwable");
        let mut tracker = StackTracker::new();
        tracker.process_changes(0, &StackEffect::Push(SlotType::Int)).unwrap();
        tracker.process_changes(1, &StackEffect::Push(SlotType::Int)).unwrap();
        tracker.prepare_catch(throwable);
        assert_eq!(
            tracker.make_stack_snapshot(),
            StackSnapshot(vec![SlotType::Reference(Some(throwable))])
        );
    }
}
