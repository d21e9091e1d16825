use crate::jvm::verifier::{Operand, SlotType};
use crate::jvm::{FieldType, SymbolId};

/// Effect of one instruction on the operand stack
///
/// Every non-branching instruction maps to exactly one of these. Variable loads and stores are not
/// here since they also involve the local variables (see [`super::StackTracker::load_var`]).
#[derive(Debug, Clone, PartialEq)]
pub enum StackEffect {
    /// No effect on the stack (eg. `nop`)
    None,

    /// Push a value of the given type (wide types push their `top` too)
    Push(SlotType),

    /// `aconst_null`
    PushNull,

    /// Remove the given number of slots (1 to 4)
    Pop(usize),

    Dup(DupKind),
    Swap,

    /// Numeric conversion (eg. `i2l`)
    Convert { from: Operand, to: SlotType },

    /// Consume typed operands and maybe produce a result
    ///
    /// Operands are listed in push order, so the last one is at the top of the stack.
    Operate {
        operands: &'static [Operand],
        result: Option<SlotType>,
    },

    /// `getfield`
    PushField(FieldType),

    /// `putfield`
    PopField(FieldType),

    /// `getstatic`
    PushStatic(FieldType),

    /// `putstatic`
    PopStatic(FieldType),

    /// Any `invoke*` instruction
    Call {
        parameters: Vec<FieldType>,
        return_type: Option<FieldType>,
        receiver: Receiver,
    },

    /// `multianewarray`: pop `dimensions` sizes, push the array
    MultiArray { dimensions: u8, class: SymbolId },

    /// `checkcast`: the reference on top now has the given class
    ChangeType(SymbolId),

    /// Empty the stack entirely
    Clear,
}

/// What sits under the arguments of a call
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Receiver {
    /// Nothing (`invokestatic`)
    Static,

    /// An initialized reference (`invokevirtual`, `invokeinterface`, most `invokespecial`)
    Instance,

    /// An uninitialized reference, initialized by the call (`invokespecial` of `<init>`)
    Constructor,
}

/// The six `dup` flavours
///
/// Each copies the top `copied` slots and inserts the copy `skipped` slots further down.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DupKind {
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
}

impl DupKind {
    /// Number of slots copied
    pub fn copied(self) -> usize {
        match self {
            DupKind::Dup | DupKind::DupX1 | DupKind::DupX2 => 1,
            DupKind::Dup2 | DupKind::Dup2X1 | DupKind::Dup2X2 => 2,
        }
    }

    /// Number of slots the copy is inserted under
    pub fn skipped(self) -> usize {
        match self {
            DupKind::Dup | DupKind::Dup2 => 0,
            DupKind::DupX1 | DupKind::Dup2X1 => 1,
            DupKind::DupX2 | DupKind::Dup2X2 => 2,
        }
    }
}
