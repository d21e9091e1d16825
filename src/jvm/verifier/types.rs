use crate::jvm::SymbolId;
use crate::util::Width;

/// Abstract value held by one stack or local variable slot
///
/// `long` and `double` values take two slots: the value itself, followed by `Top`.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum SlotType {
    Int,
    Float,
    Long,
    Double,

    /// Initialized object or array (`None` if the class is not statically known)
    Reference(Option<SymbolId>),

    /// The `null` literal, compatible with every reference type
    Null,

    /// Pushed by `jsr`, consumed by `astore` and `ret`
    ReturnAddress,

    /// Upper half of a `long` or `double`
    Top,

    /// Result of `new`, before the constructor has been called
    Uninitialized(SymbolId),

    /// `this` inside a constructor, before the superclass constructor has been called
    UninitializedThis(SymbolId),
}

impl SlotType {
    pub fn is_wide(&self) -> bool {
        matches!(self, SlotType::Long | SlotType::Double)
    }

    /// Can the slot be used where `operand` is expected?
    pub fn satisfies(&self, operand: Operand) -> bool {
        match operand {
            Operand::Int => *self == SlotType::Int,
            Operand::Float => *self == SlotType::Float,
            Operand::Long => *self == SlotType::Long,
            Operand::Double => *self == SlotType::Double,
            Operand::ReturnAddress => *self == SlotType::ReturnAddress,
            Operand::Reference => self.is_reference(),
            Operand::ReferenceOrAddress => {
                self.is_reference() || *self == SlotType::ReturnAddress
            }
        }
    }

    /// References in any state of initialization
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            SlotType::Reference(_)
                | SlotType::Null
                | SlotType::Uninitialized(_)
                | SlotType::UninitializedThis(_)
        )
    }
}

impl Width for SlotType {
    fn width(&self) -> usize {
        if self.is_wide() {
            2
        } else {
            1
        }
    }
}

/// What an instruction requires of one of its operands
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum Operand {
    Int,
    Float,
    Long,
    Double,
    Reference,
    ReturnAddress,

    /// `astore` accepts both
    ReferenceOrAddress,
}

impl Width for Operand {
    fn width(&self) -> usize {
        match self {
            Operand::Long | Operand::Double => 2,
            _ => 1,
        }
    }
}

/// Value copy of the operand stack, bottom first
///
/// Wide values appear as their type followed by [`SlotType::Top`].
#[derive(Debug, Clone, Hash, Eq, PartialEq, Default)]
pub struct StackSnapshot(pub Vec<SlotType>);

impl StackSnapshot {
    /// Number of slots
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn slots(&self) -> &[SlotType] {
        &self.0
    }

    /// Type at an offset from the top of the stack (0 is the top)
    pub fn select(&self, offset_from_top: usize) -> Option<SlotType> {
        let depth = self.0.len();
        if offset_from_top < depth {
            Some(self.0[depth - 1 - offset_from_top])
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_compatibility() {
        assert!(SlotType::Null.satisfies(Operand::Reference));
        assert!(SlotType::Reference(None).satisfies(Operand::Reference));
        assert!(SlotType::ReturnAddress.satisfies(Operand::ReferenceOrAddress));
        assert!(!SlotType::ReturnAddress.satisfies(Operand::Reference));
        assert!(!SlotType::Int.satisfies(Operand::Reference));
        assert!(!SlotType::Top.satisfies(Operand::Long));
    }

    #[test]
    fn snapshot_selection() {
        let snapshot = StackSnapshot(vec![SlotType::Int, SlotType::Long, SlotType::Top]);
        assert_eq!(snapshot.depth(), 3);
        assert_eq!(snapshot.select(0), Some(SlotType::Top));
        assert_eq!(snapshot.select(1), Some(SlotType::Long));
        assert_eq!(snapshot.select(2), Some(SlotType::Int));
        assert_eq!(snapshot.select(3), None);
    }
}
