use crate::jvm::class_file::Version;
use crate::jvm::code::StackCalculation;

/// Settings shared by every member of a class
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClassOptions {
    /// Class file version written in the header
    pub version: Version,

    /// Emit `LineNumberTable` and `LocalVariableTable` attributes
    pub emit_debug_tables: bool,

    /// How method bodies estimate their max stack from the stack deltas
    pub stack_calculation: StackCalculation,
}

impl Default for ClassOptions {
    fn default() -> ClassOptions {
        ClassOptions {
            version: Version::default(),
            emit_debug_tables: true,
            stack_calculation: StackCalculation::default(),
        }
    }
}
