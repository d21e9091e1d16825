use crate::jvm::class_file::Constant;
use crate::jvm::code::Label;
use crate::jvm::verifier::{Operand, SlotType, StackSnapshot};
use crate::jvm::SymbolId;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    ConstantPoolOverflow {
        constant: Constant,
        offset: usize,
    },
    IoError(std::io::Error),

    /// String constant whose modified UTF-8 encoding is longer than 65535 bytes
    Utf8ConstantTooLong(usize),

    /// An instruction does not fit the abstract stack or variable state at `pc`
    ///
    /// Fatal to the current method: nothing is emitted for the offending instruction.
    Verifier {
        pc: usize,
        kind: VerifierErrorKind,
    },

    /// Labels which were declared or branched to, but never placed
    UnresolvedLabels(Vec<Label>),

    /// Label declared or placed twice
    DuplicateLabel(Label),

    /// Placing a label which was never declared
    UndeclaredLabel(Label),

    /// Two control-flow paths reach the same label with different stack shapes
    IncompatibleFrames {
        label: Label,
        expected: StackSnapshot,
        found: StackSnapshot,
    },

    /// A label placed after an unconditional jump, but no branch to it was seen yet
    ///
    /// This is fixable by making sure you place the label _after_ some jump to it.
    UnknownStackState(Label),

    /// Instruction following an unconditional jump without a label in between
    DeadCode {
        pc: usize,
    },

    /// Exception handler starting where the previous instruction can fall through
    FallThroughIntoHandler {
        pc: usize,
    },
    EmptyCommand {
        pc: usize,
    },
    MethodCodeOverflow(usize),

    /// Opcode not allowed by the operation it was passed to
    UnexpectedOpcode(u8),
    DuplicateSwitchValue(i32),
    SparseTableSwitch {
        low: i32,
        high: i32,
        count: usize,
    },
    EmptyTableSwitch,

    /// Try block whose protected range contains no instructions
    EmptyProtectedRange {
        start: usize,
    },

    DuplicateCatchType(SymbolId),
    DuplicateFinally,
    CatchAfterFinally,
    NoOpenTryBlock,
    TryWithoutHandlers,
    UnclosedTryBlocks(usize),
    DuplicateVariable(String),
    UnknownVariable(String),

    /// Field with the same name, or method with the same name and descriptor
    DuplicateMember(String),

    /// Method descriptor dropped, or failed, before being completed
    IncompleteMethod(String),

    /// Constant value does not fit the type of its field
    ConstantTypeMismatch(String),
    IllegalState(IllegalState),

    UnknownSymbol(SymbolId),
    NotAClass(SymbolId),
    NotAField(SymbolId),
    NotAMethod(SymbolId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierErrorKind {
    /// Instruction needs more slots than the stack holds
    StackExhausted { needed: usize, depth: usize },

    /// Slot at `offset` (0 is the top) does not have the required type
    InvalidType {
        offset: usize,
        expected: Operand,
        found: SlotType,
    },

    /// The operation would separate a `long` or `double` from its `top` half
    WideValueSplit,

    /// Local variable index does not belong to any open scope
    InvalidVarIndex(usize),

    /// Local variable does not have the required type
    InvalidVarType {
        index: usize,
        expected: Operand,
        found: SlotType,
    },

    /// Local variable loaded, but never stored anywhere
    UnassignedVariable(usize),

    /// `multianewarray` needs at least one dimension
    InvalidDimensions(u8),

    /// Instance call or constructor call without a suitable receiver under the arguments
    UnexpectedReceiver(SlotType),

    /// `top` cannot be pushed on its own
    InvalidPush(SlotType),

    /// Return instruction does not match the method's return type
    WrongReturn(u8),

    /// The last instruction lets control run past the end of the code
    FallsOffEnd,
}

/// Calls made in the wrong order (these indicate a bug in the caller)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IllegalState {
    ClassNameNotSet,
    ClassNameAlreadySet,
    ClassAlreadyDumped,
    VarFrameUnderflow,
    ParametersClosed,
    MethodHasNoBody,
    StreamClosed,
    ScopesNotClosed,
    ProtectedRangeClosed,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<IllegalState> for Error {
    fn from(state: IllegalState) -> Error {
        Error::IllegalState(state)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConstantPoolOverflow { offset, .. } => {
                write!(f, "constant pool overflow at index {}", offset)
            }
            Error::IoError(err) => write!(f, "i/o error: {}", err),
            Error::Utf8ConstantTooLong(length) => write!(
                f,
                "utf8 constant of {} bytes does not fit in a class file",
                length
            ),
            Error::Verifier { pc, kind } => write!(f, "verification failed at pc {}: {}", pc, kind),
            Error::UnresolvedLabels(labels) => {
                write!(f, "unresolved jumps: labels {:?} are not defined", labels)
            }
            Error::DuplicateLabel(label) => write!(f, "label {:?} is defined twice", label),
            Error::UndeclaredLabel(label) => write!(f, "label {:?} was never declared", label),
            Error::IncompatibleFrames {
                label,
                expected,
                found,
            } => write!(
                f,
                "stack at label {:?} is {:?}, but {:?} was awaited",
                label, found, expected
            ),
            Error::UnknownStackState(label) => write!(
                f,
                "unknown stack state at label {:?}: no forward branch to it was registered",
                label
            ),
            Error::DeadCode { pc } => write!(
                f,
                "dead code at pc {}: previous command was an unconditional jump",
                pc
            ),
            Error::FallThroughIntoHandler { pc } => write!(
                f,
                "handler at pc {} can be reached by falling through the previous instruction",
                pc
            ),
            Error::EmptyCommand { pc } => write!(f, "empty command at pc {}", pc),
            Error::MethodCodeOverflow(len) => {
                write!(f, "method code is {} bytes, longer than 65535", len)
            }
            Error::UnexpectedOpcode(opcode) => {
                write!(f, "opcode 0x{:02x} cannot be used here", opcode)
            }
            Error::DuplicateSwitchValue(value) => write!(f, "duplicate switch value {}", value),
            Error::SparseTableSwitch { low, high, count } => write!(
                f,
                "tableswitch over {}..={} with {} entries is less than 5% utilised",
                low, high, count
            ),
            Error::EmptyTableSwitch => f.write_str("tableswitch without any entries"),
            Error::EmptyProtectedRange { start } => {
                write!(f, "try block at pc {} protects no instructions", start)
            }
            Error::DuplicateCatchType(symbol) => {
                write!(f, "exception type {:?} is caught twice", symbol)
            }
            Error::DuplicateFinally => f.write_str("finally (or catch-all) declared twice"),
            Error::CatchAfterFinally => f.write_str("catch declared after finally"),
            Error::NoOpenTryBlock => f.write_str("handler declared outside of a try block"),
            Error::TryWithoutHandlers => f.write_str("try block has neither catch nor finally"),
            Error::UnclosedTryBlocks(count) => write!(f, "{} try blocks are not closed", count),
            Error::DuplicateVariable(name) => {
                write!(f, "variable {} is declared twice in the same scope", name)
            }
            Error::UnknownVariable(name) => write!(f, "variable {} is not declared", name),
            Error::DuplicateMember(name) => write!(f, "member {} is declared twice", name),
            Error::IncompleteMethod(name) => write!(f, "method {} was not completed", name),
            Error::ConstantTypeMismatch(name) => {
                write!(f, "constant value does not match the type of field {}", name)
            }
            Error::IllegalState(state) => write!(f, "illegal state: {:?}", state),
            Error::UnknownSymbol(symbol) => write!(f, "unknown symbol {:?}", symbol),
            Error::NotAClass(symbol) => write!(f, "symbol {:?} is not a class", symbol),
            Error::NotAField(symbol) => write!(f, "symbol {:?} is not a field", symbol),
            Error::NotAMethod(symbol) => write!(f, "symbol {:?} is not a method", symbol),
        }
    }
}

impl fmt::Display for VerifierErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifierErrorKind::StackExhausted { needed, depth } => write!(
                f,
                "stack exhausted ({} slots needed, {} available)",
                needed, depth
            ),
            VerifierErrorKind::InvalidType {
                offset,
                expected,
                found,
            } => write!(
                f,
                "expected {:?} at stack offset {}, found {:?}",
                expected, offset, found
            ),
            VerifierErrorKind::WideValueSplit => {
                f.write_str("attempt to split a long/double value")
            }
            VerifierErrorKind::InvalidVarIndex(index) => {
                write!(f, "variable index {} is outside of every open scope", index)
            }
            VerifierErrorKind::InvalidVarType {
                index,
                expected,
                found,
            } => write!(
                f,
                "expected {:?} in variable {}, found {:?}",
                expected, index, found
            ),
            VerifierErrorKind::UnassignedVariable(index) => {
                write!(f, "variable {} is loaded but never stored", index)
            }
            VerifierErrorKind::InvalidDimensions(dimensions) => {
                write!(f, "invalid array dimension count {}", dimensions)
            }
            VerifierErrorKind::UnexpectedReceiver(found) => {
                write!(f, "invocation requires a receiver, found {:?}", found)
            }
            VerifierErrorKind::InvalidPush(slot) => write!(f, "{:?} cannot be pushed", slot),
            VerifierErrorKind::WrongReturn(opcode) => write!(
                f,
                "return opcode 0x{:02x} does not match the method return type",
                opcode
            ),
            VerifierErrorKind::FallsOffEnd => f.write_str("control falls off the end of the code"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}
