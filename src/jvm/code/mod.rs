//! Method bodies: instruction bytes, labels and branches, and exception tables
//!
//! The [`InstructionStream`] only knows about bytes and control flow. It is driven together with
//! the [`crate::jvm::StackTracker`] by [`crate::jvm::model::MethodDescriptor`], which is what most
//! callers should use.

mod exceptions;
mod label;
pub mod opcodes;
mod relaxation;
mod stream;

pub use exceptions::*;
pub use label::*;
pub use relaxation::SIGNED_16BIT_JUMP_RANGE;
pub use stream::{
    switch_padding, Anchor, InstructionStream, ResolvedCode, StackCalculation, StreamState,
    SwitchForm, MAX_CODE_LENGTH, MAX_TABLE_SPREAD,
};
