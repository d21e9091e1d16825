//! Inline verification of the operand stack and local variables
//!
//! Class files of version 49 and older are checked by the type-inferencing verifier when they are
//! loaded, but nothing short of loading them says whether they pass. The [`StackTracker`] runs a
//! simplified version of that inference as instructions are appended, so ill-typed code is
//! reported at the instruction that caused it.

mod effect;
mod tracker;
mod types;

pub use effect::*;
pub use tracker::*;
pub use types::*;
