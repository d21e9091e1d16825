//! Assemble JVM class files from a stream of instructions, verifying the operand stack and local
//! variables as every instruction is appended.
//!
//! See [`jvm`] for an overview and an example.

pub mod jvm;
pub mod util;
