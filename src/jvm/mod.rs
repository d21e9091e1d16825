//! JVM class file assembly
//!
//! The layers, from the bottom up:
//!
//!   - [`class_file`] is the binary format: constants, attributes, members, and their
//!     serialization
//!   - [`verifier`] tracks the types on the operand stack and in local variables
//!   - [`code`] lays out instructions, resolves branches (widening them when needed), and builds
//!     exception tables
//!   - [`model`] ties these together into classes and methods
//!
//! Names and member signatures all come from a [`SymbolResolver`].
//!
//! ```
//! use classasm::jvm::code::opcodes::IADD;
//! use classasm::jvm::model::ClassModel;
//! use classasm::jvm::*;
//!
//! # fn main() -> Result<(), Error> {
//! let symbols = SymbolTable::new();
//! let mut class = ClassModel::new(&symbols);
//! class.set_class_name(ClassAccessFlags::PUBLIC, symbols.intern_name("demo.Adder"))?;
//!
//! let flags = MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC;
//! let mut add = class.add_method_description(flags, "add", Some(FieldType::int()), &[])?;
//! let a = add.add_parameter("a", FieldType::int())?;
//! let b = add.add_parameter("b", FieldType::int())?;
//! add.load(Operand::Int, a)?;
//! add.load(Operand::Int, b)?;
//! add.op(IADD)?;
//! add.emit_return()?;
//! add.complete()?;
//!
//! let mut bytes = vec![];
//! class.dump(&mut bytes)?;
//! assert_eq!(bytes[0..4], [0xCA, 0xFE, 0xBA, 0xBE]);
//! # Ok(())
//! # }
//! ```

pub mod class_file;
pub mod code;
pub mod model;
pub mod verifier;

mod access_flags;
mod descriptors;
mod errors;
mod symbols;

pub use access_flags::*;
pub use code::Label;
pub use descriptors::*;
pub use errors::*;
pub use symbols::*;
pub use verifier::{Operand, SlotType, StackEffect, StackSnapshot, StackTracker};
