//! Classes and their members, as seen by a compiler front end
//!
//! A [`ClassModel`] collects fields and methods, then dumps itself to a class file. Methods are
//! declared through a [`MethodDescriptor`], which drives the instruction stream and the verifier
//! for every instruction appended to the body.

mod class;
mod literal;
mod method;
mod options;

pub use class::*;
pub use literal::*;
pub use method::*;
pub use options::*;
