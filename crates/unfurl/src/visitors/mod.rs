//! AST visitors used by the converter

pub mod reference_visitor;

pub use reference_visitor::{ReferenceVisitor, collect_references};
