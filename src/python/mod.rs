//! Python-facing helpers: a tree-sitter parser for cell code and rendering
//! of JSON values as Python literals.

/// JSON to Python literal rendering.
pub mod literal;
/// Tree-sitter parser wrapper.
pub mod parser;
/// Tree-sitter queries.
pub mod queries;
