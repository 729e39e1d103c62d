//! Tree-sitter query strings used to inspect notebook cell code.

/// Tree-sitter query that returns every import statement, at any depth.
/// * `import`: the whole statement, including `from` and `__future__` forms
pub const IMPORT_QUERY: &str = include_str!("import.scm");
