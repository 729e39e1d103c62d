#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Tree-sitter parser wrapper for the Python code of a single cell.
//!
//! Only two questions are ever asked of a cell: where its import statements
//! are, and what kind of statement closes it.

use std::ops::Range;

use anyhow::{Context, Result, anyhow};
use tree_sitter::{Language, Node, Query, QueryCursor, StreamingIterator, Tree};

use super::queries::IMPORT_QUERY;

/// A struct that wraps a tree-sitter parse tree and the code it was built
/// from.
#[derive(Clone)]
pub struct Parser {
    /// The source code being parsed.
    code: String,
    /// The parse tree.
    tree: Tree,
    /// The tree-sitter Python grammar language.
    lang: Language,
}

/// Returns the compiled tree-sitter Python language.
fn python_language() -> Language {
    tree_sitter_python::LANGUAGE.into()
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}

/// An import statement found in a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStatement {
    /// Byte range of the statement in the cell code.
    range: Range<usize>,
    /// The statement's text, possibly spanning several lines.
    text:  String,
}

impl ImportStatement {
    /// Returns the byte range of the statement in the parsed code.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Returns the statement's text.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// The last top-level statement of a cell, as far as score reporting cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastStatement {
    /// An `assert`.
    Assertion,
    /// A bare expression whose value could be printed.
    Expression {
        /// Source text of the expression.
        text:     String,
        /// Whether the expression is already a `print(...)` call.
        is_print: bool,
    },
    /// Any other statement, by tree-sitter node kind.
    Other(String),
}

impl Parser {
    /// Parses `source_code`.
    ///
    /// Succeeds even on invalid Python; check [`Parser::has_errors`].
    pub fn new(source_code: String) -> Result<Self> {
        let mut parser = tree_sitter::Parser::new();
        let language = python_language();

        parser
            .set_language(&language)
            .with_context(|| "Failed to load Python grammar")?;
        let tree = parser
            .parse(source_code.as_str(), None)
            .ok_or_else(|| anyhow!("Error parsing Python code"))?;

        Ok(Self {
            code: source_code,
            tree,
            lang: language,
        })
    }

    /// A getter for parser's source code.
    pub fn code(&self) -> &str {
        self.code.as_str()
    }

    /// Returns the parse tree's root node.
    pub fn root_node(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Whether the code contains syntax errors.
    pub fn has_errors(&self) -> bool {
        self.root_node().has_error()
    }

    /// Returns the byte range of every node captured as `capture_name` by the
    /// query `q`, in source order.
    pub fn query_ranges(&self, q: &str, capture_name: &str) -> Result<Vec<Range<usize>>> {
        let query = Query::new(&self.lang, q)
            .with_context(|| format!("Failed to compile tree-sitter query: {q}"))?;
        let capture_index = query
            .capture_index_for_name(capture_name)
            .ok_or_else(|| anyhow!("Capture name {capture_name} not present in query"))?;

        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, self.root_node(), self.code.as_bytes());
        let mut ranges = Vec::new();

        while let Some(m) = matches.next() {
            for capture in m.captures.iter().filter(|c| c.index == capture_index) {
                ranges.push(capture.node.byte_range());
            }
        }

        ranges.sort_by_key(|range| range.start);
        ranges.dedup();
        Ok(ranges)
    }

    /// Returns every import statement in the code, at any nesting depth.
    pub fn imports(&self) -> Result<Vec<ImportStatement>> {
        self.query_ranges(IMPORT_QUERY, "import")?
            .into_iter()
            .map(|range| {
                let text = self
                    .code
                    .get(range.clone())
                    .context("Cannot map capture to source text")?
                    .to_string();
                Ok(ImportStatement { range, text })
            })
            .collect()
    }

    /// Classifies the last top-level statement, skipping comments. Returns
    /// `None` for code without statements.
    pub fn last_statement(&self) -> Result<Option<LastStatement>> {
        let root = self.root_node();
        let mut cursor = root.walk();
        let Some(last) = root
            .named_children(&mut cursor)
            .filter(|node| node.kind() != "comment")
            .last()
        else {
            return Ok(None);
        };

        let statement = match last.kind() {
            "assert_statement" => LastStatement::Assertion,
            "expression_statement" => {
                let mut inner_cursor = last.walk();
                let inner: Vec<Node<'_>> = last.named_children(&mut inner_cursor).collect();
                match inner.as_slice() {
                    [only]
                        if matches!(
                            only.kind(),
                            "assignment" | "augmented_assignment" | "yield"
                        ) =>
                    {
                        LastStatement::Other(only.kind().to_string())
                    }
                    [] => LastStatement::Other(last.kind().to_string()),
                    _ => {
                        let text = last
                            .utf8_text(self.code.as_bytes())
                            .context("Cannot map statement to source text")?
                            .to_string();
                        let is_print = matches!(inner.as_slice(), [only] if self.is_print_call(*only));
                        LastStatement::Expression { text, is_print }
                    }
                }
            }
            other => LastStatement::Other(other.to_string()),
        };

        Ok(Some(statement))
    }

    /// Whether `node` is a call of the builtin `print`.
    fn is_print_call(&self, node: Node<'_>) -> bool {
        node.kind() == "call"
            && node
                .child_by_field_name("function")
                .and_then(|function| function.utf8_text(self.code.as_bytes()).ok())
                == Some("print")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(code: &str) -> Parser {
        Parser::new(code.to_string()).expect("parser")
    }

    #[test]
    fn finds_imports_at_any_depth() {
        let parser = parse(
            "import os\nfrom math import (\n    pi,\n    tau,\n)\ndef f():\n    import json\n    return json\n",
        );
        let imports = parser.imports().expect("imports");
        let texts: Vec<_> = imports.iter().map(ImportStatement::text).collect();

        assert_eq!(
            texts,
            ["import os", "from math import (\n    pi,\n    tau,\n)", "import json"]
        );
    }

    #[test]
    fn classifies_last_statement() {
        let last = |code: &str| parse(code).last_statement().expect("classify");

        assert_eq!(last("x = 1\nassert x == 1\n"), Some(LastStatement::Assertion));
        assert_eq!(
            last("x = 1\nx + 1  # comment\n"),
            Some(LastStatement::Expression {
                text:     "x + 1".to_string(),
                is_print: false,
            })
        );
        assert_eq!(
            last("print(3)\n"),
            Some(LastStatement::Expression {
                text:     "print(3)".to_string(),
                is_print: true,
            })
        );
        assert_eq!(last("x = 1\n"), Some(LastStatement::Other("assignment".to_string())));
        assert_eq!(
            last("for i in []:\n    pass\n"),
            Some(LastStatement::Other("for_statement".to_string()))
        );
        assert_eq!(last("# only a comment\n"), None);
    }

    #[test]
    fn reports_syntax_errors() {
        assert!(parse("def broken(:\n").has_errors());
        assert!(!parse("x = 1\n").has_errors());
    }
}
