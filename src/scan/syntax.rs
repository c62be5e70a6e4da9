//! PHP parsing via tree-sitter, plus the small node helpers the extractors use.
//!
//! Inline HTML outside `<?php ... ?>`, heredocs and nowdocs are handled by the
//! grammar. A tree containing ERROR or MISSING nodes is a syntax error.

use crate::error::ScanError;
use std::time::{Duration, Instant};
use tree_sitter::{Node, Parser, Tree};

#[derive(Debug, Clone, Copy)]
/// Cooperative per-file time limit.
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Deadline {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn check(&self) -> Result<(), ScanError> {
        if Instant::now() > self.at {
            Err(ScanError::Timeout {
                millis: self.budget.as_millis(),
            })
        } else {
            Ok(())
        }
    }
}

/// A parsed PHP file. Nodes borrow from `tree`; text is read from `src`.
pub struct Source<'s> {
    pub tree: Tree,
    pub src: &'s str,
}

impl<'s> Source<'s> {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Source text of `node`; empty on a non-UTF-8 boundary.
    pub fn text(&self, node: Node<'_>) -> &'s str {
        node.utf8_text(self.src.as_bytes()).unwrap_or("")
    }
}

/// Parse `src` as PHP. Rejects trees with syntax errors.
pub fn parse<'s>(src: &'s str, deadline: &Deadline) -> Result<Source<'s>, ScanError> {
    deadline.check()?;
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_php::LANGUAGE_PHP.into())
        .map_err(|e| ScanError::Parser(format!("{:?}", e)))?;
    let tree = parser
        .parse(src, None)
        .ok_or_else(|| ScanError::Parser("parse returned no tree".into()))?;
    deadline.check()?;
    let root = tree.root_node();
    if root.has_error() {
        let line = first_error(root).map_or(1, line_of);
        return Err(ScanError::Syntax { line });
    }
    Ok(Source { tree, src })
}

/// 1-based line where `node` starts.
pub fn line_of(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error() || c.is_missing())
        .find_map(first_error)
}

/// Every named descendant of `node` (excluding `node`), in document order.
pub fn descendants(node: Node<'_>) -> Vec<Node<'_>> {
    let mut out = Vec::new();
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        let mut cursor = n.walk();
        let children: Vec<Node<'_>> = n.named_children(&mut cursor).collect();
        for c in children.into_iter().rev() {
            stack.push(c);
        }
        if n != node {
            out.push(n);
        }
    }
    out
}

/// Named descendants of `node` with the given kind, in document order.
pub fn of_kind<'t>(node: Node<'t>, kind: &str) -> Vec<Node<'t>> {
    descendants(node)
        .into_iter()
        .filter(|n| n.kind() == kind)
        .collect()
}

pub fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// The expressions passed in an `arguments` node (named arguments included).
pub fn arguments(call: Node<'_>) -> Vec<Node<'_>> {
    let Some(args) = call.child_by_field_name("arguments") else {
        return Vec::new();
    };
    named_children(args)
        .into_iter()
        .filter(|a| a.kind() == "argument")
        .filter_map(|a| named_children(a).into_iter().last())
        .collect()
}

/// Contents of a quoted string literal, without the quotes.
pub fn string_value<'s>(source: &Source<'s>, node: Node<'_>) -> Option<&'s str> {
    match node.kind() {
        "string" | "encapsed_string" => {
            Some(source.text(node).trim_matches(|c| c == '\'' || c == '"'))
        }
        _ => None,
    }
}

/// Last segment of a possibly qualified name: `App\Models\User` → `User`.
pub fn short_name(qualified: &str) -> &str {
    let q = qualified.trim_start_matches('\\');
    q.rsplit('\\').next().unwrap_or(q)
}
