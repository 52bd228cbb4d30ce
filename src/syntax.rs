//! Generic syntax tree and its conversion into values.
//!
//! The evaluator core does not depend on any particular parser. A reader produces
//! [`SyntaxNode`]s whose `tag` classifies the node (`number`, `string`, `symbol`,
//! `comment`, `sexpr`, `qexpr`, or a root marker) and whose `contents` hold the
//! literal text of leaves. Tags are matched by substring, so a reader is free to
//! decorate them (`expr|number|regex`).

use crate::ast::{NumberType, Value};

/// A node of a parsed syntax tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxNode {
    pub tag: String,
    pub contents: String,
    pub children: Vec<SyntaxNode>,
}

impl SyntaxNode {
    pub fn leaf(tag: impl Into<String>, contents: impl Into<String>) -> Self {
        SyntaxNode {
            tag: tag.into(),
            contents: contents.into(),
            children: Vec::new(),
        }
    }

    pub fn branch(tag: impl Into<String>, children: Vec<SyntaxNode>) -> Self {
        SyntaxNode {
            tag: tag.into(),
            contents: String::new(),
            children,
        }
    }

    /// Delimiter child of a list node
    pub fn punctuation(delimiter: char) -> Self {
        SyntaxNode::leaf("char", delimiter.to_string())
    }

    /// Start/end marker child of a root node
    pub fn marker() -> Self {
        SyntaxNode::leaf("regex", "")
    }

    /// Top-level node: a sequence of expressions between start and end markers
    pub fn root(expressions: Vec<SyntaxNode>) -> Self {
        let mut children = Vec::with_capacity(expressions.len() + 2);
        children.push(SyntaxNode::marker());
        children.extend(expressions);
        children.push(SyntaxNode::marker());
        SyntaxNode::branch(">", children)
    }

    /// Delimiters, markers and comments carry no value
    fn is_skipped(&self) -> bool {
        matches!(self.contents.as_str(), "(" | ")" | "{" | "}")
            || self.tag == "regex"
            || self.tag.contains("comment")
    }
}

/// Convert a syntax node into a value.
///
/// Numbers that do not fit the integer type become `Error("invalid number")` values;
/// every other node converts successfully. Root nodes and any node that is not a
/// recognised leaf or Q-expression become S-expressions of their children.
pub fn read_value(node: &SyntaxNode) -> Value {
    if node.tag.contains("number") {
        return node
            .contents
            .parse::<NumberType>()
            .map_or_else(|_| Value::Error("invalid number".to_owned()), Value::Number);
    }
    if node.tag.contains("string") {
        return Value::String(read_string(&node.contents));
    }
    if node.tag.contains("symbol") {
        return Value::Symbol(node.contents.clone());
    }

    let items = read_expressions(node);
    if node.tag.contains("qexpr") {
        Value::QExpr(items)
    } else {
        Value::SExpr(items)
    }
}

/// Convert the value-bearing children of `node`, in order
pub fn read_expressions(node: &SyntaxNode) -> Vec<Value> {
    node.children
        .iter()
        .filter(|child| !child.is_skipped())
        .map(read_value)
        .collect()
}

/// Strip the delimiting quotes and decode escape sequences
fn read_string(literal: &str) -> String {
    let inner = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(literal);

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            // Unknown escapes are kept as written
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{nil, sexpr, sym, val};

    fn number(text: &str) -> SyntaxNode {
        SyntaxNode::leaf("expr|number|regex", text)
    }

    fn symbol(text: &str) -> SyntaxNode {
        SyntaxNode::leaf("expr|symbol|regex", text)
    }

    fn list(tag: &str, open: char, items: Vec<SyntaxNode>, close: char) -> SyntaxNode {
        let mut children = vec![SyntaxNode::punctuation(open)];
        children.extend(items);
        children.push(SyntaxNode::punctuation(close));
        SyntaxNode::branch(tag, children)
    }

    #[test]
    fn test_leaf_conversion() {
        let test_cases = vec![
            (number("42"), val(42)),
            (number("-7"), val(-7)),
            (
                number("99999999999999999999"),
                Value::Error("invalid number".to_owned()),
            ),
            (symbol("head"), sym("head")),
            (symbol("&"), sym("&")),
            (SyntaxNode::leaf("expr|string|regex", "\"hi\""), val("hi")),
            (SyntaxNode::leaf("string", "\"\""), val("")),
            (
                SyntaxNode::leaf("expr|string|regex", r#""a\"b\n\tc\\d\q""#),
                val("a\"b\n\tc\\d\\q"),
            ),
        ];

        for (i, (node, expected)) in test_cases.iter().enumerate() {
            assert_eq!(&read_value(node), expected, "Test case {} failed", i + 1);
        }
    }

    #[test]
    fn test_tree_conversion() {
        // + 1 {2 (x)} ; note
        let root = SyntaxNode::root(vec![
            symbol("+"),
            number("1"),
            list(
                "expr|qexpr|>",
                '{',
                vec![
                    number("2"),
                    list("expr|sexpr|>", '(', vec![symbol("x")], ')'),
                ],
                '}',
            ),
            SyntaxNode::leaf("comment", "; note"),
        ]);

        assert_eq!(
            read_value(&root),
            sexpr(vec![
                sym("+"),
                val(1),
                val(vec![val(2), sexpr(vec![sym("x")])]),
            ])
        );
        assert_eq!(read_expressions(&root).len(), 3);

        let empty = list("expr|qexpr|>", '{', vec![], '}');
        assert_eq!(read_value(&empty), nil());
        assert_eq!(read_value(&SyntaxNode::root(vec![])), sexpr(vec![]));
    }
}
