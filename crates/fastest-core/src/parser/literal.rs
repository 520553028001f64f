//! Reduces a tree-sitter Python expression node to a [`LiteralValue`] without
//! ever evaluating it: only literal tuples/lists/dicts/Nones/booleans/
//! numbers/strings are recognized. Anything else falls back to its source
//! text verbatim.

use crate::model::LiteralValue;
use tree_sitter::Node;

pub fn node_to_literal(node: Node, source: &str) -> LiteralValue {
    match node.kind() {
        "none" => LiteralValue::None,
        "true" => LiteralValue::Bool(true),
        "false" => LiteralValue::Bool(false),
        "integer" => text_of(node, source)
            .replace('_', "")
            .parse::<i64>()
            .map(LiteralValue::Int)
            .unwrap_or_else(|_| LiteralValue::Raw(text_of(node, source).to_string())),
        "float" => text_of(node, source)
            .replace('_', "")
            .parse::<f64>()
            .map(LiteralValue::Float)
            .unwrap_or_else(|_| LiteralValue::Raw(text_of(node, source).to_string())),
        "string" => LiteralValue::Str(decode_string_literal(node, source)),
        "unary_operator" => {
            let operand = node.child_by_field_name("argument");
            let op = node.child(0).map(|n| text_of(n, source)).unwrap_or("");
            match (op, operand.map(|n| node_to_literal(n, source))) {
                ("-", Some(LiteralValue::Int(i))) => LiteralValue::Int(-i),
                ("-", Some(LiteralValue::Float(f))) => LiteralValue::Float(-f),
                _ => LiteralValue::Raw(text_of(node, source).to_string()),
            }
        }
        "tuple" => LiteralValue::Tuple(collect_elements(node, source)),
        "list" => LiteralValue::List(collect_elements(node, source)),
        "dictionary" => {
            let mut pairs = Vec::new();
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if child.kind() == "pair" {
                    let key = child.child_by_field_name("key");
                    let value = child.child_by_field_name("value");
                    if let (Some(k), Some(v)) = (key, value) {
                        pairs.push((node_to_literal(k, source), node_to_literal(v, source)));
                    }
                }
            }
            LiteralValue::Dict(pairs)
        }
        "parenthesized_expression" => node
            .named_child(0)
            .map(|inner| node_to_literal(inner, source))
            .unwrap_or_else(|| LiteralValue::Raw(text_of(node, source).to_string())),
        "call" => param_case(node, source)
            .unwrap_or_else(|| LiteralValue::Raw(text_of(node, source).to_string())),
        _ => LiteralValue::Raw(text_of(node, source).to_string()),
    }
}

/// Recognizes `pytest.param(v1, v2, id="...", marks=...)`.
fn param_case(node: Node, source: &str) -> Option<LiteralValue> {
    let callee = node
        .child_by_field_name("function")
        .map(|n| text_of(n, source))?;
    if callee != "pytest.param" && callee != "param" {
        return None;
    }
    let arglist = node.child_by_field_name("arguments")?;
    let mut values = Vec::new();
    let mut id = None;
    let mut marks = Vec::new();
    let mut cursor = arglist.walk();
    for arg in arglist.named_children(&mut cursor) {
        if arg.kind() == "keyword_argument" {
            let name = arg.child_by_field_name("name").map(|n| text_of(n, source));
            let value = arg.child_by_field_name("value");
            match (name, value) {
                (Some("id"), Some(v)) => {
                    if let LiteralValue::Str(s) = node_to_literal(v, source) {
                        id = Some(s);
                    }
                }
                (Some("marks"), Some(v)) => {
                    marks.push(text_of(v, source).to_string());
                }
                _ => {}
            }
        } else {
            values.push(node_to_literal(arg, source));
        }
    }
    Some(LiteralValue::ParamCase { values, id, marks })
}

fn collect_elements(node: Node, source: &str) -> Vec<LiteralValue> {
    let mut items = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        items.push(node_to_literal(child, source));
    }
    items
}

fn text_of<'a>(node: Node, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

/// Strips Python string-literal quoting/prefixes. Handles the common single-
/// and triple-quoted forms; does not perform escape decoding beyond what's
/// needed for typical test ids and literal fixture values.
fn decode_string_literal(node: Node, source: &str) -> String {
    let raw = text_of(node, source);
    let trimmed = raw.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
        {
            return inner.to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::Parser;

    fn parse_expr(src: &str) -> (tree_sitter::Tree, String) {
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_python::language()).unwrap();
        let wrapped = format!("x = {src}\n");
        let tree = parser.parse(&wrapped, None).unwrap();
        (tree, wrapped)
    }

    fn value_node(tree: &tree_sitter::Tree) -> tree_sitter::Node<'_> {
        let root = tree.root_node();
        let assignment = root.child(0).unwrap().child(0).unwrap();
        assignment.child_by_field_name("right").unwrap()
    }

    #[test]
    fn parses_int_and_negative_int() {
        let (tree, src) = parse_expr("42");
        assert_eq!(node_to_literal(value_node(&tree), &src), LiteralValue::Int(42));
        let (tree, src) = parse_expr("-7");
        assert_eq!(node_to_literal(value_node(&tree), &src), LiteralValue::Int(-7));
    }

    #[test]
    fn parses_tuple_of_mixed_literals() {
        let (tree, src) = parse_expr("(1, 'a', True, None)");
        let lit = node_to_literal(value_node(&tree), &src);
        assert_eq!(
            lit,
            LiteralValue::Tuple(vec![
                LiteralValue::Int(1),
                LiteralValue::Str("a".to_string()),
                LiteralValue::Bool(true),
                LiteralValue::None,
            ])
        );
    }

    #[test]
    fn unrecognized_expression_falls_back_to_raw_text() {
        let (tree, src) = parse_expr("some_call(1)");
        let lit = node_to_literal(value_node(&tree), &src);
        assert_eq!(lit, LiteralValue::Raw("some_call(1)".to_string()));
    }
}
