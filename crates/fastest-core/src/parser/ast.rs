//! Grammar-based scanner over Python source, built on `tree-sitter-python`.
//! Produces raw structural facts (functions, classes, decorator call data,
//! parameter names) without ever evaluating source. Higher layers
//! (`markers`, `parametrize`, `discovery`) turn these facts into the
//! crate's data model.

use anyhow::{anyhow, Result};
use tree_sitter::{Node, Parser};

use super::literal::node_to_literal;
use crate::model::LiteralValue;

/// A decorator call recorded as data: `@<callee>(<args>, <kwargs>)`. A bare
/// decorator with no call (`@fixture`) has empty args/kwargs.
#[derive(Debug, Clone)]
pub struct RawDecorator {
    pub callee: String,
    pub args: Vec<LiteralValue>,
    pub kwargs: Vec<(String, LiteralValue)>,
}

#[derive(Debug, Clone)]
pub struct RawFunction {
    pub name: String,
    pub line: usize,
    pub is_async: bool,
    pub class_name: Option<String>,
    pub decorators: Vec<RawDecorator>,
    pub parameters: Vec<String>,
    /// `true` if the function body contains a `yield` (the setup/teardown
    /// fixture pattern).
    pub has_yield: bool,
}

#[derive(Debug, Clone)]
pub struct RawClass {
    pub name: String,
    pub base_names: Vec<String>,
}

#[derive(Default, Debug)]
pub struct ScanResult {
    pub functions: Vec<RawFunction>,
    pub classes: Vec<RawClass>,
}

pub struct AstScanner {
    parser: Parser,
}

impl AstScanner {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::language())
            .map_err(|e| anyhow!("failed to load python grammar: {e}"))?;
        Ok(Self { parser })
    }

    pub fn scan(&mut self, source: &str) -> Result<ScanResult> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| anyhow!("tree-sitter failed to produce a parse tree"))?;
        let mut out = ScanResult::default();
        visit(tree.root_node(), source, &mut out, None);
        Ok(out)
    }
}

fn visit(node: Node, source: &str, out: &mut ScanResult, current_class: Option<&str>) {
    match node.kind() {
        "decorated_definition" => {
            let decorators = collect_decorators(node, source);
            if let Some(def) = node.child_by_field_name("definition") {
                match def.kind() {
                    "function_definition" => {
                        record_function(def, source, out, current_class, decorators);
                    }
                    "class_definition" => {
                        record_class_and_recurse(def, source, out);
                    }
                    _ => {}
                }
            }
        }
        "function_definition" => {
            record_function(node, source, out, current_class, Vec::new());
        }
        "class_definition" => {
            record_class_and_recurse(node, source, out);
        }
        _ => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                visit(child, source, out, current_class);
            }
        }
    }
}

fn record_class_and_recurse(node: Node, source: &str, out: &mut ScanResult) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let class_name = text_of(name_node, source).to_string();
    let base_names = node
        .child_by_field_name("superclasses")
        .map(|args| {
            let mut cursor = args.walk();
            args.named_children(&mut cursor)
                .map(|n| text_of(n, source).to_string())
                .collect()
        })
        .unwrap_or_default();
    out.classes.push(RawClass {
        name: class_name.clone(),
        base_names,
    });

    // Nested classes are not discovered: only recurse into the body for
    // function definitions, not into further class_definitions.
    if let Some(body) = node.child_by_field_name("body") {
        let mut cursor = body.walk();
        for child in body.children(&mut cursor) {
            match child.kind() {
                "class_definition" | "decorated_definition"
                    if is_nested_class(child) =>
                {
                    // skip: nested classes are not discovered
                }
                _ => visit(child, source, out, Some(&class_name)),
            }
        }
    }
}

fn is_nested_class(node: Node) -> bool {
    match node.kind() {
        "class_definition" => true,
        "decorated_definition" => node
            .child_by_field_name("definition")
            .map(|d| d.kind() == "class_definition")
            .unwrap_or(false),
        _ => false,
    }
}

fn record_function(
    node: Node,
    source: &str,
    out: &mut ScanResult,
    current_class: Option<&str>,
    decorators: Vec<RawDecorator>,
) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let is_async = node.child(0).map(|n| n.kind() == "async").unwrap_or(false);
    let parameters = node
        .child_by_field_name("parameters")
        .map(|params| collect_parameter_names(params, source))
        .unwrap_or_default();
    let has_yield = node
        .child_by_field_name("body")
        .map(|body| contains_yield(body))
        .unwrap_or(false);

    out.functions.push(RawFunction {
        name: text_of(name_node, source).to_string(),
        line: name_node.start_position().row + 1,
        is_async,
        class_name: current_class.map(String::from),
        decorators,
        parameters,
        has_yield,
    });
}

fn contains_yield(node: Node) -> bool {
    if matches!(node.kind(), "yield" | "yield_expression") {
        return true;
    }
    // Don't descend into nested function/lambda bodies: their yields belong
    // to the nested scope, not this function.
    if matches!(node.kind(), "function_definition" | "lambda") {
        return false;
    }
    let mut cursor = node.walk();
    let result = node.children(&mut cursor).any(contains_yield);
    result
}

fn collect_parameter_names(params: Node, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = params.walk();
    for child in params.named_children(&mut cursor) {
        let name_node = match child.kind() {
            "identifier" => Some(child),
            "typed_parameter" | "default_parameter" | "typed_default_parameter" => {
                child.child_by_field_name("name").or_else(|| child.child(0))
            }
            _ => None,
        };
        if let Some(n) = name_node {
            let name = text_of(n, source);
            if name != "self" && name != "cls" {
                names.push(name.to_string());
            }
        }
    }
    names
}

fn collect_decorators(node: Node, source: &str) -> Vec<RawDecorator> {
    let mut out = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "decorator" {
            if let Some(expr) = child.named_child(0) {
                out.push(decorator_from_expr(expr, source));
            }
        }
    }
    out
}

fn decorator_from_expr(expr: Node, source: &str) -> RawDecorator {
    match expr.kind() {
        "call" => {
            let callee = expr
                .child_by_field_name("function")
                .map(|n| text_of(n, source).to_string())
                .unwrap_or_default();
            let mut args = Vec::new();
            let mut kwargs = Vec::new();
            if let Some(arglist) = expr.child_by_field_name("arguments") {
                let mut cursor = arglist.walk();
                for arg in arglist.named_children(&mut cursor) {
                    if arg.kind() == "keyword_argument" {
                        if let (Some(name_node), Some(value_node)) = (
                            arg.child_by_field_name("name"),
                            arg.child_by_field_name("value"),
                        ) {
                            kwargs.push((
                                text_of(name_node, source).to_string(),
                                node_to_literal(value_node, source),
                            ));
                        }
                    } else {
                        args.push(node_to_literal(arg, source));
                    }
                }
            }
            RawDecorator { callee, args, kwargs }
        }
        _ => RawDecorator {
            callee: text_of(expr, source).to_string(),
            args: Vec::new(),
            kwargs: Vec::new(),
        },
    }
}

fn text_of<'a>(node: Node, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_simple_function() {
        let mut scanner = AstScanner::new().unwrap();
        let result = scanner.scan("def test_ok():\n    assert 1 + 1 == 2\n").unwrap();
        assert_eq!(result.functions.len(), 1);
        assert_eq!(result.functions[0].name, "test_ok");
        assert!(!result.functions[0].is_async);
    }

    #[test]
    fn scans_class_methods_and_skips_nested_classes() {
        let src = r#"
class TestThing:
    def test_one(self):
        pass

    class Inner:
        def test_should_not_appear(self):
            pass

class NotATest:
    def test_ignored(self):
        pass
"#;
        let mut scanner = AstScanner::new().unwrap();
        let result = scanner.scan(src).unwrap();
        assert_eq!(result.classes.len(), 3);
        let names: Vec<_> = result.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["test_one", "test_ignored"]);
        assert_eq!(result.functions[0].class_name.as_deref(), Some("TestThing"));
    }

    #[test]
    fn scans_parametrize_decorator_with_literal_args() {
        let src = r#"
@pytest.mark.parametrize("x,y,expected", [(1, 2, 3), (4, 5, 9)])
def test_add(x, y, expected):
    assert x + y == expected
"#;
        let mut scanner = AstScanner::new().unwrap();
        let result = scanner.scan(src).unwrap();
        let f = &result.functions[0];
        assert_eq!(f.parameters, vec!["x", "y", "expected"]);
        assert_eq!(f.decorators.len(), 1);
        assert_eq!(f.decorators[0].callee, "pytest.mark.parametrize");
        assert_eq!(
            f.decorators[0].args[0],
            LiteralValue::Str("x,y,expected".to_string())
        );
    }

    #[test]
    fn detects_async_function() {
        let mut scanner = AstScanner::new().unwrap();
        let result = scanner
            .scan("async def test_async():\n    await thing()\n")
            .unwrap();
        assert!(result.functions[0].is_async);
    }
}
