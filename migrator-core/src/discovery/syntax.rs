//! Go source parsing on top of tree-sitter.
//!
//! The concrete syntax tree is lowered into a small plain-data model: the
//! package clause, import specs, and every call expression with its argument
//! expressions. Discovery works on that model only.

use std::fmt;

use tree_sitter::{Node, Parser};

/// Parsed view of one Go source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceFile {
    pub package: String,
    pub imports: Vec<ImportSpec>,
    pub calls: Vec<CallExpr>,
}

/// One entry of an `import` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    /// Explicit local name: an identifier, `_` or `.`.
    pub name: Option<String>,
    pub path: String,
}

/// A call expression whose callee is an identifier or a selector chain.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub fun: Expr,
    pub args: Vec<Expr>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident(String),
    Selector(Box<Expr>, String),
    /// A string literal, already unquoted and unescaped.
    StringLit(String),
    /// Number, imaginary or rune literal, kept as written.
    BasicLit(String),
    Composite {
        ty: Option<Box<Expr>>,
        elts: Vec<Element>,
    },
    Call(Box<CallExpr>),
    Unary(char, Box<Expr>),
    Paren(Box<Expr>),
    /// Anything computed: binary expressions, indexing, function literals.
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    KeyValue { key: Expr, value: Expr },
    Value(Expr),
}

impl Expr {
    /// Short description of the expression's shape, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Ident(_) => "identifier",
            Expr::Selector(..) => "selector expression",
            Expr::StringLit(_) => "string literal",
            Expr::BasicLit(_) => "non-string literal",
            Expr::Composite { .. } => "composite literal",
            Expr::Call(_) => "call expression",
            Expr::Unary(..) => "unary expression",
            Expr::Paren(_) => "parenthesized expression",
            Expr::Other(_) => "computed expression",
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ident(name) => write!(f, "{}", name),
            Expr::Selector(x, sel) => write!(f, "{}.{}", x, sel),
            Expr::StringLit(v) => write!(f, "{:?}", v),
            Expr::BasicLit(v) | Expr::Other(v) => write!(f, "{}", v),
            Expr::Composite { ty, .. } => match ty {
                Some(ty) => write!(f, "{}{{...}}", ty),
                None => write!(f, "{{...}}"),
            },
            Expr::Call(call) => write!(f, "{}(...)", call.fun),
            Expr::Unary(op, x) => write!(f, "{}{}", op, x),
            Expr::Paren(x) => write!(f, "({})", x),
        }
    }
}

/// Error produced when a file does not parse as Go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for SyntaxError {}


/// Parse Go source text into a [`SourceFile`].
///
/// A leading byte order mark is ignored. Any syntax error rejects the whole file.
pub fn parse_file(source: &str) -> Result<SourceFile, SyntaxError> {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);

    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_go::LANGUAGE.into())
        .map_err(|e| SyntaxError {
            line: 1,
            message: format!("failed to load Go grammar: {}", e),
        })?;
    let tree = parser.parse(source, None).ok_or_else(|| SyntaxError {
        line: 1,
        message: "parse was cancelled".to_string(),
    })?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(first_error(root).unwrap_or_else(|| SyntaxError {
            line: 1,
            message: "syntax error".to_string(),
        }));
    }

    let src = source.as_bytes();
    let mut package = None;
    let mut imports = Vec::new();
    for child in children(root) {
        match child.kind() {
            "package_clause" => {
                package = children(child)
                    .into_iter()
                    .find(|n| n.kind() == "package_identifier")
                    .map(|n| text(n, src).to_string());
            }
            "import_declaration" => collect_imports(child, src, &mut imports),
            _ => {}
        }
    }
    let package = package.ok_or_else(|| SyntaxError {
        line: 1,
        message: "expected 'package' clause".to_string(),
    })?;

    let mut calls = Vec::new();
    collect_calls(root, src, &mut calls);

    Ok(SourceFile {
        package,
        imports,
        calls,
    })
}

/// Named, non-comment children of `node`.
fn children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    let nodes = node
        .named_children(&mut cursor)
        .filter(|n| !n.is_extra())
        .collect();
    nodes
}

fn text<'s>(node: Node<'_>, src: &'s [u8]) -> &'s str {
    node.utf8_text(src).unwrap_or_default()
}

fn first_error(node: Node<'_>) -> Option<SyntaxError> {
    if node.is_error() || node.is_missing() {
        let message = if node.is_missing() {
            format!("missing {}", node.kind())
        } else {
            "syntax error".to_string()
        };
        return Some(SyntaxError {
            line: node.start_position().row + 1,
            message,
        });
    }

    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .filter(|c| c.has_error() || c.is_missing())
        .find_map(first_error);
    found
}

fn collect_imports(decl: Node<'_>, src: &[u8], imports: &mut Vec<ImportSpec>) {
    for child in children(decl) {
        match child.kind() {
            "import_spec" => imports.extend(import_spec(child, src)),
            "import_spec_list" => imports.extend(
                children(child)
                    .into_iter()
                    .filter(|n| n.kind() == "import_spec")
                    .filter_map(|n| import_spec(n, src)),
            ),
            _ => {}
        }
    }
}

fn import_spec(node: Node<'_>, src: &[u8]) -> Option<ImportSpec> {
    let path = node.child_by_field_name("path")?;
    Some(ImportSpec {
        name: node
            .child_by_field_name("name")
            .map(|n| text(n, src).to_string()),
        path: string_value(path, src)?,
    })
}

/// Record every call expression in the subtree, outermost first.
fn collect_calls(node: Node<'_>, src: &[u8], calls: &mut Vec<CallExpr>) {
    if node.kind() == "call_expression" {
        if let Some(call) = call_expr(node, src) {
            calls.push(call);
        }
    }
    for child in children(node) {
        collect_calls(child, src, calls);
    }
}

fn call_expr(node: Node<'_>, src: &[u8]) -> Option<CallExpr> {
    let fun = node.child_by_field_name("function")?;
    let args = node.child_by_field_name("arguments")?;
    Some(CallExpr {
        fun: expr(fun, src),
        args: children(args).into_iter().map(|a| expr(a, src)).collect(),
        line: node.start_position().row + 1,
    })
}

fn other(node: Node<'_>, src: &[u8]) -> Expr {
    Expr::Other(text(node, src).to_string())
}

fn expr(node: Node<'_>, src: &[u8]) -> Expr {
    match node.kind() {
        "identifier" | "field_identifier" | "package_identifier" | "type_identifier" => {
            Expr::Ident(text(node, src).to_string())
        }
        "selector_expression" => {
            match (node.child_by_field_name("operand"), node.child_by_field_name("field")) {
                (Some(operand), Some(field)) => {
                    Expr::Selector(Box::new(expr(operand, src)), text(field, src).to_string())
                }
                _ => other(node, src),
            }
        }
        "qualified_type" => {
            match (node.child_by_field_name("package"), node.child_by_field_name("name")) {
                (Some(package), Some(name)) => Expr::Selector(
                    Box::new(Expr::Ident(text(package, src).to_string())),
                    text(name, src).to_string(),
                ),
                _ => other(node, src),
            }
        }
        "interpreted_string_literal" | "raw_string_literal" => string_value(node, src)
            .map(Expr::StringLit)
            .unwrap_or_else(|| other(node, src)),
        "int_literal" | "float_literal" | "imaginary_literal" | "rune_literal" => {
            Expr::BasicLit(text(node, src).to_string())
        }
        "composite_literal" => match node.child_by_field_name("body") {
            Some(body) => Expr::Composite {
                ty: node
                    .child_by_field_name("type")
                    .map(|ty| Box::new(expr(ty, src))),
                elts: elements(body, src),
            },
            None => other(node, src),
        },
        // Elided composite type inside another composite literal
        "literal_value" => Expr::Composite {
            ty: None,
            elts: elements(node, src),
        },
        "literal_element" => match children(node).first() {
            Some(inner) => expr(*inner, src),
            None => other(node, src),
        },
        "call_expression" => match call_expr(node, src) {
            Some(call) => Expr::Call(Box::new(call)),
            None => other(node, src),
        },
        "unary_expression" => {
            let op = node
                .child_by_field_name("operator")
                .map(|op| text(op, src))
                .and_then(|op| {
                    let mut chars = op.chars();
                    chars.next().filter(|_| chars.next().is_none())
                });
            match (op, node.child_by_field_name("operand")) {
                (Some(op), Some(operand)) => Expr::Unary(op, Box::new(expr(operand, src))),
                _ => other(node, src),
            }
        }
        "parenthesized_expression" => match children(node).first() {
            Some(inner) => Expr::Paren(Box::new(expr(*inner, src))),
            None => other(node, src),
        },
        _ => other(node, src),
    }
}

fn elements(body: Node<'_>, src: &[u8]) -> Vec<Element> {
    children(body)
        .into_iter()
        .map(|elt| {
            if elt.kind() != "keyed_element" {
                return Element::Value(expr(elt, src));
            }
            match children(elt).as_slice() {
                [key, value] => Element::KeyValue {
                    key: expr(*key, src),
                    value: expr(*value, src),
                },
                _ => Element::Value(other(elt, src)),
            }
        })
        .collect()
}

/// Value of a string literal node, unquoted and unescaped.
fn string_value(node: Node<'_>, src: &[u8]) -> Option<String> {
    let raw = text(node, src);
    match node.kind() {
        "raw_string_literal" => {
            let body = raw.strip_prefix('`')?.strip_suffix('`')?;
            // Carriage returns are discarded from raw strings
            Some(body.replace('\r', ""))
        }
        "interpreted_string_literal" => unescape(raw.strip_prefix('"')?.strip_suffix('"')?),
        _ => None,
    }
}

fn unescape(body: &str) -> Option<String> {
    let mut out = Vec::with_capacity(body.len());
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            push_char(&mut out, c);
            continue;
        }
        match chars.next()? {
            'a' => out.push(0x07),
            'b' => out.push(0x08),
            'f' => out.push(0x0c),
            'n' => out.push(b'\n'),
            'r' => out.push(b'\r'),
            't' => out.push(b'\t'),
            'v' => out.push(0x0b),
            '\\' => out.push(b'\\'),
            '\'' => out.push(b'\''),
            '"' => out.push(b'"'),
            'x' => out.push(u8::from_str_radix(&take(&mut chars, 2)?, 16).ok()?),
            'u' => push_char(&mut out, code_point(&take(&mut chars, 4)?)?),
            'U' => push_char(&mut out, code_point(&take(&mut chars, 8)?)?),
            d @ '0'..='7' => {
                let digits = format!("{}{}", d, take(&mut chars, 2)?);
                out.push(u8::from_str_radix(&digits, 8).ok()?);
            }
            _ => return None,
        }
    }

    // \x and octal escapes may form invalid UTF-8
    Some(String::from_utf8_lossy(&out).into_owned())
}

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

fn take(chars: &mut std::str::Chars<'_>, n: usize) -> Option<String> {
    let s: String = chars.by_ref().take(n).collect();
    (s.chars().count() == n).then_some(s)
}

fn code_point(hex: &str) -> Option<char> {
    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
}
