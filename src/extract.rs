//! Per-file AST extraction
//!
//! Parses one source file and pulls out the raw material the graph builder
//! needs: symbol declarations (functions, classes, methods, imports),
//! references (calls, extends, implements), and import statements. Extraction
//! is purely syntactic; resolution against other files happens later in the
//! builder.

use std::path::Path;

use tree_sitter::{Node as AstNode, Tree};

use crate::error::{Result, RetrievalError};
use crate::graph::NodeType;
use crate::lang::Lang;

/// A symbol declaration found in a file
#[derive(Debug, Clone)]
pub struct ExtractedSymbol {
    pub name: String,
    pub node_type: NodeType,
    /// Fine-grained kind: "function", "method", "class", "arrow_function", "import"
    pub kind: String,
    /// AST node type this symbol came from
    pub ast_type: String,
    /// 1-based inclusive line range
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub content: String,
    pub signature: Option<String>,
    pub parameters: Vec<String>,
    pub return_type: Option<String>,
    /// Documentation from adjacent comments (or a Python docstring)
    pub documentation: Option<String>,
    pub exported: bool,
    pub parent_name: Option<String>,
    pub parent_type: Option<String>,
}

/// Kind of reference a symbol makes to another name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Calls,
    Extends,
    Implements,
}

/// A reference from inside a symbol to a (not yet resolved) name
#[derive(Debug, Clone)]
pub struct ExtractedReference {
    /// Index into the extraction's symbol list; `None` for file scope
    pub from_symbol: Option<usize>,
    /// Referenced name, the innermost identifier of the callee
    pub target: String,
    pub kind: ReferenceKind,
    /// 1-based line of the reference
    pub line: usize,
}

/// One import statement
#[derive(Debug, Clone)]
pub struct ExtractedImport {
    /// Imported symbol names (empty for bare / namespace imports)
    pub names: Vec<String>,
    /// Module specifier as written in source
    pub source: String,
    pub line: usize,
}

/// Everything extracted from a single file
#[derive(Debug, Clone, Default)]
pub struct FileExtraction {
    pub symbols: Vec<ExtractedSymbol>,
    pub references: Vec<ExtractedReference>,
    pub imports: Vec<ExtractedImport>,
}

/// Parse source text for a language
pub fn parse_source(file_path: &Path, source: &str, lang: Lang) -> Result<Tree> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&lang.tree_sitter_language())
        .map_err(|e| RetrievalError::Parse {
            message: format!("failed to set language for {}: {:?}", file_path.display(), e),
        })?;
    parser.parse(source, None).ok_or_else(|| RetrievalError::Parse {
        message: format!("failed to parse {}", file_path.display()),
    })
}

/// Parse and extract in one step
pub fn parse_and_extract(file_path: &Path, source: &str, lang: Lang) -> Result<FileExtraction> {
    let tree = parse_source(file_path, source, lang)?;
    Ok(extract(source, &tree, lang))
}

/// Extract symbols, references and imports from a parsed file
pub fn extract(source: &str, tree: &Tree, lang: Lang) -> FileExtraction {
    let mut extraction = FileExtraction::default();
    let root = tree.root_node();
    if lang.is_javascript_family() {
        let mut ctx = WalkContext::default();
        walk_js(&root, source, &mut extraction, &mut ctx);
    } else {
        let mut ctx = WalkContext::default();
        walk_python(&root, source, &mut extraction, &mut ctx);
    }
    extraction
}

#[derive(Debug, Clone, Default)]
struct WalkContext {
    /// Innermost enclosing extracted symbol, if any
    enclosing: Option<usize>,
    /// True inside an `export_statement` subtree
    exported: bool,
}

// ============================================================================
// Shared helpers
// ============================================================================

fn node_text(node: &AstNode, source: &str) -> String {
    source[node.byte_range()].to_string()
}

fn line_of(node: &AstNode) -> usize {
    node.start_position().row + 1
}

/// Declaration signature: source from the node start to its body, collapsed
/// to a single line
fn signature_of(node: &AstNode, source: &str) -> Option<String> {
    let end = node
        .child_by_field_name("body")
        .map(|b| b.start_byte())
        .unwrap_or(node.end_byte());
    let text = source.get(node.start_byte()..end)?;
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim().trim_end_matches('{').trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Documentation from contiguous comment siblings immediately above a node
fn leading_comments(node: &AstNode, source: &str) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = node.prev_sibling();
    // decorated/exported wrappers: comments sit above the wrapper
    while let Some(sibling) = current {
        if sibling.kind() == "comment" {
            lines.push(node_text(&sibling, source));
            current = sibling.prev_sibling();
        } else {
            break;
        }
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    Some(lines.join("\n"))
}

/// Comments above an exported declaration sit above the export statement
fn js_doc_anchor<'a>(node: &AstNode<'a>) -> AstNode<'a> {
    match node.parent() {
        Some(parent) if parent.kind() == "export_statement" => parent,
        _ => *node,
    }
}

fn first_identifier_text(node: &AstNode, source: &str) -> Option<String> {
    if matches!(
        node.kind(),
        "identifier" | "property_identifier" | "type_identifier"
    ) {
        return Some(node_text(node, source));
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_identifier_text(&child, source) {
            return Some(found);
        }
    }
    None
}

/// Innermost identifier of a callee expression: for `a.b.c(...)` this is `c`
fn innermost_callee_identifier(node: &AstNode, source: &str) -> Option<String> {
    match node.kind() {
        "identifier" | "property_identifier" => Some(node_text(node, source)),
        "member_expression" => node
            .child_by_field_name("property")
            .and_then(|p| innermost_callee_identifier(&p, source)),
        "attribute" => node
            .child_by_field_name("attribute")
            .and_then(|a| innermost_callee_identifier(&a, source)),
        // parenthesized / awaited / non-null-asserted callees
        _ => {
            let mut cursor = node.walk();
            let children: Vec<AstNode> = node.children(&mut cursor).collect();
            children
                .into_iter()
                .rev()
                .find_map(|c| innermost_callee_identifier(&c, source))
        }
    }
}

// ============================================================================
// JavaScript / TypeScript
// ============================================================================

fn walk_js(node: &AstNode, source: &str, out: &mut FileExtraction, ctx: &mut WalkContext) {
    match node.kind() {
        "export_statement" => {
            let mut inner = ctx.clone();
            inner.exported = true;
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                walk_js(&child, source, out, &mut inner);
            }
            return;
        }
        "function_declaration" | "generator_function_declaration" => {
            if let Some(index) = push_js_function(node, source, out, ctx, "function") {
                descend_js(node, source, out, ctx, index);
                return;
            }
        }
        "method_definition" => {
            if let Some(index) = push_js_function(node, source, out, ctx, "method") {
                descend_js(node, source, out, ctx, index);
                return;
            }
        }
        "class_declaration" => {
            if let Some(index) = push_js_class(node, source, out, ctx) {
                descend_js(node, source, out, ctx, index);
                return;
            }
        }
        "variable_declarator" => {
            // const handler = (req) => {...} and friends
            let value_kind = node.child_by_field_name("value").map(|v| v.kind());
            if matches!(
                value_kind,
                Some("arrow_function") | Some("function_expression") | Some("function")
            ) {
                if let Some(index) = push_js_arrow(node, source, out, ctx) {
                    descend_js(node, source, out, ctx, index);
                    return;
                }
            }
        }
        "import_statement" => {
            collect_js_import(node, source, out, ctx);
            return;
        }
        "call_expression" => {
            if let Some(function) = node.child_by_field_name("function") {
                if let Some(target) = innermost_callee_identifier(&function, source) {
                    out.references.push(ExtractedReference {
                        from_symbol: ctx.enclosing,
                        target,
                        kind: ReferenceKind::Calls,
                        line: line_of(node),
                    });
                }
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_js(&child, source, out, ctx);
    }
}

fn descend_js(
    node: &AstNode,
    source: &str,
    out: &mut FileExtraction,
    ctx: &WalkContext,
    enclosing: usize,
) {
    let mut inner = WalkContext {
        enclosing: Some(enclosing),
        exported: ctx.exported,
    };
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_js(&child, source, out, &mut inner);
    }
}

fn push_js_function(
    node: &AstNode,
    source: &str,
    out: &mut FileExtraction,
    ctx: &WalkContext,
    kind: &str,
) -> Option<usize> {
    let name_node = node.child_by_field_name("name")?;
    let name = node_text(&name_node, source);
    let (parent_name, parent_type) = parent_of(out, ctx);

    let parameters = node
        .child_by_field_name("parameters")
        .map(|p| split_js_parameters(&p, source))
        .unwrap_or_default();
    let return_type = node
        .child_by_field_name("return_type")
        .map(|r| node_text(&r, source).trim_start_matches(':').trim().to_string());

    out.symbols.push(ExtractedSymbol {
        name,
        node_type: NodeType::Function,
        kind: kind.to_string(),
        ast_type: node.kind().to_string(),
        start_line: line_of(node),
        end_line: node.end_position().row + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        content: node_text(node, source),
        signature: signature_of(node, source),
        parameters,
        return_type,
        documentation: leading_comments(&js_doc_anchor(node), source),
        // Methods inherit visibility from their class via the walk context
        exported: ctx.exported,
        parent_name,
        parent_type,
    });
    Some(out.symbols.len() - 1)
}

fn push_js_class(
    node: &AstNode,
    source: &str,
    out: &mut FileExtraction,
    ctx: &WalkContext,
) -> Option<usize> {
    let name_node = node.child_by_field_name("name")?;
    let name = node_text(&name_node, source);
    let (parent_name, parent_type) = parent_of(out, ctx);

    out.symbols.push(ExtractedSymbol {
        name,
        node_type: NodeType::Class,
        kind: "class".to_string(),
        ast_type: node.kind().to_string(),
        start_line: line_of(node),
        end_line: node.end_position().row + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        content: node_text(node, source),
        signature: signature_of(node, source),
        parameters: Vec::new(),
        return_type: None,
        documentation: leading_comments(&js_doc_anchor(node), source),
        exported: ctx.exported,
        parent_name,
        parent_type,
    });
    let index = out.symbols.len() - 1;

    collect_js_heritage(node, source, out, index);
    Some(index)
}

/// `extends` / `implements` clauses of a class
fn collect_js_heritage(class: &AstNode, source: &str, out: &mut FileExtraction, from: usize) {
    let mut cursor = class.walk();
    for child in class.children(&mut cursor) {
        if child.kind() != "class_heritage" {
            continue;
        }
        // TS wraps extends/implements in dedicated clauses; plain JS puts the
        // expression directly under class_heritage.
        let mut inner = child.walk();
        let clauses: Vec<AstNode> = child.children(&mut inner).collect();
        let mut saw_clause = false;
        for clause in &clauses {
            let kind = match clause.kind() {
                "extends_clause" => Some(ReferenceKind::Extends),
                "implements_clause" => Some(ReferenceKind::Implements),
                _ => None,
            };
            if let Some(kind) = kind {
                saw_clause = true;
                for target in identifier_list(clause, source) {
                    out.references.push(ExtractedReference {
                        from_symbol: Some(from),
                        target,
                        kind,
                        line: line_of(clause),
                    });
                }
            }
        }
        if !saw_clause {
            if let Some(target) = first_identifier_text(&child, source) {
                out.references.push(ExtractedReference {
                    from_symbol: Some(from),
                    target,
                    kind: ReferenceKind::Extends,
                    line: line_of(&child),
                });
            }
        }
    }
}

fn identifier_list(node: &AstNode, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    collect_identifiers(node, source, &mut names);
    names
}

fn collect_identifiers(node: &AstNode, source: &str, out: &mut Vec<String>) {
    if matches!(node.kind(), "identifier" | "type_identifier") {
        out.push(node_text(node, source));
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_identifiers(&child, source, out);
    }
}

fn push_js_arrow(
    declarator: &AstNode,
    source: &str,
    out: &mut FileExtraction,
    ctx: &WalkContext,
) -> Option<usize> {
    let name_node = declarator.child_by_field_name("name")?;
    if name_node.kind() != "identifier" {
        return None;
    }
    let name = node_text(&name_node, source);
    let value = declarator.child_by_field_name("value")?;
    let (parent_name, parent_type) = parent_of(out, ctx);

    let parameters = value
        .child_by_field_name("parameters")
        .map(|p| split_js_parameters(&p, source))
        .unwrap_or_default();
    let return_type = value
        .child_by_field_name("return_type")
        .map(|r| node_text(&r, source).trim_start_matches(':').trim().to_string());

    // Attach docs from the enclosing declaration statement
    let statement = declarator.parent().unwrap_or(*declarator);
    let doc_anchor = statement.parent().map(|p| {
        if p.kind() == "export_statement" {
            p
        } else {
            statement
        }
    });

    out.symbols.push(ExtractedSymbol {
        name,
        node_type: NodeType::Function,
        kind: "arrow_function".to_string(),
        ast_type: value.kind().to_string(),
        start_line: line_of(declarator),
        end_line: declarator.end_position().row + 1,
        start_byte: declarator.start_byte(),
        end_byte: declarator.end_byte(),
        content: node_text(declarator, source),
        signature: signature_of(&value, source).map(|s| format!("{} = {}", name_of_sig(declarator, source), s)),
        parameters,
        return_type,
        documentation: doc_anchor.and_then(|a| leading_comments(&a, source)),
        exported: ctx.exported,
        parent_name,
        parent_type,
    });
    Some(out.symbols.len() - 1)
}

fn name_of_sig(declarator: &AstNode, source: &str) -> String {
    declarator
        .child_by_field_name("name")
        .map(|n| node_text(&n, source))
        .unwrap_or_default()
}

fn split_js_parameters(params: &AstNode, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = params.walk();
    for child in params.children(&mut cursor) {
        if matches!(child.kind(), "(" | ")" | ",") {
            continue;
        }
        if let Some(name) = first_identifier_text(&child, source) {
            names.push(name);
        }
    }
    names
}

fn collect_js_import(node: &AstNode, source: &str, out: &mut FileExtraction, ctx: &WalkContext) {
    let Some(source_node) = node.child_by_field_name("source") else {
        return;
    };
    let specifier = node_text(&source_node, source)
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .to_string();

    let mut names = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "import_clause" {
            continue;
        }
        let mut inner = child.walk();
        for part in child.children(&mut inner) {
            match part.kind() {
                // default import
                "identifier" => names.push(node_text(&part, source)),
                "named_imports" => {
                    let mut spec_cursor = part.walk();
                    for spec in part.children(&mut spec_cursor) {
                        if spec.kind() == "import_specifier" {
                            if let Some(name) = spec.child_by_field_name("name") {
                                names.push(node_text(&name, source));
                            }
                        }
                    }
                }
                "namespace_import" => {
                    if let Some(alias) = first_identifier_text(&part, source) {
                        names.push(alias);
                    }
                }
                _ => {}
            }
        }
    }

    out.imports.push(ExtractedImport {
        names: names.clone(),
        source: specifier.clone(),
        line: line_of(node),
    });
    out.symbols.push(import_symbol(node, source, &specifier, ctx));
}

fn import_symbol(
    node: &AstNode,
    source: &str,
    specifier: &str,
    _ctx: &WalkContext,
) -> ExtractedSymbol {
    ExtractedSymbol {
        name: specifier.to_string(),
        node_type: NodeType::Import,
        kind: "import".to_string(),
        ast_type: node.kind().to_string(),
        start_line: line_of(node),
        end_line: node.end_position().row + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        content: node_text(node, source),
        signature: None,
        parameters: Vec::new(),
        return_type: None,
        documentation: None,
        exported: false,
        parent_name: None,
        parent_type: None,
    }
}

// ============================================================================
// Python
// ============================================================================

fn walk_python(node: &AstNode, source: &str, out: &mut FileExtraction, ctx: &mut WalkContext) {
    match node.kind() {
        "function_definition" => {
            if let Some(index) = push_python_function(node, source, out, ctx) {
                let mut inner = WalkContext {
                    enclosing: Some(index),
                    exported: ctx.exported,
                };
                if let Some(body) = node.child_by_field_name("body") {
                    walk_python(&body, source, out, &mut inner);
                }
                return;
            }
        }
        "class_definition" => {
            if let Some(index) = push_python_class(node, source, out, ctx) {
                let mut inner = WalkContext {
                    enclosing: Some(index),
                    exported: ctx.exported,
                };
                if let Some(body) = node.child_by_field_name("body") {
                    walk_python(&body, source, out, &mut inner);
                }
                return;
            }
        }
        "import_statement" | "import_from_statement" => {
            collect_python_import(node, source, out);
            return;
        }
        "call" => {
            if let Some(function) = node.child_by_field_name("function") {
                if let Some(target) = innermost_callee_identifier(&function, source) {
                    out.references.push(ExtractedReference {
                        from_symbol: ctx.enclosing,
                        target,
                        kind: ReferenceKind::Calls,
                        line: line_of(node),
                    });
                }
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_python(&child, source, out, ctx);
    }
}

/// Python convention: a top-level name without a leading underscore is
/// importable, which is the closest analogue of an export flag
fn python_exported(name: &str, ctx: &WalkContext) -> bool {
    !name.starts_with('_') && ctx.enclosing.is_none()
}

fn python_docstring(node: &AstNode, source: &str) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    let text = node_text(&string, source);
    Some(text.trim_matches(|c| c == '"' || c == '\'').trim().to_string())
}

fn push_python_function(
    node: &AstNode,
    source: &str,
    out: &mut FileExtraction,
    ctx: &WalkContext,
) -> Option<usize> {
    let name_node = node.child_by_field_name("name")?;
    let name = node_text(&name_node, source);
    let (parent_name, parent_type) = parent_of(out, ctx);
    let is_method = parent_type.as_deref() == Some("class");

    let parameters = node
        .child_by_field_name("parameters")
        .map(|p| split_python_parameters(&p, source))
        .unwrap_or_default();
    let return_type = node
        .child_by_field_name("return_type")
        .map(|r| node_text(&r, source));

    let documentation = python_docstring(node, source)
        .or_else(|| leading_comments(&doc_anchor(node), source));

    out.symbols.push(ExtractedSymbol {
        name: name.clone(),
        node_type: NodeType::Function,
        kind: if is_method { "method" } else { "function" }.to_string(),
        ast_type: node.kind().to_string(),
        start_line: line_of(node),
        end_line: node.end_position().row + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        content: node_text(node, source),
        signature: signature_of(node, source).map(|s| s.trim_end_matches(':').trim().to_string()),
        parameters,
        return_type,
        documentation,
        exported: python_exported(&name, ctx) || (is_method && !name.starts_with('_')),
        parent_name,
        parent_type,
    });
    Some(out.symbols.len() - 1)
}

fn push_python_class(
    node: &AstNode,
    source: &str,
    out: &mut FileExtraction,
    ctx: &WalkContext,
) -> Option<usize> {
    let name_node = node.child_by_field_name("name")?;
    let name = node_text(&name_node, source);
    let (parent_name, parent_type) = parent_of(out, ctx);

    let documentation = python_docstring(node, source)
        .or_else(|| leading_comments(&doc_anchor(node), source));

    out.symbols.push(ExtractedSymbol {
        name: name.clone(),
        node_type: NodeType::Class,
        kind: "class".to_string(),
        ast_type: node.kind().to_string(),
        start_line: line_of(node),
        end_line: node.end_position().row + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        content: node_text(node, source),
        signature: signature_of(node, source).map(|s| s.trim_end_matches(':').trim().to_string()),
        parameters: Vec::new(),
        return_type: None,
        documentation,
        exported: python_exported(&name, ctx),
        parent_name,
        parent_type,
    });
    let index = out.symbols.len() - 1;

    // Base classes: `class Admin(User):` -> extends User
    if let Some(superclasses) = node.child_by_field_name("superclasses") {
        for target in identifier_list(&superclasses, source) {
            out.references.push(ExtractedReference {
                from_symbol: Some(index),
                target,
                kind: ReferenceKind::Extends,
                line: line_of(node),
            });
        }
    }
    Some(index)
}

/// Comments above a decorated definition sit above the decorator wrapper
fn doc_anchor<'a>(node: &AstNode<'a>) -> AstNode<'a> {
    match node.parent() {
        Some(parent) if parent.kind() == "decorated_definition" => parent,
        _ => *node,
    }
}

fn split_python_parameters(params: &AstNode, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = params.walk();
    for child in params.children(&mut cursor) {
        if matches!(child.kind(), "(" | ")" | ",") {
            continue;
        }
        if let Some(name) = first_identifier_text(&child, source) {
            names.push(name);
        }
    }
    names
}

fn collect_python_import(node: &AstNode, source: &str, out: &mut FileExtraction) {
    let mut names = Vec::new();
    let mut specifier = String::new();

    if node.kind() == "import_from_statement" {
        if let Some(module) = node.child_by_field_name("module_name") {
            specifier = node_text(&module, source);
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "dotted_name" || child.kind() == "aliased_import" {
                // the module_name child is also a dotted_name; skip it
                if node
                    .child_by_field_name("module_name")
                    .map(|m| m.id() == child.id())
                    .unwrap_or(false)
                {
                    continue;
                }
                if let Some(name) = first_identifier_text(&child, source) {
                    names.push(name);
                }
            }
        }
    } else {
        // `import a.b, c` -> specifiers are the module paths themselves
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "dotted_name" || child.kind() == "aliased_import" {
                let text = node_text(&child, source);
                if specifier.is_empty() {
                    specifier = text.clone();
                }
                if let Some(name) = first_identifier_text(&child, source) {
                    names.push(name);
                }
            }
        }
    }

    if specifier.is_empty() {
        return;
    }

    out.imports.push(ExtractedImport {
        names,
        source: specifier.clone(),
        line: line_of(node),
    });
    out.symbols.push(ExtractedSymbol {
        name: specifier,
        node_type: NodeType::Import,
        kind: "import".to_string(),
        ast_type: node.kind().to_string(),
        start_line: line_of(node),
        end_line: node.end_position().row + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        content: node_text(node, source),
        signature: None,
        parameters: Vec::new(),
        return_type: None,
        documentation: None,
        exported: false,
        parent_name: None,
        parent_type: None,
    });
}

fn parent_of(out: &FileExtraction, ctx: &WalkContext) -> (Option<String>, Option<String>) {
    match ctx.enclosing {
        Some(index) => {
            let parent = &out.symbols[index];
            (
                Some(parent.name.clone()),
                Some(parent.kind.clone()),
            )
        }
        None => (None, None),
    }
}

// ============================================================================
// Tests
// ============================================================================
