//! C++ front end: lowers tree-sitter syntax trees into declaration events.
//!
//! Files are lowered twice. The first pass harvests every declared type,
//! function and variable into a [`SymbolTable`]; the second lowers each
//! file again against the full table, so a name used in one file resolves
//! to its declaration in another.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};
use tree_sitter::{Node, Parser, Tree};

use super::language::SourceKind;
use crate::error::{Result, RippleError};
use crate::events::{DeclEvent, DeclKind, Reference, SymbolRef, TranslationUnit};
use crate::graph::DependencyKind;

/// Name given to anonymous namespaces and classes.
pub const ANONYMOUS: &str = "(anonymous)";

/// Node kinds that name the entity a declarator declares.
const NAME_KINDS: &[&str] = &[
    "identifier",
    "field_identifier",
    "type_identifier",
    "namespace_identifier",
    "qualified_identifier",
    "destructor_name",
    "operator_name",
    "operator_cast",
    "template_function",
];

/// Declarator kinds that wrap another declarator.
const WRAPPER_KINDS: &[&str] = &[
    "init_declarator",
    "pointer_declarator",
    "reference_declarator",
    "array_declarator",
    "parenthesized_declarator",
    "attributed_declarator",
    "function_declarator",
    "variadic_declarator",
];

// ─── Front end ──────────────────────────────────────────────────

pub struct CppFrontEnd {
    parser: Parser,
}

impl CppFrontEnd {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&SourceKind::tree_sitter_language())
            .map_err(|e| RippleError::Parser(e.to_string()))?;
        Ok(Self { parser })
    }

    /// Parse and lower every file of one version.
    ///
    /// Headers come first in the result so that classes are declared
    /// before the out-of-line definitions of their members.
    pub fn parse_files(&mut self, paths: &[PathBuf]) -> Result<Vec<TranslationUnit>> {
        let mut ordered: Vec<&PathBuf> = paths.iter().collect();
        ordered.sort_by_key(|p| !SourceKind::from_path(p).is_some_and(|k| k.is_header()));

        let mut parsed = Vec::with_capacity(ordered.len());
        for path in ordered {
            let bytes = std::fs::read(path)
                .map_err(|e| RippleError::build(path, None, format!("cannot read file: {e}")))?;
            let source = String::from_utf8_lossy(&bytes).into_owned();
            let tree = self.parse_tree(path, &source)?;
            parsed.push((path.clone(), source, tree));
        }

        let empty = SymbolTable::new();
        let mut table = SymbolTable::new();
        for (path, source, tree) in &parsed {
            table.harvest(&Lowering::new(path, source, &empty).lower(tree));
        }
        debug!(files = parsed.len(), symbols = table.len(), "harvested symbol table");

        Ok(parsed
            .iter()
            .map(|(path, source, tree)| {
                TranslationUnit::new(path.clone(), Lowering::new(path, source, &table).lower(tree))
            })
            .collect())
    }

    /// Lower one in-memory source. Names only resolve within it.
    pub fn parse_source(&mut self, path: impl AsRef<Path>, source: &str) -> Result<TranslationUnit> {
        let path = path.as_ref();
        let tree = self.parse_tree(path, source)?;
        let mut table = SymbolTable::new();
        table.harvest(&Lowering::new(path, source, &SymbolTable::new()).lower(&tree));
        Ok(TranslationUnit::new(
            path,
            Lowering::new(path, source, &table).lower(&tree),
        ))
    }

    fn parse_tree(&mut self, path: &Path, source: &str) -> Result<Tree> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| RippleError::build(path, None, "tree-sitter produced no syntax tree"))?;
        if tree.root_node().has_error() {
            debug!(file = %path.display(), "syntax errors, erroneous regions are skipped");
        }
        Ok(tree)
    }
}

// ─── Symbol table ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct FunctionEntry {
    symbol: String,
    qualified: String,
    arity: usize,
    signature: String,
}

impl FunctionEntry {
    fn to_ref(&self) -> SymbolRef {
        SymbolRef::new(
            self.symbol.as_str(),
            last_segment(&self.qualified),
            self.qualified.as_str(),
            self.signature.as_str(),
        )
    }
}

/// Declarations of one version keyed by qualified name.
///
/// Lookups search outward from a scope: `x` seen in `ns::A` tries
/// `ns::A::x`, then `ns::x`, then `x`. A leading `::` is absolute.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    types: HashMap<String, String>,
    functions: HashMap<String, Vec<FunctionEntry>>,
    variables: HashMap<String, String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.types.len()
            + self.functions.values().map(Vec::len).sum::<usize>()
            + self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record the declarations of `events`. Parameters and locals of
    /// functions are not entered.
    pub fn harvest(&mut self, events: &[DeclEvent]) {
        for event in events {
            let named = event.name != ANONYMOUS;
            match event.kind {
                DeclKind::Class | DeclKind::Enum | DeclKind::Typedef if named => {
                    self.types
                        .entry(event.unique_name.clone())
                        .or_insert_with(|| event.signature.clone());
                }
                DeclKind::Function => {
                    let overloads = self.functions.entry(event.unique_name.clone()).or_default();
                    if !overloads.iter().any(|f| f.symbol == event.symbol.0) {
                        overloads.push(FunctionEntry {
                            symbol: event.symbol.0.clone(),
                            qualified: event.unique_name.clone(),
                            arity: event.params.len(),
                            signature: event.signature.clone(),
                        });
                    }
                    continue;
                }
                DeclKind::Variable => {
                    self.variables
                        .entry(event.unique_name.clone())
                        .or_insert_with(|| event.signature.clone());
                }
                _ => {}
            }
            self.harvest(&event.children);
        }
    }

    pub fn lookup_type(&self, scope: &[String], name: &str) -> Option<SymbolRef> {
        candidates(scope, name).into_iter().find_map(|q| {
            self.types
                .get(&q)
                .map(|sig| SymbolRef::new(q.as_str(), last_segment(&q), q.as_str(), sig.as_str()))
        })
    }

    pub fn lookup_variable(&self, scope: &[String], name: &str) -> Option<SymbolRef> {
        candidates(scope, name).into_iter().find_map(|q| {
            self.variables
                .get(&q)
                .map(|sig| SymbolRef::new(q.as_str(), last_segment(&q), q.as_str(), sig.as_str()))
        })
    }

    /// The overload of `name` taking `arity` arguments, else the first one
    /// declared.
    pub fn lookup_function(&self, scope: &[String], name: &str, arity: usize) -> Option<SymbolRef> {
        candidates(scope, name).into_iter().find_map(|q| {
            let overloads = self.functions.get(&q)?;
            overloads
                .iter()
                .find(|f| f.arity == arity)
                .or_else(|| overloads.first())
                .map(FunctionEntry::to_ref)
        })
    }

    /// A member call target. Falls back to the only function anywhere with
    /// this simple name and arity.
    fn lookup_method(&self, scope: &[String], name: &str, arity: usize) -> Option<SymbolRef> {
        self.lookup_function(scope, name, arity).or_else(|| {
            let mut found = self
                .functions
                .values()
                .flatten()
                .filter(|f| f.arity == arity && last_segment(&f.qualified) == name);
            let first = found.next()?;
            found.next().is_none().then(|| first.to_ref())
        })
    }

    /// The qualified name an out-of-line definition `raw` refers to, if a
    /// declaration with the same parameter key exists.
    fn find_definition(&self, scope: &[String], raw: &str, key: &str) -> Option<String> {
        candidates(scope, raw).into_iter().find(|q| {
            let symbol = format!("{q}{key}");
            self.functions
                .get(q)
                .is_some_and(|overloads| overloads.iter().any(|f| f.symbol == symbol))
        })
    }
}

fn candidates(scope: &[String], name: &str) -> Vec<String> {
    if let Some(absolute) = name.strip_prefix("::") {
        return vec![absolute.to_string()];
    }
    (0..=scope.len())
        .rev()
        .map(|depth| qualify(&scope[..depth], name))
        .collect()
}

// ─── Name helpers ───────────────────────────────────────────────

fn qualify(scope: &[String], name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}::{}", scope.join("::"), name)
    }
}

/// Split `a::b<c::d>::e` into `a`, `b<c::d>`, `e`.
fn split_qualified(name: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '<' => {
                depth += 1;
                current.push(c);
            }
            '>' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ':' if depth == 0 && chars.peek() == Some(&':') => {
                chars.next();
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn last_segment(name: &str) -> String {
    split_qualified(name).pop().unwrap_or_else(|| name.to_string())
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace-normalized name with no blanks around `::`.
fn name_text(text: &str) -> String {
    normalize(text).replace(" ::", "::").replace(":: ", "::")
}

fn is_class_like(kind: &str) -> bool {
    matches!(kind, "class_specifier" | "struct_specifier" | "union_specifier")
}

fn inner_declarator(node: Node) -> Option<Node> {
    node.child_by_field_name("declarator").or_else(|| {
        let mut cursor = node.walk();
        let inner = node
            .named_children(&mut cursor)
            .find(|n| n.kind().ends_with("declarator") || NAME_KINDS.contains(&n.kind()));
        inner
    })
}

/// The name node of a declarator, or the node whose shape is not understood.
fn declarator_name(node: Node) -> std::result::Result<Node, Node> {
    let kind = node.kind();
    if NAME_KINDS.contains(&kind) {
        return Ok(node);
    }
    if WRAPPER_KINDS.contains(&kind) {
        return match inner_declarator(node) {
            Some(inner) => declarator_name(inner),
            None => Err(node),
        };
    }
    Err(node)
}

/// The names bound by a structured binding such as `auto& [a, b] = p;`.
fn binding_names(node: Node) -> Option<Vec<Node>> {
    let mut node = node;
    while node.kind() != "structured_binding_declarator" {
        if !WRAPPER_KINDS.contains(&node.kind()) {
            return None;
        }
        node = inner_declarator(node)?;
    }
    let mut cursor = node.walk();
    let names = node
        .named_children(&mut cursor)
        .filter(|n| n.kind() == "identifier")
        .collect();
    Some(names)
}

/// The function declarator inside `node`, if it declares a function.
/// `int (*fp)(int)` declares a variable.
fn function_declarator(node: Node) -> Option<Node> {
    match node.kind() {
        "function_declarator" => match node.child_by_field_name("declarator") {
            Some(inner) if inner.kind() == "parenthesized_declarator" => None,
            _ => Some(node),
        },
        "pointer_declarator" | "reference_declarator" | "attributed_declarator" => {
            inner_declarator(node).and_then(function_declarator)
        }
        _ => None,
    }
}

// ─── Lowering ───────────────────────────────────────────────────

struct Param<'t> {
    key: String,
    name: Option<String>,
    text: String,
    type_node: Option<Node<'t>>,
}

struct Lowering<'a> {
    path: &'a Path,
    source: &'a str,
    table: &'a SymbolTable,
}

impl<'a> Lowering<'a> {
    fn new(path: &'a Path, source: &'a str, table: &'a SymbolTable) -> Self {
        Self {
            path,
            source,
            table,
        }
    }

    fn lower(&self, tree: &Tree) -> Vec<DeclEvent> {
        let mut out = Vec::new();
        self.lower_items(tree.root_node(), &[], &mut out);
        out
    }

    fn text(&self, node: Node) -> &'a str {
        self.source
            .get(node.start_byte()..node.end_byte())
            .unwrap_or("")
    }

    fn has_const(&self, node: Node) -> bool {
        let mut cursor = node.walk();
        let found = node
            .children(&mut cursor)
            .any(|c| c.kind() == "type_qualifier" && self.text(c) == "const");
        found
    }

    fn lower_items(&self, parent: Node, scope: &[String], out: &mut Vec<DeclEvent>) {
        let mut cursor = parent.walk();
        for child in parent.named_children(&mut cursor) {
            self.lower_item(child, scope, out);
        }
    }

    fn lower_item(&self, node: Node, scope: &[String], out: &mut Vec<DeclEvent>) {
        match node.kind() {
            "namespace_definition" => self.lower_namespace(node, scope, out),
            "class_specifier" | "struct_specifier" | "union_specifier" => {
                out.extend(self.lower_class(node, scope, None));
            }
            "enum_specifier" => out.extend(self.lower_enum(node, scope, None)),
            "function_definition" => out.push(self.lower_function_definition(node, scope)),
            "declaration" | "field_declaration" => self.lower_declaration(node, scope, out),
            "type_definition" => self.lower_typedef(node, scope, out),
            "alias_declaration" => out.extend(self.lower_alias(node, scope)),
            "template_declaration"
            | "linkage_specification"
            | "declaration_list"
            | "preproc_if"
            | "preproc_ifdef"
            | "preproc_else"
            | "preproc_elif" => self.lower_items(node, scope, out),
            "ERROR" => trace!(
                file = %self.path.display(),
                line = node.start_position().row + 1,
                "skipping erroneous region"
            ),
            _ => {}
        }
    }

    fn lower_namespace(&self, node: Node, scope: &[String], out: &mut Vec<DeclEvent>) {
        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let segments = match node.child_by_field_name("name") {
            Some(name) => split_qualified(&name_text(self.text(name))),
            None => vec![ANONYMOUS.to_string()],
        };

        let mut full = scope.to_vec();
        full.extend(segments);
        let mut children = Vec::new();
        self.lower_items(body, &full, &mut children);

        let mut nested: Option<DeclEvent> = None;
        for depth in (scope.len()..full.len()).rev() {
            let qualified = full[..=depth].join("::");
            let mut event = DeclEvent::new(
                DeclKind::Namespace,
                qualified.as_str(),
                full[depth].as_str(),
                qualified.as_str(),
                format!("namespace {qualified}"),
            );
            event.children = match nested.take() {
                Some(inner) => vec![inner],
                None => std::mem::take(&mut children),
            };
            nested = Some(event);
        }
        out.extend(nested);
    }

    /// Symbol, display name and qualified name of a class-like specifier.
    /// Anonymous ones get a symbol unique to their position.
    fn class_identity(
        &self,
        node: Node,
        scope: &[String],
        fallback: Option<&str>,
    ) -> (String, String, String) {
        let raw = node
            .child_by_field_name("name")
            .map(|n| name_text(self.text(n)))
            .or_else(|| fallback.map(str::to_string));
        match raw {
            Some(raw) => {
                let qualified = qualify(scope, &raw);
                (qualified.clone(), last_segment(&raw), qualified)
            }
            None => {
                let qualified = qualify(scope, ANONYMOUS);
                let symbol = format!("{qualified}@{}:{}", self.path.display(), node.start_byte());
                (symbol, ANONYMOUS.to_string(), qualified)
            }
        }
    }

    fn head_text(&self, node: Node, body: Node) -> String {
        normalize(
            self.source
                .get(node.start_byte()..body.start_byte())
                .unwrap_or(""),
        )
    }

    fn lower_class(&self, node: Node, scope: &[String], fallback: Option<&str>) -> Option<DeclEvent> {
        let body = node.child_by_field_name("body")?;
        let (symbol, name, qualified) = self.class_identity(node, scope, fallback);
        let mut event = DeclEvent::new(
            DeclKind::Class,
            symbol,
            name,
            qualified.as_str(),
            self.head_text(node, body),
        );

        let mut cursor = node.walk();
        for clause in node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "base_class_clause")
        {
            self.base_classes(clause, scope, &mut event.bases);
        }

        let inner = split_qualified(&qualified);
        self.lower_items(body, &inner, &mut event.children);
        Some(event)
    }

    fn base_classes(&self, clause: Node, scope: &[String], out: &mut Vec<SymbolRef>) {
        let mut cursor = clause.walk();
        for child in clause.named_children(&mut cursor) {
            match child.kind() {
                "base_class_specifier" => self.base_classes(child, scope, out),
                "type_identifier" | "qualified_identifier" | "template_type" => {
                    out.extend(self.type_ref(child, scope));
                }
                _ => {}
            }
        }
    }

    fn lower_enum(&self, node: Node, scope: &[String], fallback: Option<&str>) -> Option<DeclEvent> {
        let body = node.child_by_field_name("body")?;
        let (symbol, name, qualified) = self.class_identity(node, scope, fallback);
        let mut event = DeclEvent::new(
            DeclKind::Enum,
            symbol,
            name,
            qualified.as_str(),
            self.head_text(node, body),
        );
        let enum_ref = event.to_ref();

        let mut cursor = body.walk();
        for enumerator in body
            .named_children(&mut cursor)
            .filter(|n| n.kind() == "enumerator")
        {
            let Some(name) = enumerator.child_by_field_name("name") else {
                continue;
            };
            let name = self.text(name);
            let unique = format!("{qualified}::{name}");
            event.children.push(
                DeclEvent::new(
                    DeclKind::Variable,
                    unique.as_str(),
                    name,
                    unique.as_str(),
                    normalize(self.text(enumerator)),
                )
                .with_type(enum_ref.clone()),
            );
        }
        Some(event)
    }

    fn lower_nested_type(
        &self,
        node: Node,
        scope: &[String],
        fallback: Option<&str>,
    ) -> Option<DeclEvent> {
        match node.kind() {
            kind if is_class_like(kind) => self.lower_class(node, scope, fallback),
            "enum_specifier" => self.lower_enum(node, scope, fallback),
            _ => None,
        }
    }

    fn lower_declaration(&self, node: Node, scope: &[String], out: &mut Vec<DeclEvent>) {
        let type_node = node.child_by_field_name("type");
        if let Some(ty) = type_node {
            out.extend(self.lower_nested_type(ty, scope, None));
        }
        let mut cursor = node.walk();
        let declarators: Vec<Node> = node.children_by_field_name("declarator", &mut cursor).collect();
        for declarator in declarators {
            match binding_names(declarator) {
                Some(names) => out.extend(
                    names
                        .into_iter()
                        .map(|name| self.lower_variable(node, type_node, declarator, name, scope)),
                ),
                None => out.push(self.lower_declarator(node, type_node, declarator, scope)),
            }
        }
    }

    fn lower_declarator(
        &self,
        decl: Node,
        type_node: Option<Node>,
        declarator: Node,
        scope: &[String],
    ) -> DeclEvent {
        if let Some(func) = function_declarator(declarator) {
            return self.lower_function(decl, type_node, declarator, func, None, scope);
        }
        match declarator_name(declarator) {
            Ok(name) => self.lower_variable(decl, type_node, declarator, name, scope),
            Err(shape) => self.unrecognized(shape, scope),
        }
    }

    fn lower_variable(
        &self,
        decl: Node,
        type_node: Option<Node>,
        declarator: Node,
        name_node: Node,
        scope: &[String],
    ) -> DeclEvent {
        let raw = name_text(self.text(name_node));
        let qualified = qualify(scope, &raw);
        let name = last_segment(&raw);
        let signature = normalize(&format!(
            "{} {}",
            self.type_key(decl, type_node, Some(declarator)),
            name
        ));
        let mut event = DeclEvent::new(
            DeclKind::Variable,
            qualified.as_str(),
            name,
            qualified.as_str(),
            signature,
        );
        event.type_ref = type_node.and_then(|t| self.type_ref(t, scope));

        let initializer = if declarator.kind() == "init_declarator" {
            declarator.child_by_field_name("value")
        } else {
            decl.child_by_field_name("default_value")
        };
        if let Some(value) = initializer {
            let mut scan = BodyScan::new(self, scope, None, HashSet::new());
            scan.scan(value);
            event.references = scan.references;
        }
        event
    }

    fn unrecognized(&self, shape: Node, scope: &[String]) -> DeclEvent {
        let text = normalize(self.text(shape));
        let qualified = qualify(scope, &text);
        DeclEvent::new(
            DeclKind::Unrecognized(shape.kind().to_string()),
            qualified.as_str(),
            text.as_str(),
            qualified.as_str(),
            text.as_str(),
        )
    }

    fn lower_function_definition(&self, node: Node, scope: &[String]) -> DeclEvent {
        let Some(declarator) = node.child_by_field_name("declarator") else {
            return self.unrecognized(node, scope);
        };
        match function_declarator(declarator) {
            Some(func) => self.lower_function(
                node,
                node.child_by_field_name("type"),
                declarator,
                func,
                node.child_by_field_name("body"),
                scope,
            ),
            None => self.unrecognized(declarator, scope),
        }
    }

    fn lower_function(
        &self,
        decl: Node,
        type_node: Option<Node>,
        declarator: Node,
        func: Node,
        body: Option<Node>,
        scope: &[String],
    ) -> DeclEvent {
        let Some(name_node) = func.child_by_field_name("declarator") else {
            return self.unrecognized(func, scope);
        };
        let raw = name_text(self.text(name_node));
        let params = self.parameters(func);
        let constness = if self.has_const(func) { " const" } else { "" };
        let key = format!(
            "({}){constness}",
            params.iter().map(|p| p.key.as_str()).collect::<Vec<_>>().join(",")
        );

        let written = qualify(scope, &raw);
        let qualified = if raw.contains("::") {
            self.table
                .find_definition(scope, &raw, &key)
                .unwrap_or(written)
        } else {
            written
        };
        let symbol = format!("{qualified}{key}");
        let segments = split_qualified(&qualified);
        let fn_scope = &segments[..segments.len().saturating_sub(1)];
        let name = last_segment(&raw);

        let signature = normalize(&format!(
            "{} {}({}){constness}",
            self.type_key(decl, type_node, Some(declarator)),
            name,
            params.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join(", ")
        ));
        let mut event = DeclEvent::new(
            DeclKind::Function,
            symbol.as_str(),
            name.as_str(),
            qualified.as_str(),
            signature,
        );
        event.type_ref = type_node.and_then(|t| self.type_ref(t, scope));

        for (position, param) in params.iter().enumerate() {
            let param_name = param.name.clone().unwrap_or_else(|| format!("#{position}"));
            let mut event_param = DeclEvent::new(
                DeclKind::Variable,
                format!("{symbol}::#{position}"),
                param_name.as_str(),
                format!("{qualified}::{param_name}"),
                param.text.as_str(),
            );
            event_param.type_ref = param.type_node.and_then(|t| self.type_ref(t, fn_scope));
            event.params.push(event_param);
        }

        if let Some(body) = body {
            event.body = Some(normalize(self.text(body)));
            let shadowed = params.iter().filter_map(|p| p.name.clone()).collect();
            let mut scan = BodyScan::new(self, fn_scope, Some((symbol.as_str(), qualified.as_str())), shadowed);
            let mut cursor = decl.walk();
            let initializers: Vec<Node> = decl
                .named_children(&mut cursor)
                .filter(|c| c.kind() == "field_initializer_list")
                .collect();
            for list in initializers {
                scan.scan(list);
            }
            scan.scan(body);
            event.references = scan.references;
            event.children = scan.locals;
        }
        event
    }

    fn parameters<'t>(&self, func: Node<'t>) -> Vec<Param<'t>> {
        let Some(list) = func.child_by_field_name("parameters") else {
            return Vec::new();
        };
        let mut cursor = list.walk();
        let mut params: Vec<Param<'t>> = list
            .named_children(&mut cursor)
            .filter(|p| {
                matches!(
                    p.kind(),
                    "parameter_declaration"
                        | "optional_parameter_declaration"
                        | "variadic_parameter_declaration"
                )
            })
            .map(|param| {
                let type_node = param.child_by_field_name("type");
                let declarator = param.child_by_field_name("declarator");
                Param {
                    key: normalize(&self.type_key(param, type_node, declarator)),
                    name: declarator
                        .and_then(|d| declarator_name(d).ok())
                        .map(|n| name_text(self.text(n))),
                    text: normalize(self.text(param)),
                    type_node,
                }
            })
            .collect();
        // f(void)
        if params.len() == 1 && params[0].key == "void" && params[0].name.is_none() {
            params.clear();
        }
        params
    }

    fn lower_typedef(&self, node: Node, scope: &[String], out: &mut Vec<DeclEvent>) {
        let type_node = node.child_by_field_name("type");
        let mut cursor = node.walk();
        let declarators: Vec<Node> = node.children_by_field_name("declarator", &mut cursor).collect();
        let first_name = declarators
            .first()
            .and_then(|d| declarator_name(*d).ok())
            .map(|n| name_text(self.text(n)));

        // typedef struct { ... } Name;
        let nested = type_node.and_then(|t| self.lower_nested_type(t, scope, first_name.as_deref()));
        let target = match &nested {
            Some(event) => Some(event.to_ref()),
            None => type_node.and_then(|t| self.type_ref(t, scope)),
        };
        let nested_symbol = nested.as_ref().map(|e| e.symbol.0.clone());
        out.extend(nested);

        for declarator in declarators {
            let name_node = match declarator_name(declarator) {
                Ok(name) => name,
                Err(shape) => {
                    out.push(self.unrecognized(shape, scope));
                    continue;
                }
            };
            let raw = name_text(self.text(name_node));
            let qualified = qualify(scope, &raw);
            if nested_symbol.as_deref() == Some(qualified.as_str()) {
                continue;
            }
            let mut event = DeclEvent::new(
                DeclKind::Typedef,
                qualified.as_str(),
                last_segment(&raw),
                qualified.as_str(),
                normalize(&format!(
                    "typedef {} {}",
                    self.type_key(node, type_node, Some(declarator)),
                    raw
                )),
            );
            event.type_ref = target.clone();
            out.push(event);
        }
    }

    fn lower_alias(&self, node: Node, scope: &[String]) -> Option<DeclEvent> {
        let name = name_text(self.text(node.child_by_field_name("name")?));
        let type_node = node.child_by_field_name("type");
        let qualified = qualify(scope, &name);
        let mut event = DeclEvent::new(
            DeclKind::Typedef,
            qualified.as_str(),
            name.as_str(),
            qualified.as_str(),
            normalize(&format!(
                "using {name} = {}",
                type_node.map(|t| self.text(t)).unwrap_or("")
            )),
        );
        event.type_ref = type_node.and_then(|t| self.type_ref(t, scope));
        Some(event)
    }

    // ─── Types ──────────────────────────────────────────────────

    /// The text of a type specifier, without the body of a class or enum.
    fn type_text(&self, node: Node) -> String {
        if is_class_like(node.kind()) || node.kind() == "enum_specifier" {
            return node
                .child_by_field_name("name")
                .map(|n| name_text(self.text(n)))
                .unwrap_or_else(|| ANONYMOUS.to_string());
        }
        normalize(self.text(node))
    }

    /// The declared type as written for identity purposes: qualifiers,
    /// type text and pointer, reference and array markers. Parameter names
    /// are left out so declarations and definitions agree.
    fn type_key(&self, decl: Node, type_node: Option<Node>, declarator: Option<Node>) -> String {
        let mut key = String::new();
        if self.has_const(decl) {
            key.push_str("const ");
        }
        if let Some(ty) = type_node {
            key.push_str(&self.type_text(ty));
        }
        let mut current = declarator;
        while let Some(d) = current {
            match d.kind() {
                "pointer_declarator" | "abstract_pointer_declarator" => key.push('*'),
                "reference_declarator" | "abstract_reference_declarator" => {
                    key.push_str(if self.text(d).starts_with("&&") { "&&" } else { "&" });
                }
                "array_declarator" | "abstract_array_declarator" => key.push_str("[]"),
                "function_declarator" => break,
                _ => {}
            }
            current = inner_declarator(d);
        }
        key
    }

    fn named_type(&self, raw: &str, scope: &[String]) -> SymbolRef {
        self.table
            .lookup_type(scope, raw)
            .unwrap_or_else(|| SymbolRef::new(raw, last_segment(raw), raw, raw))
    }

    /// Reference for a type specifier. Builtins become literals; names
    /// resolve through the table or stay placeholders.
    fn type_ref(&self, node: Node, scope: &[String]) -> Option<SymbolRef> {
        match node.kind() {
            "primitive_type" | "sized_type_specifier" | "placeholder_type_specifier" | "auto" => {
                Some(SymbolRef::literal(normalize(self.text(node))))
            }
            "type_identifier" | "qualified_identifier" | "namespace_identifier" => {
                Some(self.named_type(&name_text(self.text(node)), scope))
            }
            "template_type" => node
                .child_by_field_name("name")
                .and_then(|n| self.type_ref(n, scope)),
            "type_descriptor" => node
                .child_by_field_name("type")
                .and_then(|t| self.type_ref(t, scope)),
            kind if is_class_like(kind) || kind == "enum_specifier" => {
                match node.child_by_field_name("name") {
                    Some(name) => self.type_ref(name, scope),
                    None => {
                        let (symbol, name, qualified) = self.class_identity(node, scope, None);
                        Some(SymbolRef::new(symbol, name, qualified, ANONYMOUS))
                    }
                }
            }
            _ => {
                let text = normalize(self.text(node));
                (!text.is_empty()).then(|| SymbolRef::literal(text))
            }
        }
    }
}

// ─── Body scanning ──────────────────────────────────────────────

/// Collects the references of a function body or initializer.
struct BodyScan<'l, 'a> {
    lowering: &'l Lowering<'a>,
    scope: &'l [String],
    /// Symbol and qualified name of the enclosing function, if any.
    owner: Option<(&'l str, &'l str)>,
    shadowed: HashSet<String>,
    references: Vec<Reference>,
    locals: Vec<DeclEvent>,
}

impl<'l, 'a> BodyScan<'l, 'a> {
    fn new(
        lowering: &'l Lowering<'a>,
        scope: &'l [String],
        owner: Option<(&'l str, &'l str)>,
        shadowed: HashSet<String>,
    ) -> Self {
        Self {
            lowering,
            scope,
            owner,
            shadowed,
            references: Vec::new(),
            locals: Vec::new(),
        }
    }

    fn push(&mut self, target: SymbolRef, kind: DependencyKind) {
        self.references.push(Reference { target, kind });
    }

    fn scan(&mut self, node: Node) {
        match node.kind() {
            "call_expression" => return self.call(node),
            "field_expression" => return self.member(node),
            "type_identifier" => {
                let raw = name_text(self.lowering.text(node));
                if let Some(target) = self.lowering.table.lookup_type(self.scope, &raw) {
                    self.push(target, DependencyKind::Use);
                }
                return;
            }
            "identifier" | "qualified_identifier" | "field_identifier" => return self.value(node),
            "declaration" => self.local(node),
            _ => {}
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.scan(child);
        }
    }

    fn value(&mut self, node: Node) {
        let raw = name_text(self.lowering.text(node));
        if self.shadowed.contains(&raw) {
            return;
        }
        let table = self.lowering.table;
        if let Some(target) = table
            .lookup_variable(self.scope, &raw)
            .or_else(|| table.lookup_type(self.scope, &raw))
        {
            self.push(target, DependencyKind::Use);
        }
    }

    fn member(&mut self, node: Node) {
        if let Some(argument) = node.child_by_field_name("argument") {
            self.scan(argument);
        }
        if let Some(field) = node.child_by_field_name("field") {
            let raw = name_text(self.lowering.text(field));
            if let Some(target) = self.lowering.table.lookup_variable(self.scope, &raw) {
                self.push(target, DependencyKind::Use);
            }
        }
    }

    fn call(&mut self, node: Node) {
        let arguments = node.child_by_field_name("arguments");
        let arity = arguments
            .map(|args| {
                let mut cursor = args.walk();
                let count = args
                    .named_children(&mut cursor)
                    .filter(|a| a.kind() != "comment")
                    .count();
                count
            })
            .unwrap_or(0);

        if let Some(function) = node.child_by_field_name("function") {
            match function.kind() {
                "identifier" | "qualified_identifier" | "template_function" => {
                    self.free_call(function, arity);
                }
                "field_expression" => {
                    if let Some(argument) = function.child_by_field_name("argument") {
                        self.scan(argument);
                    }
                    if let Some(field) = function.child_by_field_name("field") {
                        let name = name_text(self.lowering.text(field));
                        if let Some(target) = self.lowering.table.lookup_method(self.scope, &name, arity) {
                            self.push(target, DependencyKind::Invocation);
                        }
                    }
                }
                _ => self.scan(function),
            }
        }
        if let Some(arguments) = arguments {
            self.scan(arguments);
        }
    }

    /// A call through a plain or qualified name. Unresolved callees stay
    /// placeholders; calling a type name invokes its constructor.
    fn free_call(&mut self, function: Node, arity: usize) {
        let name_node = if function.kind() == "template_function" {
            function.child_by_field_name("name").unwrap_or(function)
        } else {
            function
        };
        let raw = name_text(self.lowering.text(name_node));
        if self.shadowed.contains(&raw) {
            return;
        }
        let table = self.lowering.table;
        let target = table
            .lookup_function(self.scope, &raw, arity)
            .or_else(|| table.lookup_type(self.scope, &raw))
            .unwrap_or_else(|| SymbolRef::new(raw.as_str(), last_segment(&raw), raw.as_str(), raw.as_str()));
        self.push(target, DependencyKind::Invocation);

        if let Some(arguments) = function.child_by_field_name("arguments") {
            self.scan(arguments);
        }
    }

    fn local(&mut self, decl: Node) {
        let type_node = decl.child_by_field_name("type");
        let mut cursor = decl.walk();
        let declarators: Vec<Node> = decl.children_by_field_name("declarator", &mut cursor).collect();
        for declarator in declarators {
            if function_declarator(declarator).is_some() {
                continue;
            }
            let names = match binding_names(declarator) {
                Some(names) => names,
                None => match declarator_name(declarator) {
                    Ok(name) => vec![name],
                    Err(_) => continue,
                },
            };
            for name_node in names {
                let name = name_text(self.lowering.text(name_node));
                self.shadowed.insert(name.clone());

                let Some((symbol, qualified)) = self.owner else {
                    continue;
                };
                let symbol = format!("{symbol}::{name}");
                if self.locals.iter().any(|l| l.symbol.0 == symbol) {
                    continue;
                }
                let signature = normalize(&format!(
                    "{} {name}",
                    self.lowering.type_key(decl, type_node, Some(declarator))
                ));
                let mut local = DeclEvent::new(
                    DeclKind::Variable,
                    symbol,
                    name.as_str(),
                    format!("{qualified}::{name}"),
                    signature,
                );
                local.type_ref = type_node.and_then(|t| self.lowering.type_ref(t, self.scope));
                self.locals.push(local);
            }
        }
    }
}
