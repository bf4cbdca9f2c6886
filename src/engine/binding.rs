//! Lexical bindings of one JavaScript/TypeScript file.
//!
//! A single pre-order walk over the tree-sitter tree records scopes,
//! declarations and every identifier token; a second pass binds each value
//! identifier to the nearest enclosing declaration of the same name. Byte
//! offsets throughout; the engine converts to UTF-16 at its boundary.

use std::collections::HashMap;

use tree_sitter::Node;

use super::SymbolKind;

pub type ScopeId = usize;
pub type DeclId = usize;

#[derive(Debug, Clone)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub is_function: bool,
}

/// `import { imported } from "source"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    pub imported: String,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct Decl {
    pub name: String,
    pub kind: SymbolKind,
    pub scope: ScopeId,
    /// Index of the declaring identifier.
    pub ident: usize,
    pub import: Option<ImportBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentRole {
    /// Names a binding in the value/type namespace.
    Value,
    /// Member or key name, matched by name only.
    Property,
    /// Names another module's export (`a` in `import { a as b }`, export
    /// aliases, re-exports); never bound locally.
    Opaque,
}

#[derive(Debug, Clone)]
pub struct Ident {
    pub name: String,
    pub start: usize,
    pub end: usize,
    pub role: IdentRole,
    /// Scope the identifier is looked up from.
    pub scope: ScopeId,
    /// Set when this token declares something.
    pub decl: Option<DeclId>,
    /// Set when this token refers to (or redeclares) an earlier declaration.
    pub resolved: Option<DeclId>,
    pub import_ref: Option<ImportBinding>,
    pub is_write: bool,
    pub is_property_decl: bool,
    /// `{ foo }` in an object literal or pattern: the token is both the key
    /// and the variable.
    pub is_shorthand: bool,
}

impl Ident {
    pub fn binding(&self) -> Option<DeclId> {
        self.resolved.or(self.decl)
    }
}

#[derive(Debug, Default)]
pub struct FileBindings {
    /// Sorted by `start`.
    pub idents: Vec<Ident>,
    pub decls: Vec<Decl>,
    pub scopes: Vec<Scope>,
    /// Exported name -> local name.
    pub exports: HashMap<String, String>,
}

impl FileBindings {
    pub fn collect(root: Node, source: &[u8]) -> Self {
        let mut collector = Collector {
            source,
            out: FileBindings::default(),
            marks: HashMap::new(),
        };
        let program = collector.new_scope(None, true);
        collector.walk(root, program);
        collector.bind();
        collector.out
    }

    /// Identifier covering byte `byte`.
    pub fn ident_at(&self, byte: usize) -> Option<&Ident> {
        let i = self.idents.partition_point(|ident| ident.start <= byte);
        let candidate = self.idents.get(i.checked_sub(1)?)?;
        (byte < candidate.end).then_some(candidate)
    }

    pub fn decl_starting_at(&self, byte: usize) -> Option<DeclId> {
        self.decls
            .iter()
            .position(|decl| self.idents[decl.ident].start == byte)
    }

    fn top_level_decl(&self, name: &str) -> Option<DeclId> {
        self.decls
            .iter()
            .position(|decl| decl.scope == 0 && decl.name == name)
    }

    /// Declaration behind `export { name }`-style access from other modules.
    pub fn exported_decl(&self, exported: &str) -> Option<DeclId> {
        let local = self.exports.get(exported)?;
        self.top_level_decl(local)
    }

    /// Names under which other modules can import `decl` by name.
    pub fn export_names_of(&self, decl: DeclId) -> Vec<&str> {
        let decl = &self.decls[decl];
        if decl.scope != 0 {
            return Vec::new();
        }
        let mut names: Vec<&str> = self
            .exports
            .iter()
            .filter(|(exported, local)| exported.as_str() != "default" && **local == decl.name)
            .map(|(exported, _)| exported.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

#[derive(Debug)]
struct PendingDecl {
    scope: ScopeId,
    kind: SymbolKind,
    import: Option<ImportBinding>,
}

#[derive(Debug, Default)]
struct Mark {
    decl: Option<PendingDecl>,
    import_ref: Option<ImportBinding>,
    write: bool,
    property_decl: bool,
    opaque: bool,
}

struct Collector<'s> {
    source: &'s [u8],
    out: FileBindings,
    /// Roles assigned to identifier tokens by their ancestors, keyed by the
    /// token's start byte.
    marks: HashMap<usize, Mark>,
}

const IDENTIFIER_KINDS: &[&str] = &[
    "identifier",
    "type_identifier",
    "property_identifier",
    "shorthand_property_identifier",
    "shorthand_property_identifier_pattern",
];

fn is_function_like(kind: &str) -> bool {
    matches!(
        kind,
        "function_declaration"
            | "generator_function_declaration"
            | "function_expression"
            | "function"
            | "generator_function"
            | "arrow_function"
            | "method_definition"
    )
}

fn is_block_scope(kind: &str) -> bool {
    matches!(
        kind,
        "statement_block" | "class_body" | "for_statement" | "for_in_statement" | "catch_clause" | "switch_body"
    )
}

impl<'s> Collector<'s> {
    fn text(&self, node: Node) -> &'s str {
        node.utf8_text(self.source).unwrap_or_default()
    }

    fn new_scope(&mut self, parent: Option<ScopeId>, is_function: bool) -> ScopeId {
        self.out.scopes.push(Scope {
            parent,
            is_function,
        });
        self.out.scopes.len() - 1
    }

    fn function_scope(&self, mut scope: ScopeId) -> ScopeId {
        while !self.out.scopes[scope].is_function {
            match self.out.scopes[scope].parent {
                Some(parent) => scope = parent,
                None => break,
            }
        }
        scope
    }

    fn mark(&mut self, node: Node) -> &mut Mark {
        self.marks.entry(node.start_byte()).or_default()
    }

    fn declare(&mut self, node: Node, scope: ScopeId, kind: SymbolKind, write: bool) {
        let mark = self.mark(node);
        mark.decl = Some(PendingDecl {
            scope,
            kind,
            import: None,
        });
        mark.write |= write;
    }

    fn declare_pattern(&mut self, node: Node, scope: ScopeId, kind: SymbolKind, write: bool) {
        match node.kind() {
            "identifier" | "shorthand_property_identifier_pattern" => {
                self.declare(node, scope, kind, write)
            }
            "object_pattern" | "array_pattern" => {
                let mut cursor = node.walk();
                let children: Vec<Node> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.declare_pattern(child, scope, kind, write);
                }
            }
            "pair_pattern" => {
                if let Some(value) = node.child_by_field_name("value") {
                    self.declare_pattern(value, scope, kind, write);
                }
            }
            "assignment_pattern" | "object_assignment_pattern" => {
                if let Some(left) = node.child_by_field_name("left") {
                    self.declare_pattern(left, scope, kind, true);
                }
            }
            "rest_pattern" => {
                if let Some(inner) = node.named_child(0) {
                    self.declare_pattern(inner, scope, kind, write);
                }
            }
            _ => {}
        }
    }

    fn declare_named(&mut self, node: Node, scope: ScopeId, kind: SymbolKind) {
        if let Some(name) = node.child_by_field_name("name") {
            self.declare(name, scope, kind, false);
        }
    }

    fn declare_parameters(&mut self, params: Node, scope: ScopeId) {
        let mut cursor = params.walk();
        let children: Vec<Node> = params.named_children(&mut cursor).collect();
        for param in children {
            match param.kind() {
                "required_parameter" | "optional_parameter" => {
                    if let Some(pattern) = param.child_by_field_name("pattern") {
                        self.declare_pattern(pattern, scope, SymbolKind::Parameter, false);
                    }
                }
                _ => self.declare_pattern(param, scope, SymbolKind::Parameter, false),
            }
        }
    }

    fn mark_write_target(&mut self, target: Node) {
        match target.kind() {
            "identifier" => self.mark(target).write = true,
            "member_expression" => {
                if let Some(property) = target.child_by_field_name("property") {
                    self.mark(property).write = true;
                }
            }
            "parenthesized_expression" => {
                if let Some(inner) = target.named_child(0) {
                    self.mark_write_target(inner);
                }
            }
            _ => {}
        }
    }

    fn import_source(&self, node: Node) -> Option<String> {
        let mut current = node.parent();
        while let Some(n) = current {
            if n.kind() == "import_statement" {
                let source = n.child_by_field_name("source")?;
                return Some(unquote(self.text(source)).to_string());
            }
            current = n.parent();
        }
        None
    }

    fn record_exports(&mut self, export: Node) {
        let is_default = {
            let mut cursor = export.walk();
            let found = export.children(&mut cursor).any(|c| c.kind() == "default");
            found
        };

        if let Some(decl) = export.child_by_field_name("declaration") {
            match decl.kind() {
                "lexical_declaration" | "variable_declaration" => {
                    let mut cursor = decl.walk();
                    let declarators: Vec<Node> = decl.named_children(&mut cursor).collect();
                    for declarator in declarators {
                        if let Some(name) = declarator.child_by_field_name("name") {
                            if name.kind() == "identifier" {
                                let name = self.text(name).to_string();
                                self.out.exports.insert(name.clone(), name);
                            }
                        }
                    }
                }
                _ => {
                    if let Some(name) = decl.child_by_field_name("name") {
                        let name = self.text(name).to_string();
                        let exported = if is_default { "default".to_string() } else { name.clone() };
                        self.out.exports.insert(exported, name);
                    }
                }
            }
        } else if is_default {
            if let Some(value) = export.child_by_field_name("value") {
                if value.kind() == "identifier" {
                    self.out
                        .exports
                        .insert("default".to_string(), self.text(value).to_string());
                }
            }
        }
    }

    fn mark_export_specifier(&mut self, spec: Node) {
        let Some(name) = spec.child_by_field_name("name") else {
            return;
        };
        let local = self.text(name).to_string();
        let re_export_source = spec
            .parent()
            .and_then(|clause| clause.parent())
            .filter(|stmt| stmt.kind() == "export_statement")
            .and_then(|stmt| stmt.child_by_field_name("source"))
            .map(|source| unquote(self.text(source)).to_string());

        let exported = match spec.child_by_field_name("alias") {
            Some(alias) => {
                self.mark(alias).opaque = true;
                self.text(alias).to_string()
            }
            None => local.clone(),
        };

        match re_export_source {
            Some(source) => {
                let mark = self.mark(name);
                mark.opaque = true;
                mark.import_ref = Some(ImportBinding {
                    imported: local,
                    source,
                });
            }
            None => {
                self.out.exports.insert(exported, local);
            }
        }
    }

    /// Roles that a node assigns to identifiers below it, in `scope`.
    fn mark_declarations(&mut self, node: Node, scope: ScopeId) {
        match node.kind() {
            "variable_declarator" => {
                let is_var = node
                    .parent()
                    .is_some_and(|p| p.kind() == "variable_declaration");
                let target = if is_var { self.function_scope(scope) } else { scope };
                let has_value = node.child_by_field_name("value").is_some();
                if let Some(name) = node.child_by_field_name("name") {
                    self.declare_pattern(name, target, SymbolKind::Variable, has_value);
                }
            }
            "function_declaration" | "generator_function_declaration" => {
                self.declare_named(node, scope, SymbolKind::Function)
            }
            "class_declaration" | "abstract_class_declaration" => {
                self.declare_named(node, scope, SymbolKind::Class)
            }
            "interface_declaration" => self.declare_named(node, scope, SymbolKind::Interface),
            "type_alias_declaration" => self.declare_named(node, scope, SymbolKind::TypeAlias),
            "enum_declaration" => self.declare_named(node, scope, SymbolKind::Enum),
            "import_specifier" => {
                let (Some(name), Some(source)) =
                    (node.child_by_field_name("name"), self.import_source(node))
                else {
                    return;
                };
                let binding = ImportBinding {
                    imported: self.text(name).to_string(),
                    source,
                };
                match node.child_by_field_name("alias") {
                    Some(alias) => {
                        let mark = self.mark(name);
                        mark.opaque = true;
                        mark.import_ref = Some(binding);
                        self.declare(alias, scope, SymbolKind::Variable, false);
                    }
                    None => {
                        let mark = self.mark(name);
                        mark.import_ref = Some(binding.clone());
                        mark.decl = Some(PendingDecl {
                            scope,
                            kind: SymbolKind::Import,
                            import: Some(binding),
                        });
                    }
                }
            }
            "import_clause" | "namespace_import" => {
                // default and namespace imports are local names
                let mut cursor = node.walk();
                let idents: Vec<Node> = node
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() == "identifier")
                    .collect();
                for ident in idents {
                    self.declare(ident, scope, SymbolKind::Variable, false);
                }
            }
            "export_statement" => self.record_exports(node),
            "export_specifier" => self.mark_export_specifier(node),
            "assignment_expression" | "augmented_assignment_expression" => {
                if let Some(left) = node.child_by_field_name("left") {
                    self.mark_write_target(left);
                }
            }
            "update_expression" => {
                if let Some(argument) = node.child_by_field_name("argument") {
                    self.mark_write_target(argument);
                }
            }
            "method_definition" | "public_field_definition" | "method_signature"
            | "property_signature" => {
                if let Some(name) = node.child_by_field_name("name") {
                    if name.kind() == "property_identifier" {
                        self.mark(name).property_decl = true;
                    }
                }
            }
            "pair" => {
                if let Some(key) = node.child_by_field_name("key") {
                    if key.kind() == "property_identifier" {
                        let mark = self.mark(key);
                        mark.property_decl = true;
                        mark.write = true;
                    }
                }
            }
            _ => {}
        }
    }

    /// Bindings that live inside the scope `node` opens.
    fn mark_scoped_bindings(&mut self, node: Node, inner: ScopeId) {
        match node.kind() {
            "catch_clause" => {
                if let Some(param) = node.child_by_field_name("parameter") {
                    self.declare_pattern(param, inner, SymbolKind::Variable, true);
                }
            }
            "for_in_statement" => {
                let Some(kind) = node.child_by_field_name("kind") else {
                    return;
                };
                let target = if self.text(kind) == "var" {
                    self.function_scope(inner)
                } else {
                    inner
                };
                if let Some(left) = node.child_by_field_name("left") {
                    self.declare_pattern(left, target, SymbolKind::Variable, true);
                }
            }
            kind if is_function_like(kind) => {
                if matches!(kind, "function_expression" | "function" | "generator_function") {
                    self.declare_named(node, inner, SymbolKind::Function);
                }
                if let Some(params) = node.child_by_field_name("parameters") {
                    self.declare_parameters(params, inner);
                }
                if let Some(param) = node.child_by_field_name("parameter") {
                    self.declare_pattern(param, inner, SymbolKind::Parameter, false);
                }
            }
            _ => {}
        }
    }

    fn walk(&mut self, node: Node, scope: ScopeId) {
        self.mark_declarations(node, scope);

        let kind = node.kind();
        let inner = if !node.is_named() {
            None
        } else if is_function_like(kind) {
            Some(self.new_scope(Some(scope), true))
        } else if is_block_scope(kind) {
            Some(self.new_scope(Some(scope), false))
        } else {
            None
        };
        if let Some(inner) = inner {
            self.mark_scoped_bindings(node, inner);
        }

        if node.is_named() && IDENTIFIER_KINDS.contains(&kind) {
            self.visit_ident(node, scope);
            return;
        }

        let child_scope = inner.unwrap_or(scope);
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            self.walk(child, child_scope);
        }
    }

    fn visit_ident(&mut self, node: Node, scope: ScopeId) {
        let mark = self.marks.remove(&node.start_byte()).unwrap_or_default();
        let name = self.text(node).to_string();
        let role = if mark.opaque {
            IdentRole::Opaque
        } else if node.kind() == "property_identifier" {
            IdentRole::Property
        } else {
            IdentRole::Value
        };

        let index = self.out.idents.len();
        let decl = match (role, mark.decl) {
            (IdentRole::Value, Some(pending)) => {
                self.out.decls.push(Decl {
                    name: name.clone(),
                    kind: pending.kind,
                    scope: pending.scope,
                    ident: index,
                    import: pending.import,
                });
                Some(self.out.decls.len() - 1)
            }
            _ => None,
        };

        self.out.idents.push(Ident {
            name,
            start: node.start_byte(),
            end: node.end_byte(),
            role,
            scope,
            decl,
            resolved: None,
            import_ref: mark.import_ref,
            is_write: mark.write,
            is_property_decl: mark.property_decl,
            is_shorthand: node.kind().starts_with("shorthand_property_identifier"),
        });
    }

    /// Bind value identifiers to the nearest visible declaration. A second
    /// declaration of a name in the same scope binds to the first.
    fn bind(&mut self) {
        let mut visible: HashMap<ScopeId, HashMap<String, DeclId>> = HashMap::new();
        for (id, decl) in self.out.decls.iter().enumerate() {
            let first = *visible
                .entry(decl.scope)
                .or_default()
                .entry(decl.name.clone())
                .or_insert(id);
            if first != id {
                self.out.idents[decl.ident].resolved = Some(first);
            }
        }

        let scopes = &self.out.scopes;
        for ident in self.out.idents.iter_mut() {
            if ident.role != IdentRole::Value || ident.decl.is_some() {
                continue;
            }
            let mut scope = Some(ident.scope);
            while let Some(s) = scope {
                if let Some(&decl) = visible.get(&s).and_then(|names| names.get(ident.name.as_str())) {
                    ident.resolved = Some(decl);
                    break;
                }
                scope = scopes[s].parent;
            }
        }
    }
}

fn unquote(raw: &str) -> &str {
    raw.trim_matches(|c| c == '"' || c == '\'' || c == '`')
}
