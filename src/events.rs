//! Declaration events: the interface between a parsing front end and the
//! graph builder.
//!
//! A front end turns one source file into a [`TranslationUnit`] holding a
//! tree of [`DeclEvent`]s. Symbols that are only referenced (types, bases,
//! callees) travel as [`SymbolRef`]s and may be declared later, in the same
//! unit or another one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, RippleError};
use crate::graph::DependencyKind;

/// Stable symbol identity. Equal identity means the same symbol for the
/// whole build of one version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub String);

impl SymbolId {
    pub fn new(id: impl Into<String>) -> Self {
        SymbolId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The structural kind the front end recognized for a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclKind {
    Namespace,
    Class,
    Enum,
    Function,
    Variable,
    Typedef,
    /// A declarator with no recognizable declaration shape.
    Unrecognized(String),
}

/// A reference to a symbol that may not have been declared yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRef {
    pub symbol: SymbolId,
    pub name: String,
    /// Blank for builtin or otherwise opaque types.
    pub unique_name: String,
    pub signature: String,
}

impl SymbolRef {
    pub fn new(
        symbol: impl Into<String>,
        name: impl Into<String>,
        unique_name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            symbol: SymbolId::new(symbol),
            name: name.into(),
            unique_name: unique_name.into(),
            signature: signature.into(),
        }
    }

    /// A builtin or opaque type, known only by its text.
    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            symbol: SymbolId::new(format!("literal:{text}")),
            name: text.clone(),
            unique_name: String::new(),
            signature: text,
        }
    }
}

/// One occurrence of a dependency found in a declaration's body or initializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub target: SymbolRef,
    pub kind: DependencyKind,
}

/// A declaration seen by the front end, with its nested declarations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclEvent {
    pub symbol: SymbolId,
    pub name: String,
    pub unique_name: String,
    pub signature: String,
    pub kind: DeclKind,
    /// Variable type, function return type or alias target.
    pub type_ref: Option<SymbolRef>,
    pub bases: Vec<SymbolRef>,
    pub params: Vec<DeclEvent>,
    pub body: Option<String>,
    pub references: Vec<Reference>,
    pub children: Vec<DeclEvent>,
}

impl DeclEvent {
    pub fn new(
        kind: DeclKind,
        symbol: impl Into<String>,
        name: impl Into<String>,
        unique_name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            symbol: SymbolId::new(symbol),
            name: name.into(),
            unique_name: unique_name.into(),
            signature: signature.into(),
            kind,
            type_ref: None,
            bases: Vec::new(),
            params: Vec::new(),
            body: None,
            references: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Shorthand for events whose identity is their unique name.
    pub fn named(kind: DeclKind, unique_name: &str, signature: impl Into<String>) -> Self {
        let name = unique_name.rsplit("::").next().unwrap_or(unique_name);
        Self::new(kind, unique_name, name, unique_name, signature)
    }

    pub fn with_type(mut self, type_ref: SymbolRef) -> Self {
        self.type_ref = Some(type_ref);
        self
    }

    pub fn with_base(mut self, base: SymbolRef) -> Self {
        self.bases.push(base);
        self
    }

    pub fn with_param(mut self, param: DeclEvent) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_reference(mut self, target: SymbolRef, kind: DependencyKind) -> Self {
        self.references.push(Reference { target, kind });
        self
    }

    pub fn with_child(mut self, child: DeclEvent) -> Self {
        self.children.push(child);
        self
    }

    /// The reference other declarations use to point at this one.
    pub fn to_ref(&self) -> SymbolRef {
        SymbolRef {
            symbol: self.symbol.clone(),
            name: self.name.clone(),
            unique_name: self.unique_name.clone(),
            signature: self.signature.clone(),
        }
    }
}

/// All declaration events of one source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub path: PathBuf,
    pub events: Vec<DeclEvent>,
}

impl TranslationUnit {
    pub fn new(path: impl Into<PathBuf>, events: Vec<DeclEvent>) -> Self {
        Self {
            path: path.into(),
            events,
        }
    }

    /// Reject event shapes the builder cannot turn into nodes.
    pub fn validate(&self) -> Result<()> {
        for event in &self.events {
            self.validate_event(event, false)?;
        }
        Ok(())
    }

    fn validate_event(&self, event: &DeclEvent, is_param: bool) -> Result<()> {
        let fail = |reason: String| {
            let symbol = (!event.symbol.0.is_empty()).then_some(event.symbol.as_str());
            Err(RippleError::build(&self.path, symbol, reason))
        };
        if event.symbol.0.trim().is_empty() {
            return fail(format!("declaration '{}' has no symbol identity", event.name));
        }
        if event.name.trim().is_empty() {
            return fail("declaration has no name".to_string());
        }
        if let DeclKind::Unrecognized(shape) = &event.kind {
            return fail(format!("unrecognized declaration shape '{shape}'"));
        }
        if !event.params.is_empty() && event.kind != DeclKind::Function {
            return fail(format!("{:?} declaration carries parameters", event.kind));
        }
        if !event.bases.is_empty() && event.kind != DeclKind::Class {
            return fail(format!("{:?} declaration carries base classes", event.kind));
        }
        if is_param && event.kind != DeclKind::Variable {
            return fail(format!("parameter declared as {:?}", event.kind));
        }
        for reference in event.type_ref.iter().chain(&event.bases) {
            if reference.symbol.0.trim().is_empty() {
                return fail("reference without symbol identity".to_string());
            }
        }
        for reference in &event.references {
            if reference.target.symbol.0.trim().is_empty() {
                return fail("reference without symbol identity".to_string());
            }
            if !matches!(reference.kind, DependencyKind::Use | DependencyKind::Invocation) {
                return fail(format!("body reference of kind {}", reference.kind));
            }
        }
        for param in &event.params {
            self.validate_event(param, true)?;
        }
        for child in &event.children {
            self.validate_event(child, false)?;
        }
        Ok(())
    }
}
