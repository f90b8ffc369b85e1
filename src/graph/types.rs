//! Core types for the Ripple code graph.
//!
//! Defines node kinds, dependency kinds, and the data stored on every
//! node and dependency edge of a [`CodeGraph`](super::CodeGraph).

use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a node in the code graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The single root of a graph.
    Root,
    /// A C++ namespace.
    Namespace,
    /// A class, struct or union.
    Class,
    /// An enumeration.
    Enum,
    /// A free function, method, constructor or operator.
    Function,
    /// A variable, field, parameter or enumerator.
    Variable,
    /// A `typedef` or `using` alias.
    Typedef,
    /// A literal or builtin type name with no declaration in the graph.
    Integral,
    /// A placeholder for a symbol referenced before its declaration.
    Unknown,
}

impl NodeKind {
    /// Kinds that never take a position in the ownership tree.
    pub fn is_detached(&self) -> bool {
        matches!(self, NodeKind::Integral | NodeKind::Unknown)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Root => write!(f, "root"),
            NodeKind::Namespace => write!(f, "namespace"),
            NodeKind::Class => write!(f, "class"),
            NodeKind::Enum => write!(f, "enum"),
            NodeKind::Function => write!(f, "function"),
            NodeKind::Variable => write!(f, "variable"),
            NodeKind::Typedef => write!(f, "typedef"),
            NodeKind::Integral => write!(f, "integral"),
            NodeKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// The kind of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Symbol uses a type or value (Variable -> Class, Function -> Typedef).
    Use,
    /// A class or enum owns a member (Class -> Variable/Function).
    Member,
    /// Class derives from another class.
    Inheritance,
    /// Function calls another function.
    Invocation,
    /// Function overrides a base-class function.
    Override,
}

impl DependencyKind {
    pub const ALL: [DependencyKind; 5] = [
        DependencyKind::Use,
        DependencyKind::Member,
        DependencyKind::Inheritance,
        DependencyKind::Invocation,
        DependencyKind::Override,
    ];

    /// Position of this kind in [`DependencyKind::ALL`].
    pub fn ordinal(&self) -> usize {
        match self {
            DependencyKind::Use => 0,
            DependencyKind::Member => 1,
            DependencyKind::Inheritance => 2,
            DependencyKind::Invocation => 3,
            DependencyKind::Override => 4,
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKind::Use => write!(f, "use"),
            DependencyKind::Member => write!(f, "member"),
            DependencyKind::Inheritance => write!(f, "inheritance"),
            DependencyKind::Invocation => write!(f, "invocation"),
            DependencyKind::Override => write!(f, "override"),
        }
    }
}

/// Per-graph creation id. Unique inside one graph only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out [`NodeId`]s for one graph build.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }
}

/// Kind-specific extras of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeDetail {
    Plain,
    Class {
        /// Direct base classes, in declaration order.
        bases: Vec<NodeIndex>,
    },
    Function {
        /// Parameter nodes, in declaration order.
        params: Vec<NodeIndex>,
        /// Body text, when a definition was seen.
        body: Option<String>,
    },
}

impl NodeDetail {
    /// The empty detail matching `kind`.
    pub fn for_kind(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Class => NodeDetail::Class { bases: Vec::new() },
            NodeKind::Function => NodeDetail::Function {
                params: Vec::new(),
                body: None,
            },
            _ => NodeDetail::Plain,
        }
    }
}

/// Data stored in a graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Display name (e.g. "draw").
    pub name: String,
    /// Fully-qualified unique name (e.g. "gfx::Shape::draw"). Blank for literals.
    pub unique_name: String,
    /// Canonical signature text (e.g. "virtual void draw(int) const").
    pub signature: String,
    /// The type of a typed container (variable type, return type, alias target).
    pub type_ref: Option<NodeIndex>,
    pub detail: NodeDetail,
    /// Direct weight, filled by the weight pass.
    pub weight: f64,
    pub(crate) parent: Option<NodeIndex>,
    pub(crate) children: Vec<NodeIndex>,
}

impl NodeData {
    pub fn new(
        id: NodeId,
        kind: NodeKind,
        name: impl Into<String>,
        unique_name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            unique_name: unique_name.into(),
            signature: signature.into(),
            type_ref: None,
            detail: NodeDetail::for_kind(kind),
            weight: 0.0,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    pub fn children(&self) -> &[NodeIndex] {
        &self.children
    }

    pub fn bases(&self) -> &[NodeIndex] {
        match &self.detail {
            NodeDetail::Class { bases } => bases,
            _ => &[],
        }
    }

    pub fn params(&self) -> &[NodeIndex] {
        match &self.detail {
            NodeDetail::Function { params, .. } => params,
            _ => &[],
        }
    }

    pub fn body(&self) -> Option<&str> {
        match &self.detail {
            NodeDetail::Function { body, .. } => body.as_deref(),
            _ => None,
        }
    }

    /// Replace every mention of `old` in the type, base and parameter slots.
    /// Returns true if anything changed.
    pub(crate) fn redirect(&mut self, old: NodeIndex, new: NodeIndex) -> bool {
        let mut changed = false;
        if self.type_ref == Some(old) {
            self.type_ref = Some(new);
            changed = true;
        }
        match &mut self.detail {
            NodeDetail::Class { bases } => {
                for base in bases.iter_mut().filter(|b| **b == old) {
                    *base = new;
                    changed = true;
                }
                dedup_in_order(bases);
            }
            NodeDetail::Function { params, .. } => {
                for param in params.iter_mut().filter(|p| **p == old) {
                    *param = new;
                    changed = true;
                }
            }
            NodeDetail::Plain => {}
        }
        changed
    }

    /// Drop every mention of `gone` from the type, base and parameter slots.
    pub(crate) fn forget(&mut self, gone: NodeIndex) {
        if self.type_ref == Some(gone) {
            self.type_ref = None;
        }
        match &mut self.detail {
            NodeDetail::Class { bases } => bases.retain(|b| *b != gone),
            NodeDetail::Function { params, .. } => params.retain(|p| *p != gone),
            NodeDetail::Plain => {}
        }
    }
}

fn dedup_in_order(items: &mut Vec<NodeIndex>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(*item));
}

/// Data stored on a dependency edge: one record per (source, target, kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub kind: DependencyKind,
    pub count: u32,
}

/// Per-kind dependency weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightTable {
    #[serde(rename = "use")]
    pub use_: f64,
    pub member: f64,
    pub inheritance: f64,
    pub invocation: f64,
    #[serde(rename = "override")]
    pub override_: f64,
}

impl WeightTable {
    pub fn weight(&self, kind: DependencyKind) -> f64 {
        match kind {
            DependencyKind::Use => self.use_,
            DependencyKind::Member => self.member,
            DependencyKind::Inheritance => self.inheritance,
            DependencyKind::Invocation => self.invocation,
            DependencyKind::Override => self.override_,
        }
    }
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            use_: 4.0,
            member: 3.0,
            inheritance: 4.0,
            invocation: 3.5,
            override_: 3.3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_matches_kind() {
        assert!(matches!(
            NodeDetail::for_kind(NodeKind::Class),
            NodeDetail::Class { .. }
        ));
        assert!(matches!(
            NodeDetail::for_kind(NodeKind::Function),
            NodeDetail::Function { .. }
        ));
        assert_eq!(NodeDetail::for_kind(NodeKind::Variable), NodeDetail::Plain);
    }

    #[test]
    fn test_redirect_rewrites_all_slots() {
        let old = NodeIndex::new(1);
        let new = NodeIndex::new(2);
        let mut class = NodeData::new(NodeId(0), NodeKind::Class, "D", "D", "class D");
        class.detail = NodeDetail::Class {
            bases: vec![old, new],
        };
        assert!(class.redirect(old, new));
        assert_eq!(class.bases(), &[new]);

        let mut func = NodeData::new(NodeId(1), NodeKind::Function, "f", "f", "T f(T)");
        func.type_ref = Some(old);
        func.detail = NodeDetail::Function {
            params: vec![old],
            body: None,
        };
        assert!(func.redirect(old, new));
        assert_eq!(func.type_ref, Some(new));
        assert_eq!(func.params(), &[new]);
        assert!(!func.redirect(old, new));
    }

    #[test]
    fn test_default_weights() {
        let table = WeightTable::default();
        assert_eq!(table.weight(DependencyKind::Use), 4.0);
        assert_eq!(table.weight(DependencyKind::Member), 3.0);
        assert_eq!(table.weight(DependencyKind::Inheritance), 4.0);
        assert_eq!(table.weight(DependencyKind::Invocation), 3.5);
        assert_eq!(table.weight(DependencyKind::Override), 3.3);
    }

    #[test]
    fn test_weights_from_partial_toml() {
        let table: WeightTable = toml::from_str("use = 10.0").unwrap();
        assert_eq!(table.use_, 10.0);
        assert_eq!(table.member, 3.0);
    }

    #[test]
    fn test_id_allocator_is_sequential() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.next_id(), NodeId(0));
        assert_eq!(ids.next_id(), NodeId(1));
    }
}
