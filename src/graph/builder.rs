//! Graph builder: turns declaration events into a locked code graph.
//!
//! Symbols are deduplicated by identity. A symbol referenced before it is
//! declared gets a placeholder node, which is replaced by the real node
//! once the declaration arrives. After all units are ingested, `finish`
//! cleans up leftovers, infers overrides, computes weights and locks.

use petgraph::stable_graph::NodeIndex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::engine::CodeGraph;
use super::types::*;
use crate::error::{Result, RippleError};
use crate::events::{DeclEvent, DeclKind, SymbolId, SymbolRef, TranslationUnit};

/// Builds one version's [`CodeGraph`] from a stream of translation units.
pub struct GraphBuilder {
    graph: CodeGraph,
    ids: IdAllocator,
    symbols: HashMap<SymbolId, NodeIndex>,
    /// Integral literal nodes keyed by their text.
    literals: HashMap<String, NodeIndex>,
    /// Declared nodes by unique name, in declaration order.
    declared: HashMap<String, Vec<NodeIndex>>,
    /// Unknown placeholders by unique name.
    placeholders: HashMap<String, Vec<NodeIndex>>,
    weights: WeightTable,
    /// Path of the unit being ingested.
    unit: PathBuf,
    units: usize,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::with_weights(WeightTable::default())
    }

    pub fn with_weights(weights: WeightTable) -> Self {
        let mut ids = IdAllocator::new();
        let graph = CodeGraph::new(ids.next_id());
        Self {
            graph,
            ids,
            symbols: HashMap::new(),
            literals: HashMap::new(),
            declared: HashMap::new(),
            placeholders: HashMap::new(),
            weights,
            unit: PathBuf::new(),
            units: 0,
        }
    }

    /// The graph under construction.
    pub fn graph(&self) -> &CodeGraph {
        &self.graph
    }

    /// Add one translation unit. A unit that fails validation is rejected
    /// before anything is touched, so other units are unaffected.
    pub fn ingest(&mut self, unit: &TranslationUnit) -> Result<()> {
        unit.validate()?;
        self.unit = unit.path.clone();
        let root = self.graph.root();
        for event in &unit.events {
            self.declare(event, root)?;
        }
        self.units += 1;
        debug!(
            file = %unit.path.display(),
            events = unit.events.len(),
            nodes = self.graph.node_count(),
            "ingested translation unit"
        );
        Ok(())
    }

    /// Clean up, infer overrides, compute weights and lock the graph.
    pub fn finish(mut self) -> Result<CodeGraph> {
        let folded = self.cleanup()?;
        if folded > 0 {
            warn!(count = folded, "unresolved symbols folded into literals");
        }
        let overrides = self.infer_overrides()?;
        self.graph.compute_weights(&self.weights)?;
        self.graph.verify()?;
        self.graph.lock();
        info!(
            units = self.units,
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            overrides,
            "graph build complete"
        );
        Ok(self.graph)
    }

    // ─── Declarations ───────────────────────────────────────────

    fn declare(&mut self, event: &DeclEvent, parent: NodeIndex) -> Result<NodeIndex> {
        let kind = node_kind(&event.kind).ok_or_else(|| {
            RippleError::build(
                &self.unit,
                Some(event.symbol.as_str()),
                "unrecognized declaration shape",
            )
        })?;

        let existing = self.symbols.get(&event.symbol).copied();
        let node = match existing {
            Some(node) if !self.graph.get(node)?.kind.is_detached() => {
                self.merge_definition(node, event, false)?;
                node
            }
            Some(placeholder) => {
                let node = self.create(event, kind, parent)?;
                self.replace(placeholder, node)?;
                node
            }
            None => {
                let node = self.create(event, kind, parent)?;
                let revealed = self.revealed_placeholders(node)?;
                self.replace_all(revealed)?;
                node
            }
        };

        for child in &event.children {
            self.declare(child, node)?;
        }
        Ok(node)
    }

    fn create(&mut self, event: &DeclEvent, kind: NodeKind, parent: NodeIndex) -> Result<NodeIndex> {
        let data = NodeData::new(
            self.ids.next_id(),
            kind,
            event.name.as_str(),
            event.unique_name.as_str(),
            event.signature.as_str(),
        );
        let node = self.graph.add_node(data, Some(parent))?;
        self.symbols.insert(event.symbol.clone(), node);
        if !event.unique_name.trim().is_empty() {
            self.declared
                .entry(event.unique_name.clone())
                .or_default()
                .push(node);
        }

        if matches!(self.graph.get(parent)?.kind, NodeKind::Class | NodeKind::Enum) {
            self.graph.add_dependency(parent, node, DependencyKind::Member)?;
        }

        if let Some(type_ref) = &event.type_ref {
            let target = self.resolve(type_ref)?;
            self.graph.node_mut(node)?.type_ref = Some(target);
            self.graph.add_dependency(node, target, DependencyKind::Use)?;
        }

        for base in &event.bases {
            let target = self.resolve(base)?;
            if let NodeDetail::Class { bases } = &mut self.graph.node_mut(node)?.detail {
                if !bases.contains(&target) {
                    bases.push(target);
                }
            }
            self.graph.add_dependency(node, target, DependencyKind::Inheritance)?;
        }

        for param in &event.params {
            let param_node = self.declare(param, node)?;
            if let NodeDetail::Function { params, .. } = &mut self.graph.node_mut(node)?.detail {
                params.push(param_node);
            }
        }

        self.merge_definition(node, event, true)?;
        Ok(node)
    }

    /// Record a declaration's references when its node is `fresh`, or when a
    /// later sighting fills in a function body that was missing.
    fn merge_definition(&mut self, node: NodeIndex, event: &DeclEvent, fresh: bool) -> Result<()> {
        let filled = match (&mut self.graph.node_mut(node)?.detail, &event.body) {
            (NodeDetail::Function { body: slot @ None, .. }, Some(body)) => {
                *slot = Some(body.clone());
                !fresh
            }
            _ => false,
        };
        if fresh || filled {
            self.record_references(node, event)?;
        }
        Ok(())
    }

    fn record_references(&mut self, node: NodeIndex, event: &DeclEvent) -> Result<()> {
        for reference in &event.references {
            let target = self.resolve(&reference.target)?;
            self.graph.add_dependency(node, target, reference.kind)?;
        }
        Ok(())
    }

    /// The node for a referenced symbol, creating a placeholder if needed.
    fn resolve(&mut self, reference: &SymbolRef) -> Result<NodeIndex> {
        if let Some(&node) = self.symbols.get(&reference.symbol) {
            return Ok(node);
        }
        if let Some(node) = self.declaration_of(&reference.unique_name) {
            self.symbols.insert(reference.symbol.clone(), node);
            return Ok(node);
        }
        let node = if reference.unique_name.trim().is_empty() {
            let key = if reference.signature.trim().is_empty() {
                reference.name.as_str()
            } else {
                reference.signature.as_str()
            };
            self.literal(key)?
        } else {
            let data = NodeData::new(
                self.ids.next_id(),
                NodeKind::Unknown,
                reference.name.as_str(),
                reference.unique_name.as_str(),
                reference.signature.as_str(),
            );
            let node = self.graph.add_node(data, None)?;
            self.placeholders
                .entry(reference.unique_name.clone())
                .or_default()
                .push(node);
            node
        };
        self.symbols.insert(reference.symbol.clone(), node);
        Ok(node)
    }

    /// The first live declaration named `unique_name`.
    fn declaration_of(&self, unique_name: &str) -> Option<NodeIndex> {
        if unique_name.trim().is_empty() {
            return None;
        }
        self.declared.get(unique_name)?.iter().copied().find(|node| {
            self.graph
                .node(*node)
                .is_some_and(|data| !data.kind.is_detached())
        })
    }

    /// The shared Integral node for `text`.
    fn literal(&mut self, text: &str) -> Result<NodeIndex> {
        if let Some(&node) = self.literals.get(text) {
            return Ok(node);
        }
        let data = NodeData::new(self.ids.next_id(), NodeKind::Integral, text, "", text);
        let node = self.graph.add_node(data, None)?;
        self.literals.insert(text.to_string(), node);
        Ok(node)
    }

    // ─── Replacement ────────────────────────────────────────────

    /// Supersede `old` with `new` everywhere, until no replacement is pending.
    ///
    /// Type, base and parameter slots, children and dependency edges of
    /// `old` move to `new`. When `new` is an Integral literal the children
    /// and outgoing dependencies of `old` are dropped instead.
    fn replace(&mut self, old: NodeIndex, new: NodeIndex) -> Result<()> {
        self.replace_all(vec![(old, new)])
    }

    fn replace_all(&mut self, pending: Vec<(NodeIndex, NodeIndex)>) -> Result<()> {
        let mut pending = VecDeque::from(pending);
        let mut forwarded: HashMap<NodeIndex, NodeIndex> = HashMap::new();

        while let Some((old, new)) = pending.pop_front() {
            let mut new = new;
            while let Some(&next) = forwarded.get(&new) {
                new = next;
            }
            if old == new || !self.graph.contains(old) {
                continue;
            }

            self.graph.redirect_references(old, new)?;
            if self.graph.get(new)?.kind == NodeKind::Integral {
                let children = self.graph.get(old)?.children().to_vec();
                for child in children {
                    self.graph.remove_subtree(child)?;
                }
                for (target, dep) in self.graph.dependencies(old) {
                    self.graph.remove_all_dependency(old, target, dep.kind)?;
                }
            }
            self.graph.transfer(old, new)?;
            self.graph.remove_subtree(old)?;
            forwarded.insert(old, new);

            for slot in self.symbols.values_mut().filter(|n| **n == old) {
                *slot = new;
            }
            self.literals.retain(|_, n| *n != old);
            debug!(new = %self.graph.get(new)?.unique_name, "replaced placeholder");

            pending.extend(self.revealed_placeholders(new)?);
        }
        Ok(())
    }

    /// Placeholders standing for a declaration in the subtree of `node`,
    /// paired with that declaration.
    fn revealed_placeholders(&self, node: NodeIndex) -> Result<Vec<(NodeIndex, NodeIndex)>> {
        let mut found = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let data = self.graph.get(current)?;
            stack.extend(data.children().iter().rev().copied());
            if self.declaration_of(&data.unique_name) != Some(current) {
                continue;
            }
            let Some(placeholders) = self.placeholders.get(&data.unique_name) else {
                continue;
            };
            found.extend(
                placeholders
                    .iter()
                    .copied()
                    .filter(|p| {
                        *p != current
                            && self
                                .graph
                                .node(*p)
                                .is_some_and(|d| d.kind == NodeKind::Unknown)
                    })
                    .map(|p| (p, current)),
            );
        }
        Ok(found)
    }

    // ─── Cleanup ────────────────────────────────────────────────

    /// Fold leftover placeholders into literals, strip substructure that
    /// variables and functions must not own, and take literals out of the
    /// ownership tree. Returns how many placeholders were folded.
    fn cleanup(&mut self) -> Result<usize> {
        let unknowns = self.graph.nodes_of_kind(NodeKind::Unknown);
        let mut folded = 0;
        for unknown in unknowns {
            let Some(data) = self.graph.node(unknown) else {
                continue;
            };
            if data.kind != NodeKind::Unknown {
                continue;
            }
            let name = data.name.clone();
            let literal = self.literal(&name)?;
            self.replace(unknown, literal)?;
            folded += 1;
        }

        for variable in self.graph.nodes_of_kind(NodeKind::Variable) {
            if let Some(data) = self.graph.node(variable) {
                for child in data.children().to_vec() {
                    self.graph.remove_subtree(child)?;
                }
            }
        }

        for function in self.graph.nodes_of_kind(NodeKind::Function) {
            if let Some(data) = self.graph.node(function) {
                let params: HashSet<NodeIndex> = data.params().iter().copied().collect();
                let locals: Vec<NodeIndex> = data
                    .children()
                    .iter()
                    .copied()
                    .filter(|c| !params.contains(c))
                    .collect();
                for local in locals {
                    self.graph.remove_subtree(local)?;
                }
            }
        }

        let detached: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| self.graph.node(*idx).is_some_and(|n| n.kind.is_detached()))
            .collect();
        for node in detached {
            self.graph.detach(node)?;
        }

        let graph = &self.graph;
        self.symbols.retain(|_, node| graph.contains(*node));
        Ok(folded)
    }

    // ─── Overrides ──────────────────────────────────────────────

    /// Add an OVERRIDE edge from each class function to the first matching
    /// function found breadth-first among its transitive bases.
    fn infer_overrides(&mut self) -> Result<usize> {
        let mut matched: HashSet<NodeIndex> = HashSet::new();
        let mut found = Vec::new();

        for class in self.graph.nodes_of_kind(NodeKind::Class) {
            let data = self.graph.get(class)?;
            let own = self.functions_of(class);
            if data.bases().is_empty() || own.is_empty() {
                continue;
            }

            let mut queue: VecDeque<NodeIndex> = data.bases().iter().copied().collect();
            let mut visited: HashSet<NodeIndex> = HashSet::from([class]);
            while let Some(base) = queue.pop_front() {
                if !visited.insert(base) {
                    continue;
                }
                let base_functions = self.functions_of(base);
                for function in &own {
                    if matched.contains(function) {
                        continue;
                    }
                    if let Some(target) = base_functions
                        .iter()
                        .find(|candidate| self.overrides(*function, **candidate))
                    {
                        found.push((*function, *target));
                        matched.insert(*function);
                    }
                }
                if let Some(base_data) = self.graph.node(base) {
                    queue.extend(base_data.bases().iter().copied());
                }
            }
        }

        for (function, target) in &found {
            self.graph
                .add_dependency(*function, *target, DependencyKind::Override)?;
        }
        Ok(found.len())
    }

    fn functions_of(&self, class: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .node(class)
            .map(|data| {
                data.children()
                    .iter()
                    .copied()
                    .filter(|c| self.graph.node(*c).is_some_and(|n| n.kind == NodeKind::Function))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Same name, same return type node, and pairwise matching parameters.
    fn overrides(&self, derived: NodeIndex, base: NodeIndex) -> bool {
        let (Some(d), Some(b)) = (self.graph.node(derived), self.graph.node(base)) else {
            return false;
        };
        if d.name != b.name || d.type_ref != b.type_ref || d.params().len() != b.params().len() {
            return false;
        }
        d.params().iter().zip(b.params()).all(|(dp, bp)| {
            match (self.graph.node(*dp), self.graph.node(*bp)) {
                (Some(dp), Some(bp)) => dp.kind == bp.kind && dp.type_ref == bp.type_ref,
                _ => false,
            }
        })
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn node_kind(kind: &DeclKind) -> Option<NodeKind> {
    match kind {
        DeclKind::Namespace => Some(NodeKind::Namespace),
        DeclKind::Class => Some(NodeKind::Class),
        DeclKind::Enum => Some(NodeKind::Enum),
        DeclKind::Function => Some(NodeKind::Function),
        DeclKind::Variable => Some(NodeKind::Variable),
        DeclKind::Typedef => Some(NodeKind::Typedef),
        DeclKind::Unrecognized(_) => None,
    }
}

/// Build and lock one graph from `units`. The first failing unit aborts.
pub fn build_graph(units: &[TranslationUnit], weights: WeightTable) -> Result<CodeGraph> {
    let mut builder = GraphBuilder::with_weights(weights);
    for unit in units {
        builder.ingest(unit)?;
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphError;
    use crate::matcher::{MatchLevel, Matcher};

    fn var(unique: &str, ty: SymbolRef) -> DeclEvent {
        DeclEvent::named(DeclKind::Variable, unique, format!("{} {}", ty.name, unique)).with_type(ty)
    }

    fn int() -> SymbolRef {
        SymbolRef::literal("int")
    }

    fn find(graph: &CodeGraph, unique: &str) -> NodeIndex {
        let found = graph.find_by_unique_name(unique);
        assert_eq!(found.len(), 1, "expected exactly one '{unique}'");
        found[0]
    }

    fn unit(events: Vec<DeclEvent>) -> TranslationUnit {
        TranslationUnit::new("test.cpp", events)
    }

    /// `class Base { virtual void f(int); }; class Derived : Base { void f(int) override; };`
    fn override_unit() -> TranslationUnit {
        let void = SymbolRef::literal("void");
        let base = DeclEvent::named(DeclKind::Class, "Base", "class Base").with_child(
            DeclEvent::named(DeclKind::Function, "Base::f", "virtual void f(int)")
                .with_type(void.clone())
                .with_param(var("Base::f::#0", int())),
        );
        let derived = DeclEvent::named(DeclKind::Class, "Derived", "class Derived : Base")
            .with_base(base.to_ref())
            .with_child(
                DeclEvent::named(DeclKind::Function, "Derived::f", "void f(int) override")
                    .with_type(void)
                    .with_param(var("Derived::f::#0", int())),
            );
        unit(vec![base, derived])
    }

    #[test]
    fn test_override_inferred() {
        let graph = build_graph(&[override_unit()], WeightTable::default()).unwrap();
        let base_f = find(&graph, "Base::f");
        let derived_f = find(&graph, "Derived::f");
        assert_eq!(
            graph.dependency_count(derived_f, base_f, DependencyKind::Override),
            1
        );
        let overrides: Vec<_> = graph
            .dependencies(derived_f)
            .into_iter()
            .filter(|(_, d)| d.kind == DependencyKind::Override)
            .collect();
        assert_eq!(overrides.len(), 1);
        assert!(graph
            .dependencies(base_f)
            .iter()
            .all(|(_, d)| d.kind != DependencyKind::Override));
    }

    #[test]
    fn test_override_requires_matching_params() {
        let void = SymbolRef::literal("void");
        let base = DeclEvent::named(DeclKind::Class, "Base", "class Base").with_child(
            DeclEvent::named(DeclKind::Function, "Base::f", "virtual void f(int)")
                .with_type(void.clone())
                .with_param(var("Base::f::#0", int())),
        );
        let derived = DeclEvent::named(DeclKind::Class, "Derived", "class Derived : Base")
            .with_base(base.to_ref())
            .with_child(
                DeclEvent::named(DeclKind::Function, "Derived::f", "void f(double)")
                    .with_type(void)
                    .with_param(var("Derived::f::#0", SymbolRef::literal("double"))),
            );
        let graph = build_graph(&[unit(vec![base, derived])], WeightTable::default()).unwrap();
        let derived_f = find(&graph, "Derived::f");
        assert!(graph
            .dependencies(derived_f)
            .iter()
            .all(|(_, d)| d.kind != DependencyKind::Override));
    }

    #[test]
    fn test_override_first_match_wins_through_transitive_bases() {
        let void = SymbolRef::literal("void");
        let f = |owner: &str| {
            DeclEvent::named(DeclKind::Function, &format!("{owner}::f"), "void f()")
                .with_type(void.clone())
        };
        let a = DeclEvent::named(DeclKind::Class, "A", "class A").with_child(f("A"));
        let b = DeclEvent::named(DeclKind::Class, "B", "class B : A")
            .with_base(a.to_ref())
            .with_child(f("B"));
        let c = DeclEvent::named(DeclKind::Class, "C", "class C : B")
            .with_base(b.to_ref())
            .with_child(f("C"));
        let graph = build_graph(&[unit(vec![a, b, c])], WeightTable::default()).unwrap();
        let (af, bf, cf) = (find(&graph, "A::f"), find(&graph, "B::f"), find(&graph, "C::f"));
        assert_eq!(graph.dependency_count(cf, bf, DependencyKind::Override), 1);
        assert_eq!(graph.dependency_count(cf, af, DependencyKind::Override), 0);
        assert_eq!(graph.dependency_count(bf, af, DependencyKind::Override), 1);
    }

    #[test]
    fn test_same_symbol_is_deduplicated() {
        let decl = DeclEvent::named(DeclKind::Function, "g", "void g()");
        let def = DeclEvent::named(DeclKind::Function, "g", "void g()").with_body("{ }");
        let mut builder = GraphBuilder::new();
        builder.ingest(&unit(vec![decl])).unwrap();
        builder.ingest(&unit(vec![def])).unwrap();
        let graph = builder.finish().unwrap();
        let g = find(&graph, "g");
        assert_eq!(graph.get(g).unwrap().body(), Some("{ }"));
    }

    #[test]
    fn test_definition_references_recorded_once() {
        let callee = DeclEvent::named(DeclKind::Function, "h", "void h()");
        let def = DeclEvent::named(DeclKind::Function, "g", "void g()")
            .with_body("{ h(); h(); }")
            .with_reference(callee.to_ref(), DependencyKind::Invocation)
            .with_reference(callee.to_ref(), DependencyKind::Invocation);
        let mut builder = GraphBuilder::new();
        builder.ingest(&unit(vec![callee, def.clone()])).unwrap();
        builder.ingest(&unit(vec![def])).unwrap();
        let graph = builder.finish().unwrap();
        let (g, h) = (find(&graph, "g"), find(&graph, "h"));
        assert_eq!(graph.dependency_count(g, h, DependencyKind::Invocation), 2);
    }

    #[test]
    fn test_forward_reference_is_replaced() {
        let widget = DeclEvent::named(DeclKind::Class, "Widget", "class Widget");
        let holder = DeclEvent::named(DeclKind::Class, "Holder", "class Holder")
            .with_child(var("Holder::w", widget.to_ref()))
            .with_child(var("Holder::v", widget.to_ref()));
        let graph = build_graph(&[unit(vec![holder, widget])], WeightTable::default()).unwrap();

        let widget = find(&graph, "Widget");
        assert_eq!(graph.get(widget).unwrap().kind, NodeKind::Class);
        assert_eq!(graph.get(widget).unwrap().parent(), Some(graph.root()));
        for field in ["Holder::w", "Holder::v"] {
            let field = find(&graph, field);
            assert_eq!(graph.get(field).unwrap().type_ref, Some(widget));
            assert_eq!(graph.dependency_count(field, widget, DependencyKind::Use), 1);
        }
        assert!(graph.nodes_of_kind(NodeKind::Unknown).is_empty());
    }

    #[test]
    fn test_forward_base_is_replaced() {
        let base = DeclEvent::named(DeclKind::Class, "Base", "class Base");
        let derived =
            DeclEvent::named(DeclKind::Class, "Derived", "class Derived : Base").with_base(base.to_ref());
        let graph = build_graph(&[unit(vec![derived]), unit(vec![base])], WeightTable::default())
            .unwrap();
        let (base, derived) = (find(&graph, "Base"), find(&graph, "Derived"));
        assert_eq!(graph.get(derived).unwrap().bases(), &[base]);
        assert_eq!(graph.dependency_count(derived, base, DependencyKind::Inheritance), 1);
    }

    #[test]
    fn test_unresolved_symbol_folds_into_literal() {
        let missing = SymbolRef::new("std::string", "string", "std::string", "class string");
        let graph = build_graph(
            &[unit(vec![var("a", missing.clone()), var("b", missing)])],
            WeightTable::default(),
        )
        .unwrap();
        assert!(graph.nodes_of_kind(NodeKind::Unknown).is_empty());
        let literals = graph.nodes_of_kind(NodeKind::Integral);
        assert_eq!(literals.len(), 1);
        let literal = graph.get(literals[0]).unwrap();
        assert_eq!(literal.name, "string");
        assert_eq!(literal.parent(), None);
        assert_eq!(graph.get(find(&graph, "a")).unwrap().type_ref, Some(literals[0]));
        assert_eq!(graph.get(find(&graph, "b")).unwrap().type_ref, Some(literals[0]));
    }

    #[test]
    fn test_literals_are_shared_and_detached() {
        let graph = build_graph(&[unit(vec![var("x", int()), var("y", int())])], WeightTable::default())
            .unwrap();
        let literals = graph.nodes_of_kind(NodeKind::Integral);
        assert_eq!(literals.len(), 1);
        assert!(!graph.walk_tree().contains(&literals[0]));
        assert_eq!(graph.dependents(literals[0]).len(), 2);
    }

    #[test]
    fn test_cleanup_strips_locals_and_variable_children() {
        let func = DeclEvent::named(DeclKind::Function, "run", "void run(int)")
            .with_param(var("run::#0", int()))
            .with_child(var("run::tmp", int()));
        let odd_var = var("v", int()).with_child(var("v::inner", int()));
        let graph = build_graph(&[unit(vec![func, odd_var])], WeightTable::default()).unwrap();

        let run = find(&graph, "run");
        let param = find(&graph, "run::#0");
        assert_eq!(graph.get(run).unwrap().children(), &[param]);
        assert!(graph.find_by_unique_name("run::tmp").is_empty());
        assert!(graph.get(find(&graph, "v")).unwrap().children().is_empty());
        assert!(graph.find_by_unique_name("v::inner").is_empty());
    }

    #[test]
    fn test_member_edges_and_weights() {
        let class = DeclEvent::named(DeclKind::Class, "P", "struct P")
            .with_child(var("P::x", int()))
            .with_child(var("P::y", int()));
        let graph = build_graph(&[unit(vec![class])], WeightTable::default()).unwrap();
        let p = find(&graph, "P");
        assert_eq!(graph.dependencies(p).len(), 2);
        assert_eq!(graph.get(p).unwrap().weight, 6.0);
        assert_eq!(graph.get(find(&graph, "P::x")).unwrap().weight, 4.0);
    }

    #[test]
    fn test_rejected_unit_leaves_builder_untouched() {
        let mut builder = GraphBuilder::new();
        builder
            .ingest(&unit(vec![DeclEvent::named(DeclKind::Class, "Ok", "class Ok")]))
            .unwrap();
        let before = builder.graph().node_count();

        let bad = unit(vec![
            DeclEvent::named(DeclKind::Class, "Fine", "class Fine"),
            DeclEvent::named(DeclKind::Unrecognized("weird".into()), "w", "??"),
        ]);
        let err = builder.ingest(&bad).unwrap_err();
        assert!(matches!(err, RippleError::Build { .. }));
        assert_eq!(builder.graph().node_count(), before);

        let graph = builder.finish().unwrap();
        assert_eq!(graph.find_by_unique_name("Ok").len(), 1);
        assert!(graph.find_by_unique_name("Fine").is_empty());
    }

    #[test]
    fn test_finished_graph_is_locked_and_verified() {
        let mut graph = build_graph(&[override_unit()], WeightTable::default()).unwrap();
        assert!(graph.is_locked());
        graph.verify().unwrap();
        let root = graph.root();
        assert_eq!(
            graph.add_dependency(root, root, DependencyKind::Use).unwrap_err(),
            GraphError::Locked
        );
    }

    #[test]
    fn test_idempotent_build_is_identical() {
        let a = build_graph(&[override_unit()], WeightTable::default()).unwrap();
        let b = build_graph(&[override_unit()], WeightTable::default()).unwrap();
        assert_eq!(a.node_count(), b.node_count());
        assert_eq!(a.edge_count(), b.edge_count());

        let mut matcher = Matcher::new(&a, &b);
        let (left, right) = (a.walk_tree(), b.walk_tree());
        assert_eq!(left.len(), right.len());
        for (x, y) in left.into_iter().zip(right) {
            assert!(
                matcher.matches(x, y, MatchLevel::Identical),
                "{} differs",
                a.get(x).unwrap().unique_name
            );
        }
        let (left, right) = (a.nodes_of_kind(NodeKind::Integral), b.nodes_of_kind(NodeKind::Integral));
        assert_eq!(left.len(), right.len());
        for (x, y) in left.into_iter().zip(right) {
            assert!(matcher.matches(x, y, MatchLevel::Identical));
        }
    }

    /// `class Holder { int m; };` declared before and after its users, which
    /// refer to it under other symbol identities.
    fn holder() -> DeclEvent {
        DeclEvent::named(DeclKind::Class, "Holder", "class Holder").with_child(var("Holder::m", int()))
    }

    fn member_ref(symbol: &str) -> SymbolRef {
        SymbolRef::new(symbol, "m", "Holder::m", "int m")
    }

    #[test]
    fn test_reference_by_unique_name_reaches_declaration() {
        let user = var("u", int()).with_reference(member_ref("dep:Holder::m"), DependencyKind::Use);
        let graph = build_graph(&[unit(vec![holder(), user])], WeightTable::default()).unwrap();

        let (u, m) = (find(&graph, "u"), find(&graph, "Holder::m"));
        assert_eq!(graph.dependency_count(u, m, DependencyKind::Use), 1);
        assert_eq!(graph.nodes_of_kind(NodeKind::Integral).len(), 1);
    }

    #[test]
    fn test_placeholders_replaced_when_declaration_arrives() {
        let class_ref = SymbolRef::new("dep:Holder", "Holder", "Holder", "class Holder");
        let u = var("u", class_ref)
            .with_reference(member_ref("dep:Holder::m"), DependencyKind::Use)
            .with_reference(member_ref("dep:Holder::m"), DependencyKind::Use);
        let w = var("w", int()).with_reference(member_ref("alt:Holder::m"), DependencyKind::Use);

        let mut builder = GraphBuilder::new();
        builder.ingest(&unit(vec![u, w])).unwrap();
        assert_eq!(builder.graph().nodes_of_kind(NodeKind::Unknown).len(), 3);
        builder.ingest(&unit(vec![holder()])).unwrap();
        assert!(builder.graph().nodes_of_kind(NodeKind::Unknown).is_empty());

        let graph = builder.finish().unwrap();
        let (u, w) = (find(&graph, "u"), find(&graph, "w"));
        let (class, m) = (find(&graph, "Holder"), find(&graph, "Holder::m"));
        assert_eq!(graph.get(u).unwrap().type_ref, Some(class));
        assert_eq!(graph.dependency_count(u, class, DependencyKind::Use), 1);
        assert_eq!(graph.dependency_count(u, m, DependencyKind::Use), 2);
        assert_eq!(graph.dependency_count(w, m, DependencyKind::Use), 1);
        assert_eq!(graph.nodes_of_kind(NodeKind::Integral).len(), 1);
    }

    #[test]
    fn test_unrecognized_event_names_its_unit() {
        let mut builder = GraphBuilder::new();
        builder.unit = PathBuf::from("odd.cpp");
        let before = builder.graph().node_count();
        let root = builder.graph().root();
        let event = DeclEvent::named(DeclKind::Unrecognized("weird".into()), "w", "??");

        let err = builder.declare(&event, root).unwrap_err();
        match err {
            RippleError::Build { location, .. } => assert_eq!(location, "odd.cpp at 'w'"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(builder.graph().node_count(), before);
    }

    #[test]
    fn test_replace_with_literal_drops_substructure() {
        let mut builder = GraphBuilder::new();
        let placeholder = builder
            .resolve(&SymbolRef::new("Opaque", "Opaque", "Opaque", "class Opaque"))
            .unwrap();
        let child = builder
            .graph
            .add_node(
                NodeData::new(NodeId(100), NodeKind::Variable, "m", "Opaque::m", "int m"),
                Some(placeholder),
            )
            .unwrap();
        let user = builder
            .graph
            .add_node(
                NodeData::new(NodeId(101), NodeKind::Variable, "u", "u", "Opaque u"),
                Some(builder.graph.root()),
            )
            .unwrap();
        let int = builder.literal("int").unwrap();
        builder
            .graph
            .add_dependency(placeholder, int, DependencyKind::Use)
            .unwrap();
        builder
            .graph
            .add_dependency(user, placeholder, DependencyKind::Use)
            .unwrap();

        let literal = builder.literal("Opaque").unwrap();
        builder.replace(placeholder, literal).unwrap();

        assert!(!builder.graph.contains(placeholder));
        assert!(!builder.graph.contains(child));
        assert!(builder.graph.dependencies(literal).is_empty());
        assert_eq!(
            builder.graph.dependency_count(user, literal, DependencyKind::Use),
            1
        );
        assert_eq!(builder.symbols[&SymbolId::new("Opaque")], literal);
    }
}
