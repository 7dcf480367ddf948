//! Dependency tracking for formula calculation
//!
//! The same [`DependencyGraph`] orders formula columns inside a worksheet and
//! worksheets inside a package.

use crate::ast::Expr;
use crate::error::{FormulaError, FormulaResult};
use crate::parser::FormulaCache;
use ahash::{AHashMap, AHashSet};
use fabcalc_core::{keys_match, ColumnDef};
use std::collections::BTreeSet;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

/// Directed dependency graph
///
/// Nodes are kept in insertion order and precedents are kept sorted, so the
/// topological order and any reported cycle are deterministic.
#[derive(Debug, Clone)]
pub struct DependencyGraph<K> {
    nodes: Vec<K>,
    /// Node → nodes it depends on (precedents)
    precedents: AHashMap<K, BTreeSet<K>>,
    /// Node → nodes that depend on it (dependents)
    dependents: AHashMap<K, BTreeSet<K>>,
}

impl<K> Default for DependencyGraph<K> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            precedents: AHashMap::default(),
            dependents: AHashMap::default(),
        }
    }
}

impl<K: Clone + Eq + Hash + Ord> DependencyGraph<K> {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with no dependencies
    pub fn add_node(&mut self, node: K) {
        if !self.precedents.contains_key(&node) {
            self.precedents.insert(node.clone(), BTreeSet::new());
            self.nodes.push(node);
        }
    }

    /// Add a dependency: `dependent` depends on `precedent`
    pub fn add_dependency(&mut self, dependent: K, precedent: K) {
        self.add_node(dependent.clone());
        self.add_node(precedent.clone());
        self.dependents
            .entry(precedent.clone())
            .or_default()
            .insert(dependent.clone());
        if let Some(set) = self.precedents.get_mut(&dependent) {
            set.insert(precedent);
        }
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> &[K] {
        &self.nodes
    }

    /// Check if a node is in the graph
    pub fn contains(&self, node: &K) -> bool {
        self.precedents.contains_key(node)
    }

    /// Get nodes the given node depends on
    pub fn get_precedents(&self, node: &K) -> impl Iterator<Item = &K> + '_ {
        self.precedents.get(node).into_iter().flatten()
    }

    /// Get nodes that depend on the given node
    pub fn get_dependents(&self, node: &K) -> impl Iterator<Item = &K> + '_ {
        self.dependents.get(node).into_iter().flatten()
    }

    /// Order nodes so that every node comes after all of its precedents
    ///
    /// Returns the full cycle (first member repeated at the end) if the graph
    /// is not acyclic.
    pub fn topological_order(&self) -> Result<Vec<K>, Vec<K>> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = AHashSet::default();
        let mut stack = Vec::new();

        for node in &self.nodes {
            self.visit(node, &mut order, &mut visited, &mut stack)?;
        }

        Ok(order)
    }

    /// First cycle found in the graph, if any
    pub fn find_cycle(&self) -> Option<Vec<K>> {
        self.topological_order().err()
    }

    /// First cycle reachable from `start` through its precedents, if any
    pub fn find_cycle_from(&self, start: &K) -> Option<Vec<K>> {
        let mut order = Vec::new();
        let mut visited = AHashSet::default();
        let mut stack = Vec::new();
        self.visit(start, &mut order, &mut visited, &mut stack).err()
    }

    /// Topological sort helper (DFS over precedents)
    fn visit(
        &self,
        node: &K,
        order: &mut Vec<K>,
        visited: &mut AHashSet<K>,
        stack: &mut Vec<K>,
    ) -> Result<(), Vec<K>> {
        if visited.contains(node) {
            return Ok(());
        }

        if let Some(start) = stack.iter().position(|n| n == node) {
            let mut cycle = stack[start..].to_vec();
            cycle.push(node.clone());
            return Err(cycle);
        }

        stack.push(node.clone());
        for precedent in self.get_precedents(node) {
            self.visit(precedent, order, visited, stack)?;
        }
        stack.pop();

        visited.insert(node.clone());
        order.push(node.clone());
        Ok(())
    }
}

/// Convert a cycle of graph nodes into a [`FormulaError::CircularReference`]
pub fn cycle_error<K: Display>(cycle: Vec<K>) -> FormulaError {
    FormulaError::CircularReference {
        cycle: cycle.into_iter().map(|k| k.to_string()).collect(),
    }
}

/// Columns and worksheets a formula touches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormulaReferences {
    /// Column keys of the formula's own worksheet, as written
    pub columns: BTreeSet<String>,
    /// Sibling worksheet names, as written
    pub worksheets: BTreeSet<String>,
}

impl FormulaReferences {
    /// Collect references from a parsed formula
    ///
    /// Cross-worksheet references naming `own_worksheet` count as references to
    /// the worksheet's own columns.
    pub fn collect(expr: &Expr, own_worksheet: Option<&str>) -> Self {
        let mut refs = Self::default();
        let is_own = |name: &str| own_worksheet.map_or(false, |own| keys_match(own, name));

        expr.walk(&mut |node| match node {
            Expr::ColumnRef(key) | Expr::Aggregate { column: key, .. } => {
                refs.columns.insert(key.clone());
            }
            Expr::CrossSheetAggregate {
                worksheet, column, ..
            } => {
                if is_own(worksheet) {
                    refs.columns.insert(column.clone());
                } else {
                    refs.worksheets.insert(worksheet.clone());
                }
            }
            Expr::CrossSheetProperty { worksheet, .. } => {
                if !is_own(worksheet) {
                    refs.worksheets.insert(worksheet.clone());
                }
            }
            _ => {}
        });

        refs
    }
}

/// Formula columns of one worksheet, parsed, with their dependency graph
#[derive(Debug, Clone)]
pub struct ColumnGraph {
    graph: DependencyGraph<String>,
    formulas: Vec<(String, Arc<Expr>)>,
    worksheets: BTreeSet<String>,
}

impl ColumnGraph {
    /// Parse every formula column and link it to the formula columns it reads
    ///
    /// References to keys that are not declared are left out of the graph; they
    /// fail per cell at evaluation time.
    pub fn build(
        columns: &[ColumnDef],
        own_worksheet: Option<&str>,
        cache: &mut FormulaCache,
    ) -> FormulaResult<Self> {
        let mut graph = DependencyGraph::new();
        let mut formulas = Vec::new();
        let mut worksheets = BTreeSet::new();

        for column in columns {
            if let Some(text) = column.formula_text() {
                let expr = cache.get_or_parse(text)?;
                graph.add_node(column.key.clone());
                formulas.push((column.key.clone(), expr));
            }
        }

        for (key, expr) in &formulas {
            let refs = FormulaReferences::collect(expr, own_worksheet);
            for reference in &refs.columns {
                let target = columns
                    .iter()
                    .find(|c| c.matches_key(reference) && c.is_formula());
                if let Some(target) = target {
                    graph.add_dependency(key.clone(), target.key.clone());
                }
            }
            worksheets.extend(refs.worksheets);
        }

        Ok(Self {
            graph,
            formulas,
            worksheets,
        })
    }

    /// Formula column keys in evaluation order
    pub fn evaluation_order(&self) -> FormulaResult<Vec<String>> {
        self.graph.topological_order().map_err(cycle_error)
    }

    /// Parsed formula of a column
    pub fn formula(&self, key: &str) -> Option<&Arc<Expr>> {
        self.formulas
            .iter()
            .find(|(k, _)| keys_match(k, key))
            .map(|(_, expr)| expr)
    }

    /// Sibling worksheets referenced by any formula
    pub fn worksheet_references(&self) -> &BTreeSet<String> {
        &self.worksheets
    }

    /// Underlying graph
    pub fn graph(&self) -> &DependencyGraph<String> {
        &self.graph
    }
}

/// Build the column dependency graph and return formula columns in a safe
/// evaluation order
///
/// Fails with [`FormulaError::Parse`] for the first malformed formula and with
/// [`FormulaError::CircularReference`] when formulas depend on each other in
/// a cycle.
pub fn build_dependency_graph(columns: &[ColumnDef]) -> FormulaResult<Vec<String>> {
    let mut cache = FormulaCache::new();
    ColumnGraph::build(columns, None, &mut cache)?.evaluation_order()
}
