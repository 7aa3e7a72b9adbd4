//! Slice dependency graph with transitive reverse closure.

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};

use crate::error::{Error, Result};
use crate::ids::SliceId;

/// Forward and reverse dependency sets over a list of slices.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Direct dependencies of each node, in declaration order.
    dependencies: IndexMap<SliceId, Vec<SliceId>>,

    /// Direct dependents of each node.
    dependents: IndexMap<SliceId, IndexSet<SliceId>>,

    /// Every node that transitively depends on each node.
    all_dependents: IndexMap<SliceId, IndexSet<SliceId>>,
}

impl DependencyGraph {
    /// Build the graph from `(node, direct dependencies)` pairs.
    ///
    /// Fails with [`Error::CircularDependency`] if the forward edges contain
    /// a cycle.
    pub fn new<I>(nodes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (SliceId, Vec<SliceId>)>,
    {
        let dependencies: IndexMap<SliceId, Vec<SliceId>> = nodes.into_iter().collect();

        detect_cycles(&dependencies)?;

        let mut dependents: IndexMap<SliceId, IndexSet<SliceId>> = dependencies
            .keys()
            .map(|id| (id.clone(), IndexSet::new()))
            .collect();

        for (node, deps) in &dependencies {
            for dep in deps {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(node.clone());
            }
        }

        let mut all_dependents = IndexMap::with_capacity(dependents.len());
        for node in dependents.keys() {
            collect_dependents(node, &dependents, &mut all_dependents);
        }

        Ok(Self {
            dependencies,
            dependents,
            all_dependents,
        })
    }

    /// Direct dependencies of `id`.
    pub fn dependencies(&self, id: &SliceId) -> &[SliceId] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Slices that list `id` as a direct dependency.
    pub fn dependents(&self, id: &SliceId) -> Option<&IndexSet<SliceId>> {
        self.dependents.get(id)
    }

    /// Slices that depend on `id` directly or through other slices.
    pub fn all_dependents(&self, id: &SliceId) -> Option<&IndexSet<SliceId>> {
        self.all_dependents.get(id)
    }

    /// Widen a set of changed slices with every transitive dependent.
    pub fn widen<'a, I>(&self, changed: I) -> HashSet<SliceId>
    where
        I: IntoIterator<Item = &'a SliceId>,
    {
        let mut widened = HashSet::new();
        for id in changed {
            widened.insert(id.clone());
            if let Some(dependents) = self.all_dependents.get(id) {
                widened.extend(dependents.iter().cloned());
            }
        }
        widened
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.dependents.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.dependents.is_empty()
    }
}

/// Memoized depth-first collection of transitive dependents.
fn collect_dependents(
    node: &SliceId,
    dependents: &IndexMap<SliceId, IndexSet<SliceId>>,
    memo: &mut IndexMap<SliceId, IndexSet<SliceId>>,
) -> IndexSet<SliceId> {
    if let Some(done) = memo.get(node) {
        return done.clone();
    }

    let mut result = IndexSet::new();
    if let Some(direct) = dependents.get(node) {
        for child in direct {
            result.insert(child.clone());
            result.extend(collect_dependents(child, dependents, memo));
        }
    }

    memo.insert(node.clone(), result.clone());
    result
}

fn detect_cycles(dependencies: &IndexMap<SliceId, Vec<SliceId>>) -> Result<()> {
    let mut finished = HashSet::new();
    let mut stack = Vec::new();

    for node in dependencies.keys() {
        walk(node, dependencies, &mut stack, &mut finished)?;
    }
    Ok(())
}

fn walk(
    node: &SliceId,
    dependencies: &IndexMap<SliceId, Vec<SliceId>>,
    stack: &mut Vec<SliceId>,
    finished: &mut HashSet<SliceId>,
) -> Result<()> {
    if finished.contains(node) {
        return Ok(());
    }

    if let Some(start) = stack.iter().position(|id| id == node) {
        let mut path = stack[start..].to_vec();
        path.push(node.clone());
        return Err(Error::CircularDependency { path });
    }

    stack.push(node.clone());
    if let Some(deps) = dependencies.get(node) {
        for dep in deps {
            walk(dep, dependencies, stack, finished)?;
        }
    }
    stack.pop();

    finished.insert(node.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> SliceId {
        SliceId::from(raw)
    }

    fn graph(edges: &[(&str, &[&str])]) -> Result<DependencyGraph> {
        DependencyGraph::new(
            edges
                .iter()
                .map(|(node, deps)| (id(node), deps.iter().map(|d| id(d)).collect())),
        )
    }

    #[test]
    fn direct_dependents_are_reversed_edges() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"])]).unwrap();

        let dependents = g.dependents(&id("a")).unwrap();
        assert!(dependents.contains(&id("b")));
        assert!(dependents.contains(&id("c")));
        assert!(g.dependents(&id("b")).unwrap().is_empty());
        assert_eq!(g.dependencies(&id("b")), &[id("a")]);
    }

    #[test]
    fn transitive_dependents_follow_chains() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"]), ("d", &[])]).unwrap();

        let all = g.all_dependents(&id("a")).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&id("b")));
        assert!(all.contains(&id("c")));
        assert!(g.all_dependents(&id("d")).unwrap().is_empty());
    }

    #[test]
    fn diamonds_are_deduplicated() {
        let g = graph(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["b", "c"]),
        ])
        .unwrap();

        let all = g.all_dependents(&id("a")).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.contains(&id("d")));
    }

    #[test]
    fn widen_includes_changed_and_dependents() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"]), ("x", &[])]).unwrap();

        let widened = g.widen([&id("b")]);
        assert_eq!(widened.len(), 2);
        assert!(widened.contains(&id("b")));
        assert!(widened.contains(&id("c")));
        assert!(!widened.contains(&id("a")));
    }

    #[test]
    fn cycle_reports_path_in_traversal_order() {
        let err = graph(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]).unwrap_err();

        match err {
            Error::CircularDependency { path } => {
                assert_eq!(path, vec![id("a"), id("c"), id("b"), id("a")]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = graph(&[("a", &["a"])]).unwrap_err();
        assert!(matches!(err, Error::CircularDependency { .. }));
    }
}
