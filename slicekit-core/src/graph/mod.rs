//! Dependency Graph
//!
//! Slices declare the slices they depend on. This module turns those
//! declarations into the structures the store needs at runtime:
//!
//! - the forward (dependency) edges, walked once to reject cycles
//! - the direct reverse (dependents) edges
//! - the transitive closure of the reverse edges, used to widen a set of
//!   changed slices to every slice whose derived fields may have changed
//!
//! # Design Decisions
//!
//! 1. The graph is built once per `StoreState::create` and shared by every
//!    snapshot descending from it, so the closure is never recomputed
//!    during dispatch.
//!
//! 2. The closure is computed with a memoized depth-first walk. Shared
//!    sub-paths (diamonds) are visited once.
//!
//! 3. Cycle detection keeps an explicit recursion stack so the error can
//!    report the full path in traversal order.

mod dependency;

pub use dependency::DependencyGraph;
