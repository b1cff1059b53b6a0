use itertools::Itertools;
use petgraph::graph::{Graph, IndexType, NodeIndex};
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::Undirected;
use std::fmt::Debug;
use std::hash::Hash;

/// Read-only view of an undirected multigraph.
///
/// Only [`node_count`](Self::node_count), [`node_ids`](Self::node_ids),
/// [`edges`](Self::edges) and [`node_weight`](Self::node_weight) are required, everything
/// else is derived from them but can be overridden if the backing graph knows better.
pub trait GraphView {
    type NodeId: Copy + Eq + Hash + Debug;
    type NodeWeight;
    type EdgeWeight;

    fn node_count(&self) -> usize;
    /// All nodes, in a stable order. The matcher uses this order to break ties.
    fn node_ids(&self) -> impl Iterator<Item = Self::NodeId> + '_;
    /// Every edge incident to `n` exactly once, as the other endpoint and the edge weight.
    /// A self-loop shows up once, with `n` as its other endpoint.
    fn edges(&self, n: Self::NodeId) -> impl Iterator<Item = (Self::NodeId, &Self::EdgeWeight)> + '_;
    fn node_weight(&self, n: Self::NodeId) -> Option<&Self::NodeWeight>;

    /// Distinct neighbors of `n`, including `n` itself if it has a self-loop.
    fn neighbors(&self, n: Self::NodeId) -> impl Iterator<Item = Self::NodeId> + '_ {
        self.edges(n).map(|(m, _)| m).unique()
    }
    /// Number of edges between `a` and `b`.
    fn edge_multiplicity(&self, a: Self::NodeId, b: Self::NodeId) -> usize {
        self.edges(a).filter(|&(m, _)| m == b).count()
    }
    /// Self-loops count twice.
    fn degree(&self, n: Self::NodeId) -> usize {
        self.edges(n).map(|(m, _)| if m == n { 2 } else { 1 }).sum()
    }
    /// Weights of all parallel edges between `a` and `b`, in [`edges`](Self::edges) order.
    fn edge_weights(
        &self,
        a: Self::NodeId,
        b: Self::NodeId,
    ) -> impl Iterator<Item = &Self::EdgeWeight> + '_ {
        self.edges(a).filter(move |&(m, _)| m == b).map(|(_, w)| w)
    }
}

impl<G: GraphView> GraphView for &G {
    type NodeId = G::NodeId;
    type NodeWeight = G::NodeWeight;
    type EdgeWeight = G::EdgeWeight;

    fn node_count(&self) -> usize {
        (**self).node_count()
    }
    fn node_ids(&self) -> impl Iterator<Item = Self::NodeId> + '_ {
        (**self).node_ids()
    }
    fn edges(
        &self,
        n: Self::NodeId,
    ) -> impl Iterator<Item = (Self::NodeId, &Self::EdgeWeight)> + '_ {
        (**self).edges(n)
    }
    fn node_weight(&self, n: Self::NodeId) -> Option<&Self::NodeWeight> {
        (**self).node_weight(n)
    }
    fn degree(&self, n: Self::NodeId) -> usize {
        (**self).degree(n)
    }
}

fn other_end<Ix: IndexType>(n: NodeIndex<Ix>, a: NodeIndex<Ix>, b: NodeIndex<Ix>) -> NodeIndex<Ix> {
    if a == n {
        b
    } else {
        a
    }
}

impl<N, E, Ix: IndexType> GraphView for Graph<N, E, Undirected, Ix> {
    type NodeId = NodeIndex<Ix>;
    type NodeWeight = N;
    type EdgeWeight = E;

    fn node_count(&self) -> usize {
        Graph::node_count(self)
    }
    fn node_ids(&self) -> impl Iterator<Item = Self::NodeId> + '_ {
        self.node_indices()
    }
    fn edges(
        &self,
        n: Self::NodeId,
    ) -> impl Iterator<Item = (Self::NodeId, &Self::EdgeWeight)> + '_ {
        Graph::edges(self, n).map(move |e| (other_end(n, e.source(), e.target()), e.weight()))
    }
    fn node_weight(&self, n: Self::NodeId) -> Option<&Self::NodeWeight> {
        Graph::node_weight(self, n)
    }
}

impl<N, E, Ix: IndexType> GraphView for StableGraph<N, E, Undirected, Ix> {
    type NodeId = NodeIndex<Ix>;
    type NodeWeight = N;
    type EdgeWeight = E;

    fn node_count(&self) -> usize {
        StableGraph::node_count(self)
    }
    fn node_ids(&self) -> impl Iterator<Item = Self::NodeId> + '_ {
        self.node_indices()
    }
    fn edges(
        &self,
        n: Self::NodeId,
    ) -> impl Iterator<Item = (Self::NodeId, &Self::EdgeWeight)> + '_ {
        StableGraph::edges(self, n).map(move |e| (other_end(n, e.source(), e.target()), e.weight()))
    }
    fn node_weight(&self, n: Self::NodeId) -> Option<&Self::NodeWeight> {
        StableGraph::node_weight(self, n)
    }
}
