//! Backtracking isomorphism search for undirected multigraphs.
//!
//! The search grows a partial mapping one node pair at a time, always extending with the
//! lowest-indexed unmapped node of the second graph, and backs out of a pair as soon as every
//! extension of it has been tried. It runs off an explicit frame stack, so it can be suspended
//! between results and never recurses.

use crate::graph::misc::GraphView;
use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, instrument};

use self::state::Vf2State;

pub use self::mapping::Mapping;
pub use self::matching::GraphMatcher;
pub use self::semantic::{EdgeMatcher, NoSemanticMatch, NodeMatcher};

mod state {
    use super::*;
    use ahash::HashMap;
    use smallvec::SmallVec;

    #[derive(Debug)]
    pub struct Vf2State<'a, G: GraphView> {
        /// A reference to the graph this state was built from.
        pub graph: &'a G,
        /// Node identifiers, by compact index.
        pub nodes: Vec<G::NodeId>,
        /// Distinct neighbors of each node with their edge multiplicity, self-loops excluded.
        adjacency: Vec<SmallVec<(usize, usize), 4>>,
        /// Self-loop multiplicity of each node.
        pub loops: Vec<usize>,
        /// This side of the current mapping, `usize::MAX` for no mapping.
        pub mapping: Vec<usize>,
        generation: usize,
    }

    impl<'a, G: GraphView> Vf2State<'a, G> {
        pub fn new(g: &'a G) -> Self {
            let nodes: Vec<G::NodeId> = g.node_ids().collect();
            let index: HashMap<G::NodeId, usize> =
                nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();
            let mut adjacency = vec![SmallVec::new(); nodes.len()];
            let mut loops = vec![0; nodes.len()];
            for (i, &n) in nodes.iter().enumerate() {
                let adj: &mut SmallVec<(usize, usize), 4> = &mut adjacency[i];
                for (m, _) in g.edges(n) {
                    if m == n {
                        loops[i] += 1;
                        continue;
                    }
                    let j = index[&m];
                    match adj.iter_mut().find(|(k, _)| *k == j) {
                        Some((_, count)) => *count += 1,
                        None => adj.push((j, 1)),
                    }
                }
            }
            Vf2State {
                graph: g,
                mapping: vec![usize::MAX; nodes.len()],
                nodes,
                adjacency,
                loops,
                generation: 0,
            }
        }

        /// Number of pairs in the mapping.
        pub fn generation(&self) -> usize {
            self.generation
        }

        /// Return **true** if we have a complete mapping
        pub fn is_complete(&self) -> bool {
            self.generation == self.mapping.len()
        }

        pub fn neighbors(&self, ix: usize) -> &[(usize, usize)] {
            &self.adjacency[ix]
        }

        /// Number of edges between two distinct nodes, zero if they aren't adjacent.
        pub fn multiplicity(&self, a: usize, b: usize) -> usize {
            self.adjacency[a]
                .iter()
                .find(|&&(n, _)| n == b)
                .map_or(0, |&(_, count)| count)
        }

        /// Add mapping **from** <-> **to** to the state.
        pub fn push_mapping(&mut self, from: usize, to: usize) {
            debug_assert_eq!(self.mapping[from], usize::MAX);
            self.generation += 1;
            self.mapping[from] = to;
        }

        /// Restore the state to before the last added mapping
        pub fn pop_mapping(&mut self, from: usize) {
            debug_assert_ne!(self.mapping[from], usize::MAX);
            self.mapping[from] = usize::MAX;
            self.generation -= 1;
        }

        pub fn clear(&mut self) {
            self.mapping.fill(usize::MAX);
            self.generation = 0;
        }

        /// Find the next (least) unmapped node at or after `from_index`.
        pub fn next_rest_index(&self, from_index: usize) -> Option<usize> {
            self.mapping
                .get(from_index..)?
                .iter()
                .position(|&elt| elt == usize::MAX)
                .map(|index| index + from_index)
        }
    }
}

mod semantic {
    use super::*;
    use smallvec::{smallvec, SmallVec};

    /// Matcher that accepts everything, for when there's nothing to compare.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct NoSemanticMatch;

    pub trait NodeMatcher<G0: GraphView, G1: GraphView> {
        fn enabled() -> bool;
        fn eq(&mut self, g0: &G0, g1: &G1, n0: G0::NodeId, n1: G1::NodeId) -> bool;
    }

    impl<G0: GraphView, G1: GraphView> NodeMatcher<G0, G1> for NoSemanticMatch {
        #[inline]
        fn enabled() -> bool {
            false
        }
        #[inline]
        fn eq(&mut self, _g0: &G0, _g1: &G1, _n0: G0::NodeId, _n1: G1::NodeId) -> bool {
            true
        }
    }

    impl<G0, G1, F> NodeMatcher<G0, G1> for F
    where
        G0: GraphView,
        G1: GraphView,
        F: FnMut(&G0::NodeWeight, &G1::NodeWeight) -> bool,
    {
        #[inline]
        fn enabled() -> bool {
            true
        }
        #[inline]
        fn eq(&mut self, g0: &G0, g1: &G1, n0: G0::NodeId, n1: G1::NodeId) -> bool {
            if let (Some(x), Some(y)) = (g0.node_weight(n0), g1.node_weight(n1)) {
                self(x, y)
            } else {
                false
            }
        }
    }

    pub trait EdgeMatcher<G0: GraphView, G1: GraphView> {
        fn enabled() -> bool;
        fn eq(
            &mut self,
            g0: &G0,
            g1: &G1,
            e0: (G0::NodeId, G0::NodeId),
            e1: (G1::NodeId, G1::NodeId),
        ) -> bool;
    }

    impl<G0: GraphView, G1: GraphView> EdgeMatcher<G0, G1> for NoSemanticMatch {
        #[inline]
        fn enabled() -> bool {
            false
        }
        #[inline]
        fn eq(
            &mut self,
            _g0: &G0,
            _g1: &G1,
            _e0: (G0::NodeId, G0::NodeId),
            _e1: (G1::NodeId, G1::NodeId),
        ) -> bool {
            true
        }
    }

    /// Pair off every weight in `w0` with an unused weight in `w1` that `eq` accepts,
    /// backtracking when a choice leaves some weight without a partner.
    fn pair_up<A, B, F>(eq: &mut F, w0: &[&A], w1: &[&B], used: &mut [bool]) -> bool
    where
        F: FnMut(&A, &B) -> bool,
    {
        let Some((first, rest)) = w0.split_first() else {
            return true;
        };
        for (j, second) in w1.iter().enumerate() {
            if used[j] || !eq(*first, *second) {
                continue;
            }
            used[j] = true;
            if pair_up(eq, rest, w1, used) {
                return true;
            }
            used[j] = false;
        }
        false
    }

    /// Parallel edges match if their weights can be paired off one-to-one, whatever order the
    /// graphs list them in.
    impl<G0, G1, F> EdgeMatcher<G0, G1> for F
    where
        G0: GraphView,
        G1: GraphView,
        F: FnMut(&G0::EdgeWeight, &G1::EdgeWeight) -> bool,
    {
        #[inline]
        fn enabled() -> bool {
            true
        }
        fn eq(
            &mut self,
            g0: &G0,
            g1: &G1,
            e0: (G0::NodeId, G0::NodeId),
            e1: (G1::NodeId, G1::NodeId),
        ) -> bool {
            let w0: SmallVec<&G0::EdgeWeight, 4> = g0.edge_weights(e0.0, e0.1).collect();
            let w1: SmallVec<&G1::EdgeWeight, 4> = g1.edge_weights(e1.0, e1.1).collect();
            if w0.len() != w1.len() {
                return false;
            }
            let mut used: SmallVec<bool, 4> = smallvec![false; w1.len()];
            pair_up(self, &w0, &w1, &mut used)
        }
    }
}

mod mapping {
    use ahash::HashMap;
    use std::hash::Hash;
    use std::ops::Index;

    /// A complete isomorphism, kept in both directions.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Mapping<A: Hash + Eq, B: Hash + Eq> {
        forward: HashMap<A, B>,
        backward: HashMap<B, A>,
    }

    impl<A: Hash + Eq + Copy, B: Hash + Eq + Copy> Mapping<A, B> {
        /// Number of mapped pairs, the order of either graph.
        pub fn len(&self) -> usize {
            self.forward.len()
        }
        /// Only the mapping between two empty graphs is empty.
        pub fn is_empty(&self) -> bool {
            self.forward.is_empty()
        }
        /// Image of a node of the first graph.
        pub fn get(&self, a: &A) -> Option<&B> {
            self.forward.get(a)
        }
        /// Preimage of a node of the second graph.
        pub fn get_inverse(&self, b: &B) -> Option<&A> {
            self.backward.get(b)
        }
        /// Mapped pairs in no particular order.
        pub fn iter(&self) -> impl Iterator<Item = (&A, &B)> + '_ {
            self.forward.iter()
        }
        /// First graph to second.
        pub fn forward(&self) -> &HashMap<A, B> {
            &self.forward
        }
        /// Second graph to first.
        pub fn backward(&self) -> &HashMap<B, A> {
            &self.backward
        }
    }

    impl<A: Hash + Eq, B: Hash + Eq> Index<&A> for Mapping<A, B> {
        type Output = B;

        fn index(&self, a: &A) -> &B {
            &self.forward[a]
        }
    }

    impl<A: Hash + Eq + Copy, B: Hash + Eq + Copy> FromIterator<(A, B)> for Mapping<A, B> {
        fn from_iter<I: IntoIterator<Item = (A, B)>>(iter: I) -> Self {
            let forward: HashMap<A, B> = iter.into_iter().collect();
            let backward = forward.iter().map(|(&a, &b)| (b, a)).collect();
            Self { forward, backward }
        }
    }
}

mod matching {
    use super::*;

    #[derive(Clone, PartialEq, Debug)]
    enum Frame {
        /// Extend the mapping, or report it if it's complete.
        Outer,
        /// Try to add this pair to the mapping.
        Inner { nodes: (usize, usize) },
        /// Take this pair back out, it was added at `depth`.
        Unwind { nodes: (usize, usize), depth: usize },
    }

    /// Mapped neighbors of `a` must map to neighbors of `b` over the same number of edges.
    /// Returns how many neighbors of `a` are still unmapped.
    fn mapped_neighbors<A: GraphView, B: GraphView>(
        this: &Vf2State<'_, A>,
        other: &Vf2State<'_, B>,
        a: usize,
        b: usize,
    ) -> Option<usize> {
        let mut unmapped = 0;
        for &(n, count) in this.neighbors(a) {
            match this.mapping[n] {
                usize::MAX => unmapped += 1,
                m => {
                    if other.multiplicity(b, m) != count {
                        return None;
                    }
                }
            }
        }
        Some(unmapped)
    }

    #[instrument(level = "trace", skip_all)]
    fn is_syntactic_feasible<G0: GraphView, G1: GraphView>(
        st: &(Vf2State<'_, G0>, Vf2State<'_, G1>),
        nodes: (usize, usize),
    ) -> bool {
        if st.0.loops[nodes.0] != st.1.loops[nodes.1] {
            return false;
        }
        let Some(rest0) = mapped_neighbors(&st.0, &st.1, nodes.0, nodes.1) else {
            return false;
        };
        let Some(rest1) = mapped_neighbors(&st.1, &st.0, nodes.1, nodes.0) else {
            return false;
        };
        // look-ahead: whatever is left around both nodes has to be matched up later
        rest0 == rest1
    }

    #[instrument(level = "trace", skip_all)]
    fn is_semantic_feasible<G0, G1, NM, EM>(
        st: &(Vf2State<'_, G0>, Vf2State<'_, G1>),
        nodes: (usize, usize),
        node_match: &mut NM,
        edge_match: &mut EM,
    ) -> bool
    where
        G0: GraphView,
        G1: GraphView,
        NM: NodeMatcher<G0, G1>,
        EM: EdgeMatcher<G0, G1>,
    {
        let n0 = st.0.nodes[nodes.0];
        let n1 = st.1.nodes[nodes.1];
        if NM::enabled() && !node_match.eq(st.0.graph, st.1.graph, n0, n1) {
            return false;
        }
        if EM::enabled() {
            if st.0.loops[nodes.0] > 0 && !edge_match.eq(st.0.graph, st.1.graph, (n0, n0), (n1, n1))
            {
                return false;
            }
            for &(n, _) in st.0.neighbors(nodes.0) {
                let m = st.0.mapping[n];
                if m == usize::MAX {
                    continue;
                }
                let e0 = (n0, st.0.nodes[n]);
                let e1 = (n1, st.1.nodes[m]);
                if !edge_match.eq(st.0.graph, st.1.graph, e0, e1) {
                    return false;
                }
            }
        }
        true
    }

    /// The least unmapped node of the second graph, paired with the least unmapped node of the
    /// first.
    #[instrument(level = "trace", skip_all)]
    fn next_candidate<G0: GraphView, G1: GraphView>(
        st: &(Vf2State<'_, G0>, Vf2State<'_, G1>),
    ) -> Option<(usize, usize)> {
        let to = st.1.next_rest_index(0)?;
        let from = st.0.next_rest_index(0)?;
        Some((from, to))
    }

    /// Same node of the second graph, next unmapped node of the first.
    fn next_from_ix<G0: GraphView, G1: GraphView>(
        st: &(Vf2State<'_, G0>, Vf2State<'_, G1>),
        nodes: (usize, usize),
    ) -> Option<(usize, usize)> {
        st.0.next_rest_index(nodes.0 + 1).map(|from| (from, nodes.1))
    }

    fn push_state<G0: GraphView, G1: GraphView>(
        st: &mut (Vf2State<'_, G0>, Vf2State<'_, G1>),
        nodes: (usize, usize),
    ) {
        st.0.push_mapping(nodes.0, nodes.1);
        st.1.push_mapping(nodes.1, nodes.0);
    }

    fn pop_state<G0: GraphView, G1: GraphView>(
        st: &mut (Vf2State<'_, G0>, Vf2State<'_, G1>),
        nodes: (usize, usize),
    ) {
        st.0.pop_mapping(nodes.0);
        st.1.pop_mapping(nodes.1);
    }

    fn snapshot<G0: GraphView, G1: GraphView>(
        st: &(Vf2State<'_, G0>, Vf2State<'_, G1>),
    ) -> Mapping<G0::NodeId, G1::NodeId> {
        st.0.mapping
            .iter()
            .enumerate()
            .map(|(i, &j)| (st.0.nodes[i], st.1.nodes[j]))
            .collect()
    }

    /// Run the search until the next complete mapping, or until the stack runs dry.
    #[instrument(level = "trace", skip_all)]
    fn next_isomorphism<G0, G1, NM, EM>(
        st: &mut (Vf2State<'_, G0>, Vf2State<'_, G1>),
        node_match: &mut NM,
        edge_match: &mut EM,
        stack: &mut Vec<Frame>,
    ) -> Option<Mapping<G0::NodeId, G1::NodeId>>
    where
        G0: GraphView,
        G1: GraphView,
        NM: NodeMatcher<G0, G1>,
        EM: EdgeMatcher<G0, G1>,
    {
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Outer => {
                    if st.1.is_complete() {
                        let mapping = snapshot(st);
                        debug!(size = mapping.len(), "found isomorphism");
                        return Some(mapping);
                    }
                    if let Some(nodes) = next_candidate(st) {
                        stack.push(Frame::Inner { nodes });
                    }
                }
                Frame::Inner { nodes } => {
                    if is_syntactic_feasible(st, nodes)
                        && is_semantic_feasible(st, nodes, node_match, edge_match)
                    {
                        push_state(st, nodes);
                        stack.push(Frame::Unwind {
                            nodes,
                            depth: st.0.generation(),
                        });
                        stack.push(Frame::Outer);
                        continue;
                    }
                    if let Some(nodes) = next_from_ix(st, nodes) {
                        stack.push(Frame::Inner { nodes });
                    }
                }
                Frame::Unwind { nodes, depth } => {
                    debug_assert_eq!(st.0.generation(), depth);
                    pop_state(st, nodes);
                    if let Some(nodes) = next_from_ix(st, nodes) {
                        stack.push(Frame::Inner { nodes });
                    }
                }
            }
        }
        None
    }

    /// Lazily enumerates every isomorphism between two graphs.
    ///
    /// This doesn't run the cheap invariant checks [`is_isomorphic`] does; graphs with
    /// different node counts produce nothing.
    pub struct GraphMatcher<'a, G0: GraphView, G1: GraphView, NM, EM> {
        st: (Vf2State<'a, G0>, Vf2State<'a, G1>),
        node_match: NM,
        edge_match: EM,
        stack: Vec<Frame>,
    }

    impl<'a, G0, G1, NM, EM> GraphMatcher<'a, G0, G1, NM, EM>
    where
        G0: GraphView,
        G1: GraphView,
        NM: NodeMatcher<G0, G1>,
        EM: EdgeMatcher<G0, G1>,
    {
        pub fn new(g0: &'a G0, g1: &'a G1, node_match: NM, edge_match: EM) -> Self {
            let mut this = Self {
                st: (Vf2State::new(g0), Vf2State::new(g1)),
                node_match,
                edge_match,
                stack: Vec::new(),
            };
            this.reset();
            this
        }

        /// Start over from an empty mapping.
        pub fn reset(&mut self) {
            self.st.0.clear();
            self.st.1.clear();
            self.stack.clear();
            if self.st.0.nodes.len() == self.st.1.nodes.len() {
                self.stack.push(Frame::Outer);
            }
        }

        /// Number of pairs in the partial mapping the search is currently at.
        pub fn depth(&self) -> usize {
            self.st.0.generation()
        }
    }

    impl<'a, G0, G1, NM, EM> Iterator for GraphMatcher<'a, G0, G1, NM, EM>
    where
        G0: GraphView,
        G1: GraphView,
        NM: NodeMatcher<G0, G1>,
        EM: EdgeMatcher<G0, G1>,
    {
        type Item = Mapping<G0::NodeId, G1::NodeId>;

        #[instrument(level = "trace", skip_all, name = "ism_next")]
        fn next(&mut self) -> Option<Self::Item> {
            next_isomorphism(
                &mut self.st,
                &mut self.node_match,
                &mut self.edge_match,
                &mut self.stack,
            )
        }

        fn size_hint(&self) -> (usize, Option<usize>) {
            if self.stack.is_empty() {
                return (0, Some(0));
            }
            // there can't be more than n! bijections
            let n = self.st.0.nodes.len();
            (0, (1..=n).try_fold(1usize, |acc, k| acc.checked_mul(k)))
        }
    }
}

/// Reason two graphs can't be isomorphic, found without searching.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Mismatch {
    #[error("graphs have different orders: {left} vs {right}")]
    NodeCount { left: usize, right: usize },
    #[error("graphs have different degree sequences")]
    DegreeSequence,
}

/// Sorted degrees of every node in `g`.
pub fn degree_sequence<G: GraphView>(g: &G) -> Vec<usize> {
    g.node_ids().map(|n| g.degree(n)).sorted_unstable().collect()
}

/// Check the necessary conditions that are cheap to compute: equal node counts, then equal
/// degree sequences.
pub fn check_invariants<G0: GraphView, G1: GraphView>(g0: &G0, g1: &G1) -> Result<(), Mismatch> {
    let (left, right) = (g0.node_count(), g1.node_count());
    if left != right {
        return Err(Mismatch::NodeCount { left, right });
    }
    if degree_sequence(g0) != degree_sequence(g1) {
        return Err(Mismatch::DegreeSequence);
    }
    Ok(())
}

/// Build a matcher, unless the invariant checks already rule an isomorphism out.
fn checked_matcher<'a, G0, G1, NM, EM>(
    g0: &'a G0,
    g1: &'a G1,
    node_match: NM,
    edge_match: EM,
) -> Option<GraphMatcher<'a, G0, G1, NM, EM>>
where
    G0: GraphView,
    G1: GraphView,
    NM: NodeMatcher<G0, G1>,
    EM: EdgeMatcher<G0, G1>,
{
    if let Err(err) = check_invariants(g0, g1) {
        debug!(%err, "graphs aren't isomorphic");
        return None;
    }
    Some(GraphMatcher::new(g0, g1, node_match, edge_match))
}

/// Lazily enumerate every isomorphism from `g0` to `g1`, comparing node and edge weights
/// with the given predicates. Pass `|_, _| true` for a side that shouldn't be compared, or
/// use [`GraphMatcher::new`] with [`NoSemanticMatch`].
///
/// Predicates are free to panic; that aborts the search and propagates to the caller.
pub fn isomorphisms_iter<'a, G0, G1, NM, EM>(
    g0: &'a G0,
    g1: &'a G1,
    node_match: NM,
    edge_match: EM,
) -> impl Iterator<Item = Mapping<G0::NodeId, G1::NodeId>> + 'a
where
    G0: 'a + GraphView,
    G1: 'a + GraphView,
    NM: 'a + FnMut(&G0::NodeWeight, &G1::NodeWeight) -> bool,
    EM: 'a + FnMut(&G0::EdgeWeight, &G1::EdgeWeight) -> bool,
{
    checked_matcher(g0, g1, node_match, edge_match)
        .into_iter()
        .flatten()
}

/// Lazily enumerate every structural isomorphism from `g0` to `g1`, ignoring weights.
pub fn isomorphisms<'a, G0, G1>(
    g0: &'a G0,
    g1: &'a G1,
) -> impl Iterator<Item = Mapping<G0::NodeId, G1::NodeId>> + 'a
where
    G0: 'a + GraphView,
    G1: 'a + GraphView,
{
    checked_matcher(g0, g1, NoSemanticMatch, NoSemanticMatch)
        .into_iter()
        .flatten()
}

/// Every structural automorphism of `g`.
pub fn automorphisms<'a, G: 'a + GraphView>(
    g: &'a G,
) -> impl Iterator<Item = Mapping<G::NodeId, G::NodeId>> + 'a {
    isomorphisms(g, g)
}

/// Return `true` if `g0` and `g1` are isomorphic, ignoring weights.
pub fn is_isomorphic<G0: GraphView, G1: GraphView>(g0: &G0, g1: &G1) -> bool {
    checked_matcher(g0, g1, NoSemanticMatch, NoSemanticMatch)
        .is_some_and(|mut matcher| matcher.next().is_some())
}

/// Return `true` if `g0` and `g1` are isomorphic with matching node and edge weights.
/// Pass `|_, _| true` for a side that shouldn't be compared.
pub fn is_isomorphic_matching<G0, G1, NM, EM>(
    g0: &G0,
    g1: &G1,
    node_match: NM,
    edge_match: EM,
) -> bool
where
    G0: GraphView,
    G1: GraphView,
    NM: FnMut(&G0::NodeWeight, &G1::NodeWeight) -> bool,
    EM: FnMut(&G0::EdgeWeight, &G1::EdgeWeight) -> bool,
{
    checked_matcher(g0, g1, node_match, edge_match)
        .is_some_and(|mut matcher| matcher.next().is_some())
}

/// The first isomorphism from `g0` to `g1` in search order, ignoring weights.
pub fn find_isomorphism<G0: GraphView, G1: GraphView>(
    g0: &G0,
    g1: &G1,
) -> Option<Mapping<G0::NodeId, G1::NodeId>> {
    checked_matcher(g0, g1, NoSemanticMatch, NoSemanticMatch)?.next()
}

/// The first isomorphism from `g0` to `g1` in search order that the node and edge predicates
/// accept. Pass `|_, _| true` for a side that shouldn't be compared.
pub fn find_isomorphism_matching<G0, G1, NM, EM>(
    g0: &G0,
    g1: &G1,
    node_match: NM,
    edge_match: EM,
) -> Option<Mapping<G0::NodeId, G1::NodeId>>
where
    G0: GraphView,
    G1: GraphView,
    NM: FnMut(&G0::NodeWeight, &G1::NodeWeight) -> bool,
    EM: FnMut(&G0::EdgeWeight, &G1::EdgeWeight) -> bool,
{
    checked_matcher(g0, g1, node_match, edge_match)?.next()
}
