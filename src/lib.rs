//! Isomorphism testing and enumeration for undirected multigraphs.
//!
//! Graphs are read through [`graph::misc::GraphView`], which is implemented for undirected
//! `petgraph` graphs out of the box.

pub mod graph;

pub use graph::algo::isomorphism::{
    automorphisms, find_isomorphism, find_isomorphism_matching, is_isomorphic,
    is_isomorphic_matching, isomorphisms, isomorphisms_iter, GraphMatcher, Mapping, Mismatch,
    NoSemanticMatch,
};
pub use graph::misc::GraphView;
