//! Small shared utilities used pervasively by the MIR analyses: a
//! word-packed bitset and an adjacency-list undirected graph.

pub mod bitset;
pub mod graph;
pub mod intern;

pub use bitset::Bitset;
pub use graph::Graph;
pub use intern::{Interner, Symbol};
