//! Graph utilities.

pub mod algo;
pub mod misc;

pub use algo::*;
pub use misc::GraphView;
