pub mod isomorphism;

pub use isomorphism::*;
