//! Work-tree construction: filter the upstream enumeration and rebuild the
//! content hierarchy over the surviving items.

pub mod filter;
pub mod tree;

pub use filter::ItemFilter;
pub use tree::{WorkTree, build_work_tree};
