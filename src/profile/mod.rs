mod index;
mod node;
mod structure_definition;
mod tree;

pub use index::*;
pub use node::*;
pub use structure_definition::*;
pub use tree::*;
