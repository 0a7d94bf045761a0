mod element;
mod identifier;

pub use element::*;
pub use identifier::*;
