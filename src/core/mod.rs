pub mod bundle;
pub mod config;

pub use bundle::*;
pub use config::*;
