mod instance;
mod interpreter;
mod lookup;
mod navigation;
mod sniffer;

pub use instance::*;
pub use interpreter::*;
pub use lookup::*;
pub use navigation::{Datum, contains, read_json, slice_matches, slice_template};
pub use sniffer::*;
