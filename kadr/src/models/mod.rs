mod document;
mod recognition;
mod script;
mod search;

pub use document::*;
pub use recognition::*;
pub use script::*;
pub use search::*;
