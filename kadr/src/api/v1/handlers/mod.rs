pub mod documents;
pub(crate) mod health;
pub mod identify;
pub mod search;

pub use health::health_check;
