//! Title identification: turns recognised text into catalog queries and looks them up.

mod omdb;
mod queries;

pub use omdb::{MediaInfo, OmdbClient};
pub use queries::derive_queries;
