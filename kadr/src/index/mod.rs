mod indexer;
mod store;

pub use indexer::EmbeddingIndexer;
pub use store::{InMemoryIndex, VectorIndex};
