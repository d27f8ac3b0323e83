pub mod api;
pub mod catalog;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod services;
