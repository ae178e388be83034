//! Storage boundaries: vector store interface and implementations

pub mod vector;

pub use vector::{MemoryVectorStore, Query, ScanPage, VectorEntry, VectorStore};
