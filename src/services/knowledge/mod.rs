//! Knowledge System
//!
//! Retrieval side of the reader:
//! - `chunker`: fixed-size reading segments, heading trees, and retrieval chunks
//! - `embedding_provider`: embedding trait, config, and factory
//! - `hnsw_index`: persisted approximate nearest neighbour index
//! - `vector_store`: SQLite content table kept in lockstep with the index
//! - `ingestion`: builds the per-document store

pub mod chunker;
pub mod embedding_provider;
pub mod embedding_provider_local;
pub mod embedding_provider_openai;
pub mod hnsw_index;
pub mod ingestion;
pub mod vector_store;

pub use chunker::{chunk_text, parse_heading_tree, FixedSizeChunker, HeadingTree, RagChunker, TocNode};
pub use embedding_provider::{
    create_embedding_provider, EmbeddingError, EmbeddingProvider, EmbeddingProviderConfig,
    EmbeddingProviderType,
};
pub use embedding_provider_local::LocalHashEmbeddingProvider;
pub use ingestion::{DocumentIngestor, IngestReport, IngestStatus};
pub use vector_store::{join_evidence, EvidenceRetriever, SearchHit, VectorStore};
