pub mod cache;
pub mod chunking;
pub mod dispatch;
pub mod embeddings;
pub mod error;
pub mod extraction;
pub mod models;
pub mod parsers;
pub mod pipeline;
pub mod resolution;
pub mod stores;
pub mod traits;

pub use cache::PipelineCache;
pub use chunking::{build_chunks, split_text, ChunkingConfig};
pub use dispatch::{CallDispatcher, DispatchConfig};
pub use embeddings::{
    EmbeddingProvider, HashedNgramEmbedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{CapabilityError, PipelineError, StoreError};
pub use extraction::{EntityExtractor, LlmEntityExtractor};
pub use models::{
    Chunk, ChunkExtraction, Document, DocumentMetadata, DocumentStatus, ExtractedEntity,
    ExtractedRelation, ExtractionBatch, FileType, GraphEdge, GraphNode, PipelinePhase,
    PipelineStatusEvent, ResolvedGraph,
};
pub use parsers::{parse_document, DocumentParser, MarkdownParser, PdfParser, PlainTextParser};
pub use pipeline::{DocumentPipeline, PipelineConfig, ProcessOptions, ProcessOutcome, TokenEstimator};
pub use resolution::EntityResolver;
pub use stores::Neo4jGraphStore;
pub use traits::GraphStore;
