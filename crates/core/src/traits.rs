use crate::error::StoreError;
use crate::models::{Chunk, Document, GraphEdge, GraphNode};
use async_trait::async_trait;

/// Persistence collaborator. The pipeline treats every call as
/// fire-and-forget: failures propagate up as pipeline failures, and
/// idempotency is whatever upsert-by-id semantics the backend provides.
#[async_trait]
pub trait GraphStore {
    async fn save_document(&self, document: &Document) -> Result<(), StoreError>;

    async fn save_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError>;

    async fn save_nodes(&self, nodes: &[GraphNode]) -> Result<(), StoreError>;

    async fn save_edges(&self, edges: &[GraphEdge]) -> Result<(), StoreError>;

    async fn save_node_embedding(
        &self,
        node_id: &str,
        embedding: &[f32],
    ) -> Result<(), StoreError>;
}
