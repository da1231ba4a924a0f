use crate::error::StoreError;
use crate::models::{Chunk, Document, GraphEdge, GraphNode};
use crate::traits::GraphStore;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Graph persistence over the Neo4j HTTP transaction endpoint. All writes
/// are MERGE-based upserts keyed by id, so replays are harmless.
pub struct Neo4jGraphStore {
    endpoint: String,
    database: String,
    username: String,
    password: String,
    client: Client,
}

impl Neo4jGraphStore {
    pub fn new(
        endpoint: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            database: database.into(),
            username: username.into(),
            password: password.into(),
            client: Client::new(),
        }
    }

    fn tx_url(&self) -> String {
        format!("{}/db/{}/tx/commit", self.endpoint, self.database)
    }

    async fn run_statement(&self, statement: &str, parameters: Value) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.tx_url())
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({
                "statements": [
                    {
                        "statement": statement,
                        "parameters": parameters
                    }
                ]
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "neo4j".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn save_document(&self, document: &Document) -> Result<(), StoreError> {
        let cypher = r#"
            MERGE (d:Document {id: $id})
            SET d.filename = $filename,
                d.file_type = $file_type,
                d.status = $status,
                d.uploaded_at = $uploaded_at,
                d.parsed_at = $parsed_at,
                d.chunk_count = $chunk_count,
                d.entity_count = $entity_count,
                d.edge_count = $edge_count
        "#;

        self.run_statement(
            cypher,
            json!({
                "id": document.id,
                "filename": document.filename,
                "file_type": document.file_type,
                "status": document.status,
                "uploaded_at": document.uploaded_at.to_rfc3339(),
                "parsed_at": document.parsed_at.map(|stamp| stamp.to_rfc3339()),
                "chunk_count": document.metadata.chunks,
                "entity_count": document.metadata.entities,
                "edge_count": document.metadata.edges,
            }),
        )
        .await
    }

    async fn save_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let rows: Vec<_> = chunks
            .iter()
            .map(|chunk| {
                json!({
                    "id": chunk.id,
                    "document_id": chunk.document_id,
                    "content": chunk.content,
                    "index": chunk.index,
                    "embedding": chunk.embedding,
                })
            })
            .collect();

        let cypher = r#"
            UNWIND $rows AS row
            MERGE (d:Document {id: row.document_id})
            MERGE (c:Chunk {id: row.id})
            SET c.content = row.content,
                c.index = row.index,
                c.embedding = row.embedding
            MERGE (d)-[:HAS_CHUNK]->(c)
        "#;

        self.run_statement(cypher, json!({ "rows": rows })).await
    }

    async fn save_nodes(&self, nodes: &[GraphNode]) -> Result<(), StoreError> {
        if nodes.is_empty() {
            return Ok(());
        }

        let rows: Vec<_> = nodes
            .iter()
            .map(|node| {
                json!({
                    "id": node.id,
                    "name": node.name,
                    "type": node.entity_type,
                    "description": node.description,
                    "confidence": node.confidence,
                    "aliases": node.aliases,
                    "source_document_ids": node.source_document_ids,
                    "source_chunk_ids": node.source_chunk_ids,
                    "created_at": node.created_at.to_rfc3339(),
                    "updated_at": node.updated_at.to_rfc3339(),
                })
            })
            .collect();

        let cypher = r#"
            UNWIND $rows AS row
            MERGE (n:Entity {id: row.id})
            SET n.name = row.name,
                n.type = row.type,
                n.description = row.description,
                n.confidence = row.confidence,
                n.aliases = row.aliases,
                n.source_document_ids = row.source_document_ids,
                n.source_chunk_ids = row.source_chunk_ids,
                n.created_at = row.created_at,
                n.updated_at = row.updated_at
        "#;

        self.run_statement(cypher, json!({ "rows": rows })).await
    }

    async fn save_edges(&self, edges: &[GraphEdge]) -> Result<(), StoreError> {
        if edges.is_empty() {
            return Ok(());
        }

        let rows: Vec<_> = edges
            .iter()
            .map(|edge| {
                json!({
                    "id": edge.id,
                    "source_id": edge.source_id,
                    "target_id": edge.target_id,
                    "type": edge.relation_type,
                    "description": edge.description,
                    "weight": edge.weight,
                    "confidence": edge.confidence,
                    "source_document_ids": edge.source_document_ids,
                    "created_at": edge.created_at.to_rfc3339(),
                })
            })
            .collect();

        let cypher = r#"
            UNWIND $rows AS row
            MATCH (a:Entity {id: row.source_id})
            MATCH (b:Entity {id: row.target_id})
            MERGE (a)-[r:RELATED_TO {id: row.id}]->(b)
            SET r.type = row.type,
                r.description = row.description,
                r.weight = row.weight,
                r.confidence = row.confidence,
                r.source_document_ids = row.source_document_ids,
                r.created_at = row.created_at
        "#;

        self.run_statement(cypher, json!({ "rows": rows })).await
    }

    async fn save_node_embedding(
        &self,
        node_id: &str,
        embedding: &[f32],
    ) -> Result<(), StoreError> {
        let cypher = r#"
            MATCH (n:Entity {id: $id})
            SET n.embedding = $embedding
        "#;

        self.run_statement(cypher, json!({ "id": node_id, "embedding": embedding }))
            .await
    }
}
