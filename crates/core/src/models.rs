use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Markdown,
    Text,
}

impl FileType {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "md" | "markdown" => Some(Self::Markdown),
            "txt" | "text" => Some(Self::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploading,
    Parsing,
    Extracting,
    Embedding,
    Completed,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub pages: Option<u32>,
    pub words: Option<usize>,
    pub chunks: Option<usize>,
    pub entities: Option<usize>,
    pub edges: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub file_type: FileType,
    pub size_bytes: u64,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
    pub parsed_at: Option<DateTime<Utc>>,
    pub metadata: DocumentMetadata,
    pub error_message: Option<String>,
}

impl Document {
    pub fn new(filename: impl Into<String>, file_type: FileType, size_bytes: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filename: filename.into(),
            file_type,
            size_bytes,
            status: DocumentStatus::Uploading,
            uploaded_at: Utc::now(),
            parsed_at: None,
            metadata: DocumentMetadata::default(),
            error_message: None,
        }
    }
}

/// A contiguous slice of a document's text. Indexes are zero-based and
/// contiguous per document; later stages rely on chunk order for citations
/// and cache resumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub index: usize,
    pub embedding: Option<Vec<f32>>,
    pub page: Option<u32>,
    pub line: Option<u32>,
}

/// One entity mention as returned by the extraction capability. Mentions are
/// not canonical: the same real-world entity may surface many times across
/// chunks under different names and confidences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelation {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub target: String,
    #[serde(rename = "type", default)]
    pub relation_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub confidence: f64,
}

/// The raw output of one extraction call, before it is tagged with a chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionBatch {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relations: Vec<ExtractedRelation>,
}

/// Extraction results for one chunk. This is the cached artifact: a document
/// run persists the accumulated list of these after each chunk completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkExtraction {
    pub chunk_id: String,
    pub chunk_index: usize,
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub description: String,
    pub confidence: f64,
    pub properties: BTreeMap<String, serde_json::Value>,
    pub source_document_ids: Vec<String>,
    pub source_chunk_ids: Vec<String>,
    pub aliases: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub relation_type: String,
    pub description: String,
    pub properties: BTreeMap<String, serde_json::Value>,
    pub weight: f64,
    pub source_document_ids: Vec<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// The deduplicated node/edge set produced by one resolution run. Every edge
/// endpoint refers to a node in `nodes`; self-loops are never present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvedGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PipelinePhase {
    Parsing,
    Chunking,
    Extracting,
    Resolving,
    Embedding,
    Saving,
    Completed,
    Error,
}

impl PipelinePhase {
    pub fn progress(self) -> u8 {
        match self {
            Self::Parsing => 0,
            Self::Chunking => 20,
            Self::Extracting => 30,
            Self::Resolving => 70,
            Self::Embedding => 80,
            Self::Saving => 90,
            Self::Completed | Self::Error => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parsing => "parsing",
            Self::Chunking => "chunking",
            Self::Extracting => "extracting",
            Self::Resolving => "resolving",
            Self::Embedding => "embedding",
            Self::Saving => "saving",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Fire-and-forget progress notification, delivered synchronously to
/// registered listeners in emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatusEvent {
    pub document_id: String,
    pub phase: PipelinePhase,
    pub progress: u8,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_is_detected_from_extension() {
        assert_eq!(FileType::from_extension("PDF"), Some(FileType::Pdf));
        assert_eq!(FileType::from_extension("md"), Some(FileType::Markdown));
        assert_eq!(FileType::from_extension("txt"), Some(FileType::Text));
        assert_eq!(FileType::from_extension("docx"), None);
    }

    #[test]
    fn phase_progress_is_monotonic_through_a_successful_run() {
        let phases = [
            PipelinePhase::Parsing,
            PipelinePhase::Chunking,
            PipelinePhase::Extracting,
            PipelinePhase::Resolving,
            PipelinePhase::Embedding,
            PipelinePhase::Saving,
            PipelinePhase::Completed,
        ];
        let progress: Vec<u8> = phases.iter().map(|phase| phase.progress()).collect();
        assert!(progress.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn mention_fields_default_when_missing() {
        let entity: ExtractedEntity =
            serde_json::from_str(r#"{"name": "Acme"}"#).expect("partial mention should parse");
        assert_eq!(entity.name, "Acme");
        assert_eq!(entity.entity_type, "");
        assert_eq!(entity.confidence, 0.0);
    }
}
