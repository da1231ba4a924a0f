use crate::cache::PipelineCache;
use crate::chunking::{build_chunks, ChunkingConfig};
use crate::dispatch::{CallDispatcher, DispatchConfig};
use crate::embeddings::EmbeddingProvider;
use crate::error::PipelineError;
use crate::extraction::EntityExtractor;
use crate::models::{
    Chunk, ChunkExtraction, Document, DocumentStatus, GraphNode, PipelinePhase,
    PipelineStatusEvent, ResolvedGraph,
};
use crate::parsers::parse_document;
use crate::resolution::EntityResolver;
use crate::traits::GraphStore;
use chrono::Utc;
use futures_util::{stream, StreamExt};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

pub type TokenEstimator = Arc<dyn Fn(&str) -> usize + Send + Sync>;

type StatusListener = Box<dyn Fn(&PipelineStatusEvent) + Send + Sync>;

#[derive(Clone)]
pub struct PipelineConfig {
    pub cache_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_chunks_per_document: usize,
    pub max_tokens_per_document: usize,
    pub extraction_concurrency: usize,
    pub embedding_concurrency: usize,
    /// Overrides the default `ceil(len / 4)` per-chunk token estimate.
    pub token_estimator: Option<TokenEstimator>,
    pub dispatch: DispatchConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".docgraph-cache"),
            chunk_size: 1_200,
            chunk_overlap: 120,
            max_chunks_per_document: 500,
            max_tokens_per_document: 200_000,
            extraction_concurrency: 4,
            embedding_concurrency: 8,
            token_estimator: None,
            dispatch: DispatchConfig::default(),
        }
    }
}

impl PipelineConfig {
    fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.chunking().validate()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Skips the parsing phase and bypasses cached chunks.
    pub raw_text: Option<String>,
    /// Discards cached chunks and extractions before processing.
    pub force_rebuild: bool,
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub document: Document,
    pub chunks: Vec<Chunk>,
    pub graph: ResolvedGraph,
    pub estimated_tokens: usize,
}

/// Drives one document through parse → chunk → extract → resolve → embed →
/// save. Phases are strictly sequential per document; a pipeline holds no
/// per-document state, so separate documents may be processed concurrently
/// through separate `process` calls.
pub struct DocumentPipeline<X, E, S> {
    extractor: X,
    embedder: E,
    store: S,
    config: PipelineConfig,
    dispatcher: CallDispatcher,
    cache: PipelineCache,
    resolver: EntityResolver,
    listeners: Vec<StatusListener>,
}

impl<X, E, S> DocumentPipeline<X, E, S>
where
    X: EntityExtractor,
    E: EmbeddingProvider,
    S: GraphStore,
{
    pub fn new(
        extractor: X,
        embedder: E,
        store: S,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let dispatcher = CallDispatcher::new(config.dispatch);
        let cache = PipelineCache::new(&config.cache_dir);
        Ok(Self {
            extractor,
            embedder,
            store,
            config,
            dispatcher,
            cache,
            resolver: EntityResolver::new(),
            listeners: Vec::new(),
        })
    }

    /// Register a synchronous status listener. Events arrive in emission
    /// order; there is no acknowledgment or delivery guarantee beyond the
    /// in-process call.
    pub fn on_status<F>(&mut self, listener: F)
    where
        F: Fn(&PipelineStatusEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    fn emit(&self, document_id: &str, phase: PipelinePhase, message: Option<String>) {
        let event = PipelineStatusEvent {
            document_id: document_id.to_string(),
            phase,
            progress: phase.progress(),
            message,
        };
        for listener in &self.listeners {
            listener(&event);
        }
    }

    /// Single entry point. Any phase failure emits an `error` event and
    /// re-throws; the caller owns marking the persisted document as failed.
    pub async fn process(
        &self,
        document: Document,
        bytes: &[u8],
        options: ProcessOptions,
    ) -> Result<ProcessOutcome, PipelineError> {
        let document_id = document.id.clone();
        match self.run(document, bytes, options).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                self.emit(&document_id, PipelinePhase::Error, Some(error.to_string()));
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        mut document: Document,
        bytes: &[u8],
        options: ProcessOptions,
    ) -> Result<ProcessOutcome, PipelineError> {
        self.emit(
            &document.id,
            PipelinePhase::Parsing,
            Some(format!("parsing {}", document.filename)),
        );
        document.status = DocumentStatus::Parsing;
        let text = match &options.raw_text {
            Some(text) => text.clone(),
            None => parse_document(document.file_type, bytes)?,
        };

        self.emit(&document.id, PipelinePhase::Chunking, None);
        let rebuild = options.force_rebuild || options.raw_text.is_some();
        let cached_chunks = if rebuild {
            None
        } else {
            self.cache.load_chunks(&document.id).await
        };
        let mut chunks = match cached_chunks {
            Some(cached) => {
                debug!(document_id = %document.id, chunks = cached.len(), "reusing cached chunks");
                cached
            }
            None => {
                let fresh = build_chunks(&document.id, &text, self.config.chunking());
                self.cache.store_chunks(&document.id, &fresh).await;
                fresh
            }
        };

        let estimated_tokens: usize = chunks
            .iter()
            .map(|chunk| self.estimate_tokens(&chunk.content))
            .sum();
        if chunks.len() > self.config.max_chunks_per_document {
            return Err(PipelineError::DocumentTooLarge(format!(
                "{} chunks exceeds the limit of {}",
                chunks.len(),
                self.config.max_chunks_per_document
            )));
        }
        if estimated_tokens > self.config.max_tokens_per_document {
            return Err(PipelineError::DocumentTooLarge(format!(
                "an estimated {estimated_tokens} tokens exceeds the limit of {}",
                self.config.max_tokens_per_document
            )));
        }

        self.emit(
            &document.id,
            PipelinePhase::Extracting,
            Some(format!("{} chunks", chunks.len())),
        );
        document.status = DocumentStatus::Extracting;
        let extractions = self
            .extract_all(&document.id, &chunks, rebuild)
            .await?;

        self.emit(&document.id, PipelinePhase::Resolving, None);
        let mut graph = self.resolver.resolve(&document.id, &extractions);

        self.emit(&document.id, PipelinePhase::Embedding, None);
        document.status = DocumentStatus::Embedding;
        self.embed_all(&mut graph.nodes, &mut chunks).await?;

        self.emit(&document.id, PipelinePhase::Saving, None);
        document.metadata.words = Some(text.split_whitespace().count());
        document.metadata.chunks = Some(chunks.len());
        document.metadata.entities = Some(graph.nodes.len());
        document.metadata.edges = Some(graph.edges.len());
        document.parsed_at = Some(Utc::now());
        document.status = DocumentStatus::Completed;
        document.error_message = None;

        self.store.save_document(&document).await?;
        self.store.save_chunks(&chunks).await?;
        self.store.save_nodes(&graph.nodes).await?;
        self.store.save_edges(&graph.edges).await?;
        for node in &graph.nodes {
            if let Some(embedding) = &node.embedding {
                self.store.save_node_embedding(&node.id, embedding).await?;
            }
        }

        self.emit(&document.id, PipelinePhase::Completed, None);
        info!(
            document_id = %document.id,
            chunks = chunks.len(),
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "document processed"
        );

        Ok(ProcessOutcome {
            document,
            chunks,
            graph,
            estimated_tokens,
        })
    }

    /// Extract entities for every chunk without a cached result. After each
    /// completion the full accumulated set, sorted by chunk index, goes to
    /// the serialized cache writer. One chunk's failure aborts the batch;
    /// snapshots flushed so far survive for the next attempt.
    async fn extract_all(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        ignore_cache: bool,
    ) -> Result<Vec<ChunkExtraction>, PipelineError> {
        let mut completed: BTreeMap<usize, ChunkExtraction> = BTreeMap::new();
        if !ignore_cache {
            if let Some(cached) = self.cache.load_extractions(document_id).await {
                debug!(document_id, cached = cached.len(), "reusing cached extractions");
                for extraction in cached {
                    completed.insert(extraction.chunk_index, extraction);
                }
            }
        }

        let pending: Vec<&Chunk> = chunks
            .iter()
            .filter(|chunk| !completed.contains_key(&chunk.index))
            .collect();
        if pending.is_empty() {
            return Ok(completed.into_values().collect());
        }

        let writer = self.cache.extraction_writer(document_id);
        let mut results = stream::iter(pending)
            .map(|chunk| async move {
                let batch = self
                    .dispatcher
                    .dispatch("extract", || self.extractor.extract(&chunk.content))
                    .await;
                (chunk, batch)
            })
            .buffer_unordered(self.config.extraction_concurrency.max(1));

        while let Some((chunk, batch)) = results.next().await {
            let batch = batch.map_err(|source| PipelineError::Extraction {
                chunk_index: chunk.index,
                source,
            })?;
            completed.insert(
                chunk.index,
                ChunkExtraction {
                    chunk_id: chunk.id.clone(),
                    chunk_index: chunk.index,
                    entities: batch.entities,
                    relations: batch.relations,
                },
            );
            writer.submit(completed.values().cloned().collect()).await;
        }
        drop(results);
        writer.finish().await;

        Ok(completed.into_values().collect())
    }

    /// Embed every resolved node (name + description) and every chunk,
    /// attaching vectors in place. Completion order is unconstrained.
    async fn embed_all(
        &self,
        nodes: &mut [GraphNode],
        chunks: &mut [Chunk],
    ) -> Result<(), PipelineError> {
        enum Target {
            Node(usize),
            Chunk(usize),
        }

        let mut inputs: Vec<(Target, String)> = Vec::new();
        for (at, node) in nodes.iter().enumerate() {
            let text = format!("{} {}", node.name, node.description);
            inputs.push((Target::Node(at), text.trim().to_string()));
        }
        for (at, chunk) in chunks.iter().enumerate() {
            inputs.push((Target::Chunk(at), chunk.content.clone()));
        }

        let mut results = stream::iter(inputs)
            .map(|(target, text)| async move {
                let vector = self
                    .dispatcher
                    .dispatch("embed", || self.embedder.embed(&text))
                    .await;
                (target, vector)
            })
            .buffer_unordered(self.config.embedding_concurrency.max(1));

        while let Some((target, vector)) = results.next().await {
            let vector = vector.map_err(PipelineError::Embedding)?;
            match target {
                Target::Node(at) => nodes[at].embedding = Some(vector),
                Target::Chunk(at) => chunks[at].embedding = Some(vector),
            }
        }

        Ok(())
    }

    fn estimate_tokens(&self, text: &str) -> usize {
        match &self.config.token_estimator {
            Some(estimator) => estimator(text),
            None => text.len().div_ceil(4),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashedNgramEmbedder;
    use crate::error::{CapabilityError, StoreError};
    use crate::models::{ExtractedEntity, ExtractionBatch, FileType, GraphEdge};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct FakeExtractor {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EntityExtractor for FakeExtractor {
        async fn extract(&self, text: &str) -> Result<ExtractionBatch, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name: String = text.chars().take(12).collect();
            Ok(ExtractionBatch {
                entities: vec![ExtractedEntity {
                    name,
                    entity_type: "Concept".to_string(),
                    description: format!("mentioned in a chunk of {} chars", text.len()),
                    confidence: 0.9,
                }],
                relations: Vec::new(),
            })
        }
    }

    #[derive(Clone, Default)]
    struct RecordingStore {
        documents: Arc<Mutex<Vec<Document>>>,
        chunks_saved: Arc<AtomicUsize>,
        nodes_saved: Arc<AtomicUsize>,
        edges_saved: Arc<AtomicUsize>,
        embeddings_saved: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl GraphStore for RecordingStore {
        async fn save_document(&self, document: &Document) -> Result<(), StoreError> {
            self.documents.lock().unwrap().push(document.clone());
            Ok(())
        }

        async fn save_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError> {
            self.chunks_saved.fetch_add(chunks.len(), Ordering::SeqCst);
            Ok(())
        }

        async fn save_nodes(&self, nodes: &[GraphNode]) -> Result<(), StoreError> {
            self.nodes_saved.fetch_add(nodes.len(), Ordering::SeqCst);
            Ok(())
        }

        async fn save_edges(&self, edges: &[GraphEdge]) -> Result<(), StoreError> {
            self.edges_saved.fetch_add(edges.len(), Ordering::SeqCst);
            Ok(())
        }

        async fn save_node_embedding(
            &self,
            _node_id: &str,
            _embedding: &[f32],
        ) -> Result<(), StoreError> {
            self.embeddings_saved.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_config(cache_dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            cache_dir: cache_dir.to_path_buf(),
            chunk_size: 64,
            chunk_overlap: 8,
            max_chunks_per_document: 100,
            max_tokens_per_document: 100_000,
            extraction_concurrency: 2,
            embedding_concurrency: 2,
            token_estimator: None,
            dispatch: DispatchConfig {
                requests_per_minute: 0,
                ..DispatchConfig::default()
            },
        }
    }

    fn document() -> Document {
        Document::new("report.txt", FileType::Text, 64)
    }

    #[tokio::test]
    async fn a_successful_run_emits_phases_in_order() {
        let dir = tempdir().unwrap();
        let store = RecordingStore::default();
        let mut pipeline = DocumentPipeline::new(
            FakeExtractor::default(),
            HashedNgramEmbedder::default(),
            store.clone(),
            test_config(dir.path()),
        )
        .unwrap();

        let phases = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&phases);
        pipeline.on_status(move |event| seen.lock().unwrap().push(event.phase));

        let outcome = pipeline
            .process(
                document(),
                b"Initech filed a TPS report. Globex reviewed the TPS report.",
                ProcessOptions::default(),
            )
            .await
            .expect("run succeeds");

        assert_eq!(
            *phases.lock().unwrap(),
            vec![
                PipelinePhase::Parsing,
                PipelinePhase::Chunking,
                PipelinePhase::Extracting,
                PipelinePhase::Resolving,
                PipelinePhase::Embedding,
                PipelinePhase::Saving,
                PipelinePhase::Completed,
            ]
        );
        assert_eq!(outcome.document.status, DocumentStatus::Completed);
        assert!(outcome.document.parsed_at.is_some());
        assert_eq!(outcome.document.metadata.chunks, Some(outcome.chunks.len()));
        assert!(outcome.estimated_tokens > 0);
    }

    #[tokio::test]
    async fn embeddings_are_attached_and_persisted() {
        let dir = tempdir().unwrap();
        let store = RecordingStore::default();
        let pipeline = DocumentPipeline::new(
            FakeExtractor::default(),
            HashedNgramEmbedder::default(),
            store.clone(),
            test_config(dir.path()),
        )
        .unwrap();

        let outcome = pipeline
            .process(document(), b"a body of text about nothing much", ProcessOptions::default())
            .await
            .expect("run succeeds");

        assert!(outcome.chunks.iter().all(|chunk| chunk.embedding.is_some()));
        assert!(outcome.graph.nodes.iter().all(|node| node.embedding.is_some()));
        assert_eq!(
            store.embeddings_saved.load(Ordering::SeqCst),
            outcome.graph.nodes.len()
        );
        assert_eq!(store.nodes_saved.load(Ordering::SeqCst), outcome.graph.nodes.len());
    }

    #[tokio::test]
    async fn too_many_chunks_fail_before_any_extraction_call() {
        let dir = tempdir().unwrap();
        let extractor = FakeExtractor::default();
        let calls = Arc::clone(&extractor.calls);
        let mut config = test_config(dir.path());
        config.chunk_size = 16;
        config.chunk_overlap = 4;
        config.max_chunks_per_document = 2;

        let mut pipeline = DocumentPipeline::new(
            extractor,
            HashedNgramEmbedder::default(),
            RecordingStore::default(),
            config,
        )
        .unwrap();

        let phases = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&phases);
        pipeline.on_status(move |event| seen.lock().unwrap().push(event.phase));

        // 40 characters split 16/4 into exactly 3 chunks, one over the limit.
        let text = "word ".repeat(8);
        let result = pipeline
            .process(document(), text.as_bytes(), ProcessOptions::default())
            .await;

        assert!(matches!(result, Err(PipelineError::DocumentTooLarge(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(phases.lock().unwrap().last(), Some(&PipelinePhase::Error));
    }

    #[tokio::test]
    async fn token_estimates_over_the_ceiling_fail_fast() {
        let dir = tempdir().unwrap();
        let extractor = FakeExtractor::default();
        let calls = Arc::clone(&extractor.calls);
        let mut config = test_config(dir.path());
        config.max_tokens_per_document = 3;

        let pipeline = DocumentPipeline::new(
            extractor,
            HashedNgramEmbedder::default(),
            RecordingStore::default(),
            config,
        )
        .unwrap();

        let result = pipeline
            .process(
                document(),
                b"far more than three tokens of text",
                ProcessOptions::default(),
            )
            .await;

        assert!(matches!(result, Err(PipelineError::DocumentTooLarge(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn a_custom_token_estimator_drives_the_guard() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.max_tokens_per_document = 10;
        config.token_estimator = Some(Arc::new(|_: &str| 1_000));

        let pipeline = DocumentPipeline::new(
            FakeExtractor::default(),
            HashedNgramEmbedder::default(),
            RecordingStore::default(),
            config,
        )
        .unwrap();

        let result = pipeline
            .process(document(), b"tiny", ProcessOptions::default())
            .await;
        assert!(matches!(result, Err(PipelineError::DocumentTooLarge(_))));
    }

    #[tokio::test]
    async fn cached_extractions_are_reused_on_reprocessing() {
        let dir = tempdir().unwrap();
        let extractor = FakeExtractor::default();
        let calls = Arc::clone(&extractor.calls);
        let pipeline = DocumentPipeline::new(
            extractor,
            HashedNgramEmbedder::default(),
            RecordingStore::default(),
            test_config(dir.path()),
        )
        .unwrap();

        let doc = document();
        let bytes = b"Initech filed a TPS report while Globex watched from afar.";

        pipeline
            .process(doc.clone(), bytes, ProcessOptions::default())
            .await
            .expect("first run succeeds");
        let after_first = calls.load(Ordering::SeqCst);
        assert!(after_first > 0);

        pipeline
            .process(doc, bytes, ProcessOptions::default())
            .await
            .expect("second run succeeds");
        assert_eq!(calls.load(Ordering::SeqCst), after_first);
    }

    #[tokio::test]
    async fn force_rebuild_with_override_text_discards_all_caches() {
        let dir = tempdir().unwrap();
        let extractor = FakeExtractor::default();
        let calls = Arc::clone(&extractor.calls);
        let pipeline = DocumentPipeline::new(
            extractor,
            HashedNgramEmbedder::default(),
            RecordingStore::default(),
            test_config(dir.path()),
        )
        .unwrap();

        let doc = document();
        pipeline
            .process(doc.clone(), b"the original upload body", ProcessOptions::default())
            .await
            .expect("first run succeeds");
        let after_first = calls.load(Ordering::SeqCst);

        let override_text = "a completely different body of text supplied by the caller";
        let outcome = pipeline
            .process(
                doc,
                b"the original upload body",
                ProcessOptions {
                    raw_text: Some(override_text.to_string()),
                    force_rebuild: true,
                },
            )
            .await
            .expect("rebuild succeeds");

        assert!(calls.load(Ordering::SeqCst) > after_first);
        for chunk in &outcome.chunks {
            assert!(override_text.contains(&chunk.content));
        }
    }

    #[tokio::test]
    async fn one_failing_chunk_aborts_the_extraction_batch() {
        struct FlakyExtractor {
            calls: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl EntityExtractor for FlakyExtractor {
            async fn extract(&self, _text: &str) -> Result<ExtractionBatch, CapabilityError> {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call == 0 {
                    Err(CapabilityError::Request("model unavailable".to_string()))
                } else {
                    Ok(ExtractionBatch::default())
                }
            }
        }

        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.chunk_size = 16;
        config.chunk_overlap = 4;
        config.extraction_concurrency = 1;

        let pipeline = DocumentPipeline::new(
            FlakyExtractor {
                calls: Arc::new(AtomicUsize::new(0)),
            },
            HashedNgramEmbedder::default(),
            RecordingStore::default(),
            config,
        )
        .unwrap();

        let text = "word ".repeat(20);
        let result = pipeline
            .process(document(), text.as_bytes(), ProcessOptions::default())
            .await;

        assert!(matches!(
            result,
            Err(PipelineError::Extraction { .. })
        ));
    }
}
