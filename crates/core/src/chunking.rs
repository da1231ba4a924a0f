use crate::error::PipelineError;
use crate::models::Chunk;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkingConfig {
    /// Degenerate chunking parameters are a configuration error, caught
    /// before any document is processed.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.chunk_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(PipelineError::InvalidConfig(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_200,
            chunk_overlap: 120,
        }
    }
}

/// Split text into overlapping pieces. Every piece except possibly the last
/// is `chunk_size` characters long, and each piece after the first begins
/// with the trailing `chunk_overlap` characters of its predecessor. The
/// output is never empty: empty input yields a single empty piece.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }

    let stride = config
        .chunk_size
        .saturating_sub(config.chunk_overlap)
        .max(1);

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        pieces.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }

    pieces
}

/// Build ordered `Chunk` values for one document. Chunk ids are digests of
/// (document id, index, content), so re-splitting identical input reproduces
/// identical ids.
pub fn build_chunks(document_id: &str, text: &str, config: ChunkingConfig) -> Vec<Chunk> {
    split_text(text, config)
        .into_iter()
        .enumerate()
        .map(|(index, content)| Chunk {
            id: make_chunk_id(document_id, index, &content),
            document_id: document_id.to_string(),
            content,
            index,
            embedding: None,
            page: None,
            line: None,
        })
        .collect()
}

fn make_chunk_id(document_id: &str, index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update((index as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, chunk_overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            chunk_overlap,
        }
    }

    #[test]
    fn splitting_is_deterministic() {
        let text = "the quick brown fox jumps over the lazy dog".repeat(8);
        let first = split_text(&text, config(40, 10));
        let second = split_text(&text, config(40, 10));
        assert_eq!(first, second);
    }

    #[test]
    fn each_piece_repeats_the_previous_tail() {
        let text: String = ('a'..='z').cycle().take(200).collect();
        let pieces = split_text(&text, config(50, 10));

        assert!(pieces.len() > 1);
        for pair in pieces.windows(2) {
            let tail: String = pair[0].chars().skip(pair[0].chars().count() - 10).collect();
            assert!(pair[1].starts_with(&tail));
        }
    }

    #[test]
    fn short_text_yields_a_single_chunk() {
        let pieces = split_text("tiny", config(100, 20));
        assert_eq!(pieces, vec!["tiny".to_string()]);
    }

    #[test]
    fn empty_text_still_yields_one_chunk() {
        let pieces = split_text("", config(100, 20));
        assert_eq!(pieces.len(), 1);
        assert!(pieces[0].is_empty());
    }

    #[test]
    fn chunk_indexes_are_contiguous_and_ids_reproducible() {
        let text = "x".repeat(300);
        let first = build_chunks("doc-1", &text, config(100, 25));
        let second = build_chunks("doc-1", &text, config(100, 25));

        for (index, chunk) in first.iter().enumerate() {
            assert_eq!(chunk.index, index);
            assert_eq!(chunk.document_id, "doc-1");
        }
        let first_ids: Vec<_> = first.iter().map(|chunk| chunk.id.clone()).collect();
        let second_ids: Vec<_> = second.iter().map(|chunk| chunk.id.clone()).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn degenerate_config_is_rejected() {
        assert!(config(0, 0).validate().is_err());
        assert!(config(100, 100).validate().is_err());
        assert!(config(100, 20).validate().is_ok());
    }
}
