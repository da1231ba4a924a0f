use crate::error::CapabilityError;
use crate::models::ExtractionBatch;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Extracts candidate entity/relation mentions from one chunk of text.
/// Failures must be classifiable so the dispatcher can decide whether to
/// retry.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExtractionBatch, CapabilityError>;
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Extraction capability backed by an Ollama-compatible JSON-mode endpoint.
pub struct LlmEntityExtractor {
    base_url: String,
    model: String,
    client: Client,
}

impl LlmEntityExtractor {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl EntityExtractor for LlmEntityExtractor {
    async fn extract(&self, text: &str) -> Result<ExtractionBatch, CapabilityError> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&GenerateRequest {
                model: self.model.clone(),
                prompt: extraction_prompt(text),
                stream: false,
                format: "json".to_string(),
            })
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(CapabilityError::RateLimited(
                "extraction endpoint returned 429".to_string(),
            ));
        }
        if !response.status().is_success() {
            return Err(CapabilityError::Request(format!(
                "extraction request returned {}",
                response.status()
            )));
        }

        let payload: GenerateResponse = response.json().await?;
        serde_json::from_str(&payload.response)
            .map_err(|error| CapabilityError::MalformedResponse(error.to_string()))
    }
}

fn extraction_prompt(chunk_text: &str) -> String {
    format!(
        r#"Extract entities and relationships from the following text.

Output ONLY a JSON object with this exact schema, nothing else:
{{
  "entities": [
    {{"name": "...", "type": "Person|Organization|Concept|Technology|Location|Event", "description": "one sentence", "confidence": 0.0}}
  ],
  "relations": [
    {{"source": "entity name", "target": "entity name", "type": "verb phrase", "description": "one sentence", "confidence": 0.0}}
  ]
}}

Confidence is a number between 0 and 1. Relation source and target must be
entity names from the same output.

TEXT:
{chunk_text}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_the_chunk_text() {
        let prompt = extraction_prompt("Initech acquired Globex in 1999.");
        assert!(prompt.contains("Initech acquired Globex in 1999."));
        assert!(prompt.contains("\"entities\""));
    }

    #[test]
    fn model_responses_parse_into_a_batch() {
        let raw = r#"{
            "entities": [
                {"name": "Initech", "type": "Organization", "description": "a company", "confidence": 0.9}
            ],
            "relations": [
                {"source": "Initech", "target": "Globex", "type": "acquires", "description": "1999 deal", "confidence": 0.8}
            ]
        }"#;
        let batch: ExtractionBatch = serde_json::from_str(raw).expect("schema should parse");
        assert_eq!(batch.entities.len(), 1);
        assert_eq!(batch.relations.len(), 1);
        assert_eq!(batch.entities[0].entity_type, "Organization");
    }

    #[test]
    fn partial_model_responses_still_parse() {
        let batch: ExtractionBatch =
            serde_json::from_str(r#"{"entities": []}"#).expect("missing relations defaults");
        assert!(batch.relations.is_empty());
    }
}
