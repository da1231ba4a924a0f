use crate::models::{
    ChunkExtraction, ExtractedEntity, GraphEdge, GraphNode, ResolvedGraph,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use uuid::Uuid;

const FUZZY_MERGE_THRESHOLD: f64 = 0.85;
const SEMANTIC_MERGE_THRESHOLD: f64 = 0.92;
const DESCRIPTION_VECTOR_DIMENSIONS: usize = 128;
const DESCRIPTION_SEPARATOR: &str = "; ";
const UNKNOWN_TYPE: &str = "Unknown";

/// Candidate canonical entity while resolution is in progress. Mutable only
/// inside `resolve`; frozen into a `GraphNode` at the end.
#[derive(Debug, Clone)]
struct WorkingEntity {
    id: String,
    name: String,
    entity_type: String,
    description: String,
    confidence: f64,
    properties: BTreeMap<String, serde_json::Value>,
    source_document_ids: BTreeSet<String>,
    source_chunk_ids: BTreeSet<String>,
    aliases: BTreeSet<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkingEntity {
    fn from_mention(document_id: &str, chunk_id: &str, mention: &ExtractedEntity) -> Self {
        let name = mention.name.trim().to_string();
        let entity_type = {
            let trimmed = mention.entity_type.trim();
            if trimmed.is_empty() {
                UNKNOWN_TYPE.to_string()
            } else {
                trimmed.to_string()
            }
        };
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            entity_type,
            description: mention.description.trim().to_string(),
            confidence: mention.confidence.clamp(0.0, 1.0),
            properties: BTreeMap::new(),
            source_document_ids: BTreeSet::from([document_id.to_string()]),
            source_chunk_ids: BTreeSet::from([chunk_id.to_string()]),
            aliases: BTreeSet::from([name.clone()]),
            name,
            created_at: now,
            updated_at: now,
        }
    }

    fn into_node(self) -> GraphNode {
        GraphNode {
            id: self.id,
            name: self.name,
            entity_type: self.entity_type,
            description: self.description,
            confidence: self.confidence,
            properties: self.properties,
            source_document_ids: self.source_document_ids.into_iter().collect(),
            source_chunk_ids: self.source_chunk_ids.into_iter().collect(),
            aliases: self.aliases.into_iter().collect(),
            embedding: None,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// The survivor keeps its id and `created_at` through any number of merges.
fn merge_into(survivor: &mut WorkingEntity, absorbed: WorkingEntity) {
    if absorbed.name.chars().count() > survivor.name.chars().count() {
        survivor.name = absorbed.name;
    }
    if survivor.entity_type == UNKNOWN_TYPE && absorbed.entity_type != UNKNOWN_TYPE {
        survivor.entity_type = absorbed.entity_type;
    }
    survivor.description = merge_descriptions(&survivor.description, &absorbed.description);
    survivor.confidence = (survivor.confidence + absorbed.confidence) / 2.0;
    survivor.properties.extend(absorbed.properties);
    survivor
        .source_document_ids
        .extend(absorbed.source_document_ids);
    survivor.source_chunk_ids.extend(absorbed.source_chunk_ids);
    survivor.aliases.extend(absorbed.aliases);
    survivor.updated_at = Utc::now();
}

fn merge_descriptions(left: &str, right: &str) -> String {
    let mut seen = HashSet::new();
    let mut segments = Vec::new();
    for segment in left
        .split(DESCRIPTION_SEPARATOR)
        .chain(right.split(DESCRIPTION_SEPARATOR))
    {
        let trimmed = segment.trim();
        if !trimmed.is_empty() && seen.insert(trimmed.to_string()) {
            segments.push(trimmed.to_string());
        }
    }
    segments.join(DESCRIPTION_SEPARATOR)
}

/// Reconciles per-chunk entity/relation mentions into one canonical node and
/// edge set. Pure and synchronous; clustering is greedy and first-fit, so
/// results depend on mention order.
pub struct EntityResolver {
    synonyms: HashMap<&'static str, &'static str>,
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityResolver {
    pub fn new() -> Self {
        let synonyms = HashMap::from([
            ("llm", "large language model"),
            ("llms", "large language models"),
            ("ai", "artificial intelligence"),
            ("ml", "machine learning"),
            ("nlp", "natural language processing"),
        ]);
        Self { synonyms }
    }

    /// Canonical key for exact-match grouping and alias lookup: trimmed,
    /// lowercased, inner whitespace collapsed, then substituted through the
    /// synonym table.
    fn normalize_name(&self, name: &str) -> String {
        let collapsed = name
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        match self.synonyms.get(collapsed.as_str()) {
            Some(expansion) => (*expansion).to_string(),
            None => collapsed,
        }
    }

    pub fn resolve(&self, document_id: &str, extractions: &[ChunkExtraction]) -> ResolvedGraph {
        let mut mentions = Vec::new();
        for extraction in extractions {
            for entity in &extraction.entities {
                mentions.push(WorkingEntity::from_mention(
                    document_id,
                    &extraction.chunk_id,
                    entity,
                ));
            }
        }

        let entities = self.exact_match_stage(mentions);
        let entities = self.fuzzy_match_stage(entities);
        let entities = self.semantic_match_stage(entities);

        let alias_map = self.build_alias_map(&entities);
        let edges = self.remap_relations(document_id, extractions, &alias_map);
        let nodes = entities.into_iter().map(WorkingEntity::into_node).collect();

        ResolvedGraph { nodes, edges }
    }

    /// Stage 1: group by canonical key, merging groups left to right in
    /// encounter order.
    fn exact_match_stage(&self, mentions: Vec<WorkingEntity>) -> Vec<WorkingEntity> {
        let mut accepted: Vec<WorkingEntity> = Vec::new();
        let mut index_by_key: HashMap<String, usize> = HashMap::new();

        for entity in mentions {
            let key = self.normalize_name(&entity.name);
            match index_by_key.get(&key) {
                Some(&at) => merge_into(&mut accepted[at], entity),
                None => {
                    index_by_key.insert(key, accepted.len());
                    accepted.push(entity);
                }
            }
        }

        accepted
    }

    /// Stage 2: one left-to-right scan; merge into the first already-accepted
    /// entity of the same type whose blended name similarity clears the
    /// threshold. First fit, not best fit.
    fn fuzzy_match_stage(&self, entities: Vec<WorkingEntity>) -> Vec<WorkingEntity> {
        let mut accepted: Vec<WorkingEntity> = Vec::new();

        for entity in entities {
            let candidate_name = self.normalize_name(&entity.name);
            let matched = accepted.iter().position(|existing| {
                existing.entity_type == entity.entity_type
                    && blended_name_similarity(
                        &self.normalize_name(&existing.name),
                        &candidate_name,
                    ) >= FUZZY_MERGE_THRESHOLD
            });

            match matched {
                Some(at) => merge_into(&mut accepted[at], entity),
                None => accepted.push(entity),
            }
        }

        accepted
    }

    /// Stage 3: FIFO work queue. The front entity absorbs every remaining
    /// same-type entity whose description vector is close enough, re-scanning
    /// after each merge because the merged description shifts the vector.
    fn semantic_match_stage(&self, entities: Vec<WorkingEntity>) -> Vec<WorkingEntity> {
        let mut queue: VecDeque<WorkingEntity> = entities.into();
        let mut accepted = Vec::new();

        while let Some(mut front) = queue.pop_front() {
            loop {
                let front_vector = description_vector(&front.description);
                let matched = queue.iter().position(|candidate| {
                    candidate.entity_type == front.entity_type
                        && cosine_similarity(
                            &front_vector,
                            &description_vector(&candidate.description),
                        ) >= SEMANTIC_MERGE_THRESHOLD
                });

                let Some(at) = matched else { break };
                let Some(absorbed) = queue.remove(at) else { break };
                merge_into(&mut front, absorbed);
            }
            accepted.push(front);
        }

        accepted
    }

    /// Normalized names and aliases of every surviving entity, mapped to its
    /// id. First writer wins on collision.
    fn build_alias_map(&self, entities: &[WorkingEntity]) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for entity in entities {
            map.entry(self.normalize_name(&entity.name))
                .or_insert_with(|| entity.id.clone());
            for alias in &entity.aliases {
                map.entry(self.normalize_name(alias))
                    .or_insert_with(|| entity.id.clone());
            }
        }
        map
    }

    fn remap_relations(
        &self,
        document_id: &str,
        extractions: &[ChunkExtraction],
        alias_map: &HashMap<String, String>,
    ) -> Vec<GraphEdge> {
        struct EdgeAccumulator {
            edge: GraphEdge,
            mentions: usize,
        }

        let mut accepted: Vec<EdgeAccumulator> = Vec::new();
        let mut index_by_key: HashMap<(String, String, String), usize> = HashMap::new();

        for extraction in extractions {
            for relation in &extraction.relations {
                let Some(source_id) = alias_map.get(&self.normalize_name(&relation.source)) else {
                    continue;
                };
                let Some(target_id) = alias_map.get(&self.normalize_name(&relation.target)) else {
                    continue;
                };
                if source_id == target_id {
                    continue;
                }

                let relation_type = relation.relation_type.trim().to_string();
                let description = relation.description.trim();
                let confidence = relation.confidence.clamp(0.0, 1.0);
                let key = (source_id.clone(), target_id.clone(), relation_type.clone());

                match index_by_key.get(&key) {
                    Some(&at) => {
                        let entry = &mut accepted[at];
                        entry.mentions += 1;
                        entry.edge.confidence +=
                            (confidence - entry.edge.confidence) / entry.mentions as f64;
                        if !description.is_empty() && !entry.edge.description.contains(description)
                        {
                            if entry.edge.description.is_empty() {
                                entry.edge.description = description.to_string();
                            } else {
                                entry.edge.description.push_str(DESCRIPTION_SEPARATOR);
                                entry.edge.description.push_str(description);
                            }
                        }
                        if !entry
                            .edge
                            .source_document_ids
                            .iter()
                            .any(|id| id == document_id)
                        {
                            entry.edge.source_document_ids.push(document_id.to_string());
                        }
                    }
                    None => {
                        index_by_key.insert(key, accepted.len());
                        accepted.push(EdgeAccumulator {
                            edge: GraphEdge {
                                id: Uuid::new_v4().to_string(),
                                source_id: source_id.clone(),
                                target_id: target_id.clone(),
                                relation_type,
                                description: description.to_string(),
                                properties: BTreeMap::new(),
                                weight: 1.0,
                                source_document_ids: vec![document_id.to_string()],
                                confidence,
                                created_at: Utc::now(),
                            },
                            mentions: 1,
                        });
                    }
                }
            }
        }

        accepted.into_iter().map(|entry| entry.edge).collect()
    }
}

/// Mean of normalized Levenshtein similarity and token Jaccard similarity.
fn blended_name_similarity(left: &str, right: &str) -> f64 {
    (levenshtein_similarity(left, right) + token_jaccard(left, right)) / 2.0
}

fn levenshtein_similarity(left: &str, right: &str) -> f64 {
    let left_chars: Vec<char> = left.chars().collect();
    let right_chars: Vec<char> = right.chars().collect();
    let longest = left_chars.len().max(right_chars.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(&left_chars, &right_chars) as f64 / longest as f64
}

fn levenshtein_distance(left: &[char], right: &[char]) -> usize {
    if left.is_empty() {
        return right.len();
    }
    if right.is_empty() {
        return left.len();
    }

    let mut previous: Vec<usize> = (0..=right.len()).collect();
    let mut current = vec![0usize; right.len() + 1];

    for (row, &left_char) in left.iter().enumerate() {
        current[0] = row + 1;
        for (column, &right_char) in right.iter().enumerate() {
            let substitution = previous[column] + usize::from(left_char != right_char);
            current[column + 1] = substitution
                .min(previous[column + 1] + 1)
                .min(current[column] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[right.len()]
}

fn token_jaccard(left: &str, right: &str) -> f64 {
    let left_tokens: HashSet<&str> = left.split_whitespace().collect();
    let right_tokens: HashSet<&str> = right.split_whitespace().collect();

    if left_tokens.is_empty() && right_tokens.is_empty() {
        return 1.0;
    }

    let intersection = left_tokens.intersection(&right_tokens).count();
    let union = left_tokens.union(&right_tokens).count();
    intersection as f64 / union as f64
}

/// Fixed-dimension hashed bag-of-words vector over a description: lowercase,
/// split on non-alphanumeric boundaries, polynomial hash (base 31) into a
/// bucket mod the dimension count.
fn description_vector(text: &str) -> Vec<f64> {
    let mut vector = vec![0f64; DESCRIPTION_VECTOR_DIMENSIONS];
    let lowered = text.to_lowercase();

    for token in lowered
        .split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
    {
        let mut hash: u64 = 0;
        for character in token.chars() {
            hash = hash.wrapping_mul(31).wrapping_add(character as u64);
        }
        vector[(hash % DESCRIPTION_VECTOR_DIMENSIONS as u64) as usize] += 1.0;
    }

    vector
}

fn cosine_similarity(left: &[f64], right: &[f64]) -> f64 {
    if left.is_empty() || left.len() != right.len() {
        return 0.0;
    }

    let dot: f64 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm: f64 = left.iter().map(|value| value * value).sum::<f64>().sqrt();
    let right_norm: f64 = right.iter().map(|value| value * value).sum::<f64>().sqrt();

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }

    dot / (left_norm * right_norm)
}
