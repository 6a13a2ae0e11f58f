//! Link proposals between concepts
//!
//! Candidates come from the vector index; the ranked relations come
//! from a structured completion over a digest of those candidates.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::{CompletionOptions, ModelClient};
use crate::domain::DomainError;
use crate::domain::concept::Concept;
use crate::domain::linking::LinkProposal;
use crate::domain::storage::Storage;
use crate::domain::vector::VectorIndex;

/// Fetch this many times the requested proposals from the index, so the
/// model has alternatives to reject.
const CANDIDATE_OVERSAMPLE: usize = 2;

/// Candidates below this similarity are not worth the model's time.
const CANDIDATE_FLOOR_SIMILARITY: f32 = 0.25;

/// Characters of concept body shown to the model per candidate.
const EXCERPT_CHARS: usize = 400;

const SYSTEM_PROMPT: &str = "You curate a personal knowledge base. Given a source concept and \
     candidate concepts, propose which candidates deserve a link from the source. Respond with \
     a JSON object: {\"proposals\": [{\"target_id\": string, \"relation\": string, \
     \"confidence\": number between 0 and 1, \"reasoning\": string}]}. Only use candidate ids.";

/// Proposes cross-references for a concept
#[derive(Debug)]
pub struct LinkService {
    concepts: Arc<dyn Storage<Concept>>,
    index: Arc<VectorIndex>,
    client: Arc<ModelClient>,
}

#[derive(Debug, Deserialize)]
struct ProposalPayload {
    #[serde(default)]
    proposals: Vec<RawProposal>,
}

#[derive(Debug, Deserialize)]
struct RawProposal {
    target_id: String,
    #[serde(default)]
    relation: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    reasoning: String,
}

impl LinkService {
    pub fn new(
        concepts: Arc<dyn Storage<Concept>>,
        index: Arc<VectorIndex>,
        client: Arc<ModelClient>,
    ) -> Self {
        Self {
            concepts,
            index,
            client,
        }
    }

    /// Up to `max_proposals` ranked link proposals for a concept.
    pub async fn propose_links(
        &self,
        concept_id: &str,
        max_proposals: usize,
    ) -> Result<Vec<LinkProposal>, DomainError> {
        if max_proposals == 0 {
            return Ok(Vec::new());
        }

        let concept = self
            .concepts
            .get(&concept_id.to_string())
            .await?
            .ok_or_else(|| {
                DomainError::not_found(format!("concept '{}' not found", concept_id))
            })?;

        let query = match self.index.vector_of(concept_id)? {
            Some(vector) => vector,
            None => self.client.embed(&concept.embedding_input_text()).await?,
        };

        let hits = self.index.search(
            &query,
            max_proposals * CANDIDATE_OVERSAMPLE,
            CANDIDATE_FLOOR_SIMILARITY,
            &[concept_id.to_string()],
        )?;

        if hits.is_empty() {
            debug!(concept_id, "no link candidates above similarity floor");
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();

        for hit in &hits {
            if let Some(candidate) = self.concepts.get(&hit.entity_id).await? {
                candidates.push((candidate, hit.similarity));
            }
        }

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = build_prompt(&concept, &candidates);
        let options = CompletionOptions::new()
            .with_system(SYSTEM_PROMPT)
            .with_temperature(0.2)
            .with_cache(false);

        let value = self.client.complete_json(&prompt, &options).await?;
        let payload: ProposalPayload = serde_json::from_value(value).map_err(|e| {
            DomainError::malformed_output(format!("link proposals failed to deserialize: {}", e))
        })?;

        let candidate_ids: HashSet<&str> =
            candidates.iter().map(|(c, _)| c.id()).collect();

        let mut proposals: Vec<LinkProposal> = payload
            .proposals
            .into_iter()
            .filter(|p| candidate_ids.contains(p.target_id.as_str()))
            .map(|p| {
                LinkProposal {
                    target_id: p.target_id,
                    relation: p.relation,
                    confidence: p.confidence,
                    reasoning: p.reasoning,
                }
                .normalized()
            })
            .collect();

        proposals.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        proposals.truncate(max_proposals);

        Ok(proposals)
    }
}

fn build_prompt(concept: &Concept, candidates: &[(Concept, f32)]) -> String {
    let mut prompt = format!(
        "Source concept [{}]: {}\n{}\n\nCandidates:\n",
        concept.id(),
        concept.title(),
        excerpt(concept.body()),
    );

    for (candidate, similarity) in candidates {
        prompt.push_str(&format!(
            "- [{}] {} (similarity {:.2}): {}\n",
            candidate.id(),
            candidate.title(),
            similarity,
            excerpt(candidate.body()),
        ));
    }

    prompt
}

fn excerpt(body: &str) -> String {
    if body.chars().count() <= EXCERPT_CHARS {
        body.to_string()
    } else {
        let cut: String = body.chars().take(EXCERPT_CHARS).collect();
        format!("{}…", cut)
    }
}
