//! Proposed cross-references between concepts

use serde::{Deserialize, Serialize};

/// One proposed link from a source concept to another concept, produced
/// by combining vector-search candidates with a structured completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkProposal {
    /// Concept the link points at
    pub target_id: String,
    /// Short relation label, e.g. "extends" or "contrasts-with"
    pub relation: String,
    /// Model confidence in [0, 1]
    pub confidence: f32,
    /// Why the model thinks the concepts belong together
    pub reasoning: String,
}

impl LinkProposal {
    /// Clamp confidence into [0, 1]; models occasionally return 1.2 or -0.1.
    pub fn normalized(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}
