//! Per-agent subjective belief overlay
//!
//! Agents do not reason over the raw visible slice: named cognitive biases
//! adjust the confidence of incoming facts first. The overlay is data (a
//! weighted proposition store per agent) plus a registry of pure adjustment
//! functions, one per bias kind; it never writes to the world.

use crate::core::types::AgentId;
use crate::perception::fog::VisibleSlice;
use crate::world::entity::Entity;
use crate::world::fact::Fact;
use crate::world::relation::Relation;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Words that read as threatening; used by the threat-sensitive biases
const THREAT_MARKERS: [&str; 5] = ["threat", "attack", "hostile", "armed", "ambush"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasKind {
    /// Facts that agree with held propositions gain confidence; facts that
    /// contradict them lose it
    Confirmation,
    /// Threatening facts read as more certain than they are
    ThreatInflation,
    /// Threatening facts read as less certain than they are
    Optimism,
    /// Transient, fresh facts (those carrying an expiry) weigh heavier
    Recency,
}

impl BiasKind {
    /// The pure adjustment function for this bias. Returns the adjusted
    /// confidence; clamping to [0, 1] happens at the call site.
    fn adjust(&self, strength: f32, profile: &BeliefProfile, fact: &Fact, confidence: f32) -> f32 {
        match self {
            BiasKind::Confirmation => {
                let Some(claim) = &fact.claim else {
                    return confidence;
                };
                let key = proposition_key(&claim.predicate, &claim.value);
                if let Some(weight) = profile.propositions.get(&key) {
                    return confidence + strength * weight * 0.3;
                }
                // A held proposition for the same predicate with another
                // value means this fact challenges a belief.
                let challenged = profile
                    .propositions
                    .iter()
                    .any(|(k, w)| *w > 0.0 && k.starts_with(&format!("{}=", claim.predicate)) && *k != key);
                if challenged {
                    confidence - strength * 0.3
                } else {
                    confidence
                }
            }
            BiasKind::ThreatInflation => {
                if is_threatening(fact) {
                    confidence + strength * 0.2
                } else {
                    confidence
                }
            }
            BiasKind::Optimism => {
                if is_threatening(fact) {
                    confidence - strength * 0.2
                } else {
                    confidence
                }
            }
            BiasKind::Recency => {
                if fact.expires_turn.is_some() {
                    confidence + strength * 0.15
                } else {
                    confidence
                }
            }
        }
    }
}

fn is_threatening(fact: &Fact) -> bool {
    let text = fact.text.to_lowercase();
    THREAT_MARKERS.iter().any(|m| text.contains(m))
}

/// Canonical proposition key for a predicate/value pair
pub fn proposition_key(predicate: &str, value: &str) -> String {
    format!("{}={}", predicate, value)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bias {
    pub kind: BiasKind,
    /// 0-1; zero is a no-op, one is the full adjustment
    pub strength: f32,
}

impl Bias {
    pub fn new(kind: BiasKind, strength: f32) -> Self {
        Self {
            kind,
            strength: strength.clamp(0.0, 1.0),
        }
    }
}

/// One agent's belief state: weighted propositions plus active biases
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeliefProfile {
    /// proposition key -> weight; append/overwrite only, no deletion
    pub propositions: AHashMap<String, f32>,
    pub biases: Vec<Bias>,
}

impl BeliefProfile {
    /// Neutral priors: no propositions, no biases
    pub fn neutral() -> Self {
        Self::default()
    }
}

/// A fact as one agent believes it
#[derive(Debug, Clone)]
pub struct PerceivedFact {
    pub fact: Fact,
    /// Bias-adjusted confidence, clamped to [0, 1]
    pub confidence: f32,
}

/// The visible slice after belief adjustment; this is what goes into the
/// turn brief
#[derive(Debug, Clone)]
pub struct SubjectiveSlice {
    pub agent: AgentId,
    pub entities: Vec<Entity>,
    pub facts: Vec<PerceivedFact>,
    pub relations: Vec<Relation>,
}

impl SubjectiveSlice {
    pub fn contains_entity(&self, id: crate::core::types::EntityId) -> bool {
        self.entities.iter().any(|e| e.id == id)
    }

    pub fn entity(&self, id: crate::core::types::EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }
}

/// Belief store for all agents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeliefModel {
    profiles: AHashMap<AgentId, BeliefProfile>,
}

impl BeliefModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch an agent's profile, lazily creating neutral priors.
    /// Agents never error for lacking a belief history.
    pub fn profile_mut(&mut self, agent: AgentId) -> &mut BeliefProfile {
        self.profiles.entry(agent).or_insert_with(BeliefProfile::neutral)
    }

    pub fn profile(&self, agent: AgentId) -> Option<&BeliefProfile> {
        self.profiles.get(&agent)
    }

    /// Append or overwrite one weighted proposition
    pub fn observe(&mut self, agent: AgentId, key: impl Into<String>, weight: f32) {
        self.profile_mut(agent)
            .propositions
            .insert(key.into(), weight.clamp(-1.0, 1.0));
    }

    pub fn add_bias(&mut self, agent: AgentId, bias: Bias) {
        self.profile_mut(agent).biases.push(bias);
    }

    /// Run every active bias over the visible slice, lazily creating the
    /// agent's profile first
    pub fn apply(&mut self, agent: AgentId, slice: VisibleSlice) -> SubjectiveSlice {
        let profile = self.profile_mut(agent);
        apply_with(profile, slice)
    }
}

/// Pure form of the belief overlay: adjust a visible slice against one
/// profile. Entities and relations pass through untouched; only fact
/// confidence is reframed.
pub fn apply_with(profile: &BeliefProfile, slice: VisibleSlice) -> SubjectiveSlice {
    let facts = slice
        .facts
        .into_iter()
        .map(|fact| {
            let mut confidence = fact.confidence;
            for bias in &profile.biases {
                confidence = bias.kind.adjust(bias.strength, profile, &fact, confidence);
            }
            PerceivedFact {
                confidence: confidence.clamp(0.0, 1.0),
                fact,
            }
        })
        .collect();

    SubjectiveSlice {
        agent: slice.agent,
        entities: slice.entities,
        facts,
        relations: slice.relations,
    }
}
