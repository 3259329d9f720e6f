//! Turn briefs: the complete packet an agent reasons over for one turn
//!
//! A brief composes the fog-filtered world slice, the agent's belief
//! overlay, a threat-assessment pass, retrieved doctrine and a short action
//! history. It is ephemeral: built fresh each turn, discarded once the
//! agent responds.

use crate::agents::{AgentProfile, AgentRoster};
use crate::collab::retrieval::{DoctrineRetriever, DoctrineSnippet};
use crate::collab::retry_with_backoff;
use crate::core::config::EngineConfig;
use crate::core::error::Result;
use crate::core::types::{AgentId, EntityId, Turn};
use crate::perception::belief::{apply_with, BeliefProfile, SubjectiveSlice};
use crate::perception::threat::{assess, ThreatAssessment};
use crate::perception::fog;
use crate::world::state::WorldState;
use std::sync::Arc;

/// Everything one agent gets to reason over this turn
#[derive(Debug, Clone)]
pub struct TurnBrief {
    pub agent: AgentId,
    pub turn: Turn,
    pub visible: SubjectiveSlice,
    pub threats: Vec<ThreatAssessment>,
    pub doctrine: Vec<DoctrineSnippet>,
    pub recent_actions: Vec<String>,
    /// Set when doctrine retrieval failed and the brief shipped without it
    pub degraded: bool,
}

impl TurnBrief {
    /// Whether the information-limit law permits referencing this entity
    pub fn permits_entity(&self, id: EntityId) -> bool {
        self.visible.contains_entity(id)
    }

    /// Prompt-ready rendering for the decision collaborator
    pub fn render(&self, profile: &AgentProfile) -> String {
        let mut out = String::new();
        out.push_str(&format!("You are {}. {}\n", profile.name, profile.persona));
        out.push_str(&format!("Turn {}.\n\nYou can see:\n", self.turn));
        for entity in &self.visible.entities {
            out.push_str(&format!(
                "- {} ({}) at ({:.0}, {:.0})\n",
                entity.name, entity.kind, entity.position.x, entity.position.y
            ));
        }
        if !self.visible.facts.is_empty() {
            out.push_str("\nYou believe:\n");
            for fact in &self.visible.facts {
                out.push_str(&format!(
                    "- {} (certainty {:.0}%)\n",
                    fact.fact.text,
                    fact.confidence * 100.0
                ));
            }
        }
        if !self.threats.is_empty() {
            out.push_str("\nThreats:\n");
            for threat in &self.threats {
                out.push_str(&format!("- {} (level {:.2})\n", threat.reason, threat.level));
            }
        }
        if !self.doctrine.is_empty() {
            out.push_str("\nRelevant doctrine:\n");
            for snippet in &self.doctrine {
                out.push_str(&format!("- {} [{}]\n", snippet.text, snippet.source_id));
            }
        }
        if !self.recent_actions.is_empty() {
            out.push_str("\nYour recent actions:\n");
            for action in &self.recent_actions {
                out.push_str(&format!("- {}\n", action));
            }
        }
        out
    }
}

/// Builds turn briefs. Stateless apart from its retriever handle; the
/// per-agent action history lives with the orchestrator so the builder can
/// be shared across concurrent per-agent tasks.
pub struct TurnBriefBuilder {
    retriever: Arc<dyn DoctrineRetriever>,
    config: EngineConfig,
}

impl TurnBriefBuilder {
    pub fn new(retriever: Arc<dyn DoctrineRetriever>, config: EngineConfig) -> Self {
        Self { retriever, config }
    }

    /// Assemble the brief for one agent.
    ///
    /// Doctrine retrieval is bounded by the configured timeout with bounded
    /// retry; on final failure the brief ships degraded (empty doctrine)
    /// rather than failing the turn.
    pub async fn build(
        &self,
        world: &WorldState,
        roster: &AgentRoster,
        beliefs: &BeliefProfile,
        agent: AgentId,
        recent_actions: Vec<String>,
    ) -> Result<TurnBrief> {
        let profile = roster.get(agent)?;
        let raw = fog::filter(world, roster, agent, &self.config)?;
        let visible = apply_with(beliefs, raw);
        let threats = assess(&visible, profile, &self.config);

        let query = match &profile.doctrine_query {
            Some(q) => q.clone(),
            None => derive_query(profile, &threats),
        };

        let top_k = self.config.retrieval_top_k;
        let retriever = self.retriever.clone();
        let retrieval = retry_with_backoff(
            self.config.dependency_retries,
            self.config.retry_backoff,
            "doctrine_retrieval",
            || {
                let retriever = retriever.clone();
                let query = query.clone();
                async move { retriever.retrieve(&query, top_k).await }
            },
        );

        let (doctrine, degraded) =
            match tokio::time::timeout(self.config.retrieval_timeout, retrieval).await {
                Ok(Ok(snippets)) => (snippets, false),
                Ok(Err(e)) => {
                    tracing::warn!(agent = %profile.name, error = %e, "doctrine retrieval failed");
                    (Vec::new(), true)
                }
                Err(_) => {
                    tracing::warn!(agent = %profile.name, "doctrine retrieval timed out");
                    (Vec::new(), true)
                }
            };

        Ok(TurnBrief {
            agent,
            turn: world.turn(),
            visible,
            threats,
            doctrine,
            recent_actions,
            degraded,
        })
    }
}

/// Fallback doctrine query when the profile does not pin one: the agent's
/// situation in a few terms, weighted toward the top threat.
fn derive_query(profile: &AgentProfile, threats: &[ThreatAssessment]) -> String {
    match threats.first() {
        Some(top) => format!("{} {}", profile.name, top.reason),
        None => format!("{} {}", profile.name, profile.persona),
    }
}
