//! Fog-of-war filtering: what a given agent may observe
//!
//! The filter is a pure read over the world: entities within the agent's
//! perception radius, facts whose subjects intersect the visible set (on a
//! channel the agent's senses cover), and relations with both endpoints
//! visible. Given identical world state and agent config the output is
//! identical, which the replay/debugging workflow depends on.

use crate::agents::{AgentProfile, AgentRoster};
use crate::core::config::EngineConfig;
use crate::core::error::{EngineError, Result};
use crate::core::types::{AgentId, EntityId};
use crate::world::entity::Entity;
use crate::world::fact::Fact;
use crate::world::relation::Relation;
use crate::world::state::WorldState;
use ahash::AHashSet;

/// The unbiased slice of the world one agent can currently perceive
#[derive(Debug, Clone)]
pub struct VisibleSlice {
    pub agent: AgentId,
    pub entities: Vec<Entity>,
    pub facts: Vec<Fact>,
    pub relations: Vec<Relation>,
}

impl VisibleSlice {
    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.entities.iter().any(|e| e.id == id)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }
}

/// Compute the visible slice for `agent`. Unknown agents fail with
/// `AgentNotFound`; an agent whose body entity is missing from the world is
/// a corruption signal.
pub fn filter(
    world: &WorldState,
    roster: &AgentRoster,
    agent: AgentId,
    config: &EngineConfig,
) -> Result<VisibleSlice> {
    let profile = roster.get(agent)?;
    let body = world.entity(profile.entity).ok_or_else(|| {
        EngineError::IntegrityViolation(format!(
            "agent {} body entity {} missing from world",
            profile.name, profile.entity
        ))
    })?;

    let range = effective_range(profile, config);
    let origin = body.position;

    // Entity pass: insertion order, the agent's own body always included.
    let entities: Vec<Entity> = world
        .entities()
        .filter(|e| e.id == profile.entity || origin.distance(&e.position) <= range)
        .cloned()
        .collect();
    let visible_ids: AHashSet<EntityId> = entities.iter().map(|e| e.id).collect();

    // Fact pass: subject overlap plus channel coverage. Subject-less facts
    // are world-scoped and visible to everyone whose senses cover them.
    let facts: Vec<Fact> = world
        .facts()
        .filter(|f| !f.is_expired(world.turn()))
        .filter(|f| profile.hears(f.channel))
        .filter(|f| {
            f.subjects.is_empty() || f.subjects.iter().any(|s| visible_ids.contains(s))
        })
        .cloned()
        .collect();

    let relations: Vec<Relation> = world
        .relations()
        .filter(|r| visible_ids.contains(&r.src) && visible_ids.contains(&r.dst))
        .cloned()
        .collect();

    Ok(VisibleSlice {
        agent,
        entities,
        facts,
        relations,
    })
}

/// The radius this profile perceives at
pub fn effective_range(profile: &AgentProfile, config: &EngineConfig) -> f32 {
    profile
        .perception_range
        .unwrap_or(config.default_perception_range)
}
