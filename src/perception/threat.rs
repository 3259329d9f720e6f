//! Threat assessment over a subjective slice
//!
//! Flags visible entities that are hostile toward the agent or compete for
//! the same scarce resources, with a level that rises as they close in.

use crate::agents::AgentProfile;
use crate::core::config::EngineConfig;
use crate::core::types::EntityId;
use crate::perception::belief::SubjectiveSlice;
use crate::perception::fog::effective_range;
use crate::world::relation::RelationKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatAssessment {
    pub entity: EntityId,
    /// 0-1; hostile-and-adjacent approaches 1.0
    pub level: f32,
    pub reason: String,
}

/// Scan the slice for hostile or resource-competing entities.
/// Results are ordered by descending level, ties broken by slice order.
pub fn assess(
    slice: &SubjectiveSlice,
    profile: &AgentProfile,
    config: &EngineConfig,
) -> Vec<ThreatAssessment> {
    let Some(body) = slice.entity(profile.entity) else {
        return Vec::new();
    };
    let origin = body.position;
    let range = effective_range(profile, config);

    let mut threats = Vec::new();
    for entity in &slice.entities {
        if entity.id == profile.entity {
            continue;
        }

        let hostile = slice.relations.iter().any(|r| {
            r.kind == RelationKind::Hostile
                && ((r.src == entity.id && r.dst == profile.entity)
                    || (r.src == profile.entity && r.dst == entity.id))
        });
        let competing = slice.relations.iter().any(|r| {
            r.kind == RelationKind::CompetesFor
                && ((r.src == entity.id && r.dst == profile.entity)
                    || (r.src == profile.entity && r.dst == entity.id))
        });

        let base = if hostile {
            0.8
        } else if competing {
            0.4
        } else {
            continue;
        };

        // Proximity scaling: a hostile at the edge of perception is less
        // pressing than one at arm's length.
        let distance = origin.distance(&entity.position);
        let proximity = 1.0 - (distance / range).min(1.0) * 0.5;
        let level = (base * proximity).clamp(0.0, 1.0);

        let reason = if hostile {
            format!("{} is hostile at distance {:.0}", entity.name, distance)
        } else {
            format!("{} competes for the same resources", entity.name)
        };

        threats.push(ThreatAssessment {
            entity: entity.id,
            level,
            reason,
        });
    }

    threats.sort_by(|a, b| b.level.partial_cmp(&a.level).unwrap_or(std::cmp::Ordering::Equal));
    threats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AgentId, Vec2};
    use crate::world::entity::Entity;
    use crate::world::relation::Relation;

    fn slice(entities: Vec<Entity>, relations: Vec<Relation>) -> SubjectiveSlice {
        SubjectiveSlice {
            agent: AgentId::new(),
            entities,
            facts: Vec::new(),
            relations,
        }
    }

    #[test]
    fn test_hostile_outranks_competitor() {
        let body = Entity::new("brynn", "character", Vec2::new(0.0, 0.0));
        let raider = Entity::new("raider", "character", Vec2::new(10.0, 0.0));
        let rival = Entity::new("rival", "character", Vec2::new(10.0, 0.0));
        let profile = AgentProfile::new("brynn", body.id);

        let relations = vec![
            Relation::new(rival.id, body.id, RelationKind::CompetesFor),
            Relation::new(raider.id, body.id, RelationKind::Hostile),
        ];
        let threats = assess(
            &slice(vec![body, raider.clone(), rival], relations),
            &profile,
            &EngineConfig::default(),
        );
        assert_eq!(threats.len(), 2);
        assert_eq!(threats[0].entity, raider.id);
        assert!(threats[0].level > threats[1].level);
    }

    #[test]
    fn test_closer_hostile_scores_higher() {
        let body = Entity::new("brynn", "character", Vec2::new(0.0, 0.0));
        let near = Entity::new("near", "character", Vec2::new(2.0, 0.0));
        let far = Entity::new("far", "character", Vec2::new(45.0, 0.0));
        let profile = AgentProfile::new("brynn", body.id).with_perception_range(50.0);

        let relations = vec![
            Relation::new(near.id, body.id, RelationKind::Hostile),
            Relation::new(far.id, body.id, RelationKind::Hostile),
        ];
        let threats = assess(
            &slice(vec![body, near.clone(), far], relations),
            &profile,
            &EngineConfig::default(),
        );
        assert_eq!(threats[0].entity, near.id);
    }

    #[test]
    fn test_unrelated_entity_is_no_threat() {
        let body = Entity::new("brynn", "character", Vec2::new(0.0, 0.0));
        let passerby = Entity::new("passerby", "character", Vec2::new(5.0, 0.0));
        let profile = AgentProfile::new("brynn", body.id);

        let threats = assess(
            &slice(vec![body, passerby], vec![]),
            &profile,
            &EngineConfig::default(),
        );
        assert!(threats.is_empty());
    }
}
