//! The canonical shared world ledger
//!
//! WorldState is pure data plus guarded mutation paths. During a turn it is
//! exclusively owned by the orchestrator; agents and collaborators only ever
//! see filtered, read-only slices of it, and every write funnels through
//! [`WorldState::apply_delta`] after adjudication.

use crate::actions::StateDelta;
use crate::core::config::FactReferencePolicy;
use crate::core::error::{EngineError, Result};
use crate::core::types::{EntityId, FactId, Turn};
use crate::world::entity::Entity;
use crate::world::fact::Fact;
use crate::world::relation::Relation;
use crate::world::rule::Rule;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Outcome of checking a fact's entity references
#[derive(Debug, Clone, PartialEq)]
pub enum FactIntegrity {
    Ok,
    /// The fact names subjects the world does not know
    UnknownSubjects(Vec<EntityId>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldState {
    turn: Turn,
    entities: Vec<Entity>,
    facts: Vec<Fact>,
    relations: Vec<Relation>,
    rules: Vec<Rule>,
    #[serde(skip)]
    entity_index: AHashMap<EntityId, usize>,
    #[serde(skip)]
    fact_index: AHashMap<FactId, usize>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn(&self) -> Turn {
        self.turn
    }

    /// Rebuild id lookup indexes. Must be called after deserializing a
    /// snapshot; the indexes are derived data and are not persisted.
    pub fn rebuild_indexes(&mut self) {
        self.entity_index = self
            .entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id, i))
            .collect();
        self.fact_index = self
            .facts
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id, i))
            .collect();
    }

    // === ENTITIES ===

    pub fn register_entity(&mut self, entity: Entity) -> Result<EntityId> {
        if self.entity_index.contains_key(&entity.id) {
            return Err(EngineError::IntegrityViolation(format!(
                "duplicate entity id {}",
                entity.id
            )));
        }
        let id = entity.id;
        self.entity_index.insert(id, self.entities.len());
        self.entities.push(entity);
        Ok(id)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entity_index.get(&id).map(|&i| &self.entities[i])
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.entity_index.contains_key(&id)
    }

    /// Entities in registration order
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    fn entity_mut(&mut self, id: EntityId) -> Result<&mut Entity> {
        let idx = *self
            .entity_index
            .get(&id)
            .ok_or(EngineError::EntityNotFound(id))?;
        Ok(&mut self.entities[idx])
    }

    // === FACTS ===

    /// Check whether a fact's subjects are all known entities
    pub fn check_fact_references(&self, fact: &Fact) -> FactIntegrity {
        let unknown: Vec<EntityId> = fact
            .subjects
            .iter()
            .copied()
            .filter(|id| !self.contains_entity(*id))
            .collect();
        if unknown.is_empty() {
            FactIntegrity::Ok
        } else {
            FactIntegrity::UnknownSubjects(unknown)
        }
    }

    pub fn add_fact(&mut self, fact: Fact, policy: FactReferencePolicy) -> Result<FactId> {
        if let FactIntegrity::UnknownSubjects(unknown) = self.check_fact_references(&fact) {
            match policy {
                FactReferencePolicy::Reject => {
                    return Err(EngineError::Validation(format!(
                        "fact {:?} references unknown entities: {:?}",
                        fact.text, unknown
                    )));
                }
                FactReferencePolicy::Warn => {
                    tracing::warn!(
                        fact = %fact.text,
                        ?unknown,
                        "fact references unknown entities"
                    );
                }
            }
        }
        let id = fact.id;
        self.fact_index.insert(id, self.facts.len());
        self.facts.push(fact);
        Ok(id)
    }

    pub fn fact(&self, id: FactId) -> Option<&Fact> {
        self.fact_index.get(&id).map(|&i| &self.facts[i])
    }

    /// Facts in insertion order, expired ones included until the next
    /// turn-boundary prune
    pub fn facts(&self) -> impl Iterator<Item = &Fact> {
        self.facts.iter()
    }

    // === RELATIONS ===

    pub fn add_relation(&mut self, relation: Relation) -> Result<()> {
        for endpoint in [relation.src, relation.dst] {
            if !self.contains_entity(endpoint) {
                return Err(EngineError::IntegrityViolation(format!(
                    "relation {:?} references unknown entity {}",
                    relation.kind, endpoint
                )));
            }
        }
        self.relations.push(relation);
        Ok(())
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter()
    }

    // === RULES ===

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    // === MUTATION ===

    /// The single writer path. Every change an accepted action makes to the
    /// world goes through here, already validated by adjudication.
    pub fn apply_delta(&mut self, delta: &StateDelta, policy: FactReferencePolicy) -> Result<()> {
        // Validate all touched entities up front so a bad delta applies
        // nothing rather than half of itself.
        for (entity, _, _) in &delta.attr_changes {
            if !self.contains_entity(*entity) {
                return Err(EngineError::EntityNotFound(*entity));
            }
        }
        if let Some((entity, _)) = delta.position {
            if !self.contains_entity(entity) {
                return Err(EngineError::EntityNotFound(entity));
            }
        }

        for (entity, attr, change) in &delta.attr_changes {
            self.entity_mut(*entity)?.adjust_num_attr(attr, *change);
        }
        if let Some((entity, position)) = delta.position {
            self.entity_mut(entity)?.position = position;
        }
        for fact in &delta.new_facts {
            self.add_fact(fact.clone(), policy)?;
        }
        for relation in &delta.new_relations {
            self.add_relation(relation.clone())?;
        }
        Ok(())
    }

    /// Advance the turn counter and prune expired facts
    pub fn advance_turn(&mut self) {
        self.turn += 1;
        let turn = self.turn;
        self.facts.retain(|f| !f.is_expired(turn));
        self.fact_index = self
            .facts
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id, i))
            .collect();
    }

    /// Scan for corruption signals (dangling relations, stale indexes).
    /// Returns human-readable issue descriptions; empty means healthy.
    pub fn verify_integrity(&self) -> Vec<String> {
        let mut issues = Vec::new();
        for relation in &self.relations {
            for endpoint in [relation.src, relation.dst] {
                if !self.contains_entity(endpoint) {
                    issues.push(format!(
                        "dangling relation {:?}: unknown entity {}",
                        relation.kind, endpoint
                    ));
                }
            }
        }
        if self.entity_index.len() != self.entities.len() {
            issues.push("entity index out of sync with ledger".to_string());
        }
        issues
    }
}
