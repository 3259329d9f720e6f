//! Proposed actions and the world deltas they resolve to
//!
//! Actions are produced by the external decision collaborator and never
//! touch the world directly: the adjudicator turns an accepted action into
//! a [`StateDelta`], and the orchestrator applies that delta through the
//! world's single writer path.

use crate::core::types::{AgentId, EntityId, EventId, Vec2};
use crate::world::fact::{Fact, FactClaim};
use crate::world::relation::Relation;
use serde::{Deserialize, Serialize};

/// Kinds of action an agent may propose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    /// Travel toward a position or entity
    Move,
    /// Use, examine or manipulate a nearby entity
    Interact,
    /// Hostile action against a nearby entity
    Attack,
    /// Hand resources to a nearby entity
    Transfer,
    /// Say something; recorded as a new fact
    Speak,
    /// Look around without committing to anything
    Observe,
    /// Do nothing this turn. Placeholder when the decision collaborator
    /// times out or errs.
    Wait,
}

impl ActionKind {
    /// Proximity actions require the target within interaction range
    pub fn requires_proximity(&self) -> bool {
        matches!(self, ActionKind::Interact | ActionKind::Attack | ActionKind::Transfer)
    }

    /// Lowercase name matched by `forbid <kind>` rules
    pub fn rule_name(&self) -> &'static str {
        match self {
            ActionKind::Move => "move",
            ActionKind::Interact => "interact",
            ActionKind::Attack => "attack",
            ActionKind::Transfer => "transfer",
            ActionKind::Speak => "speak",
            ActionKind::Observe => "observe",
            ActionKind::Wait => "wait",
        }
    }
}

/// An action proposed by an agent for the current turn.
///
/// Costs are declared per attribute name; the resource-conservation law
/// rejects any action whose costs would drive a tracked balance negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    pub agent: AgentId,
    pub kind: ActionKind,
    pub target: Option<EntityId>,
    /// Explicit destination for Move; falls back to the target's position
    pub destination: Option<Vec2>,
    pub intent: String,
    pub justification: String,
    /// Collaborator's confidence in the proposal (0-1)
    pub confidence: f32,
    /// Attribute name -> amount spent by this action
    pub costs: Vec<(String, f64)>,
    /// Entities the action reasoning references beyond the target
    pub cites: Vec<EntityId>,
    /// What the action asserts about the world, checked against canon
    pub claims: Vec<FactClaim>,
    /// Prior events the agent names as causes of this action
    pub caused_by: Vec<EventId>,
}

impl ProposedAction {
    pub fn new(agent: AgentId, kind: ActionKind, intent: impl Into<String>) -> Self {
        Self {
            agent,
            kind,
            target: None,
            destination: None,
            intent: intent.into(),
            justification: String::new(),
            confidence: 1.0,
            costs: Vec::new(),
            cites: Vec::new(),
            claims: Vec::new(),
            caused_by: Vec::new(),
        }
    }

    /// The no-action placeholder used when the decision collaborator fails
    pub fn wait(agent: AgentId) -> Self {
        Self::new(agent, ActionKind::Wait, "waits and watches")
    }

    pub fn with_target(mut self, target: EntityId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_destination(mut self, destination: Vec2) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_cost(mut self, attr: impl Into<String>, amount: f64) -> Self {
        self.costs.push((attr.into(), amount));
        self
    }

    pub fn with_claim(mut self, claim: FactClaim) -> Self {
        self.claims.push(claim);
        self
    }

    pub fn citing(mut self, entity: EntityId) -> Self {
        self.cites.push(entity);
        self
    }

    pub fn caused_by(mut self, event: EventId) -> Self {
        self.caused_by.push(event);
        self
    }

    /// Total declared spend against one attribute
    pub fn cost_of(&self, attr: &str) -> f64 {
        self.costs
            .iter()
            .filter(|(name, _)| name == attr)
            .map(|(_, amount)| amount)
            .sum()
    }

    /// One-line form for action history windows and logs
    pub fn summary(&self) -> String {
        match self.target {
            Some(target) => format!("{:?}: {} (target {})", self.kind, self.intent, target),
            None => format!("{:?}: {}", self.kind, self.intent),
        }
    }
}

/// The world mutation an accepted action resolves to.
///
/// Deltas are computed by the adjudicator and applied by the orchestrator;
/// nothing else writes to the world.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDelta {
    /// (entity, attribute, signed change) in application order
    pub attr_changes: Vec<(EntityId, String, f64)>,
    /// At most one position change per action
    pub position: Option<(EntityId, Vec2)>,
    pub new_facts: Vec<Fact>,
    pub new_relations: Vec<Relation>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.attr_changes.is_empty()
            && self.position.is_none()
            && self.new_facts.is_empty()
            && self.new_relations.is_empty()
    }

    /// Net change this delta applies to one entity attribute
    pub fn net_change(&self, entity: EntityId, attr: &str) -> f64 {
        self.attr_changes
            .iter()
            .filter(|(e, name, _)| *e == entity && name == attr)
            .map(|(_, _, delta)| delta)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_of_sums_duplicates() {
        let action = ProposedAction::new(AgentId::new(), ActionKind::Interact, "pry the gate")
            .with_cost("energy", 2.0)
            .with_cost("energy", 3.0)
            .with_cost("favor", 1.0);
        assert_eq!(action.cost_of("energy"), 5.0);
        assert_eq!(action.cost_of("favor"), 1.0);
        assert_eq!(action.cost_of("supplies"), 0.0);
    }

    #[test]
    fn test_wait_has_no_costs_or_target() {
        let action = ProposedAction::wait(AgentId::new());
        assert_eq!(action.kind, ActionKind::Wait);
        assert!(action.costs.is_empty());
        assert!(action.target.is_none());
    }

    #[test]
    fn test_proximity_kinds() {
        assert!(ActionKind::Attack.requires_proximity());
        assert!(ActionKind::Transfer.requires_proximity());
        assert!(!ActionKind::Move.requires_proximity());
        assert!(!ActionKind::Speak.requires_proximity());
    }

    #[test]
    fn test_delta_net_change() {
        let entity = EntityId::new();
        let mut delta = StateDelta::default();
        delta.attr_changes.push((entity, "energy".into(), -3.0));
        delta.attr_changes.push((entity, "energy".into(), 1.0));
        delta.attr_changes.push((EntityId::new(), "energy".into(), -9.0));
        assert_eq!(delta.net_change(entity, "energy"), -2.0);
    }
}
