//! The adjudicator: five ordered laws between a proposed action and the world
//!
//! Every action passes the laws in a fixed order (resource conservation,
//! information limit, state consistency, rule adherence, canon preservation)
//! and the first violation rejects it. Acceptance yields a [`StateDelta`];
//! the adjudicator itself never writes to the world.
//!
//! Adjudication is a pure function of its inputs. Running the same action
//! against the same world twice produces the same verdict, which is what
//! lets the negotiation engine re-adjudicate adjusted candidates safely.

use crate::actions::{ActionKind, ProposedAction, StateDelta};
use crate::agents::AgentProfile;
use crate::brief::TurnBrief;
use crate::core::config::EngineConfig;
use crate::core::error::{EngineError, Result};
use crate::world::entity::Entity;
use crate::world::fact::Fact;
use crate::world::rule::{RuleExpr, Scope};
use crate::world::state::WorldState;
use serde::{Deserialize, Serialize};

/// The five laws, in the order they are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LawCode {
    /// Declared costs must not drive any tracked balance negative
    ResourceConservation,
    /// Actions may only reference what the agent's brief let it see
    InformationLimit,
    /// Targets must exist and proximity actions must be in range
    StateConsistency,
    /// Declarative world rules must hold after the action applies
    RuleAdherence,
    /// Claims must not contradict canon-confidence facts
    CanonPreservation,
}

impl LawCode {
    pub const ALL: [LawCode; 5] = [
        LawCode::ResourceConservation,
        LawCode::InformationLimit,
        LawCode::StateConsistency,
        LawCode::RuleAdherence,
        LawCode::CanonPreservation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LawCode::ResourceConservation => "resource-conservation",
            LawCode::InformationLimit => "information-limit",
            LawCode::StateConsistency => "state-consistency",
            LawCode::RuleAdherence => "rule-adherence",
            LawCode::CanonPreservation => "canon-preservation",
        }
    }
}

/// Verdict for one proposed action
#[derive(Debug, Clone)]
pub enum AdjudicationResult {
    /// The action passed every law; apply this delta and nothing else
    Accepted { delta: StateDelta },
    /// First law the action violated, with a human-readable reason
    Rejected { law: LawCode, reason: String },
}

impl AdjudicationResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AdjudicationResult::Accepted { .. })
    }
}

pub struct Adjudicator {
    config: EngineConfig,
}

impl Adjudicator {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Run the laws in order; the first violation rejects the action.
    ///
    /// Returns Err only on integrity problems (the acting agent has no body
    /// entity). A law violation is a normal verdict, not an error.
    pub fn adjudicate(
        &self,
        world: &WorldState,
        action: &ProposedAction,
        profile: &AgentProfile,
        brief: &TurnBrief,
    ) -> Result<AdjudicationResult> {
        let actor = self.actor_of(world, profile)?;
        let delta = self.derive_delta(world, action, actor);

        for law in LawCode::ALL {
            if let Some(reason) = self.check_law(law, world, action, actor, brief, &delta) {
                tracing::debug!(
                    agent = %profile.name,
                    law = law.name(),
                    %reason,
                    "action rejected"
                );
                return Ok(AdjudicationResult::Rejected { law, reason });
            }
        }
        Ok(AdjudicationResult::Accepted { delta })
    }

    /// Every law the action violates, in check order. Used by negotiation to
    /// rank alternatives; fewer violations is closer to acceptable.
    pub fn check_all(
        &self,
        world: &WorldState,
        action: &ProposedAction,
        profile: &AgentProfile,
        brief: &TurnBrief,
    ) -> Result<Vec<(LawCode, String)>> {
        let actor = self.actor_of(world, profile)?;
        let delta = self.derive_delta(world, action, actor);
        Ok(LawCode::ALL
            .into_iter()
            .filter_map(|law| {
                self.check_law(law, world, action, actor, brief, &delta)
                    .map(|reason| (law, reason))
            })
            .collect())
    }

    fn actor_of<'w>(&self, world: &'w WorldState, profile: &AgentProfile) -> Result<&'w Entity> {
        world.entity(profile.entity).ok_or_else(|| {
            EngineError::IntegrityViolation(format!(
                "agent {} has no body entity {}",
                profile.name, profile.entity
            ))
        })
    }

    /// The mutation this action would make if accepted. Pure; tolerates
    /// inconsistencies (missing target, no destination) because the laws
    /// report those as verdicts with better messages than a derivation
    /// error could.
    fn derive_delta(&self, world: &WorldState, action: &ProposedAction, actor: &Entity) -> StateDelta {
        let mut delta = StateDelta::default();

        for (attr, amount) in &action.costs {
            delta.attr_changes.push((actor.id, attr.clone(), -amount));
        }

        match action.kind {
            ActionKind::Move => {
                let destination = action
                    .destination
                    .or_else(|| action.target.and_then(|t| world.entity(t)).map(|e| e.position));
                if let Some(dest) = destination {
                    let next = actor.position.step_toward(&dest, self.config.move_speed);
                    delta.position = Some((actor.id, next));
                }
            }
            ActionKind::Speak => {
                let mut fact = Fact::new(
                    action.intent.clone(),
                    action.confidence.clamp(0.0, 1.0),
                    actor.name.clone(),
                )
                .about(actor.id);
                if let Some(target) = action.target {
                    fact = fact.about(target);
                }
                if let Some(claim) = action.claims.first() {
                    fact = fact.with_claim(claim.clone());
                }
                delta.new_facts.push(fact);
            }
            _ => {}
        }

        delta
    }

    fn check_law(
        &self,
        law: LawCode,
        world: &WorldState,
        action: &ProposedAction,
        actor: &Entity,
        brief: &TurnBrief,
        delta: &StateDelta,
    ) -> Option<String> {
        match law {
            LawCode::ResourceConservation => self.check_resources(action, actor),
            LawCode::InformationLimit => self.check_information(action, brief),
            LawCode::StateConsistency => self.check_consistency(world, action, actor),
            LawCode::RuleAdherence => self.check_rules(world, action, actor, delta),
            LawCode::CanonPreservation => self.check_canon(world, action),
        }
    }

    /// Law 1: no balance goes negative and no cost conjures resources
    fn check_resources(&self, action: &ProposedAction, actor: &Entity) -> Option<String> {
        let mut seen: Vec<&str> = Vec::new();
        for (attr, amount) in &action.costs {
            if *amount < 0.0 {
                return Some(format!("negative cost {} for {}", amount, attr));
            }
            if seen.contains(&attr.as_str()) {
                continue;
            }
            seen.push(attr);
            let balance = actor.num_attr(attr).unwrap_or(0.0);
            let spend = action.cost_of(attr);
            if spend > balance {
                return Some(format!(
                    "{} costs {} but {} has {}",
                    attr, spend, actor.name, balance
                ));
            }
        }
        None
    }

    /// Law 2: the action may only reference entities the brief contained
    fn check_information(&self, action: &ProposedAction, brief: &TurnBrief) -> Option<String> {
        if let Some(target) = action.target {
            if !brief.permits_entity(target) {
                return Some(format!("target {} is outside the agent's perception", target));
            }
        }
        for cite in &action.cites {
            if !brief.permits_entity(*cite) {
                return Some(format!("cites {} which the agent cannot see", cite));
            }
        }
        None
    }

    /// Law 3: targets exist, proximity actions are in range, moves go
    /// somewhere
    fn check_consistency(
        &self,
        world: &WorldState,
        action: &ProposedAction,
        actor: &Entity,
    ) -> Option<String> {
        let target = match action.target {
            Some(id) => match world.entity(id) {
                Some(entity) => Some(entity),
                None => return Some(format!("target {} no longer exists", id)),
            },
            None => None,
        };

        if action.kind.requires_proximity() {
            let Some(target) = target else {
                return Some(format!("{:?} requires a target", action.kind));
            };
            let distance = actor.position.distance(&target.position);
            if distance > self.config.interaction_range {
                return Some(format!(
                    "{} is {:.1} away, beyond interaction range {:.1}",
                    target.name, distance, self.config.interaction_range
                ));
            }
        }

        if action.kind == ActionKind::Move && action.destination.is_none() && target.is_none() {
            return Some("move has neither destination nor target".to_string());
        }

        None
    }

    /// Law 4: every declarative rule still holds after the delta
    fn check_rules(
        &self,
        world: &WorldState,
        action: &ProposedAction,
        actor: &Entity,
        delta: &StateDelta,
    ) -> Option<String> {
        for rule in world.rules() {
            match &rule.parsed {
                RuleExpr::ForbidKind(kind) => {
                    if kind == action.kind.rule_name() {
                        return Some(format!("rule {:?} forbids {}", rule.name, kind));
                    }
                }
                RuleExpr::AttrBound { scope, attr, cmp, value } => {
                    let entity = match scope {
                        Scope::Actor => Some(actor),
                        Scope::Target => action.target.and_then(|t| world.entity(t)),
                    };
                    // Target-scope bounds only apply to actions with a live
                    // target
                    let Some(entity) = entity else { continue };
                    let post =
                        entity.num_attr(attr).unwrap_or(0.0) + delta.net_change(entity.id, attr);
                    if !cmp.holds(post, *value) {
                        return Some(format!(
                            "rule {:?} requires {} but {}.{} would be {}",
                            rule.name,
                            rule.parsed.describe(),
                            entity.name,
                            attr,
                            post
                        ));
                    }
                }
            }
        }
        None
    }

    /// Law 5: no claim contradicts a canon-confidence fact
    fn check_canon(&self, world: &WorldState, action: &ProposedAction) -> Option<String> {
        for claim in &action.claims {
            for fact in world.facts() {
                if fact.confidence < self.config.canon_threshold {
                    continue;
                }
                if let Some(canon) = &fact.claim {
                    if claim.contradicts(canon) {
                        return Some(format!(
                            "claim {}={} contradicts established fact {:?}",
                            claim.predicate, claim.value, fact.text
                        ));
                    }
                }
            }
        }
        None
    }
}
