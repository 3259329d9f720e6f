//! Negotiation: what to do with a rejected action
//!
//! A rejection is not always the end of the story. Depending on which law
//! fired, the engine classifies the action as infeasible (no mechanical fix
//! exists), adjustable (a concrete modification would pass) or needing a
//! human call (story rules and canon are not the engine's to bend).
//!
//! Adjustable candidates are re-run through the adjudicator before being
//! offered, so an offered adjustment is guaranteed to pass as-is.

use crate::actions::{ActionKind, ProposedAction};
use crate::adjudicator::{Adjudicator, LawCode};
use crate::agents::AgentProfile;
use crate::brief::TurnBrief;
use crate::core::config::EngineConfig;
use crate::core::error::Result;
use crate::world::state::WorldState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Feasibility {
    /// No mechanical adjustment can make this action pass
    Infeasible,
    /// A concrete adjustment exists and has been verified to pass
    Adjustable,
    /// Only a human (or the story's keeper) can authorize this
    NeedsHuman,
}

/// One alternative course of action, ranked by how close it is to passing
#[derive(Debug, Clone)]
pub struct NegotiationOption {
    pub action: ProposedAction,
    pub rationale: String,
    /// Laws this option still violates; zero means it would pass
    pub violations: usize,
}

#[derive(Debug, Clone)]
pub struct NegotiationResult {
    pub feasibility: Feasibility,
    /// Why the original was rejected and what the engine proposes
    pub explanation: String,
    /// Verified-passing adjustment, present only when Adjustable
    pub adjusted: Option<ProposedAction>,
    /// Other options, best first, capped at the configured maximum
    pub alternatives: Vec<NegotiationOption>,
}

pub struct NegotiationEngine {
    adjudicator: Adjudicator,
    config: EngineConfig,
}

impl NegotiationEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            adjudicator: Adjudicator::new(config.clone()),
            config,
        }
    }

    /// Negotiate a rejected action. `law` and `reason` are the verdict that
    /// rejected it.
    pub fn negotiate(
        &self,
        world: &WorldState,
        action: &ProposedAction,
        profile: &AgentProfile,
        brief: &TurnBrief,
        law: LawCode,
        reason: &str,
    ) -> Result<NegotiationResult> {
        let (feasibility, candidates, explanation) =
            self.classify(world, action, profile, brief, law, reason);

        match feasibility {
            Feasibility::NeedsHuman | Feasibility::Infeasible => {
                let alternatives = self.rank(world, profile, brief, self.fallbacks(action))?;
                Ok(NegotiationResult {
                    feasibility,
                    explanation,
                    adjusted: None,
                    alternatives,
                })
            }
            Feasibility::Adjustable => {
                let mut adjusted = None;
                let mut rest = Vec::new();
                for (candidate, rationale) in candidates {
                    let verdict =
                        self.adjudicator.adjudicate(world, &candidate, profile, brief)?;
                    if adjusted.is_none() && verdict.is_accepted() {
                        adjusted = Some(candidate);
                    } else {
                        rest.push((candidate, rationale));
                    }
                }
                rest.extend(self.fallbacks(action));
                let alternatives = self.rank(world, profile, brief, rest)?;

                if adjusted.is_none() {
                    // The adjustment recipe did not survive re-adjudication;
                    // treat as infeasible rather than offer a broken fix
                    return Ok(NegotiationResult {
                        feasibility: Feasibility::Infeasible,
                        explanation: format!("{} (no passing adjustment found)", explanation),
                        adjusted: None,
                        alternatives,
                    });
                }
                Ok(NegotiationResult {
                    feasibility: Feasibility::Adjustable,
                    explanation,
                    adjusted,
                    alternatives,
                })
            }
        }
    }

    /// Per-law classification with adjustment candidates
    fn classify(
        &self,
        world: &WorldState,
        action: &ProposedAction,
        profile: &AgentProfile,
        brief: &TurnBrief,
        law: LawCode,
        reason: &str,
    ) -> (Feasibility, Vec<(ProposedAction, String)>, String) {
        match law {
            LawCode::ResourceConservation => {
                if action.costs.iter().any(|(_, amount)| *amount < 0.0) {
                    return (
                        Feasibility::Infeasible,
                        Vec::new(),
                        format!("{}; costs cannot be negative", reason),
                    );
                }
                let candidate = scaled_to_balance(world, action, profile);
                (
                    Feasibility::Adjustable,
                    vec![(candidate, "costs scaled down to available balance".into())],
                    format!("{}; scaling the spend to what is available", reason),
                )
            }
            LawCode::InformationLimit => {
                if let Some(target) = action.target {
                    if !brief.permits_entity(target) {
                        return (
                            Feasibility::Infeasible,
                            Vec::new(),
                            format!("{}; the agent cannot act on what it never saw", reason),
                        );
                    }
                }
                let mut candidate = action.clone();
                candidate.cites.retain(|cite| brief.permits_entity(*cite));
                (
                    Feasibility::Adjustable,
                    vec![(candidate, "unseen references stripped".into())],
                    format!("{}; dropping references the agent cannot support", reason),
                )
            }
            LawCode::StateConsistency => {
                let target = action.target.and_then(|t| world.entity(t));
                match target {
                    Some(target) => {
                        // Target is real but out of range: approach instead
                        let candidate = ProposedAction::new(
                            action.agent,
                            ActionKind::Move,
                            format!("move toward {}", target.name),
                        )
                        .with_destination(target.position);
                        (
                            Feasibility::Adjustable,
                            vec![(candidate, format!("approach {} first", target.name))],
                            format!("{}; approaching instead this turn", reason),
                        )
                    }
                    None => (
                        Feasibility::Infeasible,
                        Vec::new(),
                        format!("{}; nothing to redirect the action at", reason),
                    ),
                }
            }
            LawCode::RuleAdherence | LawCode::CanonPreservation => (
                Feasibility::NeedsHuman,
                Vec::new(),
                format!("{}; story rules are not the engine's to bend", reason),
            ),
        }
    }

    /// Generic fallbacks that are almost always legal
    fn fallbacks(&self, action: &ProposedAction) -> Vec<(ProposedAction, String)> {
        vec![
            (
                ProposedAction::new(action.agent, ActionKind::Observe, "take stock of the scene"),
                "observe and reconsider".into(),
            ),
            (
                ProposedAction::wait(action.agent),
                "hold position this turn".into(),
            ),
        ]
    }

    /// Rank options by remaining violations, best first, capped
    fn rank(
        &self,
        world: &WorldState,
        profile: &AgentProfile,
        brief: &TurnBrief,
        candidates: Vec<(ProposedAction, String)>,
    ) -> Result<Vec<NegotiationOption>> {
        let mut options = Vec::with_capacity(candidates.len());
        for (action, rationale) in candidates {
            let violations = self
                .adjudicator
                .check_all(world, &action, profile, brief)?
                .len();
            options.push(NegotiationOption { action, rationale, violations });
        }
        options.sort_by_key(|option| option.violations);
        options.truncate(self.config.max_alternatives);
        Ok(options)
    }
}

/// Scale each over-budget attribute's costs down to the actor's balance.
/// Keeps every cost entry but multiplies the over-budget ones by
/// balance / spend, so a declared spend of 10 against a balance of 5 becomes
/// exactly 5.
fn scaled_to_balance(
    world: &WorldState,
    action: &ProposedAction,
    profile: &AgentProfile,
) -> ProposedAction {
    let mut candidate = action.clone();
    let Some(actor) = world.entity(profile.entity) else {
        return candidate;
    };

    let attrs: Vec<String> = {
        let mut seen = Vec::new();
        for (attr, _) in &candidate.costs {
            if !seen.contains(attr) {
                seen.push(attr.clone());
            }
        }
        seen
    };

    for attr in attrs {
        let spend = candidate.cost_of(&attr);
        let balance = actor.num_attr(&attr).unwrap_or(0.0).max(0.0);
        if spend > balance {
            let scale = if spend > 0.0 { balance / spend } else { 0.0 };
            for (name, amount) in &mut candidate.costs {
                if *name == attr {
                    *amount *= scale;
                }
            }
        }
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjudicator::AdjudicationResult;
    use crate::agents::AgentRoster;
    use crate::core::types::{EntityId, Vec2};
    use crate::perception::belief::{apply_with, BeliefProfile};
    use crate::perception::fog;
    use crate::world::entity::{AttrValue, Entity};
    use crate::world::fact::{Fact, FactClaim};
    use crate::world::rule::Rule;

    struct Fixture {
        world: WorldState,
        roster: AgentRoster,
        profile: AgentProfile,
        gate: EntityId,
        far_tower: EntityId,
    }

    fn fixture() -> Fixture {
        let mut world = WorldState::new();
        let actor = world
            .register_entity(
                Entity::new("brynn", "character", Vec2::new(0.0, 0.0))
                    .with_attr("supplies", AttrValue::Num(5.0)),
            )
            .unwrap();
        let gate = world
            .register_entity(Entity::new("gate", "structure", Vec2::new(4.0, 3.0)))
            .unwrap();
        let far_tower = world
            .register_entity(Entity::new("tower", "structure", Vec2::new(40.0, 0.0)))
            .unwrap();
        let mut roster = AgentRoster::new();
        let profile = AgentProfile::new("brynn", actor);
        roster.register(profile.clone()).unwrap();
        Fixture { world, roster, profile, gate, far_tower }
    }

    fn brief_for(fx: &Fixture) -> TurnBrief {
        let slice = fog::filter(&fx.world, &fx.roster, fx.profile.id, &EngineConfig::default())
            .unwrap();
        TurnBrief {
            agent: fx.profile.id,
            turn: fx.world.turn(),
            visible: apply_with(&BeliefProfile::neutral(), slice),
            threats: vec![],
            doctrine: vec![],
            recent_actions: vec![],
            degraded: false,
        }
    }

    fn engine() -> NegotiationEngine {
        NegotiationEngine::new(EngineConfig::default())
    }

    fn reject(
        fx: &Fixture,
        brief: &TurnBrief,
        action: &ProposedAction,
    ) -> (LawCode, String) {
        let verdict = Adjudicator::new(EngineConfig::default())
            .adjudicate(&fx.world, action, &fx.profile, brief)
            .unwrap();
        match verdict {
            AdjudicationResult::Rejected { law, reason } => (law, reason),
            other => panic!("expected a rejection to negotiate, got {:?}", other),
        }
    }

    #[test]
    fn test_overspend_scaled_to_balance() {
        let fx = fixture();
        let brief = brief_for(&fx);
        let action = ProposedAction::new(fx.profile.id, ActionKind::Interact, "bribe the guard")
            .with_target(fx.gate)
            .with_cost("supplies", 10.0);
        let (law, reason) = reject(&fx, &brief, &action);

        let result = engine()
            .negotiate(&fx.world, &action, &fx.profile, &brief, law, &reason)
            .unwrap();
        assert_eq!(result.feasibility, Feasibility::Adjustable);
        let adjusted = result.adjusted.unwrap();
        assert!(adjusted.cost_of("supplies") <= 5.0 + 1e-9);
        assert!(adjusted.cost_of("supplies") > 0.0);
    }

    #[test]
    fn test_out_of_range_becomes_approach() {
        let fx = fixture();
        let brief = brief_for(&fx);
        let action = ProposedAction::new(fx.profile.id, ActionKind::Attack, "storm the tower")
            .with_target(fx.far_tower);
        let (law, reason) = reject(&fx, &brief, &action);
        assert_eq!(law, LawCode::StateConsistency);

        let result = engine()
            .negotiate(&fx.world, &action, &fx.profile, &brief, law, &reason)
            .unwrap();
        assert_eq!(result.feasibility, Feasibility::Adjustable);
        let adjusted = result.adjusted.unwrap();
        assert_eq!(adjusted.kind, ActionKind::Move);
        assert_eq!(adjusted.destination, Some(Vec2::new(40.0, 0.0)));
    }

    #[test]
    fn test_unseen_target_infeasible() {
        let mut fx = fixture();
        let hidden = fx
            .world
            .register_entity(Entity::new("vault", "structure", Vec2::new(500.0, 0.0)))
            .unwrap();
        let brief = brief_for(&fx);
        let action = ProposedAction::new(fx.profile.id, ActionKind::Observe, "scout the vault")
            .with_target(hidden);
        let (law, reason) = reject(&fx, &brief, &action);
        assert_eq!(law, LawCode::InformationLimit);

        let result = engine()
            .negotiate(&fx.world, &action, &fx.profile, &brief, law, &reason)
            .unwrap();
        assert_eq!(result.feasibility, Feasibility::Infeasible);
        assert!(result.adjusted.is_none());
        assert!(!result.alternatives.is_empty());
    }

    #[test]
    fn test_unseen_cites_stripped() {
        let mut fx = fixture();
        let hidden = fx
            .world
            .register_entity(Entity::new("vault", "structure", Vec2::new(500.0, 0.0)))
            .unwrap();
        let brief = brief_for(&fx);
        let action = ProposedAction::new(fx.profile.id, ActionKind::Speak, "boast about riches")
            .citing(hidden)
            .citing(fx.gate);
        let (law, reason) = reject(&fx, &brief, &action);

        let result = engine()
            .negotiate(&fx.world, &action, &fx.profile, &brief, law, &reason)
            .unwrap();
        assert_eq!(result.feasibility, Feasibility::Adjustable);
        let adjusted = result.adjusted.unwrap();
        assert_eq!(adjusted.cites, vec![fx.gate]);
    }

    #[test]
    fn test_rule_violation_needs_human() {
        let mut fx = fixture();
        fx.world.add_rule(Rule::parse("no_bloodshed", "forbid attack").unwrap());
        let brief = brief_for(&fx);
        let action = ProposedAction::new(fx.profile.id, ActionKind::Attack, "strike")
            .with_target(fx.gate);
        let (law, reason) = reject(&fx, &brief, &action);
        assert_eq!(law, LawCode::RuleAdherence);

        let result = engine()
            .negotiate(&fx.world, &action, &fx.profile, &brief, law, &reason)
            .unwrap();
        assert_eq!(result.feasibility, Feasibility::NeedsHuman);
        assert!(result.adjusted.is_none());
    }

    #[test]
    fn test_canon_violation_needs_human() {
        let mut fx = fixture();
        fx.world
            .add_fact(
                Fact::new("the gate was sealed by decree", 0.95, "chronicle")
                    .about(fx.gate)
                    .with_claim(FactClaim::new(fx.gate, "status", "sealed")),
                crate::core::config::FactReferencePolicy::Warn,
            )
            .unwrap();
        let brief = brief_for(&fx);
        let action = ProposedAction::new(fx.profile.id, ActionKind::Speak, "the gate stands open")
            .with_claim(FactClaim::new(fx.gate, "status", "open"));
        let (law, reason) = reject(&fx, &brief, &action);

        let result = engine()
            .negotiate(&fx.world, &action, &fx.profile, &brief, law, &reason)
            .unwrap();
        assert_eq!(result.feasibility, Feasibility::NeedsHuman);
    }

    #[test]
    fn test_alternatives_capped_and_ranked() {
        let fx = fixture();
        let brief = brief_for(&fx);
        let action = ProposedAction::new(fx.profile.id, ActionKind::Interact, "bribe the guard")
            .with_target(fx.gate)
            .with_cost("supplies", 10.0);
        let (law, reason) = reject(&fx, &brief, &action);

        let result = engine()
            .negotiate(&fx.world, &action, &fx.profile, &brief, law, &reason)
            .unwrap();
        let config = EngineConfig::default();
        assert!(result.alternatives.len() <= config.max_alternatives);
        for pair in result.alternatives.windows(2) {
            assert!(pair[0].violations <= pair[1].violations);
        }
    }
}
