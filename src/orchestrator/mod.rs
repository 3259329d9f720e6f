//! The turn orchestrator: one full turn of the simulation
//!
//! A turn runs in two phases. Phase A builds briefs and collects proposed
//! actions for every agent concurrently (bounded by `max_concurrency`)
//! against an immutable snapshot of the world. Phase B then adjudicates and
//! applies the proposals strictly serially, in agent registration order, so
//! the outcome of a turn is deterministic regardless of how phase A
//! interleaved.
//!
//! Rejections flow into negotiation; rule and canon rejections pause the
//! turn at the decision gateway until a human answers or the decision times
//! out. Cancellation is cooperative and checked between agents, so a
//! cancelled turn never leaves a half-applied action.

pub mod events;

pub use events::{TurnEvent, TurnReport};

use crate::actions::{ActionKind, ProposedAction};
use crate::adjudicator::{AdjudicationResult, Adjudicator, LawCode};
use crate::agents::{AgentProfile, AgentRoster};
use crate::brief::{TurnBrief, TurnBriefBuilder};
use crate::causal::CausalGraph;
use crate::collab::persistence::Snapshot;
use crate::collab::{retry_with_backoff, DecisionBackend};
use crate::core::config::EngineConfig;
use crate::core::error::{EngineError, Result};
use crate::core::types::{AgentId, EventId};
use crate::gateway::{DecisionGateway, DecisionOption, DecisionRequest, Resolution};
use crate::negotiation::{Feasibility, NegotiationEngine};
use crate::perception::belief::{BeliefModel, BeliefProfile};
use crate::world::state::WorldState;
use ahash::AHashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Cooperative cancellation handle. Clones observe the same signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender kept alive by this token; unreachable in practice
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// What phase A produced for one agent
struct PhaseOutcome {
    agent: AgentId,
    brief: TurnBrief,
    action: ProposedAction,
    /// The decision collaborator failed or timed out and a Wait placeholder
    /// was substituted
    decision_defaulted: bool,
}

pub struct TurnOrchestrator {
    world: WorldState,
    roster: Arc<AgentRoster>,
    beliefs: BeliefModel,
    briefs: Arc<TurnBriefBuilder>,
    backend: Arc<dyn DecisionBackend>,
    adjudicator: Adjudicator,
    negotiator: NegotiationEngine,
    gateway: Arc<Mutex<DecisionGateway>>,
    causal: CausalGraph,
    config: EngineConfig,
    histories: AHashMap<AgentId, VecDeque<String>>,
    cancel: CancelToken,
}

impl TurnOrchestrator {
    pub fn new(
        world: WorldState,
        roster: AgentRoster,
        beliefs: BeliefModel,
        briefs: TurnBriefBuilder,
        backend: Arc<dyn DecisionBackend>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate().map_err(EngineError::Validation)?;
        Ok(Self {
            world,
            roster: Arc::new(roster),
            beliefs,
            briefs: Arc::new(briefs),
            backend,
            adjudicator: Adjudicator::new(config.clone()),
            negotiator: NegotiationEngine::new(config.clone()),
            gateway: Arc::new(Mutex::new(DecisionGateway::new(config.clone()))),
            causal: CausalGraph::new(),
            config,
            histories: AHashMap::new(),
            cancel: CancelToken::new(),
        })
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn roster(&self) -> &AgentRoster {
        &self.roster
    }

    pub fn causal(&self) -> &CausalGraph {
        &self.causal
    }

    pub fn beliefs_mut(&mut self) -> &mut BeliefModel {
        &mut self.beliefs
    }

    /// Handle for the human side of the decision gateway
    pub fn gateway(&self) -> Arc<Mutex<DecisionGateway>> {
        Arc::clone(&self.gateway)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Downstream narrative impact of a recorded event under the configured
    /// decay
    pub fn impact_of(&self, event: EventId) -> f64 {
        self.causal.impact_of(event, &self.config.decay)
    }

    /// Turn-boundary snapshot of everything that must survive a restart
    pub fn snapshot(&self) -> Result<Snapshot> {
        let decisions = self.gateway_lock()?.history().to_vec();
        Ok(Snapshot::new(self.world.clone(), self.causal.clone(), decisions))
    }

    /// Restore from a snapshot taken at a turn boundary
    pub fn restore(&mut self, snapshot: Snapshot) -> Result<()> {
        let mut snapshot = snapshot;
        snapshot.world.rebuild_indexes();
        snapshot.causal.rebuild_indexes();
        self.world = snapshot.world;
        self.causal = snapshot.causal;
        self.gateway_lock()?.restore_history(snapshot.decisions);
        Ok(())
    }

    /// Run one complete turn: concurrent briefs and decisions, then serial
    /// adjudication and application, then the turn boundary.
    ///
    /// Cancellation is not a failure. A cancelled turn keeps whatever it
    /// already applied, skips the remaining agents and comes back with
    /// `report.cancelled` set.
    pub async fn run_turn(&mut self) -> Result<TurnReport> {
        let turn = self.world.turn();
        let mut report = TurnReport::new(turn);
        tracing::info!(turn, agents = self.roster.len(), "turn start");

        let outcomes = match self.decision_phase().await {
            Ok(outcomes) => outcomes,
            Err(EngineError::Cancelled) => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut pending = outcomes.into_iter();
        for outcome in pending.by_ref() {
            if self.cancel.is_cancelled() {
                self.skip_cancelled(outcome, &mut report);
                break;
            }
            match outcome {
                Ok(outcome) => {
                    let agent = outcome.agent;
                    match self.resolve_outcome(outcome, &mut report).await {
                        Ok(()) => {}
                        Err(EngineError::Cancelled) => {
                            report.events.push(TurnEvent::AgentSkipped {
                                agent,
                                reason: "turn cancelled".to_string(),
                            });
                            break;
                        }
                        Err(e) => {
                            // Fatal for this agent's action only; the rest
                            // of the turn proceeds
                            tracing::error!(agent = %agent, error = %e, "resolving action failed");
                            report.events.push(TurnEvent::AgentSkipped {
                                agent,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                Err((agent, e)) => {
                    tracing::warn!(agent = %agent, error = %e, "agent skipped this turn");
                    report.events.push(TurnEvent::AgentSkipped {
                        agent,
                        reason: e.to_string(),
                    });
                }
            }
        }
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            self.gateway_lock()?.cancel_pending();
            for outcome in pending {
                self.skip_cancelled(outcome, &mut report);
            }
            tracing::warn!(turn, "turn cancelled, already-applied actions stay applied");
        }

        self.world.advance_turn();
        for issue in self.world.verify_integrity() {
            tracing::error!(%issue, "world integrity issue after turn");
        }
        let (accepted, rejected) = (report.accepted_count(), report.rejected_count());
        tracing::info!(turn, accepted, rejected, "turn complete");
        report.events.push(TurnEvent::TurnCompleted { turn, accepted, rejected });
        Ok(report)
    }

    /// Run up to `turns` turns, stopping early on cancellation.
    pub async fn run_turns(&mut self, turns: u64) -> Result<Vec<TurnReport>> {
        let mut reports = Vec::with_capacity(turns as usize);
        for _ in 0..turns {
            let report = self.run_turn().await?;
            let cancelled = report.cancelled;
            reports.push(report);
            if cancelled {
                break;
            }
        }
        Ok(reports)
    }

    fn skip_cancelled(
        &self,
        outcome: std::result::Result<PhaseOutcome, (AgentId, EngineError)>,
        report: &mut TurnReport,
    ) {
        let agent = match outcome {
            Ok(outcome) => outcome.agent,
            Err((agent, _)) => agent,
        };
        report.events.push(TurnEvent::AgentSkipped {
            agent,
            reason: "turn cancelled".to_string(),
        });
    }

    /// Phase A: build every agent's brief and collect its proposed action,
    /// concurrently against an immutable world snapshot. Results come back
    /// in registration order whatever the completion order was.
    async fn decision_phase(
        &self,
    ) -> Result<Vec<std::result::Result<PhaseOutcome, (AgentId, EngineError)>>> {
        let snapshot = Arc::new(self.world.clone());
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut join_set = JoinSet::new();

        for (index, profile) in self.roster.iter().enumerate() {
            let agent = profile.id;
            let world = Arc::clone(&snapshot);
            let roster = Arc::clone(&self.roster);
            let briefs = Arc::clone(&self.briefs);
            let backend = Arc::clone(&self.backend);
            let semaphore = Arc::clone(&semaphore);
            let config = self.config.clone();
            let beliefs = self
                .beliefs
                .profile(agent)
                .cloned()
                .unwrap_or_else(BeliefProfile::neutral);
            let recent: Vec<String> = self
                .histories
                .get(&agent)
                .map(|h| h.iter().cloned().collect())
                .unwrap_or_default();
            let profile = profile.clone();
            let cancel = self.cancel.clone();

            join_set.spawn(async move {
                let result = agent_task(
                    world, roster, briefs, backend, semaphore, config, beliefs, recent, profile,
                    cancel,
                )
                .await;
                (index, agent, result)
            });
        }

        let mut slots: Vec<Option<std::result::Result<PhaseOutcome, (AgentId, EngineError)>>> =
            (0..self.roster.len()).map(|_| None).collect();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    join_set.abort_all();
                    return Err(EngineError::Cancelled);
                }
                joined = join_set.join_next() => {
                    let Some(joined) = joined else { break };
                    let (index, agent, result) = joined.map_err(|e| {
                        EngineError::Validation(format!("agent task failed: {}", e))
                    })?;
                    slots[index] = Some(match result {
                        Ok(outcome) => Ok(outcome),
                        Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                        Err(e) => Err((agent, e)),
                    });
                }
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| EngineError::Validation("agent task vanished".to_string()))
            })
            .collect()
    }

    /// Phase B for one agent: adjudicate the proposal and apply, negotiate
    /// or pause as the verdict dictates.
    async fn resolve_outcome(
        &mut self,
        outcome: PhaseOutcome,
        report: &mut TurnReport,
    ) -> Result<()> {
        let PhaseOutcome { agent, brief, action, decision_defaulted } = outcome;
        report.events.push(TurnEvent::BriefBuilt { agent, degraded: brief.degraded });
        if decision_defaulted {
            report.events.push(TurnEvent::DecisionDefaulted { agent });
        }

        if let Err(e) = self.validate_action(agent, &action) {
            tracing::warn!(agent = %agent, error = %e, "proposal failed validation");
            report.events.push(TurnEvent::AgentSkipped { agent, reason: e.to_string() });
            return Ok(());
        }

        let profile = self.roster.get(agent)?.clone();
        let verdict = self.adjudicator.adjudicate(&self.world, &action, &profile, &brief)?;
        match verdict {
            AdjudicationResult::Accepted { delta } => {
                let event = self.apply_action(&action, &delta)?;
                report.events.push(TurnEvent::ActionAccepted {
                    agent,
                    event,
                    summary: action.summary(),
                });
            }
            AdjudicationResult::Rejected { law, reason } => {
                report.events.push(TurnEvent::ActionRejected {
                    agent,
                    law,
                    reason: reason.clone(),
                });
                self.negotiate_rejection(agent, &profile, &brief, action, law, reason, report)
                    .await?;
            }
        }
        Ok(())
    }

    /// Reference checks that gate adjudication. Malformed proposals and ids
    /// unknown to the world never reach the laws.
    fn validate_action(&self, agent: AgentId, action: &ProposedAction) -> Result<()> {
        if action.agent != agent {
            return Err(EngineError::Validation(format!(
                "action proposed by {} arrived on {}'s slot",
                action.agent, agent
            )));
        }
        if let Some(target) = action.target {
            if !self.world.contains_entity(target) {
                return Err(EngineError::EntityNotFound(target));
            }
        }
        for &cite in &action.cites {
            if !self.world.contains_entity(cite) {
                return Err(EngineError::EntityNotFound(cite));
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn negotiate_rejection(
        &mut self,
        agent: AgentId,
        profile: &AgentProfile,
        brief: &TurnBrief,
        action: ProposedAction,
        law: LawCode,
        reason: String,
        report: &mut TurnReport,
    ) -> Result<()> {
        let negotiation =
            self.negotiator
                .negotiate(&self.world, &action, profile, brief, law, &reason)?;

        match negotiation.feasibility {
            Feasibility::Adjustable => {
                let Some(adjusted) = negotiation.adjusted else {
                    report.events.push(TurnEvent::AgentSkipped {
                        agent,
                        reason: negotiation.explanation,
                    });
                    return Ok(());
                };
                if self.config.confirm_adjustments {
                    let options = vec![
                        DecisionOption {
                            label: format!("apply adjustment: {}", adjusted.summary()),
                            action: Some(adjusted),
                        },
                        DecisionOption { label: "skip the turn".to_string(), action: None },
                    ];
                    let request = DecisionRequest {
                        agent,
                        prompt: negotiation.explanation,
                        original: action,
                        options,
                        default_option: Some(0),
                        timeout: None,
                        allow_insist: true,
                        confirm: true,
                    };
                    self.pause_for_human(agent, profile, brief, request, report).await
                } else {
                    match self.adjudicator.adjudicate(&self.world, &adjusted, profile, brief)? {
                        AdjudicationResult::Accepted { delta } => {
                            let event = self.apply_action(&adjusted, &delta)?;
                            report.events.push(TurnEvent::ActionAdjusted {
                                agent,
                                event,
                                summary: adjusted.summary(),
                                explanation: negotiation.explanation,
                            });
                        }
                        AdjudicationResult::Rejected { reason, .. } => {
                            report.events.push(TurnEvent::AgentSkipped { agent, reason });
                        }
                    }
                    Ok(())
                }
            }
            Feasibility::NeedsHuman | Feasibility::Infeasible => {
                let mut options: Vec<DecisionOption> = negotiation
                    .alternatives
                    .iter()
                    .map(|alt| DecisionOption {
                        label: alt.rationale.clone(),
                        action: Some(alt.action.clone()),
                    })
                    .collect();
                options.push(DecisionOption { label: "skip the turn".to_string(), action: None });
                let default_option = Some(options.len() - 1);
                // A full decision pause takes an option pick, free text or a
                // skip; insistence belongs to the confirmation flow
                let request = DecisionRequest {
                    agent,
                    prompt: negotiation.explanation,
                    original: action,
                    options,
                    default_option,
                    timeout: None,
                    allow_insist: false,
                    confirm: false,
                };
                self.pause_for_human(agent, profile, brief, request, report).await
            }
        }
    }

    /// Open a gateway decision and block the turn until it resolves
    async fn pause_for_human(
        &mut self,
        agent: AgentId,
        profile: &AgentProfile,
        brief: &TurnBrief,
        request: DecisionRequest,
        report: &mut TurnReport,
    ) -> Result<()> {
        let turn = self.world.turn();
        let decision = self.gateway_lock()?.open(request, turn, Instant::now())?;
        report.events.push(TurnEvent::PausedForDecision { agent, decision });

        match self.await_resolution().await {
            Ok(Resolution::Skip) => {
                report.events.push(TurnEvent::DecisionResolved { agent, insisted: false });
                report.events.push(TurnEvent::AgentSkipped {
                    agent,
                    reason: "turn skipped by decision".to_string(),
                });
                Ok(())
            }
            Ok(Resolution::Action { action, insisted }) => {
                report.events.push(TurnEvent::DecisionResolved { agent, insisted });
                // One adjudication pass for whatever the human settled on.
                // An insisted original gets this single retry and no second
                // negotiation round; a repeat rejection is final.
                match self.adjudicator.adjudicate(&self.world, &action, profile, brief)? {
                    AdjudicationResult::Accepted { delta } => {
                        let event = self.apply_action(&action, &delta)?;
                        report.events.push(TurnEvent::ActionAccepted {
                            agent,
                            event,
                            summary: action.summary(),
                        });
                    }
                    AdjudicationResult::Rejected { reason, .. } => {
                        report.events.push(TurnEvent::AgentSkipped { agent, reason });
                    }
                }
                Ok(())
            }
            Err(EngineError::DecisionExpired(id)) => {
                tracing::warn!(agent = %agent, decision = %id, "decision expired, agent sits out");
                report.events.push(TurnEvent::AgentSkipped {
                    agent,
                    reason: format!("decision {} expired unanswered", id),
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Wait for the open decision to resolve, applying the timeout policy
    /// when its deadline passes.
    async fn await_resolution(&self) -> Result<Resolution> {
        loop {
            let (deadline, notify) = {
                let mut gw = self.gateway_lock()?;
                if let Some(resolution) = gw.take_resolution() {
                    return Ok(resolution);
                }
                let Some(pending) = gw.pending() else {
                    return Err(EngineError::Validation(
                        "no pending decision to wait on".to_string(),
                    ));
                };
                (pending.deadline, gw.notifier())
            };

            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    self.gateway_lock()?.expire_if_due(Instant::now())?;
                }
                _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
            }
        }
    }

    /// Apply an accepted action: delta through the world's single writer
    /// path, causal event and declared cause edges, history entry. A no-op
    /// wait changes nothing and records no causal event.
    fn apply_action(
        &mut self,
        action: &ProposedAction,
        delta: &crate::actions::StateDelta,
    ) -> Result<Option<EventId>> {
        self.world.apply_delta(delta, self.config.fact_reference_policy)?;
        let turn = self.world.turn();
        let event = if action.kind == ActionKind::Wait && delta.is_empty() {
            None
        } else {
            let event = self.causal.record_event(action.summary(), turn);
            for &cause in &action.caused_by {
                let cause_turn = self.causal.event(cause).map(|c| c.turn);
                match cause_turn {
                    Some(cause_turn) => {
                        self.causal.add_relationship(
                            cause,
                            event,
                            self.config.default_edge_strength,
                            turn.saturating_sub(cause_turn),
                            Vec::new(),
                        )?;
                    }
                    None => {
                        tracing::warn!(cause = %cause, "action names an unrecorded causal event");
                    }
                }
            }
            Some(event)
        };

        let history = self.histories.entry(action.agent).or_default();
        history.push_back(action.summary());
        while history.len() > self.config.history_window {
            history.pop_front();
        }
        Ok(event)
    }

    fn gateway_lock(&self) -> Result<MutexGuard<'_, DecisionGateway>> {
        self.gateway
            .lock()
            .map_err(|_| EngineError::Validation("decision gateway lock poisoned".to_string()))
    }
}

/// The spawned worker for one agent in phase A
#[allow(clippy::too_many_arguments)]
async fn agent_task(
    world: Arc<WorldState>,
    roster: Arc<AgentRoster>,
    briefs: Arc<TurnBriefBuilder>,
    backend: Arc<dyn DecisionBackend>,
    semaphore: Arc<Semaphore>,
    config: EngineConfig,
    beliefs: BeliefProfile,
    recent: Vec<String>,
    profile: AgentProfile,
    cancel: CancelToken,
) -> Result<PhaseOutcome> {
    let _permit = semaphore
        .acquire()
        .await
        .map_err(|_| EngineError::Cancelled)?;
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let agent = profile.id;
    let brief = briefs.build(&world, &roster, &beliefs, agent, recent).await?;

    let decide = retry_with_backoff(
        config.dependency_retries,
        config.retry_backoff,
        "decision_backend",
        || {
            let backend = Arc::clone(&backend);
            let brief = brief.clone();
            let profile = profile.clone();
            async move { backend.decide(&brief, &profile).await }
        },
    );
    let (action, decision_defaulted) = match tokio::time::timeout(config.decision_timeout, decide)
        .await
    {
        Ok(Ok(action)) => (action, false),
        Ok(Err(e)) => {
            tracing::warn!(agent = %profile.name, error = %e, "decision backend failed, agent waits");
            (ProposedAction::wait(agent), true)
        }
        Err(_) => {
            tracing::warn!(agent = %profile.name, "decision backend timed out, agent waits");
            (ProposedAction::wait(agent), true)
        }
    };

    Ok(PhaseOutcome { agent, brief, action, decision_defaulted })
}
