//! Decision gateway: the pause/resume seam between the engine and a human
//!
//! When negotiation needs a human call (or an adjustment needs confirming),
//! the orchestrator opens a pending decision here and the turn pauses. The
//! gateway holds at most one open decision at a time; a resolution (an
//! explicit choice, a one-time insistence on the original action, or a
//! timeout falling back to the default option) moves it to Resuming, and
//! the orchestrator consumes the resolution to continue the turn.
//!
//! Deadlines are checked against an `Instant` passed by the caller, so the
//! machine is fully testable without sleeping.

use crate::actions::ProposedAction;
use crate::core::config::EngineConfig;
use crate::core::error::{EngineError, Result};
use crate::core::types::{AgentId, DecisionId, Turn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    /// No pending decision; turns flow freely
    Running,
    /// Paused on a rejection or infeasible action awaiting a human call
    PausedAwaitingDecision,
    /// Paused awaiting confirmation of an automatic adjustment
    PausedAwaitingConfirmation,
    /// Resolved but the orchestrator has not consumed the resolution yet
    Resuming,
}

/// One selectable option in a pending decision. `action: None` means
/// "skip the agent's turn".
#[derive(Debug, Clone)]
pub struct DecisionOption {
    pub label: String,
    pub action: Option<ProposedAction>,
}

/// What the orchestrator asks the human
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub agent: AgentId,
    pub prompt: String,
    /// The action that triggered the pause
    pub original: ProposedAction,
    pub options: Vec<DecisionOption>,
    /// Index into `options` applied if the deadline passes; None means a
    /// timeout expires the decision instead
    pub default_option: Option<usize>,
    /// Override for the configured human decision timeout
    pub timeout: Option<Duration>,
    /// Whether rejecting with insistence on the original action is offered.
    /// An insisted original gets exactly one more adjudication pass; if that
    /// also rejects, the agent sits out rather than looping.
    pub allow_insist: bool,
    /// True when this pause confirms an automatic adjustment rather than
    /// asking for a full decision
    pub confirm: bool,
}

#[derive(Debug)]
pub struct PendingDecision {
    pub id: DecisionId,
    pub request: DecisionRequest,
    pub opened_turn: Turn,
    pub deadline: Instant,
}

/// How a human answers a pending decision
#[derive(Debug, Clone)]
pub enum Choice {
    /// Pick one of the offered options by index
    Option(usize),
    /// Answer in free text; the original action is re-submitted with the
    /// text as its revised intent
    FreeText(String),
    /// Reject the proposed adjustment and re-submit the original action
    /// unchanged for one more adjudication pass
    Insist,
    /// Skip the agent's turn
    Skip,
}

/// What the orchestrator does once the decision resolves. Every resolved
/// action goes back through the adjudicator; for an insisted original a
/// second rejection is final and the agent sits out.
#[derive(Debug, Clone)]
pub enum Resolution {
    Action { action: ProposedAction, insisted: bool },
    /// The agent does nothing this turn
    Skip,
}

/// How a past decision ended, for the audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionKind {
    Chosen { index: usize },
    FreeText { text: String },
    Insisted,
    Skipped,
    TimedOutDefault { index: usize },
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: DecisionId,
    pub agent: AgentId,
    pub prompt: String,
    pub turn: Turn,
    pub kind: ResolutionKind,
}

pub struct DecisionGateway {
    config: EngineConfig,
    state: GatewayState,
    pending: Option<PendingDecision>,
    resolution: Option<Resolution>,
    history: Vec<DecisionRecord>,
    notify: Arc<Notify>,
}

impl DecisionGateway {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: GatewayState::Running,
            pending: None,
            resolution: None,
            history: Vec::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    pub fn pending(&self) -> Option<&PendingDecision> {
        self.pending.as_ref()
    }

    pub fn history(&self) -> &[DecisionRecord] {
        &self.history
    }

    /// Restore the audit trail from a snapshot
    pub fn restore_history(&mut self, history: Vec<DecisionRecord>) {
        self.history = history;
    }

    /// Wake-up handle for tasks waiting on a resolution
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Open a pending decision and pause. Fails with DecisionConflict if one
    /// is already open or unconsumed.
    pub fn open(&mut self, request: DecisionRequest, turn: Turn, now: Instant) -> Result<DecisionId> {
        if let Some(pending) = &self.pending {
            return Err(EngineError::DecisionConflict(pending.id));
        }
        if self.resolution.is_some() {
            return Err(EngineError::Validation(
                "previous resolution not yet consumed".to_string(),
            ));
        }
        if let Some(index) = request.default_option {
            if index >= request.options.len() {
                return Err(EngineError::Validation(format!(
                    "default option {} out of range ({} options)",
                    index,
                    request.options.len()
                )));
            }
        }

        let id = DecisionId::new();
        let timeout = request.timeout.unwrap_or(self.config.decision_timeout_human);
        self.state = if request.confirm {
            GatewayState::PausedAwaitingConfirmation
        } else {
            GatewayState::PausedAwaitingDecision
        };
        tracing::info!(
            decision = %id,
            agent = %request.agent,
            prompt = %request.prompt,
            "pausing for human decision"
        );
        self.pending = Some(PendingDecision {
            id,
            request,
            opened_turn: turn,
            deadline: now + timeout,
        });
        Ok(id)
    }

    /// Answer the open decision. Errors if none is open, the id is stale,
    /// or the choice is not available.
    pub fn submit(&mut self, id: DecisionId, choice: Choice) -> Result<()> {
        let pending = self
            .pending
            .as_ref()
            .ok_or(EngineError::DecisionNotFound(id))?;
        if pending.id != id {
            return Err(EngineError::DecisionNotFound(id));
        }

        let (resolution, kind) = match choice {
            Choice::Option(index) => {
                let option = pending.request.options.get(index).ok_or_else(|| {
                    EngineError::Validation(format!("no option {} on decision {}", index, id))
                })?;
                let resolution = match &option.action {
                    Some(action) => Resolution::Action {
                        action: action.clone(),
                        insisted: false,
                    },
                    None => Resolution::Skip,
                };
                (resolution, ResolutionKind::Chosen { index })
            }
            Choice::FreeText(text) => {
                let mut action = pending.request.original.clone();
                action.intent = text.clone();
                (
                    Resolution::Action { action, insisted: false },
                    ResolutionKind::FreeText { text },
                )
            }
            Choice::Insist => {
                if !pending.request.allow_insist {
                    return Err(EngineError::Validation(format!(
                        "insistence already spent on decision {}",
                        id
                    )));
                }
                (
                    Resolution::Action {
                        action: pending.request.original.clone(),
                        insisted: true,
                    },
                    ResolutionKind::Insisted,
                )
            }
            Choice::Skip => (Resolution::Skip, ResolutionKind::Skipped),
        };

        self.resolve(resolution, kind);
        Ok(())
    }

    /// Apply the timeout policy if the deadline has passed.
    ///
    /// With a default option configured the decision resolves to it and
    /// `Ok(true)` is returned. Without one the decision expires: it is
    /// recorded, the gateway returns to Running and DecisionExpired is
    /// returned for the orchestrator to surface.
    pub fn expire_if_due(&mut self, now: Instant) -> Result<bool> {
        let Some(pending) = &self.pending else {
            return Ok(false);
        };
        if now < pending.deadline {
            return Ok(false);
        }
        let id = pending.id;

        match pending.request.default_option {
            Some(index) => {
                let option = &pending.request.options[index];
                let resolution = match &option.action {
                    Some(action) => Resolution::Action {
                        action: action.clone(),
                        insisted: false,
                    },
                    None => Resolution::Skip,
                };
                tracing::warn!(decision = %id, default = index, "decision timed out, applying default");
                self.resolve(resolution, ResolutionKind::TimedOutDefault { index });
                Ok(true)
            }
            None => {
                tracing::warn!(decision = %id, "decision expired with no default");
                self.record(ResolutionKind::Expired);
                self.pending = None;
                self.state = GatewayState::Running;
                self.notify.notify_one();
                Err(EngineError::DecisionExpired(id))
            }
        }
    }

    /// Drop an open decision because the turn it belongs to was cancelled.
    /// Also discards a resolution the orchestrator never got to consume, so
    /// the next turn's `open` starts from a clean slate.
    pub fn cancel_pending(&mut self) {
        if self.pending.is_some() || self.resolution.is_some() {
            self.record(ResolutionKind::Cancelled);
            self.notify.notify_one();
        }
        self.pending = None;
        self.resolution = None;
        self.state = GatewayState::Running;
    }

    /// Consume the resolution and return to Running. The orchestrator calls
    /// this exactly once per resolved decision.
    pub fn take_resolution(&mut self) -> Option<Resolution> {
        let resolution = self.resolution.take()?;
        self.state = GatewayState::Running;
        Some(resolution)
    }

    fn resolve(&mut self, resolution: Resolution, kind: ResolutionKind) {
        self.record(kind);
        self.pending = None;
        self.resolution = Some(resolution);
        self.state = GatewayState::Resuming;
        self.notify.notify_one();
    }

    fn record(&mut self, kind: ResolutionKind) {
        if let Some(pending) = &self.pending {
            self.history.push(DecisionRecord {
                id: pending.id,
                agent: pending.request.agent,
                prompt: pending.request.prompt.clone(),
                turn: pending.opened_turn,
                kind,
            });
        }
    }
}
