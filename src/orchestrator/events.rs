//! Events emitted while running a turn, for logs, UIs and tests

use crate::adjudicator::LawCode;
use crate::core::types::{AgentId, DecisionId, EventId, Turn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnEvent {
    BriefBuilt {
        agent: AgentId,
        degraded: bool,
    },
    /// The decision collaborator failed or timed out; the agent waits
    DecisionDefaulted {
        agent: AgentId,
    },
    ActionAccepted {
        agent: AgentId,
        /// `None` for a no-op wait, which leaves no causal record
        event: Option<EventId>,
        summary: String,
    },
    ActionRejected {
        agent: AgentId,
        law: LawCode,
        reason: String,
    },
    /// A rejected action was applied in adjusted form
    ActionAdjusted {
        agent: AgentId,
        event: Option<EventId>,
        summary: String,
        explanation: String,
    },
    PausedForDecision {
        agent: AgentId,
        decision: DecisionId,
    },
    DecisionResolved {
        agent: AgentId,
        insisted: bool,
    },
    /// The agent ended the turn without acting
    AgentSkipped {
        agent: AgentId,
        reason: String,
    },
    TurnCompleted {
        turn: Turn,
        accepted: usize,
        rejected: usize,
    },
}

/// Everything that happened in one call to `run_turn`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnReport {
    pub turn: Turn,
    pub events: Vec<TurnEvent>,
    /// The turn was cancelled partway; applied actions stay applied and the
    /// remaining agents were skipped
    pub cancelled: bool,
}

impl TurnReport {
    pub fn new(turn: Turn) -> Self {
        Self { turn, events: Vec::new(), cancelled: false }
    }

    pub fn accepted_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    TurnEvent::ActionAccepted { .. } | TurnEvent::ActionAdjusted { .. }
                )
            })
            .count()
    }

    pub fn rejected_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TurnEvent::ActionRejected { .. }))
            .count()
    }
}
