//! Engine configuration with documented constants
//!
//! All tunables are collected here with explanations of their purpose
//! and how they interact with each other.

use std::time::Duration;

/// Policy for facts whose subject list mentions no known entity.
///
/// Ingestion paths that should degrade rather than fail use `Warn`;
/// everything write-critical uses `Reject`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactReferencePolicy {
    /// Accept the fact but emit an integrity warning
    Warn,
    /// Reject the fact with a validation error
    Reject,
}

/// Decay applied to causal impact contributions per hop of graph distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecayStrategy {
    /// Each hop multiplies the contribution by `factor`
    Geometric { factor: f64 },
    /// Each hop subtracts `step`, floored at zero
    Linear { step: f64 },
}

impl DecayStrategy {
    /// Weight for a contribution at `depth` hops from the root (depth >= 1)
    pub fn weight(&self, depth: usize) -> f64 {
        match self {
            DecayStrategy::Geometric { factor } => factor.powi(depth as i32 - 1),
            DecayStrategy::Linear { step } => (1.0 - step * (depth as f64 - 1.0)).max(0.0),
        }
    }
}

/// Configuration for the turn pipeline
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // === PERCEPTION ===
    /// Fallback perception radius (world units) for agent profiles that do
    /// not set their own. Visible entities never exceed this radius.
    pub default_perception_range: f32,

    /// Maximum distance at which Interact/Attack/Transfer actions are
    /// considered in range by the state-consistency law.
    pub interaction_range: f32,

    /// Distance a Move action covers in one turn. Out-of-range targets take
    /// multiple turns to close with, which is what makes approach-instead
    /// negotiation adjustments meaningful.
    pub move_speed: f32,

    // === ADJUDICATION ===
    /// Facts at or above this confidence are canon. Actions whose claims
    /// contradict a canon fact fail the canon-preservation law.
    ///
    /// At the default (0.9), ordinary rumors (typically 0.3-0.7) never block
    /// an action; only established story beats do.
    pub canon_threshold: f32,

    /// What to do with a fact referencing no known entity (see §data model)
    pub fact_reference_policy: FactReferencePolicy,

    // === NEGOTIATION ===
    /// Upper bound on alternative options proposed for an adjustable action.
    pub max_alternatives: usize,

    // === CAUSALITY ===
    /// Impact scoring decay. Geometric 0.5 halves each hop, so a chain three
    /// hops long still registers but direct consequences dominate.
    pub decay: DecayStrategy,

    /// Strength assigned to auto-recorded edges when an accepted action
    /// cites prior events as causes without giving an explicit strength.
    pub default_edge_strength: f32,

    // === CONCURRENCY & TIMEOUTS ===
    /// Cap on concurrently running per-agent brief/decision tasks.
    /// Phase B (adjudicate + apply) is always serial regardless.
    pub max_concurrency: usize,

    /// Budget for one decision-backend call. On expiry the agent takes a
    /// Wait placeholder action instead of failing the turn.
    pub decision_timeout: Duration,

    /// Budget for one doctrine-retrieval call. On expiry the brief is
    /// marked degraded with empty doctrine; retrieval is the slowest, least
    /// reliable dependency in the pipeline and must not block the turn.
    pub retrieval_timeout: Duration,

    /// Snippets requested from the retrieval collaborator per brief.
    pub retrieval_top_k: usize,

    /// Attempts for dependency calls (retrieval, decision). Adjudication
    /// failures and integrity errors are never retried.
    pub dependency_retries: u32,

    /// Initial backoff between dependency retries; doubles per attempt.
    pub retry_backoff: Duration,

    // === GATEWAY ===
    /// Default lifetime of a pending decision before its default option is
    /// applied (or, with no default, the turn fails recoverably).
    pub decision_timeout_human: Duration,

    /// When true, Adjustable negotiation results pause for human
    /// confirmation; when false the best adjustment is re-adjudicated and
    /// applied automatically.
    pub confirm_adjustments: bool,

    // === BRIEFS ===
    /// How many of the agent's most recent action summaries ride along in
    /// its turn brief.
    pub history_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_perception_range: 50.0,
            interaction_range: 10.0,
            move_speed: 15.0,

            canon_threshold: 0.9,
            fact_reference_policy: FactReferencePolicy::Warn,

            max_alternatives: 3,

            decay: DecayStrategy::Geometric { factor: 0.5 },
            default_edge_strength: 0.7,

            max_concurrency: 8,
            decision_timeout: Duration::from_secs(30),
            retrieval_timeout: Duration::from_secs(5),
            retrieval_top_k: 4,
            dependency_retries: 2,
            retry_backoff: Duration::from_millis(250),

            decision_timeout_human: Duration::from_secs(120),
            confirm_adjustments: false,

            history_window: 5,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.interaction_range > self.default_perception_range {
            return Err(format!(
                "interaction_range ({}) should be <= default_perception_range ({})",
                self.interaction_range, self.default_perception_range
            ));
        }

        if !(0.0..=1.0).contains(&self.canon_threshold) {
            return Err(format!(
                "canon_threshold ({}) must be within 0..=1",
                self.canon_threshold
            ));
        }

        if self.max_concurrency == 0 {
            return Err("max_concurrency must be at least 1".into());
        }

        if let DecayStrategy::Geometric { factor } = self.decay {
            if !(0.0..=1.0).contains(&factor) {
                return Err(format!("geometric decay factor ({}) must be within 0..=1", factor));
            }
        }

        if self.decision_timeout.is_zero() || self.retrieval_timeout.is_zero() {
            return Err("dependency timeouts must be positive".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_interaction_beyond_perception() {
        let mut cfg = EngineConfig::default();
        cfg.interaction_range = cfg.default_perception_range + 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let mut cfg = EngineConfig::default();
        cfg.max_concurrency = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_geometric_decay_weights() {
        let decay = DecayStrategy::Geometric { factor: 0.5 };
        assert!((decay.weight(1) - 1.0).abs() < 1e-9);
        assert!((decay.weight(2) - 0.5).abs() < 1e-9);
        assert!((decay.weight(3) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_linear_decay_floors_at_zero() {
        let decay = DecayStrategy::Linear { step: 0.4 };
        assert!((decay.weight(1) - 1.0).abs() < 1e-9);
        assert!((decay.weight(2) - 0.6).abs() < 1e-9);
        assert_eq!(decay.weight(10), 0.0);
    }
}
