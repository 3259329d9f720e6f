//! Facts: the narrative ledger of things held true about the world

use crate::core::types::{EntityId, FactId, Turn};
use serde::{Deserialize, Serialize};

/// Structured form of what a fact (or an action) asserts about an entity.
///
/// The canon-preservation law compares claims rather than prose: two claims
/// about the same subject and predicate with different values contradict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactClaim {
    pub subject: EntityId,
    pub predicate: String,
    pub value: String,
}

impl FactClaim {
    pub fn new(subject: EntityId, predicate: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            value: value.into(),
        }
    }

    /// True when the other claim asserts a different value for the same
    /// subject and predicate
    pub fn contradicts(&self, other: &FactClaim) -> bool {
        self.subject == other.subject
            && self.predicate == other.predicate
            && self.value != other.value
    }
}

/// Perception channel a fact travels on. Profiles only receive facts on
/// channels they carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Sight,
    Hearing,
    Rumor,
}

/// One entry in the world's fact ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub text: String,
    /// Confidence in [0, 1]; facts at or above the canon threshold bind
    /// future actions
    pub confidence: f32,
    pub source: String,
    /// Turn after which the fact is pruned; None means it never expires
    pub expires_turn: Option<Turn>,
    /// Entities this fact is about. May legitimately be empty for
    /// world-scoped facts, subject to the configured reference policy.
    pub subjects: Vec<EntityId>,
    /// Structured claim, when the fact asserts something checkable
    pub claim: Option<FactClaim>,
    /// Channel the fact is perceivable on; None means every channel
    pub channel: Option<Channel>,
}

impl Fact {
    pub fn new(text: impl Into<String>, confidence: f32, source: impl Into<String>) -> Self {
        Self {
            id: FactId::new(),
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
            expires_turn: None,
            subjects: Vec::new(),
            claim: None,
            channel: None,
        }
    }

    pub fn about(mut self, subject: EntityId) -> Self {
        self.subjects.push(subject);
        self
    }

    pub fn with_claim(mut self, claim: FactClaim) -> Self {
        if !self.subjects.contains(&claim.subject) {
            self.subjects.push(claim.subject);
        }
        self.claim = Some(claim);
        self
    }

    pub fn expiring(mut self, turn: Turn) -> Self {
        self.expires_turn = Some(turn);
        self
    }

    pub fn on_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn is_expired(&self, turn: Turn) -> bool {
        self.expires_turn.map(|t| turn > t).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped() {
        let f = Fact::new("the gate is sealed", 1.7, "chronicler");
        assert_eq!(f.confidence, 1.0);
        let f = Fact::new("the gate is sealed", -0.2, "chronicler");
        assert_eq!(f.confidence, 0.0);
    }

    #[test]
    fn test_claim_contradiction() {
        let subject = EntityId::new();
        let a = FactClaim::new(subject, "allegiance", "north");
        let b = FactClaim::new(subject, "allegiance", "south");
        let c = FactClaim::new(subject, "allegiance", "north");
        assert!(a.contradicts(&b));
        assert!(!a.contradicts(&c));
        assert!(!a.contradicts(&FactClaim::new(EntityId::new(), "allegiance", "south")));
    }

    #[test]
    fn test_with_claim_registers_subject() {
        let subject = EntityId::new();
        let f = Fact::new("brynn serves the north", 0.95, "chronicler")
            .with_claim(FactClaim::new(subject, "allegiance", "north"));
        assert_eq!(f.subjects, vec![subject]);
    }

    #[test]
    fn test_expiry() {
        let f = Fact::new("storm over the pass", 0.8, "scout").expiring(3);
        assert!(!f.is_expired(3));
        assert!(f.is_expired(4));
        let forever = Fact::new("the pass exists", 1.0, "map");
        assert!(!forever.is_expired(u64::MAX));
    }
}
