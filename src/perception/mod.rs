//! Perception pipeline: fog-of-war filtering, belief overlay, threat scan

pub mod belief;
pub mod fog;
pub mod threat;

pub use belief::{
    apply_with, BeliefModel, BeliefProfile, Bias, BiasKind, PerceivedFact, SubjectiveSlice,
};
pub use fog::{filter, VisibleSlice};
pub use threat::{assess, ThreatAssessment};
