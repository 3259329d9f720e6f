//! Directed relations between entities

use crate::core::types::EntityId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    Ally,
    Hostile,
    /// Both sides draw on the same scarce resource
    CompetesFor,
    Owns,
    Knows,
    LocatedIn,
}

/// Directed src -> dst relation. Both endpoints must exist in the world;
/// a dangling relation is a corruption signal, not a soft warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub src: EntityId,
    pub dst: EntityId,
    pub kind: RelationKind,
}

impl Relation {
    pub fn new(src: EntityId, dst: EntityId, kind: RelationKind) -> Self {
        Self { src, dst, kind }
    }
}
