//! The shared world ledger: entities, facts, relations and declarative rules

pub mod entity;
pub mod fact;
pub mod loader;
pub mod relation;
pub mod rule;
pub mod state;

pub use entity::{AttrValue, Entity};
pub use fact::{Channel, Fact, FactClaim};
pub use relation::{Relation, RelationKind};
pub use rule::{Rule, RuleExpr};
pub use state::{FactIntegrity, WorldState};
