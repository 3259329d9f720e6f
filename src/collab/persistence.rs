//! Turn-boundary snapshots
//!
//! A snapshot captures the world ledger, the causal graph and the decision
//! audit trail as JSON. Snapshots are only taken and restored at turn
//! boundaries; mid-turn state (briefs, pending decisions) is ephemeral by
//! design and never persisted.

use crate::causal::CausalGraph;
use crate::core::error::{EngineError, Result};
use crate::gateway::DecisionRecord;
use crate::world::state::WorldState;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bumped when the snapshot layout changes incompatibly
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub world: WorldState,
    pub causal: CausalGraph,
    pub decisions: Vec<DecisionRecord>,
}

impl Snapshot {
    pub fn new(world: WorldState, causal: CausalGraph, decisions: Vec<DecisionRecord>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            world,
            causal,
            decisions,
        }
    }
}

pub fn save_snapshot(path: impl AsRef<Path>, snapshot: &Snapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path.as_ref(), json)?;
    tracing::info!(path = %path.as_ref().display(), turn = snapshot.world.turn(), "snapshot saved");
    Ok(())
}

/// Load a snapshot and rebuild the derived indexes serde skips
pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Snapshot> {
    let json = std::fs::read_to_string(path.as_ref())?;
    let mut snapshot: Snapshot = serde_json::from_str(&json)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(EngineError::Validation(format!(
            "snapshot version {} is not supported (expected {})",
            snapshot.version, SNAPSHOT_VERSION
        )));
    }
    snapshot.world.rebuild_indexes();
    snapshot.causal.rebuild_indexes();
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FactReferencePolicy;
    use crate::core::types::Vec2;
    use crate::world::entity::{AttrValue, Entity};
    use crate::world::fact::Fact;

    fn sample_snapshot() -> (Snapshot, crate::core::types::EntityId) {
        let mut world = WorldState::new();
        let id = world
            .register_entity(
                Entity::new("brynn", "character", Vec2::new(1.0, 2.0))
                    .with_attr("supplies", AttrValue::Num(7.0)),
            )
            .unwrap();
        world
            .add_fact(
                Fact::new("the pass is open", 0.9, "scout").about(id),
                FactReferencePolicy::Warn,
            )
            .unwrap();

        let mut causal = CausalGraph::new();
        let a = causal.record_event("crossed the pass", 0);
        let b = causal.record_event("met the patrol", 1);
        causal.add_relationship(a, b, 0.6, 1, vec![]).unwrap();

        (Snapshot::new(world, causal, Vec::new()), id)
    }

    #[test]
    fn test_roundtrip_restores_indexes() {
        let dir = std::env::temp_dir().join(format!("storyloom-snap-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("snapshot.json");

        let (snapshot, id) = sample_snapshot();
        save_snapshot(&path, &snapshot).unwrap();
        let restored = load_snapshot(&path).unwrap();

        assert_eq!(restored.version, SNAPSHOT_VERSION);
        // Indexes must already be rebuilt: lookups work immediately
        assert_eq!(restored.world.entity(id).unwrap().name, "brynn");
        assert_eq!(restored.world.facts().count(), 1);
        assert_eq!(restored.causal.edge_count(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = std::env::temp_dir().join(format!("storyloom-snapver-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("snapshot.json");

        let (mut snapshot, _) = sample_snapshot();
        snapshot.version = 99;
        save_snapshot(&path, &snapshot).unwrap();
        let err = load_snapshot(&path);
        assert!(matches!(err, Err(EngineError::Validation(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_snapshot("/nonexistent/storyloom/snapshot.json");
        assert!(matches!(err, Err(EngineError::IoError(_))));
    }
}
