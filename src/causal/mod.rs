//! Causal graph: cause -> effect edges between accepted actions
//!
//! Append-only within a simulation run and owned exclusively by the
//! orchestrator. Edges are appended in the order actions are accepted, so
//! causal ancestry never references a not-yet-applied effect.

use crate::core::config::DecayStrategy;
use crate::core::error::{EngineError, Result};
use crate::core::types::{EventId, Turn};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Traversal guard: narrative chains deeper than this contribute nothing
/// measurable under any configured decay
const MAX_TRAVERSAL_DEPTH: usize = 32;

/// One accepted action (or external happening) in the causal record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalEvent {
    pub id: EventId,
    pub label: String,
    pub turn: Turn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalEdge {
    pub cause: EventId,
    pub effect: EventId,
    /// 0-1 causal strength
    pub strength: f32,
    /// Turns between cause and visible effect
    pub delay_turns: u64,
    /// Conditions under which the link holds, kept for narrative tooling
    pub conditions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CausalGraph {
    events: Vec<CausalEvent>,
    edges: Vec<CausalEdge>,
    #[serde(skip)]
    event_index: AHashMap<EventId, usize>,
    #[serde(skip)]
    forward: AHashMap<EventId, Vec<usize>>,
}

impl CausalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event node. Events with no recorded causes are valid
    /// root causes.
    pub fn record_event(&mut self, label: impl Into<String>, turn: Turn) -> EventId {
        let id = EventId::new();
        self.event_index.insert(id, self.events.len());
        self.events.push(CausalEvent {
            id,
            label: label.into(),
            turn,
        });
        id
    }

    pub fn contains(&self, event: EventId) -> bool {
        self.event_index.contains_key(&event)
    }

    pub fn event(&self, id: EventId) -> Option<&CausalEvent> {
        self.event_index.get(&id).map(|&i| &self.events[i])
    }

    /// Append one cause -> effect edge. Self-loops are rejected, as are
    /// edges naming events the graph has never recorded.
    pub fn add_relationship(
        &mut self,
        cause: EventId,
        effect: EventId,
        strength: f32,
        delay_turns: u64,
        conditions: Vec<String>,
    ) -> Result<()> {
        if cause == effect {
            return Err(EngineError::SelfLoopEdge(cause));
        }
        for event in [cause, effect] {
            if !self.contains(event) {
                return Err(EngineError::IntegrityViolation(format!(
                    "causal edge references unrecorded event {}",
                    event
                )));
            }
        }
        let idx = self.edges.len();
        self.edges.push(CausalEdge {
            cause,
            effect,
            strength: strength.clamp(0.0, 1.0),
            delay_turns,
            conditions,
        });
        self.forward.entry(cause).or_default().push(idx);
        Ok(())
    }

    /// Downstream narrative impact of one event: forward-traverse its
    /// consequences, summing path strength decayed by graph distance.
    ///
    /// The decay strategy is a tunable, not an invariant; callers pass the
    /// configured one. Cycle-safe via a per-path visited set, so graphs
    /// that look cyclic cannot hang the traversal.
    pub fn impact_of(&self, event: EventId, decay: &DecayStrategy) -> f64 {
        let mut visited = vec![event];
        self.impact_walk(event, 1.0, 1, decay, &mut visited)
    }

    fn impact_walk(
        &self,
        from: EventId,
        path_strength: f64,
        depth: usize,
        decay: &DecayStrategy,
        visited: &mut Vec<EventId>,
    ) -> f64 {
        if depth > MAX_TRAVERSAL_DEPTH {
            return 0.0;
        }
        let Some(edge_indices) = self.forward.get(&from) else {
            return 0.0;
        };
        let mut total = 0.0;
        for &idx in edge_indices {
            let edge = &self.edges[idx];
            if visited.contains(&edge.effect) {
                continue;
            }
            let contribution = path_strength * edge.strength as f64;
            total += contribution * decay.weight(depth);

            visited.push(edge.effect);
            total += self.impact_walk(edge.effect, contribution, depth + 1, decay, visited);
            visited.pop();
        }
        total
    }

    pub fn events(&self) -> impl Iterator<Item = &CausalEvent> {
        self.events.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = &CausalEdge> {
        self.edges.iter()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Rebuild derived indexes after deserializing a snapshot
    pub fn rebuild_indexes(&mut self) {
        self.event_index = self
            .events
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id, i))
            .collect();
        self.forward.clear();
        for (idx, edge) in self.edges.iter().enumerate() {
            self.forward.entry(edge.cause).or_default().push(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometric() -> DecayStrategy {
        DecayStrategy::Geometric { factor: 0.5 }
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut graph = CausalGraph::new();
        let a = graph.record_event("a", 0);
        let err = graph.add_relationship(a, a, 0.5, 0, vec![]);
        assert!(matches!(err, Err(EngineError::SelfLoopEdge(_))));
    }

    #[test]
    fn test_unrecorded_event_rejected() {
        let mut graph = CausalGraph::new();
        let a = graph.record_event("a", 0);
        let err = graph.add_relationship(a, EventId::new(), 0.5, 0, vec![]);
        assert!(matches!(err, Err(EngineError::IntegrityViolation(_))));
    }

    #[test]
    fn test_root_event_zero_impact() {
        let mut graph = CausalGraph::new();
        let a = graph.record_event("a", 0);
        assert_eq!(graph.impact_of(a, &geometric()), 0.0);
    }

    #[test]
    fn test_chain_impact_decays_through_hops() {
        let mut graph = CausalGraph::new();
        let a1 = graph.record_event("a1", 0);
        let a2 = graph.record_event("a2", 2);
        let a3 = graph.record_event("a3", 3);
        graph.add_relationship(a1, a2, 0.8, 2, vec![]).unwrap();
        graph.add_relationship(a2, a3, 0.5, 1, vec![]).unwrap();

        let decay = geometric();
        // direct hop: 0.8; second hop: (0.8 * 0.5) * 0.5. Edge strengths
        // are f32, so compare at f32 precision.
        let expected = 0.8 + 0.8 * 0.5 * 0.5;
        assert!((graph.impact_of(a1, &decay) - expected).abs() < 1e-6);
        assert!(graph.impact_of(a1, &decay) > graph.impact_of(a3, &decay));
    }

    #[test]
    fn test_diamond_counts_both_paths() {
        let mut graph = CausalGraph::new();
        let root = graph.record_event("root", 0);
        let left = graph.record_event("left", 1);
        let right = graph.record_event("right", 1);
        let sink = graph.record_event("sink", 2);
        graph.add_relationship(root, left, 1.0, 1, vec![]).unwrap();
        graph.add_relationship(root, right, 1.0, 1, vec![]).unwrap();
        graph.add_relationship(left, sink, 1.0, 1, vec![]).unwrap();
        graph.add_relationship(right, sink, 1.0, 1, vec![]).unwrap();

        let decay = geometric();
        // two direct hops at weight 1.0 plus two second hops at 0.5
        assert!((graph.impact_of(root, &decay) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_cycle_in_appearance_terminates() {
        let mut graph = CausalGraph::new();
        let a = graph.record_event("a", 0);
        let b = graph.record_event("b", 1);
        graph.add_relationship(a, b, 0.9, 1, vec![]).unwrap();
        graph.add_relationship(b, a, 0.9, 1, vec![]).unwrap();

        // Must terminate and count each event once per path
        let impact = graph.impact_of(a, &geometric());
        assert!(impact > 0.0 && impact.is_finite());
    }

    #[test]
    fn test_rebuild_indexes_after_roundtrip() {
        let mut graph = CausalGraph::new();
        let a = graph.record_event("a", 0);
        let b = graph.record_event("b", 1);
        graph.add_relationship(a, b, 0.7, 1, vec!["if the gate held".into()]).unwrap();

        let json = serde_json::to_string(&graph).unwrap();
        let mut restored: CausalGraph = serde_json::from_str(&json).unwrap();
        restored.rebuild_indexes();
        assert!(restored.contains(a));
        assert!((restored.impact_of(a, &geometric()) - 0.7).abs() < 1e-6);
    }
}
