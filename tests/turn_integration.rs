//! Full turn pipeline integration tests
//!
//! These drive the orchestrator end to end with a scripted decision backend
//! and a static doctrine corpus, covering acceptance, adjustment, gateway
//! pauses and the turn's determinism guarantees.

use std::sync::Arc;

use storyloom::actions::{ActionKind, ProposedAction};
use storyloom::agents::{AgentProfile, AgentRoster};
use storyloom::brief::TurnBriefBuilder;
use storyloom::collab::retrieval::StaticRetriever;
use storyloom::collab::ScriptedBackend;
use storyloom::core::config::EngineConfig;
use storyloom::core::types::{AgentId, EntityId, Vec2};
use storyloom::gateway::Choice;
use storyloom::orchestrator::{TurnEvent, TurnOrchestrator};
use storyloom::perception::belief::BeliefModel;
use storyloom::world::entity::{AttrValue, Entity};
use storyloom::world::rule::Rule;
use storyloom::world::state::WorldState;

struct Scene {
    orchestrator: TurnOrchestrator,
    backend: Arc<ScriptedBackend>,
    brynn: AgentId,
    kael: AgentId,
    gate: EntityId,
    beacon: EntityId,
}

/// Two scouts and a gate within brynn's reach. `rules` are added before the
/// world is handed over.
fn scene(rules: &[&str]) -> Scene {
    scene_with(rules, EngineConfig::default())
}

fn scene_with(rules: &[&str], config: EngineConfig) -> Scene {
    let mut world = WorldState::new();
    let brynn_body = world
        .register_entity(
            Entity::new("brynn", "character", Vec2::new(0.0, 0.0))
                .with_attr("supplies", AttrValue::Num(5.0)),
        )
        .unwrap();
    let kael_body = world
        .register_entity(
            Entity::new("kael", "character", Vec2::new(25.0, 0.0))
                .with_attr("supplies", AttrValue::Num(6.0)),
        )
        .unwrap();
    let gate = world
        .register_entity(Entity::new("gate", "structure", Vec2::new(4.0, 3.0)))
        .unwrap();
    // Far beyond anyone's perception range
    let beacon = world
        .register_entity(Entity::new("beacon", "structure", Vec2::new(200.0, 0.0)))
        .unwrap();
    for (i, expr) in rules.iter().enumerate() {
        world.add_rule(Rule::parse(format!("rule_{}", i), expr).unwrap());
    }

    let mut roster = AgentRoster::new();
    let brynn = roster
        .register(AgentProfile::new("brynn", brynn_body))
        .unwrap();
    let kael = roster.register(AgentProfile::new("kael", kael_body)).unwrap();

    let backend = Arc::new(ScriptedBackend::new());
    let briefs = TurnBriefBuilder::new(
        Arc::new(StaticRetriever::new(Vec::new())),
        config.clone(),
    );
    let orchestrator = TurnOrchestrator::new(
        world,
        roster,
        BeliefModel::new(),
        briefs,
        backend.clone(),
        config,
    )
    .unwrap();

    Scene { orchestrator, backend, brynn, kael, gate, beacon }
}

#[tokio::test]
async fn test_actions_apply_in_registration_order() {
    let mut scene = scene(&[]);
    scene
        .backend
        .enqueue(ProposedAction::new(scene.brynn, ActionKind::Speak, "the gate is close"));
    scene
        .backend
        .enqueue(ProposedAction::new(scene.kael, ActionKind::Speak, "the ridge is clear"));

    let report = scene.orchestrator.run_turn().await.unwrap();
    assert_eq!(report.accepted_count(), 2);

    // Facts land in registration order regardless of phase A interleaving
    let texts: Vec<&str> = scene
        .orchestrator
        .world()
        .facts()
        .map(|f| f.text.as_str())
        .collect();
    assert_eq!(texts, vec!["the gate is close", "the ridge is clear"]);

    // So do causal events
    let labels: Vec<&str> = scene
        .orchestrator
        .causal()
        .events()
        .map(|e| e.label.as_str())
        .collect();
    assert!(labels[0].contains("the gate is close"));
    assert!(labels[1].contains("the ridge is clear"));
}

#[tokio::test]
async fn test_unknown_target_fails_validation_without_pausing() {
    let mut scene = scene(&[]);
    // brynn acts on an entity that never existed; kael acts normally
    scene.backend.enqueue(
        ProposedAction::new(scene.brynn, ActionKind::Observe, "study the phantom tower")
            .with_target(EntityId::new()),
    );
    scene
        .backend
        .enqueue(ProposedAction::new(scene.kael, ActionKind::Speak, "all quiet here"));

    let report = scene.orchestrator.run_turn().await.unwrap();

    // An id the world has never seen is a validation failure, not a law
    // rejection, so no negotiation or pause happens and only the offender
    // sits out
    let brynn_skipped = report.events.iter().any(
        |e| matches!(e, TurnEvent::AgentSkipped { agent, .. } if *agent == scene.brynn),
    );
    let kael_accepted = report.events.iter().any(
        |e| matches!(e, TurnEvent::ActionAccepted { agent, .. } if *agent == scene.kael),
    );
    assert!(brynn_skipped);
    assert!(kael_accepted);
    assert!(!report
        .events
        .iter()
        .any(|e| matches!(e, TurnEvent::ActionRejected { .. } | TurnEvent::PausedForDecision { .. })));
    assert_eq!(scene.orchestrator.world().turn(), 1);
    assert_eq!(scene.orchestrator.world().facts().count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unseen_target_pauses_then_defaults_to_skip() {
    let mut scene = scene(&[]);
    scene.backend.enqueue(
        ProposedAction::new(scene.brynn, ActionKind::Observe, "watch the distant beacon")
            .with_target(scene.beacon),
    );
    scene.backend.enqueue(ProposedAction::wait(scene.kael));

    // The beacon exists but sits outside brynn's perception, so the law
    // rejection pauses for a human; nobody answers and the default skip
    // applies at the deadline
    let report = scene.orchestrator.run_turn().await.unwrap();
    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, TurnEvent::PausedForDecision { .. })));
    assert!(report.events.iter().any(
        |e| matches!(e, TurnEvent::AgentSkipped { agent, .. } if *agent == scene.brynn),
    ));
    assert_eq!(scene.orchestrator.world().turn(), 1);
}

#[tokio::test]
async fn test_overspend_adjusts_and_balance_stays_non_negative() {
    let mut scene = scene(&[]);
    scene.backend.enqueue(
        ProposedAction::new(scene.brynn, ActionKind::Interact, "bribe with everything")
            .with_target(scene.gate)
            .with_cost("supplies", 50.0),
    );
    scene
        .backend
        .enqueue(ProposedAction::wait(scene.kael));

    let report = scene.orchestrator.run_turn().await.unwrap();
    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, TurnEvent::ActionAdjusted { .. })));

    let supplies = scene
        .orchestrator
        .world()
        .entity_by_name("brynn")
        .unwrap()
        .num_attr("supplies")
        .unwrap();
    assert!(supplies >= 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_rule_rejection_pauses_then_times_out_to_skip() {
    let mut scene = scene(&["forbid attack"]);
    scene.backend.enqueue(
        ProposedAction::new(scene.brynn, ActionKind::Attack, "smash the gate")
            .with_target(scene.gate),
    );
    scene.backend.enqueue(ProposedAction::wait(scene.kael));

    // No human is attached; the default option (skip) applies at the
    // deadline and the turn still completes
    let report = scene.orchestrator.run_turn().await.unwrap();

    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, TurnEvent::PausedForDecision { .. })));
    assert!(report.events.iter().any(
        |e| matches!(e, TurnEvent::AgentSkipped { agent, .. } if *agent == scene.brynn),
    ));
    assert_eq!(scene.orchestrator.world().turn(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_insisted_original_gets_one_retry_then_sits_out() {
    let mut config = EngineConfig::default();
    config.confirm_adjustments = true;
    let mut scene = scene_with(&[], config);
    scene.backend.enqueue(
        ProposedAction::new(scene.brynn, ActionKind::Interact, "bribe with everything")
            .with_target(scene.gate)
            .with_cost("supplies", 50.0),
    );
    scene.backend.enqueue(ProposedAction::wait(scene.kael));

    let gateway = scene.orchestrator.gateway();
    let human = async move {
        let id = loop {
            if let Some(pending) = gateway.lock().unwrap().pending() {
                break pending.id;
            }
            tokio::task::yield_now().await;
        };
        gateway.lock().unwrap().submit(id, Choice::Insist).unwrap();
    };

    let (report, _) = tokio::join!(scene.orchestrator.run_turn(), human);
    let report = report.unwrap();

    // The rejected insistence is final: one adjudication retry, no second
    // negotiation round, nothing spent
    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, TurnEvent::DecisionResolved { insisted: true, .. })));
    assert!(report.events.iter().any(
        |e| matches!(e, TurnEvent::AgentSkipped { agent, .. } if *agent == scene.brynn),
    ));
    let supplies = scene
        .orchestrator
        .world()
        .entity_by_name("brynn")
        .unwrap()
        .num_attr("supplies")
        .unwrap();
    assert_eq!(supplies, 5.0);
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_adjustment_applies() {
    let mut config = EngineConfig::default();
    config.confirm_adjustments = true;
    let mut scene = scene_with(&[], config);
    scene.backend.enqueue(
        ProposedAction::new(scene.brynn, ActionKind::Interact, "bribe with everything")
            .with_target(scene.gate)
            .with_cost("supplies", 50.0),
    );
    scene.backend.enqueue(ProposedAction::wait(scene.kael));

    let gateway = scene.orchestrator.gateway();
    let human = async move {
        let id = loop {
            if let Some(pending) = gateway.lock().unwrap().pending() {
                break pending.id;
            }
            tokio::task::yield_now().await;
        };
        // First option on a confirmation pause is the scaled-down action
        gateway.lock().unwrap().submit(id, Choice::Option(0)).unwrap();
    };

    let (report, _) = tokio::join!(scene.orchestrator.run_turn(), human);
    let report = report.unwrap();

    assert!(report.events.iter().any(
        |e| matches!(e, TurnEvent::ActionAccepted { agent, .. } if *agent == scene.brynn),
    ));
    let supplies = scene
        .orchestrator
        .world()
        .entity_by_name("brynn")
        .unwrap()
        .num_attr("supplies")
        .unwrap();
    assert_eq!(supplies, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_human_picks_an_alternative() {
    let mut scene = scene(&["forbid attack"]);
    scene.backend.enqueue(
        ProposedAction::new(scene.brynn, ActionKind::Attack, "smash the gate")
            .with_target(scene.gate),
    );
    scene.backend.enqueue(ProposedAction::wait(scene.kael));

    let gateway = scene.orchestrator.gateway();
    let human = async move {
        let id = loop {
            if let Some(pending) = gateway.lock().unwrap().pending() {
                break pending.id;
            }
            tokio::task::yield_now().await;
        };
        gateway.lock().unwrap().submit(id, Choice::Option(0)).unwrap();
    };

    let (report, _) = tokio::join!(scene.orchestrator.run_turn(), human);
    let report = report.unwrap();

    // The chosen alternative was re-adjudicated and accepted
    assert!(report.events.iter().any(
        |e| matches!(e, TurnEvent::ActionAccepted { agent, .. } if *agent == scene.brynn),
    ));
    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, TurnEvent::DecisionResolved { insisted: false, .. })));
}

#[tokio::test]
async fn test_same_script_same_story() {
    async fn run() -> (Vec<(String, Option<f64>, (f32, f32))>, Vec<String>) {
        let mut scene = scene(&[]);
        for _ in 0..3 {
            scene.backend.enqueue(
                ProposedAction::new(scene.brynn, ActionKind::Move, "push east")
                    .with_destination(Vec2::new(60.0, 0.0)),
            );
            scene.backend.enqueue(
                ProposedAction::new(scene.kael, ActionKind::Speak, "holding position")
                    .with_cost("supplies", 1.0),
            );
        }
        scene.orchestrator.run_turns(3).await.unwrap();

        let entities = scene
            .orchestrator
            .world()
            .entities()
            .map(|e| {
                (
                    e.name.clone(),
                    e.num_attr("supplies"),
                    (e.position.x, e.position.y),
                )
            })
            .collect();
        let labels = scene
            .orchestrator
            .causal()
            .events()
            .map(|e| e.label.clone())
            .collect();
        (entities, labels)
    }

    let first = run().await;
    let second = run().await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_causal_chain_across_turns() {
    let mut scene = scene(&[]);
    scene
        .backend
        .enqueue(ProposedAction::new(scene.brynn, ActionKind::Speak, "the pass is open"));
    scene.backend.enqueue(ProposedAction::wait(scene.kael));
    let report = scene.orchestrator.run_turn().await.unwrap();
    let a1 = report
        .events
        .iter()
        .find_map(|e| match e {
            TurnEvent::ActionAccepted { agent, event, .. } if *agent == scene.brynn => *event,
            _ => None,
        })
        .unwrap();

    scene.backend.enqueue(
        ProposedAction::new(scene.kael, ActionKind::Speak, "then we march at dawn")
            .caused_by(a1),
    );
    scene.backend.enqueue(ProposedAction::wait(scene.brynn));
    let report = scene.orchestrator.run_turn().await.unwrap();
    let a2 = report
        .events
        .iter()
        .find_map(|e| match e {
            TurnEvent::ActionAccepted { agent, event, .. } if *agent == scene.kael => *event,
            _ => None,
        })
        .unwrap();

    scene.backend.enqueue(
        ProposedAction::new(scene.brynn, ActionKind::Speak, "dawn it is").caused_by(a2),
    );
    scene.backend.enqueue(ProposedAction::wait(scene.kael));
    scene.orchestrator.run_turn().await.unwrap();

    // Root causes outweigh downstream effects
    assert!(scene.orchestrator.impact_of(a1) > scene.orchestrator.impact_of(a2));
    assert_eq!(scene.orchestrator.causal().edge_count(), 2);
    // Three spoken actions in the record; the waits left none
    assert_eq!(scene.orchestrator.causal().events().count(), 3);
}

#[tokio::test]
async fn test_snapshot_roundtrip_resumes_cleanly() {
    use storyloom::collab::persistence::{load_snapshot, save_snapshot};

    let mut scene = scene(&[]);
    scene.backend.enqueue(
        ProposedAction::new(scene.brynn, ActionKind::Interact, "oil the hinges")
            .with_target(scene.gate)
            .with_cost("supplies", 2.0),
    );
    scene.backend.enqueue(ProposedAction::wait(scene.kael));
    scene.orchestrator.run_turn().await.unwrap();

    let dir = std::env::temp_dir().join(format!("storyloom-it-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("turn1.json");
    save_snapshot(&path, &scene.orchestrator.snapshot().unwrap()).unwrap();

    let restored = load_snapshot(&path).unwrap();
    let mut other = scene;
    other.orchestrator.restore(restored).unwrap();

    assert_eq!(other.orchestrator.world().turn(), 1);
    let brynn = other.orchestrator.world().entity_by_name("brynn").unwrap();
    assert_eq!(brynn.num_attr("supplies"), Some(3.0));
    assert_eq!(other.orchestrator.causal().events().count(), 1);

    std::fs::remove_dir_all(&dir).ok();
}
