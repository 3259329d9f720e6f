//! Storyloom - Entry Point
//!
//! Loads a scenario (or a built-in demo), wires up the collaborators and
//! runs the turn loop, printing each turn's events. With LLM_API_KEY set
//! the decision collaborator is a real model; without it a seeded scripted
//! backend improvises plausible actions so the engine can be exercised
//! offline.

use storyloom::actions::{ActionKind, ProposedAction};
use storyloom::agents::{AgentProfile, AgentRoster};
use storyloom::collab::persistence::save_snapshot;
use storyloom::collab::retrieval::StaticRetriever;
use storyloom::collab::{DecisionBackend, LlmDecisionBackend, ScriptedBackend};
use storyloom::brief::TurnBriefBuilder;
use storyloom::core::config::EngineConfig;
use storyloom::core::error::Result;
use storyloom::core::types::Vec2;
use storyloom::orchestrator::{TurnEvent, TurnOrchestrator};
use storyloom::perception::belief::{BeliefModel, Bias, BiasKind};
use storyloom::world::entity::{AttrValue, Entity};
use storyloom::world::loader::{load_scenario, Scenario};
use storyloom::world::rule::Rule;
use storyloom::world::state::WorldState;

use clap::Parser;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "storyloom")]
#[command(about = "Run a turn-based narrative simulation")]
struct Args {
    /// Scenario TOML file; omit to run the built-in demo
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Number of turns to run
    #[arg(long, default_value_t = 5)]
    turns: u64,

    /// Seed for the offline scripted backend
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Write a snapshot here after the final turn
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storyloom=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = EngineConfig::default();

    let scenario = match &args.scenario {
        Some(path) => load_scenario(path)?,
        None => demo_scenario()?,
    };
    println!("=== {} ===", scenario.name);
    if !scenario.description.is_empty() {
        println!("{}\n", scenario.description);
    }

    let backend: Arc<dyn DecisionBackend> = match LlmDecisionBackend::from_env() {
        Ok(llm) => Arc::new(llm),
        Err(_) => {
            tracing::warn!("LLM_API_KEY not set, using the seeded scripted backend");
            Arc::new(scripted_backend(&scenario, args.turns, args.seed))
        }
    };

    let retriever = Arc::new(demo_doctrine());
    let briefs = TurnBriefBuilder::new(retriever, config.clone());
    let mut orchestrator = TurnOrchestrator::new(
        scenario.world,
        scenario.roster,
        scenario.beliefs,
        briefs,
        backend,
        config,
    )?;

    let rt = Runtime::new()?;
    rt.block_on(async {
        for _ in 0..args.turns {
            let report = orchestrator.run_turn().await?;
            print_report(&orchestrator, &report);
        }
        Ok::<(), storyloom::core::error::EngineError>(())
    })?;

    println!("\ncausal record: {} events", orchestrator.causal().events().count());
    for event in orchestrator.causal().events() {
        println!(
            "  turn {:>3}  impact {:>5.2}  {}",
            event.turn,
            orchestrator.impact_of(event.id),
            event.label
        );
    }

    if let Some(path) = &args.snapshot {
        save_snapshot(path, &orchestrator.snapshot()?)?;
        println!("\nsnapshot written to {}", path.display());
    }
    Ok(())
}

fn print_report(orchestrator: &TurnOrchestrator, report: &storyloom::orchestrator::TurnReport) {
    println!("--- turn {} ---", report.turn);
    for event in &report.events {
        match event {
            TurnEvent::BriefBuilt { agent, degraded } => {
                if *degraded {
                    println!("  [brief] {} built without doctrine", name_of(orchestrator, *agent));
                }
            }
            TurnEvent::DecisionDefaulted { agent } => {
                println!("  [wait] {} (decision backend unavailable)", name_of(orchestrator, *agent));
            }
            TurnEvent::ActionAccepted { agent, summary, .. } => {
                println!("  [ok] {}: {}", name_of(orchestrator, *agent), summary);
            }
            TurnEvent::ActionRejected { agent, law, reason } => {
                println!(
                    "  [rejected:{}] {}: {}",
                    law.name(),
                    name_of(orchestrator, *agent),
                    reason
                );
            }
            TurnEvent::ActionAdjusted { agent, summary, explanation, .. } => {
                println!(
                    "  [adjusted] {}: {} ({})",
                    name_of(orchestrator, *agent),
                    summary,
                    explanation
                );
            }
            TurnEvent::PausedForDecision { agent, decision } => {
                println!(
                    "  [paused] {} awaiting decision {}",
                    name_of(orchestrator, *agent),
                    decision
                );
            }
            TurnEvent::DecisionResolved { agent, insisted } => {
                let how = if *insisted { "insisted on the original" } else { "chose an option" };
                println!("  [resumed] {} {}", name_of(orchestrator, *agent), how);
            }
            TurnEvent::AgentSkipped { agent, reason } => {
                println!("  [skipped] {}: {}", name_of(orchestrator, *agent), reason);
            }
            TurnEvent::TurnCompleted { accepted, rejected, .. } => {
                println!("  {} accepted, {} rejected", accepted, rejected);
            }
        }
    }
}

fn name_of(orchestrator: &TurnOrchestrator, agent: storyloom::core::types::AgentId) -> String {
    orchestrator
        .roster()
        .get(agent)
        .map(|p| p.name.clone())
        .unwrap_or_else(|_| agent.to_string())
}

/// Two rival scouts, a sealed gate and one story rule
fn demo_scenario() -> Result<Scenario> {
    use storyloom::core::error::EngineError;

    let mut world = WorldState::new();
    let brynn = world.register_entity(
        Entity::new("brynn", "character", Vec2::new(0.0, 0.0))
            .with_attr("supplies", AttrValue::Num(10.0))
            .with_attr("energy", AttrValue::Num(8.0)),
    )?;
    let kael = world.register_entity(
        Entity::new("kael", "character", Vec2::new(25.0, 0.0))
            .with_attr("supplies", AttrValue::Num(6.0))
            .with_attr("energy", AttrValue::Num(9.0)),
    )?;
    world.register_entity(Entity::new("gate", "structure", Vec2::new(12.0, 10.0)))?;
    world.add_rule(Rule::parse("no_bloodshed", "forbid attack").map_err(EngineError::Validation)?);

    let mut roster = AgentRoster::new();
    let brynn_agent = roster.register(
        AgentProfile::new("brynn", brynn)
            .with_persona("a cautious scout who trusts maps over rumor"),
    )?;
    roster.register(
        AgentProfile::new("kael", kael).with_persona("a bold scout with little patience"),
    )?;

    let mut beliefs = BeliefModel::new();
    beliefs.add_bias(brynn_agent, Bias::new(BiasKind::ThreatInflation, 0.4));

    Ok(Scenario {
        name: "the mountain pass".to_string(),
        description: "two scouts race for a sealed gate".to_string(),
        world,
        roster,
        beliefs,
    })
}

/// Queue seeded improvised actions so the demo runs without an LLM
fn scripted_backend(scenario: &Scenario, turns: u64, seed: u64) -> ScriptedBackend {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let backend = ScriptedBackend::new();
    for _ in 0..turns {
        for profile in scenario.roster.iter() {
            let action = match rng.gen_range(0..4u32) {
                0 => ProposedAction::new(profile.id, ActionKind::Move, "scout ahead")
                    .with_destination(Vec2::new(
                        rng.gen_range(-20.0..40.0),
                        rng.gen_range(-20.0..40.0),
                    )),
                1 => ProposedAction::new(profile.id, ActionKind::Observe, "survey the terrain"),
                2 => ProposedAction::new(profile.id, ActionKind::Speak, "call out a report")
                    .with_cost("energy", 0.5),
                _ => ProposedAction::wait(profile.id),
            };
            backend.enqueue(action);
        }
    }
    backend
}

fn demo_doctrine() -> StaticRetriever {
    let mut retriever = StaticRetriever::new(Vec::new());
    retriever.add(
        "scouts hold distance from hostile patrols until reinforced",
        "fieldbook-1",
    );
    retriever.add("sealed gates are reported, never forced alone", "fieldbook-2");
    retriever.add("supplies below half mandate a return leg", "fieldbook-3");
    retriever
}
