//! Storyloom - Turn-Based Narrative Simulation Engine

pub mod actions;
pub mod adjudicator;
pub mod agents;
pub mod brief;
pub mod causal;
pub mod collab;
pub mod core;
pub mod gateway;
pub mod negotiation;
pub mod orchestrator;
pub mod perception;
pub mod world;
