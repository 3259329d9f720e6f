//! TOML scenario loader
//!
//! Scenario files declare entities, agents, facts, relations and rules by
//! name; the loader resolves names to ids, parses rule expressions and
//! fails loudly with the offending field in the message. A scenario that
//! loads is guaranteed to pass the world's integrity checks.

use crate::agents::{AgentProfile, AgentRoster};
use crate::core::config::FactReferencePolicy;
use crate::core::error::{EngineError, Result};
use crate::core::types::{EntityId, Turn, Vec2};
use crate::perception::belief::{BeliefModel, Bias, BiasKind};
use crate::world::entity::{AttrValue, Entity};
use crate::world::fact::{Channel, Fact, FactClaim};
use crate::world::relation::{Relation, RelationKind};
use crate::world::rule::Rule;
use crate::world::state::WorldState;
use ahash::AHashMap;
use std::path::Path;
use toml::Value;

/// A fully loaded scenario, ready to hand to the orchestrator
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub world: WorldState,
    pub roster: AgentRoster,
    pub beliefs: BeliefModel,
}

pub fn load_scenario(path: impl AsRef<Path>) -> Result<Scenario> {
    let text = std::fs::read_to_string(path.as_ref())?;
    parse_scenario(&text)
}

pub fn parse_scenario(text: &str) -> Result<Scenario> {
    let root: Value = text
        .parse()
        .map_err(|e| EngineError::Validation(format!("scenario is not valid TOML: {}", e)))?;

    let meta = root.get("scenario");
    let name = meta
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("untitled")
        .to_string();
    let description = meta
        .and_then(|m| m.get("description"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut world = WorldState::new();
    let mut names: AHashMap<String, EntityId> = AHashMap::new();

    for (i, table) in array_of(&root, "entities")?.iter().enumerate() {
        let entity = parse_entity(table)
            .map_err(|e| EngineError::Validation(format!("entities[{}]: {}", i, e)))?;
        if names.contains_key(&entity.name) {
            return Err(EngineError::Validation(format!(
                "entities[{}]: duplicate entity name {:?}",
                i, entity.name
            )));
        }
        names.insert(entity.name.clone(), entity.id);
        world.register_entity(entity)?;
    }

    for (i, table) in array_of(&root, "facts")?.iter().enumerate() {
        let fact = parse_fact(table, &names)
            .map_err(|e| EngineError::Validation(format!("facts[{}]: {}", i, e)))?;
        // Scenario facts must reference declared entities; later, live
        // policy applies
        world.add_fact(fact, FactReferencePolicy::Reject)?;
    }

    for (i, table) in array_of(&root, "relations")?.iter().enumerate() {
        let relation = parse_relation(table, &names)
            .map_err(|e| EngineError::Validation(format!("relations[{}]: {}", i, e)))?;
        world.add_relation(relation)?;
    }

    for (i, table) in array_of(&root, "rules")?.iter().enumerate() {
        let name = str_field(table, "name")
            .map_err(|e| EngineError::Validation(format!("rules[{}]: {}", i, e)))?;
        let expr = str_field(table, "expr")
            .map_err(|e| EngineError::Validation(format!("rules[{}]: {}", i, e)))?;
        let rule = Rule::parse(name, &expr)
            .map_err(|e| EngineError::Validation(format!("rules[{}]: {}", i, e)))?;
        world.add_rule(rule);
    }

    let mut roster = AgentRoster::new();
    let mut beliefs = BeliefModel::new();
    for (i, table) in array_of(&root, "agents")?.iter().enumerate() {
        let (profile, agent_biases, propositions) = parse_agent(table, &names)
            .map_err(|e| EngineError::Validation(format!("agents[{}]: {}", i, e)))?;
        let agent = roster.register(profile)?;
        for bias in agent_biases {
            beliefs.add_bias(agent, bias);
        }
        for (key, weight) in propositions {
            beliefs.observe(agent, key, weight);
        }
    }

    if roster.is_empty() {
        return Err(EngineError::Validation(
            "scenario declares no agents".to_string(),
        ));
    }

    tracing::info!(
        scenario = %name,
        entities = world.entities().count(),
        agents = roster.len(),
        "scenario loaded"
    );
    Ok(Scenario { name, description, world, roster, beliefs })
}

fn array_of<'a>(root: &'a Value, key: &str) -> Result<&'a [Value]> {
    match root.get(key) {
        None => Ok(&[]),
        Some(value) => value.as_array().map(Vec::as_slice).ok_or_else(|| {
            EngineError::Validation(format!("{} must be an array of tables", key))
        }),
    }
}

fn str_field(table: &Value, key: &str) -> std::result::Result<String, String> {
    table
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("missing string field {:?}", key))
}

fn num_field(table: &Value, key: &str) -> std::result::Result<f64, String> {
    let value = table.get(key).ok_or_else(|| format!("missing field {:?}", key))?;
    value
        .as_float()
        .or_else(|| value.as_integer().map(|n| n as f64))
        .ok_or_else(|| format!("field {:?} must be a number", key))
}

fn opt_num(table: &Value, key: &str) -> std::result::Result<Option<f64>, String> {
    match table.get(key) {
        None => Ok(None),
        Some(_) => num_field(table, key).map(Some),
    }
}

fn position_field(table: &Value) -> std::result::Result<Vec2, String> {
    let array = table
        .get("position")
        .and_then(Value::as_array)
        .ok_or_else(|| "missing position [x, y]".to_string())?;
    if array.len() != 2 {
        return Err("position must have exactly two components".to_string());
    }
    let component = |v: &Value| {
        v.as_float()
            .or_else(|| v.as_integer().map(|n| n as f64))
            .ok_or_else(|| "position components must be numbers".to_string())
    };
    Ok(Vec2::new(component(&array[0])? as f32, component(&array[1])? as f32))
}

fn resolve(
    names: &AHashMap<String, EntityId>,
    name: &str,
) -> std::result::Result<EntityId, String> {
    names
        .get(name)
        .copied()
        .ok_or_else(|| format!("unknown entity {:?}", name))
}

fn parse_entity(table: &Value) -> std::result::Result<Entity, String> {
    let name = str_field(table, "name")?;
    let kind = str_field(table, "kind")?;
    let position = position_field(table)?;
    let mut entity = Entity::new(name, kind, position);

    if let Some(attrs) = table.get("attrs") {
        let attrs = attrs
            .as_table()
            .ok_or_else(|| "attrs must be a table".to_string())?;
        for (attr, value) in attrs {
            let value = match value {
                Value::Float(n) => AttrValue::Num(*n),
                Value::Integer(n) => AttrValue::Num(*n as f64),
                Value::String(s) => AttrValue::Text(s.clone()),
                other => {
                    return Err(format!(
                        "attr {:?} must be a number or string, got {}",
                        attr,
                        other.type_str()
                    ))
                }
            };
            entity.set_attr(attr.clone(), value);
        }
    }
    Ok(entity)
}

fn parse_channel(name: &str) -> std::result::Result<Channel, String> {
    match name.to_ascii_lowercase().as_str() {
        "sight" => Ok(Channel::Sight),
        "hearing" => Ok(Channel::Hearing),
        "rumor" => Ok(Channel::Rumor),
        other => Err(format!("unknown channel {:?}", other)),
    }
}

fn parse_fact(
    table: &Value,
    names: &AHashMap<String, EntityId>,
) -> std::result::Result<Fact, String> {
    let text = str_field(table, "text")?;
    let confidence = num_field(table, "confidence")? as f32;
    let source = str_field(table, "source")?;
    let mut fact = Fact::new(text, confidence, source);

    if let Some(subjects) = table.get("subjects") {
        let subjects = subjects
            .as_array()
            .ok_or_else(|| "subjects must be an array of entity names".to_string())?;
        for subject in subjects {
            let name = subject
                .as_str()
                .ok_or_else(|| "subjects must be strings".to_string())?;
            fact = fact.about(resolve(names, name)?);
        }
    }
    if let Some(expires) = opt_num(table, "expires_turn")? {
        fact = fact.expiring(expires as Turn);
    }
    if let Some(channel) = table.get("channel") {
        let channel = channel
            .as_str()
            .ok_or_else(|| "channel must be a string".to_string())?;
        fact = fact.on_channel(parse_channel(channel)?);
    }
    if let Some(claim) = table.get("claim") {
        let subject = str_field(claim, "subject")?;
        let predicate = str_field(claim, "predicate")?;
        let value = str_field(claim, "value")?;
        fact = fact.with_claim(FactClaim::new(resolve(names, &subject)?, predicate, value));
    }
    Ok(fact)
}

fn parse_relation(
    table: &Value,
    names: &AHashMap<String, EntityId>,
) -> std::result::Result<Relation, String> {
    let src = resolve(names, &str_field(table, "src")?)?;
    let dst = resolve(names, &str_field(table, "dst")?)?;
    let kind = match str_field(table, "kind")?.to_ascii_lowercase().as_str() {
        "ally" => RelationKind::Ally,
        "hostile" => RelationKind::Hostile,
        "competes_for" => RelationKind::CompetesFor,
        "owns" => RelationKind::Owns,
        "knows" => RelationKind::Knows,
        "located_in" => RelationKind::LocatedIn,
        other => return Err(format!("unknown relation kind {:?}", other)),
    };
    Ok(Relation::new(src, dst, kind))
}

fn parse_bias(table: &Value) -> std::result::Result<Bias, String> {
    let kind = match str_field(table, "kind")?.to_ascii_lowercase().as_str() {
        "confirmation" => BiasKind::Confirmation,
        "threat_inflation" => BiasKind::ThreatInflation,
        "optimism" => BiasKind::Optimism,
        "recency" => BiasKind::Recency,
        other => return Err(format!("unknown bias kind {:?}", other)),
    };
    let strength = num_field(table, "strength")? as f32;
    Ok(Bias::new(kind, strength))
}

type ParsedAgent = (AgentProfile, Vec<Bias>, Vec<(String, f32)>);

fn parse_agent(
    table: &Value,
    names: &AHashMap<String, EntityId>,
) -> std::result::Result<ParsedAgent, String> {
    let name = str_field(table, "name")?;
    let entity = resolve(names, &name)?;
    let mut profile = AgentProfile::new(name, entity);

    if let Some(persona) = table.get("persona").and_then(Value::as_str) {
        profile = profile.with_persona(persona);
    }
    if let Some(range) = opt_num(table, "perception_range")? {
        profile = profile.with_perception_range(range as f32);
    }
    if let Some(channels) = table.get("channels") {
        let channels = channels
            .as_array()
            .ok_or_else(|| "channels must be an array of strings".to_string())?;
        let mut parsed = Vec::with_capacity(channels.len());
        for channel in channels {
            let name = channel
                .as_str()
                .ok_or_else(|| "channels must be strings".to_string())?;
            parsed.push(parse_channel(name)?);
        }
        profile = profile.with_channels(parsed);
    }
    if let Some(query) = table.get("doctrine_query").and_then(Value::as_str) {
        profile.doctrine_query = Some(query.to_string());
    }

    let mut biases = Vec::new();
    if let Some(list) = table.get("biases") {
        let list = list
            .as_array()
            .ok_or_else(|| "biases must be an array of tables".to_string())?;
        for bias in list {
            biases.push(parse_bias(bias)?);
        }
    }

    let mut propositions = Vec::new();
    if let Some(props) = table.get("propositions") {
        let props = props
            .as_table()
            .ok_or_else(|| "propositions must be a table".to_string())?;
        for (key, weight) in props {
            let weight = weight
                .as_float()
                .or_else(|| weight.as_integer().map(|n| n as f64))
                .ok_or_else(|| format!("proposition {:?} must be a number", key))?;
            propositions.push((key.clone(), weight as f32));
        }
    }

    Ok((profile, biases, propositions))
}
