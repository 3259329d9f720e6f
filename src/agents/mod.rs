//! Agent profiles and the registration-ordered roster
//!
//! Registration order is load-bearing: it is the deterministic order in
//! which the orchestrator applies actions within a turn, and the order
//! causal edges are appended.

use crate::core::error::{EngineError, Result};
use crate::core::types::{AgentId, EntityId};
use crate::world::fact::Channel;
use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};

/// Static configuration for one autonomous character agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: AgentId,
    pub name: String,
    /// The agent's body in the world ledger; perception is centered here
    pub entity: EntityId,
    /// Short character sketch handed to the decision collaborator
    pub persona: String,
    /// Perception radius override; None uses the engine default
    pub perception_range: Option<f32>,
    /// Channels this agent's senses cover
    pub channels: AHashSet<Channel>,
    /// Standing doctrine-retrieval query; None derives one from the brief
    pub doctrine_query: Option<String>,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, entity: EntityId) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            entity,
            persona: String::new(),
            perception_range: None,
            channels: [Channel::Sight, Channel::Hearing, Channel::Rumor]
                .into_iter()
                .collect(),
            doctrine_query: None,
        }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn with_perception_range(mut self, range: f32) -> Self {
        self.perception_range = Some(range);
        self
    }

    pub fn with_channels(mut self, channels: impl IntoIterator<Item = Channel>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }

    pub fn hears(&self, channel: Option<Channel>) -> bool {
        match channel {
            None => true,
            Some(c) => self.channels.contains(&c),
        }
    }
}

/// All registered agents, in registration order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRoster {
    agents: Vec<AgentProfile>,
    #[serde(skip)]
    index: AHashMap<AgentId, usize>,
}

impl AgentRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, profile: AgentProfile) -> Result<AgentId> {
        if self.index.contains_key(&profile.id) {
            return Err(EngineError::IntegrityViolation(format!(
                "duplicate agent id {}",
                profile.id
            )));
        }
        let id = profile.id;
        self.index.insert(id, self.agents.len());
        self.agents.push(profile);
        Ok(id)
    }

    pub fn get(&self, id: AgentId) -> Result<&AgentProfile> {
        self.index
            .get(&id)
            .map(|&i| &self.agents[i])
            .ok_or(EngineError::AgentNotFound(id))
    }

    pub fn by_name(&self, name: &str) -> Option<&AgentProfile> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.index.contains_key(&id)
    }

    /// Profiles in registration order
    pub fn iter(&self) -> impl Iterator<Item = &AgentProfile> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Rebuild the id index after deserializing
    pub fn rebuild_indexes(&mut self) {
        self.index = self
            .agents
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id, i))
            .collect();
    }
}
