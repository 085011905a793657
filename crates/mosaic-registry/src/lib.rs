//! Mosaic Registry - Capability registry and reputation bookkeeping
//!
//! Maps capability names to candidate agents. Discovery is read-only for
//! consumers; the registry is the single writer of agent records and the
//! reputation counters behind them. Reputation is derived, never stored:
//! `successful * 100 / total`, with a default of 80 for agents that have no
//! history yet.

use std::collections::HashMap;
use std::sync::Arc;

use mosaic_types::{
    Agent, AgentId, CapabilityDirectory, MosaicError, ReputationCounters, Result,
};
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory agent registry.
///
/// Thread-safe; agent records and reputation counters live behind one lock so
/// a discovery snapshot always sees consistent reputation.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

#[derive(Default)]
struct RegistryState {
    agents: HashMap<AgentId, Agent>,
    counters: HashMap<AgentId, ReputationCounters>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an agent listing
    pub async fn register(&self, agent: Agent) {
        let mut state = self.inner.write().await;
        debug!(agent = %agent.agent_id, capability = %agent.capability, "agent registered");
        state.counters.entry(agent.agent_id.clone()).or_default();
        state.agents.insert(agent.agent_id.clone(), agent);
    }

    /// Mark an agent inactive; it stops appearing in discovery
    pub async fn deactivate(&self, agent_id: &AgentId) -> Result<()> {
        let mut state = self.inner.write().await;
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| MosaicError::AccountNotFound {
                account: agent_id.to_string(),
            })?;
        agent.active = false;
        Ok(())
    }

    /// Fetch one agent record with up-to-date derived reputation
    pub async fn get(&self, agent_id: &AgentId) -> Option<Agent> {
        let state = self.inner.read().await;
        state.agents.get(agent_id).map(|a| {
            let mut agent = a.clone();
            agent.reputation = state
                .counters
                .get(agent_id)
                .copied()
                .unwrap_or_default()
                .score();
            agent
        })
    }

    /// Record one task outcome for an agent. The job machine calls this when
    /// a job settles; the workflow engine calls it after one-shot steps.
    pub async fn record_outcome(&self, agent_id: &AgentId, success: bool) -> Result<u8> {
        let mut state = self.inner.write().await;
        if !state.agents.contains_key(agent_id) {
            return Err(MosaicError::AccountNotFound {
                account: agent_id.to_string(),
            });
        }
        let counters = state.counters.entry(agent_id.clone()).or_default();
        counters.record(success);
        let score = counters.score();
        if let Some(agent) = state.agents.get_mut(agent_id) {
            agent.reputation = score;
        }
        debug!(agent = %agent_id, success, reputation = score, "task outcome recorded");
        Ok(score)
    }

    /// Current counters for an agent (zeroed if none recorded)
    pub async fn counters(&self, agent_id: &AgentId) -> ReputationCounters {
        let state = self.inner.read().await;
        state.counters.get(agent_id).copied().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl CapabilityDirectory for AgentRegistry {
    /// Active agents advertising the capability, with derived reputation
    async fn agents_for_capability(&self, capability: &str) -> Result<Vec<Agent>> {
        let state = self.inner.read().await;
        let mut matches: Vec<Agent> = state
            .agents
            .values()
            .filter(|a| a.active && a.capability == capability)
            .map(|a| {
                let mut agent = a.clone();
                agent.reputation = state
                    .counters
                    .get(&a.agent_id)
                    .copied()
                    .unwrap_or_default()
                    .score();
                agent
            })
            .collect();
        matches.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_types::{OwnerId, WalletId, DEFAULT_REPUTATION};

    fn agent(capability: &str, price: u64) -> Agent {
        Agent {
            agent_id: AgentId::new(),
            owner: OwnerId::new(),
            wallet: WalletId::new(),
            capability: capability.to_string(),
            price,
            reputation: DEFAULT_REPUTATION,
            active: true,
        }
    }

    #[tokio::test]
    async fn test_discovery_returns_only_active_matching() {
        let registry = AgentRegistry::new();
        let a = agent("market_data", 100);
        let b = agent("market_data", 50);
        let c = agent("sentiment", 30);
        let mut d = agent("market_data", 70);
        d.active = false;

        for x in [a.clone(), b.clone(), c, d] {
            registry.register(x).await;
        }

        let found = registry.agents_for_capability("market_data").await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|x| x.active && x.capability == "market_data"));
    }

    #[tokio::test]
    async fn test_reputation_derivation() {
        let registry = AgentRegistry::new();
        let a = agent("audit", 10);
        let id = a.agent_id.clone();
        registry.register(a).await;

        // No history yet: default reputation
        assert_eq!(registry.get(&id).await.unwrap().reputation, DEFAULT_REPUTATION);

        registry.record_outcome(&id, true).await.unwrap();
        registry.record_outcome(&id, false).await.unwrap();
        assert_eq!(registry.get(&id).await.unwrap().reputation, 50);
    }

    #[tokio::test]
    async fn test_deactivated_agent_hidden() {
        let registry = AgentRegistry::new();
        let a = agent("audit", 10);
        let id = a.agent_id.clone();
        registry.register(a).await;
        registry.deactivate(&id).await.unwrap();

        let found = registry.agents_for_capability("audit").await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_record_outcome_unknown_agent() {
        let registry = AgentRegistry::new();
        let result = registry.record_outcome(&AgentId::new(), true).await;
        assert!(matches!(result, Err(MosaicError::AccountNotFound { .. })));
    }
}
