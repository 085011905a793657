//! Mosaic Collusion Guard - Economic-security vetting of agent hires
//!
//! Every hire passes through `check_hire` before any payment moves. Checks
//! run in a fixed order and the first failing check wins:
//!
//! 1. Same-owner block: an owner may not hire their own agents, for any
//!    amount including zero.
//! 2. Repeated-hire cap: too many hirer→hired edges inside the trailing
//!    window.
//! 3. Circular-hire block: a recent hired→hirer edge indicates a
//!    wash-trading loop.
//! 4. Price deviation against the capability's trailing average over the
//!    repeat window: beyond the hard threshold the hire is blocked; beyond
//!    the soft threshold it is flagged but allowed.
//!
//! Only allowed hires (flagged or clean) are appended to the edge log, so
//! rejected attempts never pollute future decisions.

use std::sync::Arc;

use chrono::{Duration, Utc};
use mosaic_types::{
    Agent, AgentId, EventBus, HireDecision, HireEdge, MosaicEvent,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Guard thresholds
#[derive(Debug, Clone)]
pub struct CollusionConfig {
    /// Max hirer→hired edges inside `repeat_window` before blocking
    pub max_repeat_hires: usize,
    /// Trailing window for the repeated-hire count and the capability
    /// price average
    pub repeat_window: Duration,
    /// Trailing window for the circular-hire check
    pub circular_window: Duration,
    /// Deviation above the trailing average that blocks (2.0 = 200%)
    pub hard_price_deviation: f64,
    /// Deviation above the trailing average that flags (0.5 = 50%)
    pub soft_price_deviation: f64,
}

impl Default for CollusionConfig {
    fn default() -> Self {
        Self {
            max_repeat_hires: 3,
            repeat_window: Duration::hours(1),
            circular_window: Duration::seconds(60),
            hard_price_deviation: 2.0,
            soft_price_deviation: 0.5,
        }
    }
}

/// The collusion guard, owning the append-only hire-edge log.
///
/// The log supports concurrent append with read-your-writes: a hire recorded
/// by one task is visible to the circular-hire check of the next.
#[derive(Clone)]
pub struct CollusionGuard {
    config: CollusionConfig,
    edges: Arc<RwLock<Vec<HireEdge>>>,
    events: EventBus,
}

impl CollusionGuard {
    pub fn new(events: EventBus) -> Self {
        Self::with_config(CollusionConfig::default(), events)
    }

    pub fn with_config(config: CollusionConfig, events: EventBus) -> Self {
        Self {
            config,
            edges: Arc::new(RwLock::new(Vec::new())),
            events,
        }
    }

    /// Vet a prospective hire. Appends an edge only when the hire is allowed.
    pub async fn check_hire(
        &self,
        hirer: &Agent,
        hired: &Agent,
        amount: u64,
        capability: &str,
    ) -> HireDecision {
        let now = Utc::now();
        let mut edges = self.edges.write().await;

        // 1. Same-owner block, regardless of amount
        if hirer.owner == hired.owner {
            let decision = HireDecision::blocked(format!(
                "hirer and hired share owner {}",
                hirer.owner
            ));
            self.emit(hirer, hired, amount, &decision);
            return decision;
        }

        // 2. Repeated-hire cap inside the trailing window
        let repeat_cutoff = now - self.config.repeat_window;
        let repeats = edges
            .iter()
            .filter(|e| {
                e.hirer == hirer.agent_id
                    && e.hired == hired.agent_id
                    && e.timestamp >= repeat_cutoff
            })
            .count();
        if repeats >= self.config.max_repeat_hires {
            let decision = HireDecision::blocked(format!(
                "{repeats} hires of {} within window (max {})",
                hired.agent_id, self.config.max_repeat_hires
            ));
            self.emit(hirer, hired, amount, &decision);
            return decision;
        }

        // 3. Circular-hire block: the hired agent recently hired the hirer
        let circular_cutoff = now - self.config.circular_window;
        let circular = edges.iter().any(|e| {
            e.hirer == hired.agent_id
                && e.hired == hirer.agent_id
                && e.timestamp >= circular_cutoff
        });
        if circular {
            let decision = HireDecision::blocked(format!(
                "circular hire: {} hired {} within {}s",
                hired.agent_id,
                hirer.agent_id,
                self.config.circular_window.num_seconds()
            ));
            self.emit(hirer, hired, amount, &decision);
            return decision;
        }

        // 4. Price deviation against the capability's trailing average
        let mut decision = HireDecision::allowed();
        if let Some(average) = Self::trailing_average(&edges, capability, repeat_cutoff) {
            let deviation = (amount as f64 - average) / average;
            if deviation > self.config.hard_price_deviation {
                let decision = HireDecision::blocked(format!(
                    "amount {amount} deviates {:.0}% above capability average {average:.0}",
                    deviation * 100.0
                ));
                self.emit(hirer, hired, amount, &decision);
                return decision;
            }
            if deviation > self.config.soft_price_deviation {
                decision = HireDecision::flagged(format!(
                    "amount {amount} deviates {:.0}% above capability average {average:.0}",
                    deviation * 100.0
                ));
            }
        }

        edges.push(HireEdge {
            hirer: hirer.agent_id.clone(),
            hired: hired.agent_id.clone(),
            timestamp: now,
            amount,
            capability: capability.to_string(),
        });

        self.emit(hirer, hired, amount, &decision);
        decision
    }

    fn trailing_average(
        edges: &[HireEdge],
        capability: &str,
        cutoff: chrono::DateTime<Utc>,
    ) -> Option<f64> {
        let amounts: Vec<u64> = edges
            .iter()
            .filter(|e| e.capability == capability && e.timestamp >= cutoff)
            .map(|e| e.amount)
            .collect();
        if amounts.is_empty() {
            return None;
        }
        Some(amounts.iter().sum::<u64>() as f64 / amounts.len() as f64)
    }

    fn emit(&self, hirer: &Agent, hired: &Agent, amount: u64, decision: &HireDecision) {
        let at = Utc::now();
        let event = if !decision.allowed {
            warn!(
                hirer = %hirer.agent_id,
                hired = %hired.agent_id,
                amount,
                reason = %decision.reason,
                "hire blocked"
            );
            MosaicEvent::HireBlocked {
                hirer: hirer.agent_id.clone(),
                hired: hired.agent_id.clone(),
                amount,
                reason: decision.reason.clone(),
                at,
            }
        } else if decision.flagged {
            warn!(
                hirer = %hirer.agent_id,
                hired = %hired.agent_id,
                amount,
                reason = %decision.reason,
                "hire flagged"
            );
            MosaicEvent::HireFlagged {
                hirer: hirer.agent_id.clone(),
                hired: hired.agent_id.clone(),
                amount,
                reason: decision.reason.clone(),
                at,
            }
        } else {
            info!(hirer = %hirer.agent_id, hired = %hired.agent_id, amount, "hire approved");
            MosaicEvent::HireApproved {
                hirer: hirer.agent_id.clone(),
                hired: hired.agent_id.clone(),
                amount,
                at,
            }
        };
        self.events.publish(event);
    }

    /// All edges touching an agent, for audit
    pub async fn hire_history(&self, agent_id: &AgentId) -> Vec<HireEdge> {
        let edges = self.edges.read().await;
        edges
            .iter()
            .filter(|e| &e.hirer == agent_id || &e.hired == agent_id)
            .cloned()
            .collect()
    }

    /// Total number of recorded edges
    pub async fn edge_count(&self) -> usize {
        self.edges.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_types::{OwnerId, WalletId};

    fn agent(owner: OwnerId, capability: &str) -> Agent {
        Agent {
            agent_id: AgentId::new(),
            owner,
            wallet: WalletId::new(),
            capability: capability.to_string(),
            price: 100,
            reputation: 80,
            active: true,
        }
    }

    fn guard() -> CollusionGuard {
        CollusionGuard::new(EventBus::new())
    }

    #[tokio::test]
    async fn test_same_owner_blocked_even_for_zero() {
        let guard = guard();
        let owner = OwnerId::new();
        let hirer = agent(owner.clone(), "market_data");
        let hired = agent(owner, "market_data");

        let decision = guard.check_hire(&hirer, &hired, 0, "market_data").await;
        assert!(!decision.allowed);
        // Blocked hires leave no edge behind
        assert_eq!(guard.edge_count().await, 0);
    }

    #[tokio::test]
    async fn test_repeated_hire_cap() {
        let guard = guard();
        let hirer = agent(OwnerId::new(), "market_data");
        let hired = agent(OwnerId::new(), "market_data");

        for _ in 0..3 {
            let decision = guard.check_hire(&hirer, &hired, 100, "market_data").await;
            assert!(decision.allowed);
        }
        let decision = guard.check_hire(&hirer, &hired, 100, "market_data").await;
        assert!(!decision.allowed);
        assert_eq!(guard.edge_count().await, 3);
    }

    #[tokio::test]
    async fn test_circular_hire_blocked() {
        let guard = guard();
        let a = agent(OwnerId::new(), "market_data");
        let b = agent(OwnerId::new(), "market_data");

        let decision = guard.check_hire(&a, &b, 100, "market_data").await;
        assert!(decision.allowed);

        // The reverse hire inside the circular window is a wash-trade loop
        let decision = guard.check_hire(&b, &a, 100, "market_data").await;
        assert!(!decision.allowed);
        assert!(decision.reason.contains("circular"));
    }

    #[tokio::test]
    async fn test_price_deviation_thresholds() {
        let guard = guard();
        let hired = agent(OwnerId::new(), "audit");

        // Seed the trailing average at 100 from distinct hirers
        for _ in 0..3 {
            let hirer = agent(OwnerId::new(), "workflow");
            let decision = guard.check_hire(&hirer, &hired, 100, "audit").await;
            assert!(decision.allowed && !decision.flagged);
        }

        // 60% above the average: flagged but allowed
        let hirer = agent(OwnerId::new(), "workflow");
        let decision = guard.check_hire(&hirer, &hired, 160, "audit").await;
        assert!(decision.allowed);
        assert!(decision.flagged);

        // Far beyond the hard threshold: blocked
        let hirer = agent(OwnerId::new(), "workflow");
        let decision = guard.check_hire(&hirer, &hired, 1000, "audit").await;
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_price_average_ages_out() {
        let config = CollusionConfig {
            repeat_window: Duration::milliseconds(50),
            ..CollusionConfig::default()
        };
        let guard = CollusionGuard::with_config(config, EventBus::new());
        let hired = agent(OwnerId::new(), "audit");

        for _ in 0..3 {
            let hirer = agent(OwnerId::new(), "workflow");
            let decision = guard.check_hire(&hirer, &hired, 100, "audit").await;
            assert!(decision.allowed);
        }
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;

        // The 100-unit edges aged out of the window, so a much larger
        // amount no longer deviates from anything
        let hirer = agent(OwnerId::new(), "workflow");
        let decision = guard.check_hire(&hirer, &hired, 1_000, "audit").await;
        assert!(decision.allowed && !decision.flagged);
    }

    #[tokio::test]
    async fn test_first_hire_has_no_average_to_deviate_from() {
        let guard = guard();
        let hirer = agent(OwnerId::new(), "workflow");
        let hired = agent(OwnerId::new(), "audit");

        let decision = guard.check_hire(&hirer, &hired, 1_000_000, "audit").await;
        assert!(decision.allowed && !decision.flagged);
    }

    #[tokio::test]
    async fn test_hire_history_query() {
        let guard = guard();
        let hirer = agent(OwnerId::new(), "workflow");
        let hired = agent(OwnerId::new(), "audit");
        let bystander = agent(OwnerId::new(), "audit");

        guard.check_hire(&hirer, &hired, 100, "audit").await;

        assert_eq!(guard.hire_history(&hirer.agent_id).await.len(), 1);
        assert_eq!(guard.hire_history(&hired.agent_id).await.len(), 1);
        assert!(guard.hire_history(&bystander.agent_id).await.is_empty());
    }
}
