//! Per-step hiring pipeline
//!
//! Discovery, auction, and collusion vetting for one hire, in that order.
//! The coordinator is cloneable so step executors that hire sub-agents can
//! carry one; the depth counter bounds that recursion.

use std::sync::Arc;

use mosaic_auction::AuctionEngine;
use mosaic_collusion::CollusionGuard;
use mosaic_types::{Agent, CapabilityDirectory, MosaicError, Result};
use tracing::{info, warn};

/// Hiring limits
#[derive(Debug, Clone)]
pub struct HireConfig {
    /// Maximum nesting depth for hires triggered by executors
    pub max_hire_depth: u32,
}

impl Default for HireConfig {
    fn default() -> Self {
        Self { max_hire_depth: 3 }
    }
}

/// Runs the registry → auction → collusion-guard pipeline for one hire.
#[derive(Clone)]
pub struct HireCoordinator {
    config: HireConfig,
    directory: Arc<dyn CapabilityDirectory>,
    auction: AuctionEngine,
    guard: CollusionGuard,
}

impl HireCoordinator {
    pub fn new(
        directory: Arc<dyn CapabilityDirectory>,
        auction: AuctionEngine,
        guard: CollusionGuard,
    ) -> Self {
        Self {
            config: HireConfig::default(),
            directory,
            auction,
            guard,
        }
    }

    pub fn with_config(mut self, config: HireConfig) -> Self {
        self.config = config;
        self
    }

    /// Hire an agent for a capability on behalf of `hirer`.
    ///
    /// `depth` is 0 for a hire made directly by the workflow engine and
    /// increments for each level of executor-triggered sub-hiring. A blocked
    /// hire is a policy violation and fails the caller's step; the losing
    /// bids and the block itself are observable on the event bus.
    pub async fn hire(&self, hirer: &Agent, capability: &str, depth: u32) -> Result<Agent> {
        if depth >= self.config.max_hire_depth {
            return Err(MosaicError::HireDepthExceeded {
                depth,
                max: self.config.max_hire_depth,
            });
        }

        let candidates = self.directory.agents_for_capability(capability).await?;
        // The hirer never bids on its own step
        let candidates: Vec<Agent> = candidates
            .into_iter()
            .filter(|a| a.agent_id != hirer.agent_id)
            .collect();

        let outcome = self.auction.run_auction(capability, &candidates)?;
        let winner = outcome.winner;

        let decision = self
            .guard
            .check_hire(hirer, &winner, winner.price, capability)
            .await;
        if !decision.allowed {
            return Err(MosaicError::HireBlocked {
                reason: decision.reason,
            });
        }
        if decision.flagged {
            warn!(
                hirer = %hirer.agent_id,
                hired = %winner.agent_id,
                reason = %decision.reason,
                "hire flagged but allowed"
            );
        }

        info!(
            hirer = %hirer.agent_id,
            hired = %winner.agent_id,
            capability,
            price = winner.price,
            depth,
            "agent hired"
        );
        Ok(winner)
    }
}
