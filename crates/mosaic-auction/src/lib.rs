//! Mosaic Auction - Attention auction engine
//!
//! Scores every candidate for a capability and selects one winner.
//! Selection is fully deterministic: the same candidate set always produces
//! the same winner, with ties broken by lowest price and then lowest agent
//! id. There is no hidden randomness anywhere in the scoring path.

use chrono::Utc;
use mosaic_types::{
    Agent, AuctionBid, AuctionId, AuctionOutcome, EventBus, MosaicError, MosaicEvent, Result,
};
use tracing::{debug, info};

/// Auction scoring configuration
#[derive(Debug, Clone)]
pub struct AuctionConfig {
    /// Weight given to reputation in the composite score
    pub reputation_weight: f64,
    /// Weight given to the price score in the composite score
    pub price_weight: f64,
    /// The max_price/price ratio saturates here, so a near-zero-price
    /// outlier cannot dominate on price alone
    pub price_ratio_cap: f64,
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            reputation_weight: 0.6,
            price_weight: 0.4,
            price_ratio_cap: 5.0,
        }
    }
}

/// The attention auction engine. Stateless apart from configuration.
#[derive(Clone)]
pub struct AuctionEngine {
    config: AuctionConfig,
    events: EventBus,
}

impl AuctionEngine {
    pub fn new(events: EventBus) -> Self {
        Self {
            config: AuctionConfig::default(),
            events,
        }
    }

    pub fn with_config(config: AuctionConfig, events: EventBus) -> Self {
        Self { config, events }
    }

    /// Score a single candidate.
    ///
    /// `score = reputation * w_rep + price_score * w_price`, where
    /// `price_score = min(max_price / price, cap) * 50`. A zero price takes
    /// the capped ratio directly.
    fn score(&self, agent: &Agent, max_price: u64) -> f64 {
        let ratio = if agent.price == 0 {
            self.config.price_ratio_cap
        } else {
            (max_price as f64 / agent.price as f64).min(self.config.price_ratio_cap)
        };
        let price_score = ratio * 50.0;
        agent.reputation as f64 * self.config.reputation_weight
            + price_score * self.config.price_weight
    }

    /// Run an auction over the candidate set for a capability.
    ///
    /// Fails with [`MosaicError::NoCandidates`] on an empty set.
    pub fn run_auction(&self, capability: &str, candidates: &[Agent]) -> Result<AuctionOutcome> {
        if candidates.is_empty() {
            return Err(MosaicError::NoCandidates {
                capability: capability.to_string(),
            });
        }

        let auction_id = AuctionId::new();
        self.events.publish(MosaicEvent::AuctionStarted {
            auction_id: auction_id.clone(),
            capability: capability.to_string(),
            candidates: candidates.len(),
            at: Utc::now(),
        });

        let max_price = candidates.iter().map(|a| a.price).max().unwrap_or(0);

        let mut bids: Vec<AuctionBid> = candidates
            .iter()
            .map(|agent| {
                let score = self.score(agent, max_price);
                debug!(auction = %auction_id, agent = %agent.agent_id, score, "bid scored");
                self.events.publish(MosaicEvent::BidScored {
                    auction_id: auction_id.clone(),
                    agent_id: agent.agent_id.clone(),
                    score,
                    price: agent.price,
                    at: Utc::now(),
                });
                AuctionBid {
                    agent_id: agent.agent_id.clone(),
                    reputation: agent.reputation,
                    price: agent.price,
                    score,
                }
            })
            .collect();

        // Highest score first; equal scores by lowest price, then lowest id,
        // so selection is reproducible.
        bids.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.price.cmp(&b.price))
                .then(a.agent_id.cmp(&b.agent_id))
        });

        let best = &bids[0];
        let winner = candidates
            .iter()
            .find(|a| a.agent_id == best.agent_id)
            .cloned()
            .ok_or_else(|| MosaicError::internal("winning bid lost its candidate"))?;

        info!(
            auction = %auction_id,
            capability,
            winner = %winner.agent_id,
            score = best.score,
            price = winner.price,
            "auction won"
        );
        self.events.publish(MosaicEvent::AuctionWon {
            auction_id,
            agent_id: winner.agent_id.clone(),
            score: best.score,
            price: winner.price,
            at: Utc::now(),
        });

        Ok(AuctionOutcome { winner, bids })
    }
}
