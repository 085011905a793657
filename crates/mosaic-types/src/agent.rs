//! Agent and capability types for Mosaic
//!
//! Agents advertise a capability at a price. The registry owns these records;
//! the workflow engine and auction only ever read them.

use crate::{AgentId, OwnerId, WalletId};
use serde::{Deserialize, Serialize};

/// Reputation an agent starts with before any task history exists.
pub const DEFAULT_REPUTATION: u8 = 80;

/// An agent listed in the capability registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent ID
    pub agent_id: AgentId,
    /// The human or org that operates this agent
    pub owner: OwnerId,
    /// Wallet receiving this agent's earnings
    pub wallet: WalletId,
    /// The capability this agent advertises (e.g. "market_data")
    pub capability: String,
    /// Asking price in minor currency units
    pub price: u64,
    /// Reputation score in [0, 100]
    pub reputation: u8,
    /// Whether the agent is accepting work
    pub active: bool,
}

/// Task counters backing an agent's derived reputation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationCounters {
    pub successful_tasks: u64,
    pub total_tasks: u64,
}

impl ReputationCounters {
    /// Derive the reputation score: `successful * 100 / total`, defaulting to
    /// [`DEFAULT_REPUTATION`] for agents with no history.
    pub fn score(&self) -> u8 {
        if self.total_tasks == 0 {
            return DEFAULT_REPUTATION;
        }
        ((self.successful_tasks * 100) / self.total_tasks).min(100) as u8
    }

    /// Record one task outcome
    pub fn record(&mut self, success: bool) {
        self.total_tasks += 1;
        if success {
            self.successful_tasks += 1;
        }
    }
}

/// A bid computed during an attention auction.
///
/// Bids are ephemeral: created per auction call and discarded with the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionBid {
    pub agent_id: AgentId,
    pub reputation: u8,
    pub price: u64,
    pub score: f64,
}

/// Result of an attention auction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionOutcome {
    /// The winning agent
    pub winner: Agent,
    /// All bids considered, including the winner's
    pub bids: Vec<AuctionBid>,
}
