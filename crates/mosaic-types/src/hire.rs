//! Hire-edge audit types
//!
//! Every approved hire leaves an edge in an append-only log. The collusion
//! guard reads the trailing window of that log to detect repeated-hire and
//! circular-hire patterns. Blocked hires are never recorded, so rejected
//! attempts cannot pollute future decisions.

use crate::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One approved hire between two agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HireEdge {
    pub hirer: AgentId,
    pub hired: AgentId,
    pub timestamp: DateTime<Utc>,
    pub amount: u64,
    pub capability: String,
}

/// Outcome of a collusion check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HireDecision {
    pub allowed: bool,
    /// Allowed but suspicious (soft price-deviation threshold exceeded)
    pub flagged: bool,
    pub reason: String,
}

impl HireDecision {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            flagged: false,
            reason: "ok".to_string(),
        }
    }

    pub fn flagged(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            flagged: true,
            reason: reason.into(),
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            flagged: false,
            reason: reason.into(),
        }
    }
}
