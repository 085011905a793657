//! Verifiable job lifecycle types
//!
//! A job couples "do the work" and "get paid": payment is escrowed at
//! creation, the worker commits to an output before revealing it, and the
//! escrow settles only after the reveal matches the commitment bit-for-bit
//! and the proof verifies.

use crate::{AgentId, JobId, WalletId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a verifiable job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Escrow locked, awaiting a worker commitment
    Created,
    /// A worker has committed to an output hash
    Committed,
    /// Proof submitted, verification in flight
    Submitted,
    /// Proof accepted: escrow released to the worker
    Verified,
    /// Proof rejected: escrow refunded, worker stake slashed
    Rejected,
    /// Deadline passed without commitment or submission: escrow refunded
    Expired,
    /// Escalated to out-of-band arbitration
    Disputed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Verified | Self::Rejected | Self::Expired | Self::Disputed
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Committed => "COMMITTED",
            Self::Submitted => "SUBMITTED",
            Self::Verified => "VERIFIED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
            Self::Disputed => "DISPUTED",
        };
        write!(f, "{s}")
    }
}

/// A verifiable job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    /// Wallet that escrowed the payment
    pub payer: WalletId,
    /// The committed worker, set on commitment
    pub worker: Option<AgentId>,
    /// Amount held in escrow until settlement
    pub payment_amount: u64,
    /// Hash of the job input
    pub input_hash: String,
    /// The worker's commitment, set on commitment
    pub commitment_hash: Option<String>,
    /// The revealed output hash, set on submission
    pub output_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    /// A worker must commit before this
    pub commitment_deadline: DateTime<Utc>,
    /// The committed worker must submit before this
    pub submission_deadline: DateTime<Utc>,
    pub status: JobStatus,
    /// Model the proof circuit is bound to
    pub model_id: String,
}

impl Job {
    /// Whether the commitment window has closed at `now`
    pub fn commitment_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.commitment_deadline
    }

    /// Whether the submission window has closed at `now`
    pub fn submission_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.submission_deadline
    }
}

/// How a job settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobSettlement {
    /// Proof verified: escrow released to the worker
    Verified { worker: AgentId, amount: u64 },
    /// Proof invalid: escrow refunded, stake slashed. An expected,
    /// first-class outcome rather than an error.
    Rejected {
        refunded_to: WalletId,
        refund: u64,
        slashed: u64,
    },
    /// Deadline passed: escrow refunded, no slash
    Expired { refunded_to: WalletId, refund: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Created.is_terminal());
        assert!(!JobStatus::Committed.is_terminal());
        assert!(JobStatus::Verified.is_terminal());
        assert!(JobStatus::Rejected.is_terminal());
        assert!(JobStatus::Expired.is_terminal());
        assert!(JobStatus::Disputed.is_terminal());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(JobStatus::Committed.to_string(), "COMMITTED");
    }
}
