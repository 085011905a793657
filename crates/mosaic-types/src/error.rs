//! Error types for Mosaic
//!
//! The taxonomy follows four families: validation errors abort the call that
//! raised them and are never retried; transient external errors are the only
//! retriable family; policy violations are always fatal to the specific
//! operation; an invalid proof is *not* an error — it drives the Rejected
//! job transition as a first-class outcome.

use thiserror::Error;

/// Result type for Mosaic operations
pub type Result<T> = std::result::Result<T, MosaicError>;

/// Mosaic error types
#[derive(Debug, Clone, Error)]
pub enum MosaicError {
    // ========================================================================
    // Validation Errors
    // ========================================================================

    /// Workflow template not found
    #[error("Workflow template {template_id} not found")]
    TemplateNotFound { template_id: String },

    /// Malformed workflow template
    #[error("Invalid template: {reason}")]
    InvalidTemplate { reason: String },

    /// Auction called with an empty candidate set
    #[error("No candidates available for capability {capability}")]
    NoCandidates { capability: String },

    /// Invalid input
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    // ========================================================================
    // Policy Violations
    // ========================================================================

    /// Hire blocked by the collusion guard
    #[error("Hire blocked: {reason}")]
    HireBlocked { reason: String },

    /// Job deadline has passed
    #[error("Deadline passed for job {job_id}: {deadline}")]
    DeadlinePassed { job_id: String, deadline: String },

    /// Reveal hash does not match the commitment
    #[error("Commitment mismatch for job {job_id}")]
    CommitmentMismatch { job_id: String },

    /// Worker stake below the minimum
    #[error("Insufficient stake: required {required}, posted {posted}")]
    InsufficientStake { required: u64, posted: u64 },

    /// Operation not allowed in the job's current state
    #[error("Job {job_id} is in state {state}, operation requires {expected}")]
    InvalidJobState {
        job_id: String,
        state: String,
        expected: String,
    },

    // ========================================================================
    // Ledger Errors
    // ========================================================================

    /// Account not found
    #[error("Account {account} not found")]
    AccountNotFound { account: String },

    /// Insufficient balance
    #[error("Insufficient balance in {account}: have {available}, need {required}")]
    InsufficientBalance {
        account: String,
        available: u64,
        required: u64,
    },

    /// Escrow not found
    #[error("Escrow for job {job_id} not found")]
    EscrowNotFound { job_id: String },

    /// Amount overflow during arithmetic
    #[error("Amount overflow during arithmetic operation")]
    AmountOverflow,

    // ========================================================================
    // Stream Errors
    // ========================================================================

    /// Stream not found
    #[error("Payment stream {stream_id} not found")]
    StreamNotFound { stream_id: String },

    /// Stream already settled
    #[error("Payment stream {stream_id} is closed")]
    StreamClosed { stream_id: String },

    // ========================================================================
    // Job / Workflow Errors
    // ========================================================================

    /// Job not found
    #[error("Job {job_id} not found")]
    JobNotFound { job_id: String },

    /// Workflow run not found
    #[error("Workflow run {workflow_id} not found")]
    WorkflowNotFound { workflow_id: String },

    /// Hire recursion depth exceeded
    #[error("Hire depth {depth} exceeds maximum {max}")]
    HireDepthExceeded { depth: u32, max: u32 },

    // ========================================================================
    // Transient External Errors
    // ========================================================================

    /// External service call failure (discovery, ledger, proof service)
    #[error("External service {service} failed: {message}")]
    ExternalService { service: String, message: String },

    // ========================================================================
    // General Errors
    // ========================================================================

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MosaicError {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an external service error
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Check if this is a retriable error.
    ///
    /// Only transient external failures are retriable; validation errors and
    /// policy violations never are.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ExternalService { .. } | Self::Internal { .. }
        )
    }

    /// Check if this is a policy violation (always fatal to the operation)
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            Self::HireBlocked { .. }
                | Self::DeadlinePassed { .. }
                | Self::CommitmentMismatch { .. }
                | Self::InsufficientStake { .. }
                | Self::InvalidJobState { .. }
        )
    }

    /// Get an error code for event payloads and API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TemplateNotFound { .. } => "TEMPLATE_NOT_FOUND",
            Self::InvalidTemplate { .. } => "INVALID_TEMPLATE",
            Self::NoCandidates { .. } => "NO_CANDIDATES",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::HireBlocked { .. } => "HIRE_BLOCKED",
            Self::DeadlinePassed { .. } => "DEADLINE_PASSED",
            Self::CommitmentMismatch { .. } => "COMMITMENT_MISMATCH",
            Self::InsufficientStake { .. } => "INSUFFICIENT_STAKE",
            Self::InvalidJobState { .. } => "INVALID_JOB_STATE",
            Self::AccountNotFound { .. } => "ACCOUNT_NOT_FOUND",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::EscrowNotFound { .. } => "ESCROW_NOT_FOUND",
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::StreamNotFound { .. } => "STREAM_NOT_FOUND",
            Self::StreamClosed { .. } => "STREAM_CLOSED",
            Self::JobNotFound { .. } => "JOB_NOT_FOUND",
            Self::WorkflowNotFound { .. } => "WORKFLOW_NOT_FOUND",
            Self::HireDepthExceeded { .. } => "HIRE_DEPTH_EXCEEDED",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = MosaicError::InsufficientBalance {
            account: "test".to_string(),
            available: 50,
            required: 100,
        };
        assert_eq!(err.error_code(), "INSUFFICIENT_BALANCE");
    }

    #[test]
    fn test_retriable_errors() {
        let transient = MosaicError::external("discovery", "timeout");
        assert!(transient.is_retriable());

        let blocked = MosaicError::HireBlocked {
            reason: "same owner".to_string(),
        };
        assert!(!blocked.is_retriable());
        assert!(blocked.is_policy_violation());
    }
}
