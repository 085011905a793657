//! Traits at the seams to external collaborators
//!
//! The task decomposer, step execution, and proof verification are external
//! services. The core consumes them through these object-safe async traits.

use crate::{Agent, Result, Step, StepId, StepResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Read-only capability discovery.
///
/// Implementations must return only active agents.
#[async_trait::async_trait]
pub trait CapabilityDirectory: Send + Sync {
    async fn agents_for_capability(&self, capability: &str) -> Result<Vec<Agent>>;
}

/// What the external executor reports back for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub success: bool,
    pub output: Option<String>,
    pub structured_data: serde_json::Value,
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn ok(output: impl Into<String>, structured_data: serde_json::Value) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            structured_data,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            structured_data: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

/// The external step executor.
///
/// May itself trigger nested hires; the engine bounds that recursion with a
/// hire-depth counter. An `Err` from `execute` is treated identically to a
/// reported failure.
#[async_trait::async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        step: &Step,
        prior_results: &HashMap<StepId, StepResult>,
        input: serde_json::Value,
    ) -> Result<StepOutcome>;
}

/// The external proof verifier.
///
/// Assumed deterministic and side-effect-free. `false` is a first-class
/// outcome (drives the Rejected transition), not an error.
#[async_trait::async_trait]
pub trait ProofVerifier: Send + Sync {
    async fn verify(&self, proof: &[u8], public_instances: &[String]) -> Result<bool>;
}
