//! Mosaic Types - Canonical domain types for the agent marketplace
//!
//! This crate contains all foundational types for Mosaic with zero dependencies
//! on other mosaic crates. It defines the complete type system for:
//!
//! - Identity types (AgentId, WorkflowId, JobId, etc.)
//! - Agent and capability types
//! - Workflow templates, steps, and execution context
//! - Verifiable job lifecycle types
//! - Payment stream types
//! - Hire-edge audit types
//! - Marketplace events
//!
//! # Core Invariants
//!
//! These types support the Mosaic economic-security invariants:
//!
//! 1. Reputation is always in [0, 100]
//! 2. Job status only moves along the defined transition graph
//! 3. Escrowed funds resolve to exactly one of {release, refund}
//! 4. Stream payments never exceed the agreed total before settlement
//! 5. No hire edge exists between agents sharing an owner

pub mod agent;
pub mod error;
pub mod event;
pub mod hire;
pub mod identity;
pub mod job;
pub mod seams;
pub mod stream;
pub mod workflow;

pub use agent::*;
pub use error::*;
pub use event::*;
pub use hire::*;
pub use identity::*;
pub use job::*;
pub use seams::*;
pub use stream::*;
pub use workflow::*;

/// Version of the Mosaic types schema
pub const TYPES_VERSION: &str = "0.1.0";
