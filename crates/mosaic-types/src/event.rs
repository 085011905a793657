//! Marketplace events
//!
//! Flat records carrying ids, amounts, and timestamps, published on a
//! broadcast bus for a presentation layer to consume. Emission is
//! fire-and-forget: a bus with no subscribers drops events silently.

use crate::{AgentId, AuctionId, JobId, StepId, StreamId, WalletId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default broadcast channel capacity
pub const EVENT_BUS_CAPACITY: usize = 1024;

/// Everything the core publishes to the outside world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MosaicEvent {
    // Workflow lifecycle
    WorkflowStarted {
        workflow_id: WorkflowId,
        task: String,
        at: DateTime<Utc>,
    },
    StepCompleted {
        workflow_id: WorkflowId,
        step_id: StepId,
        success: bool,
        skipped: bool,
        at: DateTime<Utc>,
    },
    WorkflowCompleted {
        workflow_id: WorkflowId,
        success: bool,
        at: DateTime<Utc>,
    },
    WorkflowCancelled {
        workflow_id: WorkflowId,
        at: DateTime<Utc>,
    },

    // Auction
    AuctionStarted {
        auction_id: AuctionId,
        capability: String,
        candidates: usize,
        at: DateTime<Utc>,
    },
    BidScored {
        auction_id: AuctionId,
        agent_id: AgentId,
        score: f64,
        price: u64,
        at: DateTime<Utc>,
    },
    AuctionWon {
        auction_id: AuctionId,
        agent_id: AgentId,
        score: f64,
        price: u64,
        at: DateTime<Utc>,
    },

    // Collusion guard
    HireApproved {
        hirer: AgentId,
        hired: AgentId,
        amount: u64,
        at: DateTime<Utc>,
    },
    HireFlagged {
        hirer: AgentId,
        hired: AgentId,
        amount: u64,
        reason: String,
        at: DateTime<Utc>,
    },
    HireBlocked {
        hirer: AgentId,
        hired: AgentId,
        amount: u64,
        reason: String,
        at: DateTime<Utc>,
    },

    // Payments
    PaymentSent {
        from: WalletId,
        to: WalletId,
        amount: u64,
        at: DateTime<Utc>,
    },

    // Streams
    StreamOpened {
        stream_id: StreamId,
        total_price: u64,
        at: DateTime<Utc>,
    },
    StreamMicroPayment {
        stream_id: StreamId,
        tokens: u64,
        amount: u64,
        at: DateTime<Utc>,
    },
    StreamSettled {
        stream_id: StreamId,
        final_amount: u64,
        total_paid: u64,
        at: DateTime<Utc>,
    },

    // Verifiable jobs
    JobCreated {
        job_id: JobId,
        payment_amount: u64,
        at: DateTime<Utc>,
    },
    JobCommitted {
        job_id: JobId,
        worker: AgentId,
        at: DateTime<Utc>,
    },
    JobVerified {
        job_id: JobId,
        worker: AgentId,
        amount: u64,
        at: DateTime<Utc>,
    },
    JobRejected {
        job_id: JobId,
        slashed: u64,
        at: DateTime<Utc>,
    },
    JobExpired {
        job_id: JobId,
        refund: u64,
        at: DateTime<Utc>,
    },
}

/// Broadcast bus for [`MosaicEvent`]s.
///
/// Cloneable; every clone publishes into the same channel. Subscribers that
/// fall behind lose the oldest events (tokio broadcast semantics), which is
/// acceptable for a presentation feed.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MosaicEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Send errors (no live subscribers) are ignored.
    pub fn publish(&self, event: MosaicEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event feed
    pub fn subscribe(&self) -> broadcast::Receiver<MosaicEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let event = MosaicEvent::WorkflowStarted {
            workflow_id: WorkflowId::new(),
            task: "test".to_string(),
            at: Utc::now(),
        };
        bus.publish(event.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(MosaicEvent::WorkflowCancelled {
            workflow_id: WorkflowId::new(),
            at: Utc::now(),
        });
    }
}
