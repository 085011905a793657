//! Payment stream types
//!
//! A stream meters payment by units of work (tokens) instead of settling in
//! one lump sum. Micropayments fire on batch boundaries; settlement pays the
//! residual so the cumulative total lands exactly on the agreed price.

use crate::{StreamId, WalletId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A token-metered payment stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStream {
    pub stream_id: StreamId,
    pub payer: WalletId,
    pub payee: WalletId,
    /// The agreed total; cumulative_paid equals this exactly after settlement
    pub total_price: u64,
    /// total_price / expected_tokens — a planning estimate, not a hard cap
    pub rate_per_token: f64,
    /// Tokens recorded so far
    pub cumulative_tokens: u64,
    /// Minor units paid so far; monotone, ≤ total_price until settlement
    pub cumulative_paid: u64,
    /// A micropayment fires each time the token counter crosses a multiple
    /// of this
    pub batch_size: u64,
    pub settled: bool,
    pub opened_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// One micropayment event fired on a batch boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroPayment {
    pub stream_id: StreamId,
    /// Tokens covered by this payment
    pub tokens: u64,
    /// Amount in minor units
    pub amount: u64,
    pub at: DateTime<Utc>,
}
