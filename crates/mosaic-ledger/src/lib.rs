//! Mosaic Ledger - Wallet balances, escrow, and streaming micropayments
//!
//! The ledger is:
//! - Account-keyed by WalletId
//! - Append-only (every transfer leaves a receipt)
//! - Idempotent on retry (a replayed idempotency key returns the original
//!   receipt without moving funds again)
//!
//! # Invariants
//!
//! 1. No negative balances
//! 2. An escrow resolves to exactly one of {release, refund}
//! 3. Stream payments never exceed the agreed total before settlement

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mosaic_types::{
    EventBus, JobId, MosaicError, MosaicEvent, ReceiptId, Result, WalletId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

pub mod stream;

pub use stream::StreamLedger;

/// Proof that a transfer executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub receipt_id: ReceiptId,
    pub from: WalletId,
    pub to: WalletId,
    pub amount: u64,
    pub idempotency_key: String,
    pub at: DateTime<Utc>,
}

/// Funds held by the protocol until a settlement condition resolves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EscrowRecord {
    payer: WalletId,
    amount: u64,
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<WalletId, u64>,
    escrows: HashMap<JobId, EscrowRecord>,
    receipts: HashMap<String, TransferReceipt>,
}

/// The Mosaic ledger. Thread-safe and designed for concurrent access;
/// operations on independent wallets and escrows never observe partial state.
#[derive(Clone)]
pub struct Ledger {
    state: Arc<RwLock<LedgerState>>,
    events: EventBus,
}

impl Ledger {
    pub fn new(events: EventBus) -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerState::default())),
            events,
        }
    }

    /// Credit a wallet from outside the system (funding)
    pub async fn deposit(&self, wallet: &WalletId, amount: u64) -> Result<u64> {
        let mut state = self.state.write().await;
        let balance = state.balances.entry(wallet.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(MosaicError::AmountOverflow)?;
        Ok(*balance)
    }

    /// Current balance of a wallet (zero for unknown wallets)
    pub async fn balance(&self, wallet: &WalletId) -> u64 {
        let state = self.state.read().await;
        state.balances.get(wallet).copied().unwrap_or(0)
    }

    /// Atomic transfer between wallets, idempotent on retry.
    ///
    /// A repeated `idempotency_key` returns the original receipt and moves
    /// nothing.
    pub async fn transfer(
        &self,
        from: &WalletId,
        to: &WalletId,
        amount: u64,
        idempotency_key: impl Into<String>,
    ) -> Result<TransferReceipt> {
        let key = idempotency_key.into();
        let mut state = self.state.write().await;

        if let Some(receipt) = state.receipts.get(&key) {
            debug!(key, "transfer replayed, returning original receipt");
            return Ok(receipt.clone());
        }

        Self::debit(&mut state, from, amount)?;
        Self::credit(&mut state, to, amount)?;

        let receipt = TransferReceipt {
            receipt_id: ReceiptId::new(),
            from: from.clone(),
            to: to.clone(),
            amount,
            idempotency_key: key.clone(),
            at: Utc::now(),
        };
        state.receipts.insert(key, receipt.clone());

        info!(from = %from, to = %to, amount, "transfer executed");
        self.events.publish(MosaicEvent::PaymentSent {
            from: from.clone(),
            to: to.clone(),
            amount,
            at: receipt.at,
        });

        Ok(receipt)
    }

    fn debit(state: &mut LedgerState, wallet: &WalletId, amount: u64) -> Result<()> {
        let balance = state
            .balances
            .get_mut(wallet)
            .ok_or_else(|| MosaicError::AccountNotFound {
                account: wallet.to_string(),
            })?;
        *balance = balance
            .checked_sub(amount)
            .ok_or_else(|| MosaicError::InsufficientBalance {
                account: wallet.to_string(),
                available: *balance,
                required: amount,
            })?;
        Ok(())
    }

    fn credit(state: &mut LedgerState, wallet: &WalletId, amount: u64) -> Result<()> {
        let balance = state.balances.entry(wallet.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(MosaicError::AmountOverflow)?;
        Ok(())
    }

    /// Debit the payer and hold the amount in escrow for a job
    pub async fn lock_escrow(&self, job_id: &JobId, payer: &WalletId, amount: u64) -> Result<()> {
        let mut state = self.state.write().await;
        Self::debit(&mut state, payer, amount)?;
        state.escrows.insert(
            job_id.clone(),
            EscrowRecord {
                payer: payer.clone(),
                amount,
            },
        );
        info!(job = %job_id, payer = %payer, amount, "escrow locked");
        Ok(())
    }

    /// Amount currently escrowed for a job, if any
    pub async fn escrowed(&self, job_id: &JobId) -> Option<u64> {
        let state = self.state.read().await;
        state.escrows.get(job_id).map(|e| e.amount)
    }

    /// Release the escrow to a payee. Consumes the escrow record, so a second
    /// release (or a refund after release) fails — no double-spend.
    pub async fn release_escrow(&self, job_id: &JobId, to: &WalletId) -> Result<u64> {
        let mut state = self.state.write().await;
        let escrow = state
            .escrows
            .remove(job_id)
            .ok_or_else(|| MosaicError::EscrowNotFound {
                job_id: job_id.to_string(),
            })?;
        Self::credit(&mut state, to, escrow.amount)?;
        info!(job = %job_id, to = %to, amount = escrow.amount, "escrow released");
        self.events.publish(MosaicEvent::PaymentSent {
            from: escrow.payer,
            to: to.clone(),
            amount: escrow.amount,
            at: Utc::now(),
        });
        Ok(escrow.amount)
    }

    /// Refund the escrow to the payer. Consumes the escrow record.
    pub async fn refund_escrow(&self, job_id: &JobId) -> Result<u64> {
        let mut state = self.state.write().await;
        let escrow = state
            .escrows
            .remove(job_id)
            .ok_or_else(|| MosaicError::EscrowNotFound {
                job_id: job_id.to_string(),
            })?;
        let payer = escrow.payer.clone();
        Self::credit(&mut state, &payer, escrow.amount)?;
        info!(job = %job_id, payer = %payer, amount = escrow.amount, "escrow refunded");
        Ok(escrow.amount)
    }
}
