//! Token-metered streaming micropayments
//!
//! A stream accrues payment as work happens instead of settling in one lump
//! sum. The rate is `total_price / expected_tokens` — a planning estimate,
//! not a hard cap. A micropayment fires each time the token counter crosses
//! a batch boundary; settlement pays whatever residual remains so the
//! post-settlement total equals the agreed price exactly, even when the
//! actual token count never lands on a boundary or diverges from the
//! estimate.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use mosaic_types::{
    EventBus, MicroPayment, MosaicError, MosaicEvent, PaymentStream, Result, StreamId, WalletId,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::Ledger;

/// The streaming-payment ledger. Each stream carries its own lock; the
/// shared map lock is held only to look an entry up, so recording tokens
/// on stream A never blocks stream B even while A's transfer is in flight.
#[derive(Clone)]
pub struct StreamLedger {
    streams: Arc<RwLock<HashMap<StreamId, Arc<Mutex<PaymentStream>>>>>,
    ledger: Ledger,
    events: EventBus,
}

impl StreamLedger {
    pub fn new(ledger: Ledger, events: EventBus) -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
            ledger,
            events,
        }
    }

    async fn entry(&self, stream_id: &StreamId) -> Result<Arc<Mutex<PaymentStream>>> {
        let streams = self.streams.read().await;
        streams
            .get(stream_id)
            .cloned()
            .ok_or_else(|| MosaicError::StreamNotFound {
                stream_id: stream_id.to_string(),
            })
    }

    /// Open a stream from payer to payee.
    ///
    /// `expected_tokens` sets the per-token rate; the stream still settles
    /// to `total_price` exactly if the actual count diverges.
    pub async fn open_stream(
        &self,
        payer: &WalletId,
        payee: &WalletId,
        total_price: u64,
        expected_tokens: u64,
        batch_size: u64,
    ) -> Result<StreamId> {
        if expected_tokens == 0 {
            return Err(MosaicError::invalid_input(
                "expected_tokens",
                "must be greater than zero",
            ));
        }
        if batch_size == 0 {
            return Err(MosaicError::invalid_input(
                "batch_size",
                "must be greater than zero",
            ));
        }

        let stream = PaymentStream {
            stream_id: StreamId::new(),
            payer: payer.clone(),
            payee: payee.clone(),
            total_price,
            rate_per_token: total_price as f64 / expected_tokens as f64,
            cumulative_tokens: 0,
            cumulative_paid: 0,
            batch_size,
            settled: false,
            opened_at: Utc::now(),
            settled_at: None,
        };
        let stream_id = stream.stream_id.clone();

        info!(stream = %stream_id, total_price, batch_size, "stream opened");
        self.events.publish(MosaicEvent::StreamOpened {
            stream_id: stream_id.clone(),
            total_price,
            at: stream.opened_at,
        });

        self.streams
            .write()
            .await
            .insert(stream_id.clone(), Arc::new(Mutex::new(stream)));
        Ok(stream_id)
    }

    /// Record `n` tokens of work against a stream.
    ///
    /// Fires one micropayment per batch boundary crossed; each payment is
    /// capped so cumulative_paid never exceeds total_price before settlement.
    pub async fn record_tokens(&self, stream_id: &StreamId, n: u64) -> Result<Vec<MicroPayment>> {
        let entry = self.entry(stream_id).await?;
        let mut stream = entry.lock().await;
        if stream.settled {
            return Err(MosaicError::StreamClosed {
                stream_id: stream_id.to_string(),
            });
        }

        let before = stream.cumulative_tokens;
        stream.cumulative_tokens = before
            .checked_add(n)
            .ok_or(MosaicError::AmountOverflow)?;

        let batches_before = before / stream.batch_size;
        let batches_after = stream.cumulative_tokens / stream.batch_size;

        let mut payments = Vec::new();
        for _ in batches_before..batches_after {
            let nominal = (stream.batch_size as f64 * stream.rate_per_token) as u64;
            let remaining = stream.total_price - stream.cumulative_paid;
            let amount = nominal.min(remaining);
            if amount == 0 {
                break;
            }

            let batch_index = batches_before + payments.len() as u64 + 1;
            self.ledger
                .transfer(
                    &stream.payer,
                    &stream.payee,
                    amount,
                    format!("{stream_id}_batch_{batch_index}"),
                )
                .await?;
            stream.cumulative_paid += amount;

            let payment = MicroPayment {
                stream_id: stream_id.clone(),
                tokens: stream.batch_size,
                amount,
                at: Utc::now(),
            };
            debug!(stream = %stream_id, amount, paid = stream.cumulative_paid, "micropayment");
            self.events.publish(MosaicEvent::StreamMicroPayment {
                stream_id: stream_id.clone(),
                tokens: stream.batch_size,
                amount,
                at: payment.at,
            });
            payments.push(payment);
        }

        Ok(payments)
    }

    /// Settle the stream: pay the residual so cumulative_paid equals
    /// total_price exactly. A second settle fails with StreamClosed.
    pub async fn settle(&self, stream_id: &StreamId) -> Result<u64> {
        let entry = self.entry(stream_id).await?;
        let mut stream = entry.lock().await;
        if stream.settled {
            return Err(MosaicError::StreamClosed {
                stream_id: stream_id.to_string(),
            });
        }

        let residual = stream.total_price - stream.cumulative_paid;
        if residual > 0 {
            self.ledger
                .transfer(
                    &stream.payer,
                    &stream.payee,
                    residual,
                    format!("{stream_id}_settle"),
                )
                .await?;
            stream.cumulative_paid += residual;
        }
        stream.settled = true;
        stream.settled_at = Some(Utc::now());

        info!(stream = %stream_id, residual, total = stream.cumulative_paid, "stream settled");
        self.events.publish(MosaicEvent::StreamSettled {
            stream_id: stream_id.clone(),
            final_amount: residual,
            total_paid: stream.cumulative_paid,
            at: Utc::now(),
        });

        Ok(residual)
    }

    /// Snapshot of a stream's state
    pub async fn get_stream(&self, stream_id: &StreamId) -> Result<PaymentStream> {
        let entry = self.entry(stream_id).await?;
        let stream = entry.lock().await;
        Ok(stream.clone())
    }
}
