//! Mosaic Jobs - Escrow-backed verifiable job state machine
//!
//! A job couples doing the work with getting paid. The payer escrows the
//! full payment at creation. A worker with sufficient posted stake commits
//! to an output hash before revealing it, so results cannot be shopped
//! around or front-run. Settlement is proof-gated: the reveal must match
//! the commitment bit-for-bit, and only then is the external verifier
//! consulted. A valid proof releases the escrow to the worker; an invalid
//! proof refunds the payer and slashes the worker's stake. Deadlines are
//! soft: expiry is detected on the next transition attempt (or by an
//! explicit sweep), never by an active timer.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use mosaic_ledger::Ledger;
use mosaic_registry::AgentRegistry;
use mosaic_types::{
    Agent, AgentId, EventBus, Job, JobId, JobSettlement, JobStatus, MosaicError, MosaicEvent,
    ProofVerifier, Result, WalletId,
};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Job lifecycle configuration
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// How long a worker has to commit after creation
    pub commitment_window: Duration,
    /// How long the committed worker has to submit a proof after creation
    pub submission_window: Duration,
    /// Minimum stake a worker must have posted to commit
    pub minimum_stake: u64,
    /// Percentage of the worker's stake slashed on a rejected proof
    pub slash_percent: u8,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            commitment_window: Duration::minutes(5),
            submission_window: Duration::minutes(30),
            minimum_stake: 1_000,
            slash_percent: 50,
        }
    }
}

/// Derive the commitment hash binding (worker, job, output preview, nonce).
///
/// The binding makes a commitment worthless to any other worker or job, so
/// it cannot be front-run or replayed.
pub fn commitment_hash_for(
    worker: &AgentId,
    job_id: &JobId,
    output_preview: &str,
    nonce: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(worker.to_string().as_bytes());
    hasher.update(job_id.to_string().as_bytes());
    hasher.update(output_preview.as_bytes());
    hasher.update(nonce.as_bytes());
    hex::encode(hasher.finalize())
}

/// A random nonce for commitment construction
pub fn random_nonce() -> String {
    use rand::Rng;
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

struct JobState {
    jobs: HashMap<JobId, Job>,
    /// Wallet each committed worker gets paid into
    worker_wallets: HashMap<JobId, WalletId>,
    /// Posted stake per worker, held in the stake vault wallet
    stakes: HashMap<AgentId, u64>,
}

/// The verifiable job manager.
///
/// Job transitions touch only their own entry; operations on job A never
/// wait on the settlement of job B beyond the shared map lock.
#[derive(Clone)]
pub struct JobManager {
    config: JobConfig,
    state: Arc<RwLock<JobState>>,
    ledger: Ledger,
    registry: AgentRegistry,
    verifier: Arc<dyn ProofVerifier>,
    events: EventBus,
    /// Wallet holding all posted stakes
    stake_vault: WalletId,
    /// Wallet receiving slashed stakes
    treasury: WalletId,
}

impl JobManager {
    pub fn new(
        ledger: Ledger,
        registry: AgentRegistry,
        verifier: Arc<dyn ProofVerifier>,
        events: EventBus,
    ) -> Self {
        Self::with_config(JobConfig::default(), ledger, registry, verifier, events)
    }

    pub fn with_config(
        config: JobConfig,
        ledger: Ledger,
        registry: AgentRegistry,
        verifier: Arc<dyn ProofVerifier>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(JobState {
                jobs: HashMap::new(),
                worker_wallets: HashMap::new(),
                stakes: HashMap::new(),
            })),
            ledger,
            registry,
            verifier,
            events,
            stake_vault: WalletId::new(),
            treasury: WalletId::new(),
        }
    }

    /// The treasury wallet receiving slashed stakes
    pub fn treasury(&self) -> &WalletId {
        &self.treasury
    }

    /// Post stake from a worker's wallet into the stake vault
    pub async fn post_stake(
        &self,
        worker: &AgentId,
        from_wallet: &WalletId,
        amount: u64,
    ) -> Result<u64> {
        self.ledger
            .transfer(
                from_wallet,
                &self.stake_vault,
                amount,
                format!("stake_{worker}_{}", random_nonce()),
            )
            .await?;
        let mut state = self.state.write().await;
        let stake = state.stakes.entry(worker.clone()).or_insert(0);
        *stake += amount;
        info!(worker = %worker, amount, total = *stake, "stake posted");
        Ok(*stake)
    }

    /// Current posted stake of a worker
    pub async fn stake_of(&self, worker: &AgentId) -> u64 {
        let state = self.state.read().await;
        state.stakes.get(worker).copied().unwrap_or(0)
    }

    /// Create a job: escrow the payment and stamp the deadlines.
    pub async fn create_job(
        &self,
        payer: &WalletId,
        input_hash: impl Into<String>,
        payment_amount: u64,
        model_id: impl Into<String>,
    ) -> Result<JobId> {
        let job_id = JobId::new();
        self.ledger
            .lock_escrow(&job_id, payer, payment_amount)
            .await?;

        let now = Utc::now();
        let job = Job {
            job_id: job_id.clone(),
            payer: payer.clone(),
            worker: None,
            payment_amount,
            input_hash: input_hash.into(),
            commitment_hash: None,
            output_hash: None,
            created_at: now,
            commitment_deadline: now + self.config.commitment_window,
            submission_deadline: now + self.config.submission_window,
            status: JobStatus::Created,
            model_id: model_id.into(),
        };

        info!(job = %job_id, payment_amount, "job created");
        self.events.publish(MosaicEvent::JobCreated {
            job_id: job_id.clone(),
            payment_amount,
            at: now,
        });

        self.state.write().await.jobs.insert(job_id.clone(), job);
        Ok(job_id)
    }

    /// Commit a worker to a job.
    ///
    /// Requires the job to be Created, the commitment deadline to be open,
    /// and the worker's posted stake to meet the minimum. A late attempt
    /// marks the job Expired and refunds the payer.
    pub async fn commit_to_job(
        &self,
        job_id: &JobId,
        worker: &Agent,
        commitment_hash: impl Into<String>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| MosaicError::JobNotFound {
                job_id: job_id.to_string(),
            })?;

        if job.status != JobStatus::Created {
            return Err(MosaicError::InvalidJobState {
                job_id: job_id.to_string(),
                state: job.status.to_string(),
                expected: JobStatus::Created.to_string(),
            });
        }

        let now = Utc::now();
        if job.commitment_expired(now) {
            let deadline = job.commitment_deadline;
            job.status = JobStatus::Expired;
            drop(state);
            let refund = self.ledger.refund_escrow(job_id).await?;
            self.events.publish(MosaicEvent::JobExpired {
                job_id: job_id.clone(),
                refund,
                at: now,
            });
            return Err(MosaicError::DeadlinePassed {
                job_id: job_id.to_string(),
                deadline: deadline.to_rfc3339(),
            });
        }

        let posted = state.stakes.get(&worker.agent_id).copied().unwrap_or(0);
        if posted < self.config.minimum_stake {
            return Err(MosaicError::InsufficientStake {
                required: self.config.minimum_stake,
                posted,
            });
        }

        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| MosaicError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        job.status = JobStatus::Committed;
        job.worker = Some(worker.agent_id.clone());
        job.commitment_hash = Some(commitment_hash.into());
        state
            .worker_wallets
            .insert(job_id.clone(), worker.wallet.clone());

        info!(job = %job_id, worker = %worker.agent_id, "job committed");
        self.events.publish(MosaicEvent::JobCommitted {
            job_id: job_id.clone(),
            worker: worker.agent_id.clone(),
            at: now,
        });
        Ok(())
    }

    /// Submit the revealed output and proof for a committed job.
    ///
    /// The reveal must equal the commitment exactly — any mismatch rejects
    /// without consulting the proof system and leaves the job Committed. A
    /// transient verifier failure also leaves the job Committed so the
    /// submission can be retried.
    pub async fn submit_proof(
        &self,
        job_id: &JobId,
        output_hash: impl Into<String>,
        proof: &[u8],
        reveal_hash: &str,
    ) -> Result<JobSettlement> {
        let output_hash = output_hash.into();
        let (worker, worker_wallet, payer, payment_amount) = {
            let mut state = self.state.write().await;
            let job = state
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| MosaicError::JobNotFound {
                    job_id: job_id.to_string(),
                })?;

            if job.status != JobStatus::Committed {
                return Err(MosaicError::InvalidJobState {
                    job_id: job_id.to_string(),
                    state: job.status.to_string(),
                    expected: JobStatus::Committed.to_string(),
                });
            }

            let now = Utc::now();
            if job.submission_expired(now) {
                let deadline = job.submission_deadline;
                job.status = JobStatus::Expired;
                drop(state);
                let refund = self.ledger.refund_escrow(job_id).await?;
                self.events.publish(MosaicEvent::JobExpired {
                    job_id: job_id.clone(),
                    refund,
                    at: now,
                });
                return Err(MosaicError::DeadlinePassed {
                    job_id: job_id.to_string(),
                    deadline: deadline.to_rfc3339(),
                });
            }

            let committed = job.commitment_hash.as_deref().unwrap_or_default();
            if committed != reveal_hash {
                warn!(job = %job_id, "reveal does not match commitment");
                return Err(MosaicError::CommitmentMismatch {
                    job_id: job_id.to_string(),
                });
            }

            job.status = JobStatus::Submitted;
            job.output_hash = Some(output_hash.clone());

            let worker = job
                .worker
                .clone()
                .ok_or_else(|| MosaicError::internal("committed job has no worker"))?;
            let payer = job.payer.clone();
            let payment_amount = job.payment_amount;
            let wallet = state
                .worker_wallets
                .get(job_id)
                .cloned()
                .ok_or_else(|| MosaicError::internal("committed job has no worker wallet"))?;
            (worker, wallet, payer, payment_amount)
        };

        // Verifier consulted only after the reveal matched.
        let public_instances = vec![output_hash, job_id.to_string()];
        let valid = match self
            .verifier
            .verify(proof, &public_instances)
            .await
        {
            Ok(valid) => valid,
            Err(err) => {
                // Transient verifier failure: roll back to Committed so the
                // submission can be retried. A job moved elsewhere while the
                // verifier was in flight (a dispute) keeps its new status.
                let mut state = self.state.write().await;
                if let Some(job) = state.jobs.get_mut(job_id) {
                    if job.status == JobStatus::Submitted {
                        job.status = JobStatus::Committed;
                        job.output_hash = None;
                    }
                }
                return Err(err);
            }
        };

        if valid {
            self.settle_submitted(job_id, JobStatus::Verified).await?;
            let amount = self.ledger.release_escrow(job_id, &worker_wallet).await?;
            if let Err(err) = self.registry.record_outcome(&worker, true).await {
                warn!(worker = %worker, error = %err, "could not record task outcome");
            }
            info!(job = %job_id, worker = %worker, amount, "job verified");
            self.events.publish(MosaicEvent::JobVerified {
                job_id: job_id.clone(),
                worker: worker.clone(),
                amount,
                at: Utc::now(),
            });
            Ok(JobSettlement::Verified { worker, amount })
        } else {
            self.settle_submitted(job_id, JobStatus::Rejected).await?;
            let refund = self.ledger.refund_escrow(job_id).await?;
            let slashed = self.slash(&worker).await?;
            if let Err(err) = self.registry.record_outcome(&worker, false).await {
                warn!(worker = %worker, error = %err, "could not record task outcome");
            }
            info!(job = %job_id, worker = %worker, refund, slashed, "job rejected");
            self.events.publish(MosaicEvent::JobRejected {
                job_id: job_id.clone(),
                slashed,
                at: Utc::now(),
            });
            Ok(JobSettlement::Rejected {
                refunded_to: payer,
                refund: payment_amount.min(refund),
                slashed,
            })
        }
    }

    /// Move a Submitted job to its settlement status before any funds move.
    ///
    /// The state lock is not held while the verifier runs, so the job may
    /// have been disputed in the meantime. In that case the settlement is
    /// abandoned and the escrow stays locked.
    async fn settle_submitted(&self, job_id: &JobId, status: JobStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| MosaicError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        if job.status != JobStatus::Submitted {
            warn!(job = %job_id, status = %job.status, "job moved during verification, settlement abandoned");
            return Err(MosaicError::InvalidJobState {
                job_id: job_id.to_string(),
                state: job.status.to_string(),
                expected: JobStatus::Submitted.to_string(),
            });
        }
        job.status = status;
        state.worker_wallets.remove(job_id);
        Ok(())
    }

    /// Slash the configured percentage of a worker's stake to the treasury
    async fn slash(&self, worker: &AgentId) -> Result<u64> {
        let slashed = {
            let mut state = self.state.write().await;
            let stake = state.stakes.entry(worker.clone()).or_insert(0);
            let slashed = *stake * self.config.slash_percent as u64 / 100;
            *stake -= slashed;
            slashed
        };
        if slashed > 0 {
            self.ledger
                .transfer(
                    &self.stake_vault,
                    &self.treasury,
                    slashed,
                    format!("slash_{worker}_{}", random_nonce()),
                )
                .await?;
        }
        Ok(slashed)
    }

    /// Escalate a job to out-of-band arbitration. The escrow stays locked;
    /// no settlement semantics are defined here.
    pub async fn dispute(&self, job_id: &JobId) -> Result<()> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| MosaicError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        if job.status.is_terminal() {
            return Err(MosaicError::InvalidJobState {
                job_id: job_id.to_string(),
                state: job.status.to_string(),
                expected: "a non-terminal state".to_string(),
            });
        }
        job.status = JobStatus::Disputed;
        warn!(job = %job_id, "job disputed, escrow held for arbitration");
        Ok(())
    }

    /// Mark and refund every job whose deadline has passed.
    ///
    /// Expiry is otherwise detected lazily on the next transition attempt;
    /// this sweep exists for embedders that want timely refunds. Absence of
    /// action is not provable cheating, so no stake is slashed.
    pub async fn sweep_expired(&self) -> Result<Vec<JobSettlement>> {
        let now = Utc::now();
        let expired: Vec<(JobId, WalletId)> = {
            let mut state = self.state.write().await;
            let mut expired = Vec::new();
            for job in state.jobs.values_mut() {
                let lapsed = match job.status {
                    JobStatus::Created => job.commitment_expired(now),
                    JobStatus::Committed => job.submission_expired(now),
                    _ => false,
                };
                if lapsed {
                    job.status = JobStatus::Expired;
                    expired.push((job.job_id.clone(), job.payer.clone()));
                }
            }
            for (job_id, _) in &expired {
                state.worker_wallets.remove(job_id);
            }
            expired
        };

        let mut settlements = Vec::new();
        for (job_id, payer) in expired {
            let refund = self.ledger.refund_escrow(&job_id).await?;
            self.events.publish(MosaicEvent::JobExpired {
                job_id: job_id.clone(),
                refund,
                at: now,
            });
            settlements.push(JobSettlement::Expired {
                refunded_to: payer,
                refund,
            });
        }
        Ok(settlements)
    }

    /// Fetch a job by id, for audit
    pub async fn get_job(&self, job_id: &JobId) -> Result<Job> {
        let state = self.state.read().await;
        state
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| MosaicError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }
}
