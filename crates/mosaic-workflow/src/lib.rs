//! Mosaic Workflow - Step-graph execution over a marketplace of agents
//!
//! The engine walks a validated template one step at a time: evaluate the
//! step's condition, hire an agent for the step's capability, resolve the
//! step's input from prior outputs, hand it to the external executor, and
//! route to the next step through the success/failure jump pointers. A
//! skipped step always advances in template order; only executed steps
//! follow jumps.
//!
//! Payment for each hire happens in the mode the step declares: a one-shot
//! transfer, a token-metered stream, or an escrowed verifiable job whose
//! settlement is proof-gated.
//!
//! Runs are sequential inside, concurrent across. Cancellation is
//! cooperative: `cancel` flips the run's status and the walk observes it at
//! the next loop head, never mid-step.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use mosaic_jobs::JobManager;
use mosaic_ledger::{Ledger, StreamLedger};
use mosaic_registry::AgentRegistry;
use mosaic_types::{
    Agent, EventBus, JobId, JobSettlement, MosaicError, MosaicEvent, PaymentMode, Result, Step,
    StepExecutor, StepOutcome, StepResult, TemplateId, WorkflowContext, WorkflowId,
    WorkflowResult, WorkflowStatus, WorkflowTemplate,
};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{info, warn};

pub mod hire;

pub use hire::{HireConfig, HireCoordinator};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Token estimate used when opening a step's payment stream
    pub stream_expected_tokens: u64,
    /// Batch size for stream micropayments
    pub stream_batch_size: u64,
    /// Upper bound on steps taken per run. Jump pointers may form cycles;
    /// a run that exhausts this budget fails instead of walking forever.
    pub max_steps: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            stream_expected_tokens: 100,
            stream_batch_size: 10,
            max_steps: 100,
        }
    }
}

/// A verifiable job opened for a step before its executor runs
struct OpenJob {
    job_id: JobId,
    commitment: String,
}

/// The workflow engine, driving templates over the marketplace.
///
/// Cloneable; all clones share the template store and the active-run
/// registry.
#[derive(Clone)]
pub struct WorkflowEngine {
    config: WorkflowConfig,
    /// The agent on whose behalf steps are hired and paid
    requester: Agent,
    templates: Arc<RwLock<HashMap<TemplateId, WorkflowTemplate>>>,
    runs: Arc<RwLock<HashMap<WorkflowId, WorkflowStatus>>>,
    hiring: HireCoordinator,
    registry: AgentRegistry,
    ledger: Ledger,
    streams: StreamLedger,
    jobs: JobManager,
    executor: Arc<dyn StepExecutor>,
    events: EventBus,
}

impl WorkflowEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        requester: Agent,
        registry: AgentRegistry,
        hiring: HireCoordinator,
        ledger: Ledger,
        streams: StreamLedger,
        jobs: JobManager,
        executor: Arc<dyn StepExecutor>,
        events: EventBus,
    ) -> Self {
        Self {
            config: WorkflowConfig::default(),
            requester,
            templates: Arc::new(RwLock::new(HashMap::new())),
            runs: Arc::new(RwLock::new(HashMap::new())),
            hiring,
            registry,
            ledger,
            streams,
            jobs,
            executor,
            events,
        }
    }

    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a validated template and return its id
    pub async fn register_template(&self, template: WorkflowTemplate) -> TemplateId {
        let template_id = template.template_id.clone();
        info!(template = %template_id, name = %template.name, steps = template.steps.len(), "template registered");
        self.templates
            .write()
            .await
            .insert(template_id.clone(), template);
        template_id
    }

    /// Current status of a run, if the engine has seen it
    pub async fn run_status(&self, workflow_id: &WorkflowId) -> Option<WorkflowStatus> {
        self.runs.read().await.get(workflow_id).copied()
    }

    /// Request cancellation of a running workflow.
    ///
    /// Takes effect at the walk's next loop head; the step in flight runs to
    /// completion.
    pub async fn cancel(&self, workflow_id: &WorkflowId) -> Result<()> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(workflow_id) {
            Some(status) if !status.is_terminal() => {
                *status = WorkflowStatus::Cancelled;
                info!(workflow = %workflow_id, "cancellation requested");
                self.events.publish(MosaicEvent::WorkflowCancelled {
                    workflow_id: workflow_id.clone(),
                    at: Utc::now(),
                });
                Ok(())
            }
            Some(_) => Err(MosaicError::invalid_input(
                "workflow_id",
                "run already terminal",
            )),
            None => Err(MosaicError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            }),
        }
    }

    /// Execute a registered template against a task.
    ///
    /// Returns the aggregated result; a failed required step halts the walk
    /// with the partial step-result trail intact.
    pub async fn execute_workflow(
        &self,
        template_id: &TemplateId,
        task: impl Into<String>,
        initial_params: serde_json::Value,
    ) -> Result<WorkflowResult> {
        let template = {
            let templates = self.templates.read().await;
            templates
                .get(template_id)
                .cloned()
                .ok_or_else(|| MosaicError::TemplateNotFound {
                    template_id: template_id.to_string(),
                })?
        };

        let mut ctx = WorkflowContext::new(template_id.clone(), task);
        ctx.status = WorkflowStatus::Running;
        self.runs
            .write()
            .await
            .insert(ctx.workflow_id.clone(), WorkflowStatus::Running);

        info!(workflow = %ctx.workflow_id, template = %template_id, task = %ctx.task, "workflow started");
        self.events.publish(MosaicEvent::WorkflowStarted {
            workflow_id: ctx.workflow_id.clone(),
            task: ctx.task.clone(),
            at: Utc::now(),
        });

        let started = Instant::now();
        let mut current = template.steps.first().cloned();
        let mut steps_taken = 0usize;

        while let Some(step) = current.take() {
            // Cooperative cancellation, observed at the loop head only
            if self.run_status(&ctx.workflow_id).await == Some(WorkflowStatus::Cancelled) {
                ctx.status = WorkflowStatus::Cancelled;
                break;
            }
            steps_taken += 1;
            if steps_taken > self.config.max_steps {
                warn!(workflow = %ctx.workflow_id, max = self.config.max_steps, "step budget exhausted, halting");
                ctx.status = WorkflowStatus::Failed;
                break;
            }
            ctx.current_step = Some(step.id.clone());

            if let Some(condition) = &step.condition {
                if !condition.evaluate(&ctx.step_results) {
                    let result = StepResult::skipped("condition evaluated false");
                    self.events.publish(MosaicEvent::StepCompleted {
                        workflow_id: ctx.workflow_id.clone(),
                        step_id: step.id.clone(),
                        success: true,
                        skipped: true,
                        at: Utc::now(),
                    });
                    ctx.step_results.insert(step.id.clone(), result);
                    // Skips advance in template order, never through jumps
                    current = template.successor(&step.id).cloned();
                    continue;
                }
            }

            let input = self.build_input(&step, &ctx, &initial_params);
            let result = self.run_step(&ctx, &step, input).await;
            let success = result.success;

            self.events.publish(MosaicEvent::StepCompleted {
                workflow_id: ctx.workflow_id.clone(),
                step_id: step.id.clone(),
                success,
                skipped: false,
                at: Utc::now(),
            });
            ctx.step_results.insert(step.id.clone(), result);

            if success {
                current = match &step.on_success {
                    Some(id) => template.step(id).cloned(),
                    None => template.successor(&step.id).cloned(),
                };
            } else if step.required {
                warn!(workflow = %ctx.workflow_id, step = %step.id, "required step failed, halting");
                ctx.status = WorkflowStatus::Failed;
                break;
            } else {
                current = match &step.on_failure {
                    Some(id) => template.step(id).cloned(),
                    None => template.successor(&step.id).cloned(),
                };
            }
        }

        if !ctx.status.is_terminal() {
            ctx.status = WorkflowStatus::Completed;
        }
        self.runs
            .write()
            .await
            .insert(ctx.workflow_id.clone(), ctx.status);

        let duration_ms = started.elapsed().as_millis() as u64;
        let result = Self::aggregate(ctx, duration_ms);

        info!(
            workflow = %result.workflow_id,
            status = ?result.status,
            success = result.success,
            duration_ms,
            "workflow finished"
        );
        if result.status != WorkflowStatus::Cancelled {
            self.events.publish(MosaicEvent::WorkflowCompleted {
                workflow_id: result.workflow_id.clone(),
                success: result.success,
                at: Utc::now(),
            });
        }
        Ok(result)
    }

    /// Resolve the step's input: initial params, then task and requester
    /// identity, then the mapped dot-paths (unresolvable paths map to null)
    fn build_input(
        &self,
        step: &Step,
        ctx: &WorkflowContext,
        initial_params: &serde_json::Value,
    ) -> serde_json::Value {
        let mut map = match initial_params {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        map.insert("task".to_string(), serde_json::Value::String(ctx.task.clone()));
        map.insert(
            "requester".to_string(),
            serde_json::Value::String(self.requester.agent_id.to_string()),
        );
        for (field, path) in &step.input_mapping {
            map.insert(
                field.clone(),
                path.resolve(&ctx.step_results)
                    .unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(map)
    }

    /// Hire, execute, and pay for one step
    async fn run_step(
        &self,
        ctx: &WorkflowContext,
        step: &Step,
        input: serde_json::Value,
    ) -> StepResult {
        let started = Instant::now();

        // Steps with an empty capability run on the requester itself, no hire
        let worker = if step.capability.is_empty() {
            None
        } else {
            match self.hiring.hire(&self.requester, &step.capability, 0).await {
                Ok(worker) => Some(worker),
                Err(err) => {
                    warn!(workflow = %ctx.workflow_id, step = %step.id, error = %err, "hire failed");
                    return StepResult::failed(
                        format!("hire failed: {err}"),
                        started.elapsed().as_millis() as u64,
                    );
                }
            }
        };

        // For verifiable jobs the escrow is locked and the worker's
        // commitment fixed before any output exists
        let open_job = match (&worker, step.payment_mode) {
            (Some(worker), PaymentMode::VerifiedJob) => {
                match self.open_job(step, worker, &input).await {
                    Ok(job) => Some(job),
                    Err(err) => {
                        warn!(workflow = %ctx.workflow_id, step = %step.id, error = %err, "job setup failed");
                        return StepResult::failed(
                            format!("job setup failed: {err}"),
                            started.elapsed().as_millis() as u64,
                        );
                    }
                }
            }
            _ => None,
        };

        let outcome = match self
            .executor
            .execute(step, &ctx.step_results, input.clone())
            .await
        {
            Ok(outcome) => outcome,
            // An executor error is the same thing as a reported failure
            Err(err) => StepOutcome::failure(err.to_string()),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        if !outcome.success {
            if let Some(job) = &open_job {
                // Non-delivery is not provable cheating: the committed job is
                // left to its submission deadline, which refunds the escrow
                // without slashing
                warn!(job = %job.job_id, "step failed with a job in flight, escrow refunds on expiry");
            }
            if let Some(worker) = &worker {
                if let Err(err) = self.registry.record_outcome(&worker.agent_id, false).await {
                    warn!(worker = %worker.agent_id, error = %err, "could not record outcome");
                }
            }
            return StepResult::failed(
                outcome
                    .error
                    .unwrap_or_else(|| "step reported failure".to_string()),
                duration_ms,
            );
        }

        if let Some(worker) = &worker {
            let paid = match open_job {
                Some(job) => self.settle_job(job, &outcome).await,
                None => self.pay(ctx, step, worker, &outcome).await,
            };
            match paid {
                Ok(true) => {
                    // The job machine records outcomes for verified jobs itself
                    if step.payment_mode != PaymentMode::VerifiedJob {
                        if let Err(err) =
                            self.registry.record_outcome(&worker.agent_id, true).await
                        {
                            warn!(worker = %worker.agent_id, error = %err, "could not record outcome");
                        }
                    }
                }
                Ok(false) => {
                    return StepResult::failed(
                        "proof rejected, escrow refunded".to_string(),
                        duration_ms,
                    );
                }
                Err(err) => {
                    warn!(workflow = %ctx.workflow_id, step = %step.id, error = %err, "payment failed");
                    return StepResult::failed(format!("payment failed: {err}"), duration_ms);
                }
            }
        }

        StepResult {
            success: true,
            output: outcome.output,
            structured_data: outcome.structured_data,
            duration_ms,
            skipped: false,
            skip_reason: None,
        }
    }

    /// Escrow the payment and fix the worker's commitment for a step's job,
    /// ahead of execution. The commitment binds worker, job, and the input
    /// hash under a fresh nonce, so it cannot be recomputed to fit a
    /// different output later.
    async fn open_job(
        &self,
        step: &Step,
        worker: &Agent,
        input: &serde_json::Value,
    ) -> Result<OpenJob> {
        let input_hash = hash_json(input);
        let job_id = self
            .jobs
            .create_job(
                &self.requester.wallet,
                input_hash.clone(),
                worker.price,
                &step.action,
            )
            .await?;
        let nonce = mosaic_jobs::random_nonce();
        let commitment =
            mosaic_jobs::commitment_hash_for(&worker.agent_id, &job_id, &input_hash, &nonce);
        self.jobs
            .commit_to_job(&job_id, worker, commitment.clone())
            .await?;
        Ok(OpenJob { job_id, commitment })
    }

    /// Reveal the output and submit the proof for a step's open job.
    ///
    /// Returns `Ok(false)` when the job settled against the worker (a
    /// first-class outcome, not an error).
    async fn settle_job(&self, job: OpenJob, outcome: &StepOutcome) -> Result<bool> {
        let output_hash = hash_json(&outcome.structured_data);
        let proof: Vec<u8> = outcome
            .structured_data
            .get("proof")
            .and_then(|v| v.as_str())
            .map(|s| s.as_bytes().to_vec())
            .unwrap_or_else(|| output_hash.as_bytes().to_vec());
        let settlement = self
            .jobs
            .submit_proof(&job.job_id, &output_hash, &proof, &job.commitment)
            .await?;
        Ok(matches!(settlement, JobSettlement::Verified { .. }))
    }

    /// Pay a step's worker in the step's declared mode
    async fn pay(
        &self,
        ctx: &WorkflowContext,
        step: &Step,
        worker: &Agent,
        outcome: &StepOutcome,
    ) -> Result<bool> {
        match step.payment_mode {
            PaymentMode::OneShot => {
                self.ledger
                    .transfer(
                        &self.requester.wallet,
                        &worker.wallet,
                        worker.price,
                        format!("{}_{}", ctx.workflow_id, step.id),
                    )
                    .await?;
                Ok(true)
            }
            PaymentMode::Streaming => {
                let stream_id = self
                    .streams
                    .open_stream(
                        &self.requester.wallet,
                        &worker.wallet,
                        worker.price,
                        self.config.stream_expected_tokens,
                        self.config.stream_batch_size,
                    )
                    .await?;
                let tokens = outcome
                    .structured_data
                    .get("tokens_used")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(self.config.stream_expected_tokens);
                self.streams.record_tokens(&stream_id, tokens).await?;
                self.streams.settle(&stream_id).await?;
                Ok(true)
            }
            // Verifiable jobs are opened before execution and settled
            // through settle_job
            PaymentMode::VerifiedJob => Err(MosaicError::internal(
                "verifiable jobs settle through their open job",
            )),
        }
    }

    fn aggregate(ctx: WorkflowContext, duration_ms: u64) -> WorkflowResult {
        let total = ctx.step_results.len();
        let skipped = ctx.step_results.values().filter(|r| r.skipped).count();
        let failed = ctx.step_results.values().filter(|r| !r.success).count();
        let succeeded = total - skipped - failed;
        let success = ctx.status == WorkflowStatus::Completed && failed == 0;

        WorkflowResult {
            workflow_id: ctx.workflow_id,
            status: ctx.status,
            success,
            summary: format!(
                "{:?}: {succeeded} succeeded, {failed} failed, {skipped} skipped for task '{}'",
                ctx.status, ctx.task
            ),
            step_results: ctx.step_results,
            duration_ms,
        }
    }
}

fn hash_json(value: &serde_json::Value) -> String {
    hex::encode(Sha256::digest(value.to_string().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_auction::AuctionEngine;
    use mosaic_collusion::CollusionGuard;
    use mosaic_types::{
        AgentId, Condition, OwnerId, ProofVerifier, StepId, WalletId,
    };
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct AlwaysValid;

    #[async_trait::async_trait]
    impl ProofVerifier for AlwaysValid {
        async fn verify(&self, _proof: &[u8], _public_instances: &[String]) -> Result<bool> {
            Ok(true)
        }
    }

    /// Executor scripted per action; records every input it receives
    struct ScriptedExecutor {
        outcomes: HashMap<String, StepOutcome>,
        inputs: Mutex<Vec<(StepId, serde_json::Value)>>,
        delay: Option<Duration>,
    }

    impl ScriptedExecutor {
        fn new() -> Self {
            Self {
                outcomes: HashMap::new(),
                inputs: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        fn on(mut self, action: &str, outcome: StepOutcome) -> Self {
            self.outcomes.insert(action.to_string(), outcome);
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait::async_trait]
    impl StepExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            step: &Step,
            _prior_results: &HashMap<StepId, StepResult>,
            input: serde_json::Value,
        ) -> Result<StepOutcome> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.inputs.lock().await.push((step.id.clone(), input));
            Ok(self
                .outcomes
                .get(&step.action)
                .cloned()
                .unwrap_or_else(|| StepOutcome::ok("done", serde_json::Value::Null)))
        }
    }

    fn agent(capability: &str, price: u64) -> Agent {
        Agent {
            agent_id: AgentId::new(),
            owner: OwnerId::new(),
            wallet: WalletId::new(),
            capability: capability.to_string(),
            price,
            reputation: 80,
            active: true,
        }
    }

    struct Harness {
        engine: WorkflowEngine,
        ledger: Ledger,
        registry: AgentRegistry,
        jobs: JobManager,
        requester: Agent,
        events: EventBus,
    }

    async fn harness(executor: Arc<dyn StepExecutor>, workers: Vec<Agent>) -> Harness {
        let events = EventBus::new();
        let registry = AgentRegistry::new();
        for worker in &workers {
            registry.register(worker.clone()).await;
        }
        let ledger = Ledger::new(events.clone());
        let streams = StreamLedger::new(ledger.clone(), events.clone());
        let jobs = JobManager::new(
            ledger.clone(),
            registry.clone(),
            Arc::new(AlwaysValid),
            events.clone(),
        );
        let hiring = HireCoordinator::new(
            Arc::new(registry.clone()),
            AuctionEngine::new(events.clone()),
            CollusionGuard::new(events.clone()),
        );

        let requester = agent("orchestrate", 0);
        ledger.deposit(&requester.wallet, 100_000).await.unwrap();

        let engine = WorkflowEngine::new(
            requester.clone(),
            registry.clone(),
            hiring,
            ledger.clone(),
            streams,
            jobs.clone(),
            executor,
            events.clone(),
        );
        Harness {
            engine,
            ledger,
            registry,
            jobs,
            requester,
            events,
        }
    }

    // Steps with no capability exercise the walk without the marketplace
    fn local_step(id: &str, action: &str) -> Step {
        Step::new(id, "", action)
    }

    #[tokio::test]
    async fn test_linear_walk_completes() {
        let h = harness(Arc::new(ScriptedExecutor::new()), vec![]).await;
        let template = WorkflowTemplate::new(
            "linear",
            vec![local_step("a", "one"), local_step("b", "two"), local_step("c", "three")],
        )
        .unwrap();
        let id = h.engine.register_template(template).await;

        let result = h.engine.execute_workflow(&id, "run it", json!({})).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert!(result.success);
        assert_eq!(result.step_results.len(), 3);
        assert!(result.step_results.values().all(|r| r.success && !r.skipped));
    }

    #[tokio::test]
    async fn test_unknown_template_rejected() {
        let h = harness(Arc::new(ScriptedExecutor::new()), vec![]).await;
        let result = h
            .engine
            .execute_workflow(&TemplateId::new(), "task", json!({}))
            .await;
        assert!(matches!(result, Err(MosaicError::TemplateNotFound { .. })));
    }

    #[tokio::test]
    async fn test_false_condition_skips_in_template_order() {
        // b's condition is false and b carries an on_success jump back to a.
        // Following the jump from a skipped step would loop forever, so
        // completion proves skips route in template order.
        let h = harness(Arc::new(ScriptedExecutor::new()), vec![]).await;
        let template = WorkflowTemplate::new(
            "skippy",
            vec![
                local_step("a", "one"),
                local_step("b", "two")
                    .with_condition(Condition::Truthy {
                        path: "a.missing".into(),
                    })
                    .on_success("a"),
                local_step("c", "three"),
            ],
        )
        .unwrap();
        let id = h.engine.register_template(template).await;

        let result = h.engine.execute_workflow(&id, "task", json!({})).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Completed);

        let b = &result.step_results[&StepId::from("b")];
        assert!(b.skipped);
        assert!(b.success);
        assert!(result.step_results.contains_key(&StepId::from("c")));
    }

    #[tokio::test]
    async fn test_required_failure_halts_with_partial_trail() {
        let executor =
            ScriptedExecutor::new().on("explode", StepOutcome::failure("boom"));
        let h = harness(Arc::new(executor), vec![]).await;
        let template = WorkflowTemplate::new(
            "fatal",
            vec![
                local_step("a", "one"),
                local_step("b", "explode").required(),
                local_step("c", "three"),
            ],
        )
        .unwrap();
        let id = h.engine.register_template(template).await;

        let result = h.engine.execute_workflow(&id, "task", json!({})).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert!(!result.success);
        // Partial trail: a and the failed b, never c
        assert_eq!(result.step_results.len(), 2);
        assert!(!result.step_results[&StepId::from("b")].success);
    }

    #[tokio::test]
    async fn test_optional_failure_follows_on_failure_jump() {
        let executor =
            ScriptedExecutor::new().on("flaky", StepOutcome::failure("nope"));
        let h = harness(Arc::new(executor), vec![]).await;
        let template = WorkflowTemplate::new(
            "recovery",
            vec![
                local_step("a", "flaky").on_failure("c"),
                local_step("b", "two"),
                local_step("c", "cleanup"),
            ],
        )
        .unwrap();
        let id = h.engine.register_template(template).await;

        let result = h.engine.execute_workflow(&id, "task", json!({})).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Completed);
        // b was jumped over
        assert!(!result.step_results.contains_key(&StepId::from("b")));
        assert!(result.step_results.contains_key(&StepId::from("c")));
        // The run completed but carries a failed step
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_input_threading_through_dot_paths() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .on("fetch", StepOutcome::ok("fetched", json!({"quote": {"price": 42}}))),
        );
        let h = harness(executor.clone(), vec![]).await;
        let template = WorkflowTemplate::new(
            "threaded",
            vec![
                local_step("fetch", "fetch"),
                local_step("analyze", "analyze").with_input("price", "fetch.quote.price"),
            ],
        )
        .unwrap();
        let id = h.engine.register_template(template).await;

        h.engine
            .execute_workflow(&id, "thread me", json!({"seed": 7}))
            .await
            .unwrap();

        let inputs = executor.inputs.lock().await;
        let (_, analyze_input) = inputs
            .iter()
            .find(|(id, _)| *id == StepId::from("analyze"))
            .unwrap();
        assert_eq!(analyze_input["price"], json!(42));
        assert_eq!(analyze_input["seed"], json!(7));
        assert_eq!(analyze_input["task"], json!("thread me"));
        assert_eq!(
            analyze_input["requester"],
            json!(h.requester.agent_id.to_string())
        );
    }

    #[tokio::test]
    async fn test_one_shot_step_pays_the_winner() {
        let worker = agent("market_data", 300);
        let h = harness(Arc::new(ScriptedExecutor::new()), vec![worker.clone()]).await;
        let template = WorkflowTemplate::new(
            "paid",
            vec![Step::new("fetch", "market_data", "fetch")],
        )
        .unwrap();
        let id = h.engine.register_template(template).await;

        let result = h.engine.execute_workflow(&id, "task", json!({})).await.unwrap();
        assert!(result.success);
        assert_eq!(h.ledger.balance(&worker.wallet).await, 300);
        assert_eq!(h.ledger.balance(&h.requester.wallet).await, 99_700);
        assert_eq!(h.registry.counters(&worker.agent_id).await.successful_tasks, 1);
    }

    #[tokio::test]
    async fn test_blocked_hire_fails_required_step() {
        // The only candidate shares the requester's owner
        let h = harness(Arc::new(ScriptedExecutor::new()), vec![]).await;
        let mut sibling = agent("market_data", 50);
        sibling.owner = h.requester.owner.clone();
        h.registry.register(sibling.clone()).await;
        let template = WorkflowTemplate::new(
            "guarded",
            vec![Step::new("fetch", "market_data", "fetch").required()],
        )
        .unwrap();
        let id = h.engine.register_template(template).await;

        let result = h.engine.execute_workflow(&id, "task", json!({})).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Failed);
        let fetch = &result.step_results[&StepId::from("fetch")];
        assert!(!fetch.success);
        // No payment moved
        assert_eq!(h.ledger.balance(&sibling.wallet).await, 0);
    }

    #[tokio::test]
    async fn test_failed_hired_step_records_failure() {
        let worker = agent("market_data", 300);
        let executor =
            ScriptedExecutor::new().on("fetch", StepOutcome::failure("upstream down"));
        let h = harness(Arc::new(executor), vec![worker.clone()]).await;
        let template = WorkflowTemplate::new(
            "unpaid",
            vec![Step::new("fetch", "market_data", "fetch")],
        )
        .unwrap();
        let id = h.engine.register_template(template).await;

        h.engine.execute_workflow(&id, "task", json!({})).await.unwrap();
        // No payment on failure, and the failure hits the worker's record
        assert_eq!(h.ledger.balance(&worker.wallet).await, 0);
        let counters = h.registry.counters(&worker.agent_id).await;
        assert_eq!(counters.total_tasks, 1);
        assert_eq!(counters.successful_tasks, 0);
    }

    #[tokio::test]
    async fn test_cancel_observed_at_loop_head() {
        let executor = ScriptedExecutor::new().with_delay(Duration::from_millis(50));
        let h = harness(Arc::new(executor), vec![]).await;
        let template = WorkflowTemplate::new(
            "slow",
            vec![local_step("a", "one"), local_step("b", "two"), local_step("c", "three")],
        )
        .unwrap();
        let id = h.engine.register_template(template).await;

        let mut rx = h.events.subscribe();
        let engine = h.engine.clone();
        let handle =
            tokio::spawn(async move { engine.execute_workflow(&id, "task", json!({})).await });

        // Wait for the run to start, then cancel while step a sleeps
        let workflow_id = loop {
            match rx.recv().await.unwrap() {
                MosaicEvent::WorkflowStarted { workflow_id, .. } => break workflow_id,
                _ => continue,
            }
        };
        h.engine.cancel(&workflow_id).await.unwrap();

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status, WorkflowStatus::Cancelled);
        assert!(!result.success);
        // The in-flight step finished; later steps never ran
        assert!(result.step_results.len() < 3);
        assert_eq!(
            h.engine.run_status(&workflow_id).await,
            Some(WorkflowStatus::Cancelled)
        );
    }

    /// Executor that reads a wallet balance mid-step
    struct BalanceObserver {
        target: std::sync::Mutex<Option<(Ledger, WalletId)>>,
        seen: std::sync::Mutex<Option<u64>>,
    }

    impl BalanceObserver {
        fn new() -> Self {
            Self {
                target: std::sync::Mutex::new(None),
                seen: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait::async_trait]
    impl StepExecutor for BalanceObserver {
        async fn execute(
            &self,
            _step: &Step,
            _prior_results: &HashMap<StepId, StepResult>,
            _input: serde_json::Value,
        ) -> Result<StepOutcome> {
            let target = self.target.lock().unwrap().clone();
            if let Some((ledger, wallet)) = target {
                let balance = ledger.balance(&wallet).await;
                *self.seen.lock().unwrap() = Some(balance);
            }
            Ok(StepOutcome::ok("done", json!({"result": 1})))
        }
    }

    #[tokio::test]
    async fn test_job_escrow_held_during_execution() {
        let observer = Arc::new(BalanceObserver::new());
        let worker = agent("inference", 1_000);
        let h = harness(observer.clone(), vec![worker.clone()]).await;
        h.ledger.deposit(&worker.wallet, 5_000).await.unwrap();
        h.jobs
            .post_stake(&worker.agent_id, &worker.wallet, 2_000)
            .await
            .unwrap();
        *observer.target.lock().unwrap() =
            Some((h.ledger.clone(), h.requester.wallet.clone()));

        let template = WorkflowTemplate::new(
            "proved",
            vec![Step::new("prove", "inference", "prove")
                .required()
                .with_payment_mode(PaymentMode::VerifiedJob)],
        )
        .unwrap();
        let id = h.engine.register_template(template).await;

        let result = h.engine.execute_workflow(&id, "task", json!({})).await.unwrap();
        assert!(result.success);
        // The payment sat in escrow while the worker ran
        assert_eq!(*observer.seen.lock().unwrap(), Some(99_000));
        // Settlement released it to the worker
        assert_eq!(h.ledger.balance(&worker.wallet).await, 4_000);
        assert_eq!(h.ledger.balance(&h.requester.wallet).await, 99_000);
    }

    #[tokio::test]
    async fn test_cyclic_template_halts_at_step_budget() {
        let h = harness(Arc::new(ScriptedExecutor::new()), vec![]).await;
        let engine = h.engine.clone().with_config(WorkflowConfig {
            max_steps: 5,
            ..WorkflowConfig::default()
        });
        let template =
            WorkflowTemplate::new("loopy", vec![local_step("a", "one").on_success("a")])
                .unwrap();
        let id = engine.register_template(template).await;

        let result = engine.execute_workflow(&id, "task", json!({})).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_cancel_unknown_run_rejected() {
        let h = harness(Arc::new(ScriptedExecutor::new()), vec![]).await;
        let result = h.engine.cancel(&WorkflowId::new()).await;
        assert!(matches!(result, Err(MosaicError::WorkflowNotFound { .. })));
    }
}
