//! Sequential walk of one kickoff through the pipeline stages

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{BranchFailure, KickoffError};

use super::input::KickoffInput;
use super::metrics::{self, MetricsMap};
use super::output::StageOutput;
use super::parallel::{self, BranchOutcome, Invocation};
use super::result::{KickoffResult, KickoffStatus};
use super::stage::Stage;
use super::trace::{StageTrace, Trace};

/// Walks one kickoff input through every stage in order.
///
/// The processor owns its own copy of the stage list (stateful units already
/// forked), its own current input, trace and metrics. Nothing it mutates is
/// visible to any other kickoff.
pub struct KickoffProcessor {
    index: usize,
    stages: Vec<Stage>,
    branch_limit: Arc<Semaphore>,
    cancel: CancellationToken,
    deadline: Option<Duration>,
}

impl std::fmt::Debug for KickoffProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KickoffProcessor")
            .field("index", &self.index)
            .field("stages", &self.stages)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Running state of one walk
struct Walk {
    started: Instant,
    original_input: KickoffInput,
    current: KickoffInput,
    trace: Trace,
    usage: MetricsMap,
    stage_outputs: Vec<StageOutput>,
}

impl KickoffProcessor {
    /// Create a processor for the kickoff at `index`, instantiating a fresh
    /// copy of `stages` for it
    pub fn new(index: usize, stages: &[Stage]) -> Self {
        Self {
            index,
            stages: stages.iter().map(Stage::instantiate).collect(),
            branch_limit: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Cap how many branches of one parallel group run at once.
    ///
    /// `max` is clamped to `1..=Semaphore::MAX_PERMITS`.
    pub fn branch_concurrency(mut self, max: usize) -> Self {
        let permits = max.clamp(1, Semaphore::MAX_PERMITS);
        self.branch_limit = Arc::new(Semaphore::new(permits));
        self
    }

    /// Stop the walk when `token` is cancelled, reporting a timeout against
    /// `deadline`
    pub fn cancellation(mut self, token: CancellationToken, deadline: Option<Duration>) -> Self {
        self.cancel = token;
        self.deadline = deadline;
        self
    }

    /// Kickoff position this processor reports under
    pub fn index(&self) -> usize {
        self.index
    }

    /// Walk every stage and produce the kickoff's result.
    ///
    /// Never returns an error: failures are recorded on the result together
    /// with the trace gathered up to the failing stage.
    pub async fn process(self, input: KickoffInput) -> KickoffResult {
        let mut walk = Walk {
            started: Instant::now(),
            original_input: input.clone(),
            trace: Trace::start(&input),
            current: input,
            usage: MetricsMap::new(),
            stage_outputs: Vec::new(),
        };

        for (stage_index, stage) in self.stages.iter().enumerate() {
            if let Some(reason) = stage.unsupported_reason() {
                return self.fail(walk, KickoffError::UnsupportedStage { stage_index, reason });
            }

            let span = tracing::debug_span!(
                "stage",
                kickoff = self.index,
                stage = stage_index,
                kind = %stage.kind()
            );
            let started_at = Utc::now();
            let clock = Instant::now();

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    let error = self.timeout_error(Some(stage_index));
                    return self.fail(walk, error);
                }
                outcome = self
                    .execute_stage(stage_index, stage, &walk.current)
                    .instrument(span) => outcome,
            };

            let outputs = match outcome {
                Ok(outputs) => outputs,
                Err(error) => return self.fail(walk, error),
            };

            // Merge strictly in unit order once every branch has finished.
            for output in &outputs {
                if let Some(structured) = &output.structured {
                    walk.current.merge(structured);
                }
            }
            let stage_usage = metrics::aggregate(outputs.iter().map(|o| &o.usage_metrics));
            metrics::accumulate(&mut walk.usage, &stage_usage);

            let duration_ms = clock.elapsed().as_millis() as u64;
            tracing::debug!(
                kickoff = self.index,
                stage = stage_index,
                outputs = outputs.len(),
                duration_ms,
                "Stage completed"
            );

            walk.trace.record_stage(StageTrace {
                stage_index,
                kind: stage.kind(),
                units: stage.unit_names(),
                outputs: outputs.clone(),
                started_at,
                duration_ms,
            });
            walk.stage_outputs.extend(outputs);
        }

        self.finish(walk, KickoffStatus::Succeeded)
    }

    /// Result for a kickoff that never started because the run was cancelled
    pub(crate) fn cancelled_before_start(self, input: KickoffInput) -> KickoffResult {
        let walk = Walk {
            started: Instant::now(),
            original_input: input.clone(),
            trace: Trace::start(&input),
            current: input,
            usage: MetricsMap::new(),
            stage_outputs: Vec::new(),
        };
        let error = self.timeout_error(None);
        self.fail(walk, error)
    }

    async fn execute_stage(
        &self,
        stage_index: usize,
        stage: &Stage,
        input: &KickoffInput,
    ) -> Result<Vec<StageOutput>, KickoffError> {
        match stage {
            Stage::Unit(unit) => {
                self.execute_single(stage_index, Invocation::Work(Arc::clone(unit)), input)
                    .await
            }
            Stage::Router(selector) => {
                self.execute_single(stage_index, Invocation::Select(Arc::clone(selector)), input)
                    .await
            }
            Stage::ParallelGroup(units) => {
                let invocations = units
                    .iter()
                    .map(|unit| Invocation::Work(Arc::clone(unit)))
                    .collect();
                let outcomes =
                    parallel::fan_out(invocations, input, Some(self.branch_limit.clone())).await;
                collect_group(stage_index, outcomes)
            }
        }
    }

    async fn execute_single(
        &self,
        stage_index: usize,
        invocation: Invocation,
        input: &KickoffInput,
    ) -> Result<Vec<StageOutput>, KickoffError> {
        let mut outcomes = parallel::fan_out(vec![invocation], input, None).await;
        match outcomes.pop() {
            Some(BranchOutcome {
                result: Ok(output), ..
            }) => Ok(vec![output]),
            Some(BranchOutcome {
                unit,
                result: Err(message),
                ..
            }) => Err(KickoffError::WorkUnitExecution {
                stage_index,
                unit,
                message,
            }),
            None => Err(KickoffError::UnsupportedStage {
                stage_index,
                reason: "stage produced no output".to_string(),
            }),
        }
    }

    fn timeout_error(&self, stage_index: Option<usize>) -> KickoffError {
        KickoffError::Timeout {
            stage_index,
            deadline: self.deadline.unwrap_or_default(),
        }
    }

    fn fail(&self, walk: Walk, error: KickoffError) -> KickoffResult {
        tracing::warn!(
            kickoff = self.index,
            stage = ?error.stage_index(),
            completed_stages = walk.trace.completed_stages(),
            error = %error,
            "Kickoff failed"
        );
        self.finish(walk, KickoffStatus::Failed(error))
    }

    fn finish(&self, walk: Walk, status: KickoffStatus) -> KickoffResult {
        KickoffResult {
            index: self.index,
            original_input: walk.original_input,
            final_input: walk.current,
            status,
            trace: walk.trace,
            stage_outputs: walk.stage_outputs,
            usage_metrics: walk.usage,
            duration_ms: walk.started.elapsed().as_millis() as u64,
        }
    }
}

/// Turn branch outcomes into the stage's output list, or a group failure
/// listing every failed branch
fn collect_group(
    stage_index: usize,
    outcomes: Vec<BranchOutcome>,
) -> Result<Vec<StageOutput>, KickoffError> {
    let branches = outcomes.len();
    let mut outputs = Vec::with_capacity(branches);
    let mut failures = Vec::new();

    for outcome in outcomes {
        match outcome.result {
            Ok(output) => outputs.push(output),
            Err(message) => failures.push(BranchFailure {
                branch: outcome.branch,
                unit: outcome.unit,
                message,
            }),
        }
    }

    if failures.is_empty() {
        Ok(outputs)
    } else {
        Err(KickoffError::GroupPartialFailure {
            stage_index,
            branches,
            failures,
        })
    }
}
