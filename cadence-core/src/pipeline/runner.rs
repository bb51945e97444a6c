//! Pipeline construction and the concurrent kickoff runner

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::RunnerConfig;
use crate::error::{CadenceError, Result};

use super::input::KickoffInput;
use super::parallel::TaskGuard;
use super::processor::KickoffProcessor;
use super::result::{KickoffResult, PipelineOutput, RunId};
use super::stage::{Stage, StageKind};
use super::unit::{RouteSelector, WorkUnit};

const DEFAULT_NAME: &str = "pipeline";

/// Immutable, ordered list of stages plus the runner settings used to
/// execute it.
///
/// Cloning is cheap: the stage list is shared. Every kickoff still receives
/// its own forked instances of stateful units.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Arc<[Stage]>,
    config: RunnerConfig,
}

/// Per-call overrides for [`Pipeline::run_with`]
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Deadline for the whole run; falls back to the pipeline's config
    pub deadline: Option<Duration>,
    /// Kickoff concurrency; falls back to the pipeline's config
    pub max_concurrent_kickoffs: Option<usize>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn max_concurrent_kickoffs(mut self, max: usize) -> Self {
        self.max_concurrent_kickoffs = Some(max);
        self
    }
}

impl Pipeline {
    /// Create a pipeline from an ordered stage list.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the list is empty or a parallel group
    /// has fewer than two units.
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        Self::named(DEFAULT_NAME, stages)
    }

    /// Create a named pipeline. See [`Pipeline::new`].
    pub fn named(name: impl Into<String>, stages: Vec<Stage>) -> Result<Self> {
        validate_stages(&stages)?;
        Ok(Self {
            name: name.into(),
            stages: stages.into(),
            config: RunnerConfig::default(),
        })
    }

    /// Start building a pipeline stage by stage
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Replace the runner settings
    pub fn with_config(mut self, config: RunnerConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// New pipeline with `stage` appended; `self` is left untouched
    pub fn then(&self, stage: Stage) -> Result<Self> {
        let mut stages = self.stages.to_vec();
        stages.push(stage);
        validate_stages(&stages)?;
        Ok(Self {
            name: self.name.clone(),
            stages: stages.into(),
            config: self.config.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stages in execution order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Variant of each stage in execution order
    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(Stage::kind).collect()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Walk a single input through the pipeline
    pub async fn kickoff(&self, input: KickoffInput) -> KickoffResult {
        let cancel = CancellationToken::new();
        let deadline = self.config.deadline;
        let timer: Vec<_> = deadline
            .map(|d| spawn_deadline(d, cancel.clone()))
            .into_iter()
            .collect();
        let _timer = TaskGuard::new(&timer);

        self.processor(0, cancel, deadline).process(input).await
    }

    /// Run every input through the pipeline concurrently.
    ///
    /// `results[i]` belongs to `inputs[i]`. A failing kickoff is reported on
    /// its own result and never fails the run.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `inputs` is empty.
    pub async fn run(&self, inputs: Vec<KickoffInput>) -> Result<PipelineOutput> {
        self.run_with(inputs, RunOptions::default()).await
    }

    /// [`Pipeline::run`] with per-call overrides
    pub async fn run_with(
        &self,
        inputs: Vec<KickoffInput>,
        options: RunOptions,
    ) -> Result<PipelineOutput> {
        if inputs.is_empty() {
            return Err(CadenceError::config("run needs at least one kickoff input"));
        }

        let mut config = self.config.clone();
        if let Some(deadline) = options.deadline {
            config.deadline = Some(deadline);
        }
        if let Some(max) = options.max_concurrent_kickoffs {
            config.max_concurrent_kickoffs = max;
        }
        config.validate()?;

        let run_id = RunId::new();
        let span = tracing::info_span!(
            "pipeline_run",
            run_id = %run_id,
            pipeline = %self.name,
            kickoffs = inputs.len(),
            stages = self.stages.len()
        );

        Ok(self.execute_run(run_id, inputs, &config).instrument(span).await)
    }

    async fn execute_run(
        &self,
        run_id: RunId,
        inputs: Vec<KickoffInput>,
        config: &RunnerConfig,
    ) -> PipelineOutput {
        let started_at = Utc::now();
        let clock = Instant::now();
        let cancel = CancellationToken::new();

        let timer: Vec<_> = config
            .deadline
            .map(|d| spawn_deadline(d, cancel.clone()))
            .into_iter()
            .collect();
        let _timer = TaskGuard::new(&timer);

        let limit = Arc::new(Semaphore::new(config.max_concurrent_kickoffs));
        let originals = inputs.clone();

        let handles: Vec<JoinHandle<KickoffResult>> = inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| {
                let processor = self.processor(index, cancel.clone(), config.deadline);
                let cancel = cancel.clone();
                let limit = Arc::clone(&limit);
                let span = tracing::debug_span!("kickoff", kickoff = index);

                tokio::spawn(
                    async move {
                        let permit = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                return processor.cancelled_before_start(input);
                            }
                            permit = limit.acquire_owned() => permit,
                        };
                        match permit {
                            Ok(_permit) => processor.process(input).await,
                            Err(_) => {
                                KickoffResult::aborted(index, input, "kickoff limiter closed")
                            }
                        }
                    }
                    .instrument(span),
                )
            })
            .collect();

        let guard = TaskGuard::new(&handles);
        let joined = join_all(handles).await;
        drop(guard);

        // Slot by the index each processor reports so result order never
        // depends on join order.
        let mut slots: Vec<Option<KickoffResult>> = (0..originals.len()).map(|_| None).collect();
        for (index, outcome) in joined.into_iter().enumerate() {
            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(kickoff = index, error = %e, "Kickoff task died");
                    KickoffResult::aborted(index, originals[index].clone(), e.to_string())
                }
            };
            let slot = result.index;
            if let Some(entry) = slots.get_mut(slot) {
                *entry = Some(result);
            }
        }

        let results: Vec<KickoffResult> = slots
            .into_iter()
            .zip(originals)
            .enumerate()
            .map(|(index, (slot, input))| {
                slot.unwrap_or_else(|| KickoffResult::aborted(index, input, "no result reported"))
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        tracing::info!(
            succeeded,
            failed = results.len() - succeeded,
            duration_ms = clock.elapsed().as_millis() as u64,
            "Pipeline run completed"
        );

        PipelineOutput {
            run_id,
            pipeline: self.name.clone(),
            started_at,
            finished_at: Utc::now(),
            results,
        }
    }

    fn processor(
        &self,
        index: usize,
        cancel: CancellationToken,
        deadline: Option<Duration>,
    ) -> KickoffProcessor {
        KickoffProcessor::new(index, &self.stages)
            .branch_concurrency(self.config.max_branch_concurrency)
            .cancellation(cancel, deadline)
    }
}

fn validate_stages(stages: &[Stage]) -> Result<()> {
    if stages.is_empty() {
        return Err(CadenceError::config("pipeline needs at least one stage"));
    }
    for (index, stage) in stages.iter().enumerate() {
        if let Some(reason) = stage.unsupported_reason() {
            return Err(CadenceError::config(format!("stage {index}: {reason}")));
        }
    }
    Ok(())
}

fn spawn_deadline(deadline: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        tracing::warn!(deadline = ?deadline, "Run deadline elapsed, cancelling kickoffs");
        cancel.cancel();
    })
}

/// Builder for [`Pipeline`]
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    name: Option<String>,
    stages: Vec<Stage>,
    config: RunnerConfig,
}

impl PipelineBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append a single unit stage
    pub fn unit<U: WorkUnit + 'static>(self, unit: U) -> Self {
        self.stage(Stage::unit(unit))
    }

    /// Append a parallel group
    pub fn parallel(self, units: Vec<Arc<dyn WorkUnit>>) -> Self {
        self.stage(Stage::parallel(units))
    }

    /// Append a router stage
    pub fn router<R: RouteSelector + 'static>(self, selector: R) -> Self {
        self.stage(Stage::router(selector))
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate and build the pipeline
    pub fn build(self) -> Result<Pipeline> {
        let name = self.name.unwrap_or_else(|| DEFAULT_NAME.to_string());
        Pipeline::named(name, self.stages)?.with_config(self.config)
    }
}
