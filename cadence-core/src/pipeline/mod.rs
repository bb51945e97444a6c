//! Pipeline orchestration
//!
//! A [`Pipeline`] is an immutable, ordered list of [`Stage`]s:
//!
//! - **Unit**: one work unit
//! - **ParallelGroup**: two or more work units run concurrently, merged in list order
//! - **Router**: a route selector whose decision is merged like any other output
//!
//! Running a pipeline spawns one [`KickoffProcessor`] task per input. Each
//! processor walks the stages in order on its own copy of the input, merges
//! structured output after every stage, sums usage metrics per producer and
//! keeps an append-only [`Trace`]. Results come back as a [`PipelineOutput`]
//! in input order.
//!
//! # Example
//!
//! ```rust,ignore
//! use cadence_core::pipeline::{FnUnit, Pipeline, StageOutput};
//! use cadence_core::kickoff_input;
//! use serde_json::json;
//!
//! let pipeline = Pipeline::builder()
//!     .unit(FnUnit::new("extract", |input| Ok(StageOutput::structured(json!({"n": 1})))))
//!     .parallel(vec![search.shared(), summarize.shared()])
//!     .build()?;
//!
//! let output = pipeline.run(vec![kickoff_input!({"query": "rust"})]).await?;
//! for result in &output {
//!     println!("{}: {}", result.index, result.raw());
//! }
//! ```

mod definition;
mod export;
mod input;
mod metrics;
mod output;
mod parallel;
mod processor;
mod result;
mod runner;
mod stage;
mod trace;
mod unit;

pub use definition::{PipelineDefinition, StageDefinition, WorkUnitRegistry};
pub use export::{OutputExporter, OutputFormat};
pub use input::KickoffInput;
pub use metrics::{MetricsMap, ProducerId, UsageMetrics, accumulate, aggregate};
pub use output::StageOutput;
pub use processor::KickoffProcessor;
pub use result::{KickoffResult, KickoffStatus, PipelineOutput, RunId};
pub use runner::{Pipeline, PipelineBuilder, RunOptions};
pub use stage::{MIN_GROUP_SIZE, Stage, StageKind};
pub use trace::{StageTrace, Trace, TraceEntry};
pub use unit::{FieldRouter, FnSelector, FnUnit, PerKickoff, RouteSelector, WorkUnit};
