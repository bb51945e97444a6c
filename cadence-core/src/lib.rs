//! # Cadence - Concurrent Pipeline Orchestration
//!
//! Cadence runs batches of inputs ("kickoffs") through an ordered list of
//! stages. Each kickoff is processed concurrently and in isolation:
//! - Stages run strictly in order, one barrier per stage
//! - Parallel groups fan out on independent copies of the input
//! - Structured outputs merge deterministically in unit order
//! - Usage metrics are summed per producer
//! - Every kickoff keeps an append-only trace, even when it fails
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cadence_core::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let pipeline = Pipeline::builder()
//!         .unit(FnUnit::new("double", |input| {
//!             let v = input.get_i64("v").unwrap_or_default();
//!             Ok(StageOutput::structured(json!({"v": v * 2})))
//!         }))
//!         .build()?;
//!
//!     let output = pipeline
//!         .run(vec![KickoffInput::new().with("v", 21)])
//!         .await?;
//!     assert_eq!(output.results[0].final_input.get_i64("v"), Some(42));
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Runner limits and the optional run deadline come from [`config::CadenceConfig`],
//! loaded from `cadence.toml` and `CADENCE_`-prefixed environment variables.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod telemetry;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{CadenceConfig, ConfigBuilder, RunnerConfig};
    pub use crate::error::{BranchFailure, CadenceError, KickoffError, Result};
    pub use crate::kickoff_input;
    pub use crate::pipeline::{
        FieldRouter, FnSelector, FnUnit, KickoffInput, KickoffResult, KickoffStatus,
        OutputExporter, OutputFormat, PerKickoff, Pipeline, PipelineDefinition, PipelineOutput,
        RouteSelector, RunOptions, Stage, StageDefinition, StageKind, StageOutput, Trace,
        UsageMetrics, WorkUnit, WorkUnitRegistry,
    };
    pub use crate::telemetry::init_tracing;
}
