//! Kickoff results and the aggregate run output

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::KickoffError;

use super::input::KickoffInput;
use super::metrics::{self, MetricsMap, UsageMetrics};
use super::output::StageOutput;
use super::trace::Trace;

/// Unique identifier for one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Generate a new random run id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal status of one kickoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum KickoffStatus {
    /// Every stage completed
    Succeeded,
    /// The walk stopped early
    Failed(KickoffError),
}

/// Everything one kickoff produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KickoffResult {
    /// Position of the kickoff's input in the run
    pub index: usize,
    /// Input as supplied by the caller
    pub original_input: KickoffInput,
    /// Input after every completed stage was merged in
    pub final_input: KickoffInput,
    /// Success or the error that stopped the walk
    pub status: KickoffStatus,
    /// Stage-by-stage record
    pub trace: Trace,
    /// Every stage output in stage order, group outputs in unit order
    pub stage_outputs: Vec<StageOutput>,
    /// Usage summed per producer across completed stages
    pub usage_metrics: MetricsMap,
    /// Wall-clock duration of the kickoff
    pub duration_ms: u64,
}

impl KickoffResult {
    /// Result for a kickoff whose task died before reporting
    pub(crate) fn aborted(index: usize, input: KickoffInput, message: impl Into<String>) -> Self {
        Self {
            index,
            trace: Trace::start(&input),
            final_input: input.clone(),
            original_input: input,
            status: KickoffStatus::Failed(KickoffError::Aborted {
                message: message.into(),
            }),
            stage_outputs: Vec::new(),
            usage_metrics: MetricsMap::new(),
            duration_ms: 0,
        }
    }

    /// Whether every stage completed
    pub fn is_success(&self) -> bool {
        matches!(self.status, KickoffStatus::Succeeded)
    }

    /// Error that stopped the walk, if any
    pub fn error(&self) -> Option<&KickoffError> {
        match &self.status {
            KickoffStatus::Succeeded => None,
            KickoffStatus::Failed(error) => Some(error),
        }
    }

    /// Stage the failure is attributed to
    pub fn failed_stage(&self) -> Option<usize> {
        self.error().and_then(KickoffError::stage_index)
    }

    /// Output of the last unit that ran
    pub fn last_output(&self) -> Option<&StageOutput> {
        self.stage_outputs.last()
    }

    /// Raw text of the last unit's output, empty if nothing ran.
    ///
    /// When the last stage is a parallel group this is its final branch.
    pub fn raw(&self) -> &str {
        self.last_output().map(|o| o.raw.as_str()).unwrap_or_default()
    }

    /// Structured part of the last unit's output.
    ///
    /// When the last stage is a parallel group this is its final branch only;
    /// see [`last_stage_structured`](Self::last_stage_structured) for the
    /// whole stage.
    pub fn structured(&self) -> Option<&Map<String, Value>> {
        self.last_output().and_then(|o| o.structured.as_ref())
    }

    /// Structured outputs of the last completed stage, merged in unit order
    pub fn last_stage_structured(&self) -> Option<Map<String, Value>> {
        let stage = self.trace.last_stage()?;
        let mut parts = stage
            .outputs
            .iter()
            .filter_map(|o| o.structured.as_ref())
            .peekable();
        parts.peek()?;

        let mut merged = Map::new();
        for part in parts {
            merged.extend(part.clone());
        }
        Some(merged)
    }

    /// Total usage across every producer
    pub fn total_usage(&self) -> UsageMetrics {
        self.usage_metrics.values().copied().sum()
    }
}

/// Ordered results of one run.
///
/// `results[i]` always belongs to `inputs[i]`, whatever order the kickoffs
/// finished in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// Run identifier, also attached to the run's tracing span
    pub run_id: RunId,
    /// Name of the pipeline that produced the output
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One result per input, in input order
    pub results: Vec<KickoffResult>,
}

impl PipelineOutput {
    /// Number of kickoffs
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Result for the input at `index`
    pub fn get(&self, index: usize) -> Option<&KickoffResult> {
        self.results.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KickoffResult> {
        self.results.iter()
    }

    /// Kickoffs that completed every stage
    pub fn successes(&self) -> impl Iterator<Item = &KickoffResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    /// Kickoffs that stopped early
    pub fn failures(&self) -> impl Iterator<Item = &KickoffResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    /// Whether every kickoff succeeded
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(KickoffResult::is_success)
    }

    /// Usage per producer summed over every kickoff
    pub fn total_usage(&self) -> MetricsMap {
        metrics::aggregate(self.results.iter().map(|r| &r.usage_metrics))
    }

    /// Wall-clock duration of the run
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

impl IntoIterator for PipelineOutput {
    type Item = KickoffResult;
    type IntoIter = std::vec::IntoIter<KickoffResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a> IntoIterator for &'a PipelineOutput {
    type Item = &'a KickoffResult;
    type IntoIter = std::slice::Iter<'a, KickoffResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{StageKind, StageTrace};
    use serde_json::json;

    fn succeeded(index: usize, tokens: u64) -> KickoffResult {
        let input = KickoffInput::new().with("i", index as i64);
        let mut usage = MetricsMap::new();
        usage.insert("llm".to_string(), UsageMetrics::tokens(tokens));
        KickoffResult {
            index,
            trace: Trace::start(&input),
            final_input: input.clone(),
            original_input: input,
            status: KickoffStatus::Succeeded,
            stage_outputs: vec![
                StageOutput::raw("first"),
                StageOutput::structured(json!({"answer": index})),
            ],
            usage_metrics: usage,
            duration_ms: 5,
        }
    }

    #[test]
    fn test_result_accessors_use_last_output() {
        let result = succeeded(1, 10);
        assert!(result.is_success());
        assert_eq!(result.raw(), r#"{"answer":1}"#);
        assert_eq!(result.structured().unwrap()["answer"], json!(1));
        assert_eq!(result.total_usage().total_tokens, 10);
        assert!(result.failed_stage().is_none());
    }

    #[test]
    fn test_last_stage_structured_merges_group() {
        let mut result = succeeded(0, 1);
        let outputs = vec![
            StageOutput::structured(json!({"x": "A", "a": 1})),
            StageOutput::raw("no structure"),
            StageOutput::structured(json!({"x": "B", "b": 2})),
        ];
        result.trace.record_stage(StageTrace {
            stage_index: 0,
            kind: StageKind::Parallel,
            units: vec!["a".into(), "skip".into(), "b".into()],
            outputs: outputs.clone(),
            started_at: Utc::now(),
            duration_ms: 1,
        });
        result.stage_outputs = outputs;

        assert_eq!(result.structured().unwrap()["x"], json!("B"));
        assert!(result.structured().unwrap().get("a").is_none());

        let merged = result.last_stage_structured().unwrap();
        assert_eq!(
            serde_json::Value::Object(merged),
            json!({"x": "B", "a": 1, "b": 2})
        );
    }

    #[test]
    fn test_last_stage_structured_empty_cases() {
        let result = KickoffResult::aborted(0, KickoffInput::new(), "gone");
        assert!(result.last_stage_structured().is_none());

        let mut result = succeeded(0, 1);
        result.trace.record_stage(StageTrace {
            stage_index: 0,
            kind: StageKind::Unit,
            units: vec!["text".into()],
            outputs: vec![StageOutput::raw("plain")],
            started_at: Utc::now(),
            duration_ms: 1,
        });
        assert!(result.last_stage_structured().is_none());
    }

    #[test]
    fn test_aborted_result() {
        let result = KickoffResult::aborted(4, KickoffInput::new().with("k", 1), "task cancelled");
        assert!(!result.is_success());
        assert_eq!(result.raw(), "");
        assert!(result.structured().is_none());
        assert_eq!(result.trace.len(), 1);
        assert!(matches!(result.error(), Some(KickoffError::Aborted { .. })));
        assert_eq!(result.original_input.get_i64("k"), Some(1));
    }

    #[test]
    fn test_output_totals_and_partitions() {
        let now = Utc::now();
        let output = PipelineOutput {
            run_id: RunId::new(),
            pipeline: "test".to_string(),
            started_at: now,
            finished_at: now,
            results: vec![
                succeeded(0, 3),
                KickoffResult::aborted(1, KickoffInput::new(), "gone"),
                succeeded(2, 5),
            ],
        };

        assert_eq!(output.len(), 3);
        assert_eq!(output.successes().count(), 2);
        assert_eq!(output.failures().map(|r| r.index).collect::<Vec<_>>(), vec![1]);
        assert!(!output.all_succeeded());
        assert_eq!(output.total_usage()["llm"].total_tokens, 8);
        assert_eq!((&output).into_iter().count(), 3);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(KickoffStatus::Succeeded).unwrap();
        assert_eq!(json, json!({"status": "succeeded"}));

        let failed = KickoffStatus::Failed(KickoffError::Aborted {
            message: "x".to_string(),
        });
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["kind"], "aborted");
        let back: KickoffStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, failed);
    }
}
