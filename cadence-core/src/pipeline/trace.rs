//! Per-kickoff execution trace

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::input::KickoffInput;
use super::output::StageOutput;
use super::stage::StageKind;

/// Record of one completed stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTrace {
    /// Position of the stage in the pipeline
    pub stage_index: usize,
    /// Stage variant
    pub kind: StageKind,
    /// Unit names in execution order
    pub units: Vec<String>,
    /// Outputs in unit order
    pub outputs: Vec<StageOutput>,
    /// When the stage started
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the stage
    pub duration_ms: u64,
}

/// One trace entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum TraceEntry {
    /// Snapshot of the input before the first stage
    Input {
        input: KickoffInput,
        recorded_at: DateTime<Utc>,
    },
    /// Results of one stage
    Stage(StageTrace),
}

impl TraceEntry {
    /// Stage record, if this is a stage entry
    pub fn as_stage(&self) -> Option<&StageTrace> {
        match self {
            TraceEntry::Stage(stage) => Some(stage),
            TraceEntry::Input { .. } => None,
        }
    }
}

/// Append-only record of a kickoff's walk through the pipeline.
///
/// Entry 0 is always the initial input snapshot; entry `i > 0` holds the
/// outputs of stage `i - 1`. Entries are never modified once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    /// Start a trace with the initial input snapshot
    pub(crate) fn start(input: &KickoffInput) -> Self {
        Self {
            entries: vec![TraceEntry::Input {
                input: input.clone(),
                recorded_at: Utc::now(),
            }],
        }
    }

    /// Append a completed stage
    pub(crate) fn record_stage(&mut self, stage: StageTrace) {
        debug_assert_eq!(stage.stage_index + 1, self.entries.len());
        self.entries.push(TraceEntry::Stage(stage));
    }

    /// Number of entries, including the initial snapshot
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// A trace always holds the initial snapshot
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in order
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// The input as it stood before the first stage
    pub fn initial_input(&self) -> Option<&KickoffInput> {
        match self.entries.first() {
            Some(TraceEntry::Input { input, .. }) => Some(input),
            _ => None,
        }
    }

    /// Number of stages that completed
    pub fn completed_stages(&self) -> usize {
        self.stages().count()
    }

    /// Completed stage records in order
    pub fn stages(&self) -> impl Iterator<Item = &StageTrace> {
        self.entries.iter().filter_map(TraceEntry::as_stage)
    }

    /// Record for the stage at `stage_index`
    pub fn stage(&self, stage_index: usize) -> Option<&StageTrace> {
        self.entries.get(stage_index + 1).and_then(TraceEntry::as_stage)
    }

    /// Record for the last completed stage
    pub fn last_stage(&self) -> Option<&StageTrace> {
        self.entries.last().and_then(TraceEntry::as_stage)
    }

    /// Total time spent in completed stages
    pub fn total_duration_ms(&self) -> u64 {
        self.stages().map(|s| s.duration_ms).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(index: usize, raw: &str) -> StageTrace {
        StageTrace {
            stage_index: index,
            kind: StageKind::Unit,
            units: vec![format!("unit{index}")],
            outputs: vec![StageOutput::raw(raw)],
            started_at: Utc::now(),
            duration_ms: 10,
        }
    }

    #[test]
    fn test_trace_starts_with_snapshot() {
        let input = KickoffInput::new().with("v", 1);
        let trace = Trace::start(&input);

        assert_eq!(trace.len(), 1);
        assert_eq!(trace.completed_stages(), 0);
        assert_eq!(trace.initial_input(), Some(&input));
        assert!(trace.last_stage().is_none());
    }

    #[test]
    fn test_trace_stage_lookup() {
        let mut trace = Trace::start(&KickoffInput::new());
        trace.record_stage(stage(0, "first"));
        trace.record_stage(stage(1, "second"));

        assert_eq!(trace.len(), 3);
        assert_eq!(trace.stage(0).unwrap().outputs[0].raw, "first");
        assert_eq!(trace.last_stage().unwrap().outputs[0].raw, "second");
        assert!(trace.stage(2).is_none());
        assert_eq!(trace.total_duration_ms(), 20);
    }

    #[test]
    fn test_trace_serializes_entry_tags() {
        let mut trace = Trace::start(&KickoffInput::new().with("v", 1));
        trace.record_stage(stage(0, "done"));

        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["entries"][0]["entry"], "input");
        assert_eq!(json["entries"][0]["input"]["v"], 1);
        assert_eq!(json["entries"][1]["entry"], "stage");
        assert_eq!(json["entries"][1]["kind"], "unit");

        let back: Trace = serde_json::from_value(json).unwrap();
        assert_eq!(back, trace);
    }
}
