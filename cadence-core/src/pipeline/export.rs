//! Pipeline output export

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::result::{KickoffResult, PipelineOutput};

/// Export format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// JSON format
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// YAML document
    Yaml,
    /// Human-readable per-kickoff report
    Summary,
}

/// Pipeline output exporter
pub struct OutputExporter;

impl OutputExporter {
    /// Export to JSON
    pub fn to_json(output: &PipelineOutput) -> Result<String> {
        Ok(serde_json::to_string(output)?)
    }

    /// Export to pretty JSON
    pub fn to_json_pretty(output: &PipelineOutput) -> Result<String> {
        Ok(serde_json::to_string_pretty(output)?)
    }

    /// Export to YAML
    pub fn to_yaml(output: &PipelineOutput) -> Result<String> {
        Ok(serde_yaml::to_string(output)?)
    }

    /// Export to summary format
    pub fn to_summary(output: &PipelineOutput) -> String {
        let succeeded = output.successes().count();
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Run: {}", output.pipeline));
        lines.push(format!("ID: {}", output.run_id));
        lines.push(format!(
            "Kickoffs: {} ({} succeeded, {} failed)",
            output.len(),
            succeeded,
            output.len() - succeeded
        ));
        lines.push(format!("Duration: {}ms", output.duration_ms()));

        lines.push(String::new());
        for result in output {
            lines.push(Self::kickoff_line(result));
        }

        let usage = output.total_usage();
        if !usage.is_empty() {
            lines.push(String::new());
            lines.push("Token Usage:".to_string());
            for (producer, metrics) in &usage {
                lines.push(format!(
                    "  {}: {} total ({} prompt, {} completion, {} requests)",
                    producer,
                    metrics.total_tokens,
                    metrics.prompt_tokens,
                    metrics.completion_tokens,
                    metrics.successful_requests
                ));
            }
        }

        lines.join("\n")
    }

    fn kickoff_line(result: &KickoffResult) -> String {
        let status = match result.error() {
            None => "SUCCESS".to_string(),
            Some(error) => match error.stage_index() {
                Some(stage) => format!("FAILED at stage {stage}: {error}"),
                None => format!("FAILED: {error}"),
            },
        };
        format!(
            "  [{}] {} | trace {} | {} tokens | {}ms",
            result.index,
            status,
            result.trace.len(),
            result.total_usage().total_tokens,
            result.duration_ms
        )
    }

    /// Export in specified format
    pub fn export(output: &PipelineOutput, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => Self::to_json(output),
            OutputFormat::JsonPretty => Self::to_json_pretty(output),
            OutputFormat::Yaml => Self::to_yaml(output),
            OutputFormat::Summary => Ok(Self::to_summary(output)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KickoffError;
    use crate::pipeline::{KickoffInput, KickoffStatus, MetricsMap, RunId, Trace, UsageMetrics};
    use chrono::Utc;

    fn sample() -> PipelineOutput {
        let input = KickoffInput::new().with("v", 1);
        let mut usage = MetricsMap::new();
        usage.insert("llm".to_string(), UsageMetrics::from_usage(4, 6));

        let ok = KickoffResult {
            index: 0,
            original_input: input.clone(),
            final_input: input.clone(),
            status: KickoffStatus::Succeeded,
            trace: Trace::start(&input),
            stage_outputs: Vec::new(),
            usage_metrics: usage,
            duration_ms: 3,
        };
        let mut failed = ok.clone();
        failed.index = 1;
        failed.usage_metrics = MetricsMap::new();
        failed.status = KickoffStatus::Failed(KickoffError::WorkUnitExecution {
            stage_index: 2,
            unit: "summarize".to_string(),
            message: "boom".to_string(),
        });

        let now = Utc::now();
        PipelineOutput {
            run_id: RunId::new(),
            pipeline: "demo".to_string(),
            started_at: now,
            finished_at: now,
            results: vec![ok, failed],
        }
    }

    #[test]
    fn test_summary_lists_each_kickoff() {
        let summary = OutputExporter::to_summary(&sample());

        assert!(summary.contains("Pipeline Run: demo"));
        assert!(summary.contains("2 (1 succeeded, 1 failed)"));
        assert!(summary.contains("[0] SUCCESS"));
        assert!(summary.contains("[1] FAILED at stage 2"));
        assert!(summary.contains("llm: 10 total"));
    }

    #[test]
    fn test_json_and_yaml_round_trip() {
        let output = sample();

        let json = OutputExporter::export(&output, OutputFormat::Json).unwrap();
        let back: PipelineOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(back, output);

        let yaml = OutputExporter::export(&output, OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("pipeline: demo"));
        let back: PipelineOutput = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.results.len(), 2);
        assert_eq!(back.results[1].failed_stage(), Some(2));
    }
}
