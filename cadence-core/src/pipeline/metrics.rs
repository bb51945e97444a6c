//! Usage metrics and per-producer aggregation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

/// Identifies whoever produced a metrics contribution (usually a work unit
/// name, or a model/agent id reported by the unit itself).
pub type ProducerId = String;

/// Usage metrics keyed by producer
pub type MetricsMap = BTreeMap<ProducerId, UsageMetrics>;

/// Resource counters attributed to one producer.
///
/// Every field is a count, so combining two contributions is plain
/// field-wise addition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetrics {
    /// Total tokens consumed
    #[serde(default)]
    pub total_tokens: u64,
    /// Prompt tokens
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Prompt tokens served from cache
    #[serde(default)]
    pub cached_prompt_tokens: u64,
    /// Completion tokens
    #[serde(default)]
    pub completion_tokens: u64,
    /// Requests that completed successfully
    #[serde(default)]
    pub successful_requests: u64,
}

impl UsageMetrics {
    /// Metrics carrying only a total token count
    pub fn tokens(total_tokens: u64) -> Self {
        Self {
            total_tokens,
            ..Self::default()
        }
    }

    /// Metrics from a prompt/completion split; total is derived
    pub fn from_usage(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            prompt_tokens,
            completion_tokens,
            ..Self::default()
        }
    }

    /// Set the successful request count
    pub fn with_requests(mut self, successful_requests: u64) -> Self {
        self.successful_requests = successful_requests;
        self
    }

    /// Set the cached prompt token count
    pub fn with_cached_prompt_tokens(mut self, cached_prompt_tokens: u64) -> Self {
        self.cached_prompt_tokens = cached_prompt_tokens;
        self
    }

    /// Whether every counter is zero
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl Add for UsageMetrics {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

/// Counters saturate at `u64::MAX` instead of overflowing.
impl AddAssign for UsageMetrics {
    fn add_assign(&mut self, rhs: Self) {
        self.total_tokens = self.total_tokens.saturating_add(rhs.total_tokens);
        self.prompt_tokens = self.prompt_tokens.saturating_add(rhs.prompt_tokens);
        self.cached_prompt_tokens = self
            .cached_prompt_tokens
            .saturating_add(rhs.cached_prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(rhs.completion_tokens);
        self.successful_requests = self
            .successful_requests
            .saturating_add(rhs.successful_requests);
    }
}

impl std::iter::Sum for UsageMetrics {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Fold one map of contributions into an accumulator, summing repeated ids.
pub fn accumulate(into: &mut MetricsMap, contributions: &MetricsMap) {
    for (producer, metrics) in contributions {
        *into.entry(producer.clone()).or_default() += *metrics;
    }
}

/// Combine per-stage metrics maps into one map keyed by producer.
///
/// Counters for a producer are summed across every map it appears in.
/// Producers that never appear are absent from the result.
pub fn aggregate<'a, I>(per_stage: I) -> MetricsMap
where
    I: IntoIterator<Item = &'a MetricsMap>,
{
    let mut total = MetricsMap::new();
    for stage in per_stage {
        accumulate(&mut total, stage);
    }
    total
}
