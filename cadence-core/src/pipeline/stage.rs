//! Stage definition

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::unit::{RouteSelector, WorkUnit};

/// Stage variant tag, used in traces, logs and declarative definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// One work unit
    Unit,
    /// Work units executed concurrently
    Parallel,
    /// Route selector
    Router,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StageKind::Unit => "unit",
            StageKind::Parallel => "parallel",
            StageKind::Router => "router",
        };
        f.write_str(label)
    }
}

/// One step of a pipeline
#[derive(Clone)]
pub enum Stage {
    /// Exactly one work unit
    Unit(Arc<dyn WorkUnit>),
    /// Two or more work units run concurrently; list order is merge order
    ParallelGroup(Vec<Arc<dyn WorkUnit>>),
    /// Route selector whose output is merged like any other stage output
    Router(Arc<dyn RouteSelector>),
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Unit(unit) => f.debug_tuple("Unit").field(&unit.name()).finish(),
            Stage::ParallelGroup(units) => f
                .debug_tuple("ParallelGroup")
                .field(&units.iter().map(|u| u.name()).collect::<Vec<_>>())
                .finish(),
            Stage::Router(selector) => f.debug_tuple("Router").field(&selector.name()).finish(),
        }
    }
}

/// Minimum number of units in a parallel group
pub const MIN_GROUP_SIZE: usize = 2;

impl Stage {
    /// Single work unit stage
    pub fn unit<U: WorkUnit + 'static>(unit: U) -> Self {
        Stage::Unit(Arc::new(unit))
    }

    /// Parallel group stage
    pub fn parallel(units: Vec<Arc<dyn WorkUnit>>) -> Self {
        Stage::ParallelGroup(units)
    }

    /// Route selector stage
    pub fn router<R: RouteSelector + 'static>(selector: R) -> Self {
        Stage::Router(Arc::new(selector))
    }

    /// Variant tag
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Unit(_) => StageKind::Unit,
            Stage::ParallelGroup(_) => StageKind::Parallel,
            Stage::Router(_) => StageKind::Router,
        }
    }

    /// Number of work units the stage runs
    pub fn width(&self) -> usize {
        match self {
            Stage::ParallelGroup(units) => units.len(),
            Stage::Unit(_) | Stage::Router(_) => 1,
        }
    }

    /// Names of the units in execution order
    pub fn unit_names(&self) -> Vec<String> {
        match self {
            Stage::Unit(unit) => vec![unit.name().to_string()],
            Stage::ParallelGroup(units) => units.iter().map(|u| u.name().to_string()).collect(),
            Stage::Router(selector) => vec![selector.name().to_string()],
        }
    }

    /// Display label, e.g. `parallel[search, summarize]`
    pub fn label(&self) -> String {
        format!("{}[{}]", self.kind(), self.unit_names().join(", "))
    }

    /// Reason the processor cannot execute this stage, if any
    pub(crate) fn unsupported_reason(&self) -> Option<String> {
        match self {
            Stage::ParallelGroup(units) if units.len() < MIN_GROUP_SIZE => Some(format!(
                "parallel group has {} unit(s), needs at least {}",
                units.len(),
                MIN_GROUP_SIZE
            )),
            _ => None,
        }
    }

    /// Copy of this stage for one kickoff, with stateful units forked
    pub(crate) fn instantiate(&self) -> Self {
        fn fork_unit(unit: &Arc<dyn WorkUnit>) -> Arc<dyn WorkUnit> {
            unit.fork().unwrap_or_else(|| Arc::clone(unit))
        }

        match self {
            Stage::Unit(unit) => Stage::Unit(fork_unit(unit)),
            Stage::ParallelGroup(units) => {
                Stage::ParallelGroup(units.iter().map(fork_unit).collect())
            }
            Stage::Router(selector) => {
                Stage::Router(selector.fork().unwrap_or_else(|| Arc::clone(selector)))
            }
        }
    }
}
