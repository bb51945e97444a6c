//! Fan-out / fan-in of work unit invocations
//!
//! Every invocation runs as its own tokio task on an independent deep copy of
//! the stage input. Results come back in invocation order no matter which
//! task finishes first.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};

use super::input::KickoffInput;
use super::output::StageOutput;
use super::unit::{RouteSelector, WorkUnit};

/// Something a stage can invoke
#[derive(Clone)]
pub(crate) enum Invocation {
    Work(Arc<dyn WorkUnit>),
    Select(Arc<dyn RouteSelector>),
}

impl Invocation {
    pub(crate) fn name(&self) -> &str {
        match self {
            Invocation::Work(unit) => unit.name(),
            Invocation::Select(selector) => selector.name(),
        }
    }

    async fn call(self, input: KickoffInput) -> anyhow::Result<StageOutput> {
        match self {
            Invocation::Work(unit) => unit.execute(input).await,
            Invocation::Select(selector) => selector.execute(input).await,
        }
    }
}

/// Outcome of one branch, in invocation order
#[derive(Debug)]
pub(crate) struct BranchOutcome {
    pub branch: usize,
    pub unit: String,
    pub result: Result<StageOutput, String>,
}

/// Aborts the tasks it tracks when dropped.
///
/// Keeps spawned work from outliving a caller that stopped waiting on it,
/// e.g. when the run deadline cancels a kickoff mid-stage. Aborting a task
/// that already finished is a no-op.
pub(crate) struct TaskGuard(Vec<AbortHandle>);

impl TaskGuard {
    pub(crate) fn new<T>(handles: &[JoinHandle<T>]) -> Self {
        Self(handles.iter().map(JoinHandle::abort_handle).collect())
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Run every invocation concurrently and wait for all of them.
///
/// `limit`, when set, caps how many invocations execute at once; all tasks
/// are still spawned up front and queue on the semaphore.
pub(crate) async fn fan_out(
    invocations: Vec<Invocation>,
    input: &KickoffInput,
    limit: Option<Arc<Semaphore>>,
) -> Vec<BranchOutcome> {
    let names: Vec<String> = invocations.iter().map(|i| i.name().to_string()).collect();

    let handles: Vec<JoinHandle<anyhow::Result<StageOutput>>> = invocations
        .into_iter()
        .map(|invocation| {
            let branch_input = input.clone();
            let limit = limit.clone();
            tokio::spawn(async move {
                let _permit = match limit {
                    Some(semaphore) => Some(
                        semaphore
                            .acquire_owned()
                            .await
                            .map_err(|_| anyhow::anyhow!("branch limiter closed"))?,
                    ),
                    None => None,
                };
                invocation.call(branch_input).await
            })
        })
        .collect();

    let guard = TaskGuard::new(&handles);
    let joined = join_all(handles).await;
    drop(guard);

    joined
        .into_iter()
        .zip(names)
        .enumerate()
        .map(|(branch, (joined, unit))| {
            let result = match joined {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(e) if e.is_panic() => Err(format!("work unit panicked: {}", panic_message(e))),
                Err(e) => Err(e.to_string()),
            };
            BranchOutcome {
                branch,
                unit,
                result,
            }
        })
        .collect()
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
