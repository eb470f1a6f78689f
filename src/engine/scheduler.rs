//! Dependency-aware concurrent step scheduler.
//!
//! One cooperatively-cancellable task per runnable step, no parallelism
//! cap. A step becomes ready when every immediate dependency finished
//! successfully. The first fatal failure fires the workflow's cancellation
//! token: nothing new starts, running steps finish on their own or return
//! early when they observe the token, and everything still pending ends up
//! skipped.

use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{error, info};

use crate::error::{Error, MultiError, Result};
use crate::workflow::Workflow;

/// Lifecycle of one step during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Running,
    Done,
    Failed,
    /// Never started: a dependency failed or the workflow was cancelled.
    Skipped,
}

/// What happened to each step.
#[derive(Debug)]
pub struct RunReport {
    pub states: HashMap<String, StepState>,
}

impl RunReport {
    pub fn state(&self, step: &str) -> Option<StepState> {
        self.states.get(step).copied()
    }
}

/// Run every step of `w`, honoring dependencies, per-step timeouts and the
/// workflow's cancellation signal. Returns per-step states and the
/// collected errors.
pub(crate) async fn run_steps(w: &Workflow) -> (RunReport, MultiError) {
    let mut states: HashMap<String, StepState> = w
        .steps
        .keys()
        .map(|name| (name.clone(), StepState::Pending))
        .collect();
    let mut errs = MultiError::new();
    let mut running = FuturesUnordered::new();

    loop {
        if !w.cancel.is_cancelled() {
            let ready: Vec<String> = states
                .iter()
                .filter(|(_, state)| **state == StepState::Pending)
                .filter(|(name, _)| deps_done(w, &states, name))
                .map(|(name, _)| name.clone())
                .collect();
            for name in ready {
                states.insert(name.clone(), StepState::Running);
                running.push(run_one(w, name));
            }
        }

        match running.next().await {
            None => break,
            Some((name, result)) => match result {
                Ok(()) => {
                    info!(workflow = %w.name, step = %name, "step completed");
                    states.insert(name, StepState::Done);
                }
                Err(err) => {
                    error!(workflow = %w.name, step = %name, error = %err, "step failed");
                    states.insert(name, StepState::Failed);
                    if err.is_fatal() {
                        w.cancel.cancel();
                    }
                    errs.push(err);
                }
            },
        }
    }

    for state in states.values_mut() {
        if *state == StepState::Pending {
            *state = StepState::Skipped;
        }
    }

    (RunReport { states }, errs)
}

fn deps_done(w: &Workflow, states: &HashMap<String, StepState>, name: &str) -> bool {
    w.dependencies.get(name).map_or(true, |deps| {
        deps.iter()
            .all(|dep| states.get(dep) == Some(&StepState::Done))
    })
}

async fn run_one(w: &Workflow, name: String) -> (String, Result<()>) {
    let step = &w.steps[&name];
    info!(workflow = %w.name, step = %name, kind = step.kind(), "step running");
    let limit = step.timeout_d;
    let result = match tokio::time::timeout(limit, step.run(w)).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout(format!(
            "step {:?} did not complete within {}",
            name,
            format_timeout(limit)
        ))),
    };
    (name, result)
}

fn format_timeout(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}
