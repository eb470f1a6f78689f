//! WaitForInstancesSignal step: watch serial consoles and power state.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{instance_target, validate_ref, StepAction, StepMeta};
use crate::duration::parse_duration;
use crate::error::{Error, MultiError, Result};
use crate::workflow::Workflow;

const DEFAULT_SIGNAL_INTERVAL: &str = "5s";

/// What to look for on an instance's serial console.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SerialOutput {
    pub port: i64,
    pub success_match: String,
    pub failure_match: Vec<String>,
    pub status_match: String,
}

/// A signal to wait for on one instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InstanceSignal {
    pub name: String,
    /// Poll interval, a duration string.
    pub interval: String,
    /// Wait for the instance to stop.
    pub stopped: bool,
    pub serial_output: Option<SerialOutput>,
    #[serde(skip)]
    parsed_interval: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaitForInstancesSignal(pub Vec<InstanceSignal>);

#[async_trait]
impl StepAction for WaitForInstancesSignal {
    fn populate(&mut self, s: &StepMeta, _w: &Workflow) -> Result<()> {
        for signal in &mut self.0 {
            if signal.interval.is_empty() {
                signal.interval = DEFAULT_SIGNAL_INTERVAL.to_string();
            }
            signal.parsed_interval = parse_duration(&signal.interval).map_err(|e| {
                Error::InvalidInput(format!(
                    "failed to parse interval for step {:?}: {}",
                    s.name, e
                ))
            })?;
            if let Some(so) = &mut signal.serial_output {
                if so.port == 0 {
                    so.port = 1;
                }
            }
        }
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        for signal in &self.0 {
            if signal.name.is_empty() {
                errs.push(Error::InvalidInput(format!(
                    "step {:?}: instance name is mandatory",
                    s.name
                )));
                continue;
            }
            if !signal.stopped && signal.serial_output.is_none() {
                errs.push(Error::InvalidInput(format!(
                    "step {:?}: instance {:?} has no signal to wait for",
                    s.name, signal.name
                )));
            }
            if let Some(so) = &signal.serial_output {
                if so.success_match.is_empty()
                    && so.failure_match.is_empty()
                    && so.status_match.is_empty()
                {
                    errs.push(Error::InvalidInput(format!(
                        "step {:?}: serial output for {:?} matches nothing",
                        s.name, signal.name
                    )));
                }
            }
            errs.collect(validate_ref(&w.registries.instances, &signal.name, s, w));
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        try_join_all(self.0.iter().map(|signal| wait_signal(signal, s, w))).await?;
        Ok(())
    }
}

async fn wait_signal(signal: &InstanceSignal, s: &StepMeta, w: &Workflow) -> Result<()> {
    let api = w.compute()?;
    let (project, zone, name) = instance_target(&signal.name, w);
    info!(step = %s.name, instance = %name, "waiting for instance signal");

    let mut start: i64 = 0;
    let mut tick = tokio::time::interval(signal.parsed_interval);
    loop {
        tokio::select! {
            _ = w.cancel.cancelled() => return Ok(()),
            _ = tick.tick() => {
                if signal.stopped && api.instance_stopped(&project, &zone, &name).await? {
                    info!(step = %s.name, instance = %name, "instance stopped");
                    return Ok(());
                }
                if let Some(so) = &signal.serial_output {
                    // Serial output may be unreadable while the instance
                    // boots; keep polling.
                    let out = match api
                        .get_serial_port_output(&project, &zone, &name, so.port, start)
                        .await
                    {
                        Ok(out) => out,
                        Err(e) => {
                            debug!(step = %s.name, instance = %name, error = %e, "serial output unavailable");
                            continue;
                        }
                    };
                    start = out.next;
                    if !so.status_match.is_empty() {
                        for line in out.contents.lines().filter(|l| l.contains(&so.status_match)) {
                            info!(step = %s.name, instance = %name, "{}", line);
                        }
                    }
                    for fm in &so.failure_match {
                        if !fm.is_empty() && out.contents.contains(fm) {
                            return Err(Error::Execution(format!(
                                "failure match {:?} found in serial output of instance {:?}",
                                fm, name
                            )));
                        }
                    }
                    if !so.success_match.is_empty() && out.contents.contains(&so.success_match) {
                        info!(step = %s.name, instance = %name, "success match found");
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::testing::TestComputeApi;
    use crate::workflow::testing::{test_workflow, test_workflow_with};
    use std::sync::Arc;

    fn meta(id: &str) -> StepMeta {
        StepMeta {
            name: id.to_string(),
            id: id.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    fn serial_signal(instance: &str) -> InstanceSignal {
        InstanceSignal {
            name: instance.to_string(),
            interval: "0.1s".to_string(),
            stopped: false,
            serial_output: Some(SerialOutput {
                port: 1,
                success_match: "BUILD DONE".to_string(),
                failure_match: vec!["BUILD FAILED".to_string()],
                status_match: String::new(),
            }),
            parsed_interval: Duration::ZERO,
        }
    }

    #[test]
    fn test_validate_requires_a_signal() {
        let w = test_workflow();
        let mut step = WaitForInstancesSignal(vec![InstanceSignal {
            name: "projects/p/zones/z-a/instances/i".to_string(),
            ..Default::default()
        }]);
        let err = step.validate(&meta("wait"), &w).unwrap_err();
        assert!(err.to_string().contains("no signal"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_match() {
        let api = Arc::new(TestComputeApi::new());
        api.push_serial("i", "booting...");
        api.push_serial("i", "BUILD DONE");
        let w = test_workflow_with(api.clone());
        let mut step = WaitForInstancesSignal(vec![serial_signal("i")]);
        step.populate(&meta("wait"), &w).unwrap();
        step.run(&meta("wait"), &w).await.unwrap();
        assert!(api.count("get-serial-port-output") >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_match_is_terminal() {
        let api = Arc::new(TestComputeApi::new());
        api.push_serial("i", "BUILD FAILED: no space left");
        let w = test_workflow_with(api);
        let mut step = WaitForInstancesSignal(vec![serial_signal("i")]);
        step.populate(&meta("wait"), &w).unwrap();
        let err = step.run(&meta("wait"), &w).await.unwrap_err();
        assert!(err.to_string().contains("BUILD FAILED"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_signal() {
        let api = Arc::new(TestComputeApi::new());
        api.set_stopped("i");
        let w = test_workflow_with(api);
        let mut step = WaitForInstancesSignal(vec![InstanceSignal {
            name: "i".to_string(),
            interval: "0.1s".to_string(),
            stopped: true,
            serial_output: None,
            parsed_interval: Duration::ZERO,
        }]);
        step.populate(&meta("wait"), &w).unwrap();
        step.run(&meta("wait"), &w).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_orderly_shutdown() {
        let api = Arc::new(TestComputeApi::new());
        let w = test_workflow_with(api);
        let mut step = WaitForInstancesSignal(vec![serial_signal("i")]);
        step.populate(&meta("wait"), &w).unwrap();
        w.cancel.cancel();
        step.run(&meta("wait"), &w).await.unwrap();
    }
}
