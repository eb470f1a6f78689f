//! RunTests step: stage a test suite onto an instance and watch the serial
//! console for the verdict.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{instance_target, validate_ref, StepAction, StepMeta};
use crate::duration::parse_duration;
use crate::error::{Error, Result};
use crate::workflow::Workflow;

const DEFAULT_TEST_INTERVAL: &str = "5s";
const SUCCESS_MATCH: &str = "TESTS PASSED";
const FAILURE_MATCH: &str = "TESTS FAILED";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RunTests {
    /// Instance to run the suite on.
    pub name: String,
    /// Name of the staged source holding the suite.
    pub test_suite: String,
    /// Poll interval, a duration string.
    pub interval: String,
    #[serde(skip)]
    parsed_interval: Duration,
}

#[async_trait]
impl StepAction for RunTests {
    fn populate(&mut self, s: &StepMeta, _w: &Workflow) -> Result<()> {
        if self.interval.is_empty() {
            self.interval = DEFAULT_TEST_INTERVAL.to_string();
        }
        self.parsed_interval = parse_duration(&self.interval).map_err(|e| {
            Error::InvalidInput(format!(
                "failed to parse interval for step {:?}: {}",
                s.name, e
            ))
        })?;
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidInput(format!(
                "step {:?}: instance name is mandatory",
                s.name
            )));
        }
        if self.test_suite.is_empty() {
            return Err(Error::InvalidInput(format!(
                "step {:?}: test suite is mandatory",
                s.name
            )));
        }
        if !w.sources.contains_key(&self.test_suite) {
            return Err(Error::InvalidInput(format!(
                "step {:?}: test suite {:?} is not among the workflow sources",
                s.name, self.test_suite
            )));
        }
        validate_ref(&w.registries.instances, &self.name, s, w)
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let api = w.compute()?;
        let (project, zone, instance) = instance_target(&self.name, w);

        let mut metadata = HashMap::new();
        metadata.insert(
            "test-suite".to_string(),
            format!("{}/{}", w.sources_path, self.test_suite),
        );
        info!(step = %s.name, instance = %instance, suite = %self.test_suite, "starting test suite");
        api.set_instance_metadata(&project, &zone, &instance, &metadata)
            .await?;

        let mut start: i64 = 0;
        let mut tick = tokio::time::interval(self.parsed_interval);
        loop {
            tokio::select! {
                _ = w.cancel.cancelled() => return Ok(()),
                _ = tick.tick() => {
                    let out = match api
                        .get_serial_port_output(&project, &zone, &instance, 1, start)
                        .await
                    {
                        Ok(out) => out,
                        Err(e) => {
                            debug!(step = %s.name, instance = %instance, error = %e, "serial output unavailable");
                            continue;
                        }
                    };
                    start = out.next;
                    if out.contents.contains(FAILURE_MATCH) {
                        return Err(Error::Execution(format!(
                            "test suite {:?} failed on instance {:?}",
                            self.test_suite, instance
                        )));
                    }
                    if out.contents.contains(SUCCESS_MATCH) {
                        info!(step = %s.name, instance = %instance, "test suite passed");
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

    fn step() -> RunTests {
        RunTests {
            name: "projects/p/zones/z-a/instances/i".to_string(),
            test_suite: "suite.sh".to_string(),
            interval: "0.1s".to_string(),
            parsed_interval: Duration::ZERO,
        }
    }

    #[test]
    fn test_validate_requires_staged_suite() {
        let w = test_workflow();
        let mut s = step();
        let err = s.validate(&meta("tests"), &w).unwrap_err();
        assert!(err.to_string().contains("suite.sh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_passes_on_success_marker() {
        let api = Arc::new(TestComputeApi::new());
        api.push_serial("i", "running 12 cases");
        api.push_serial("i", "TESTS PASSED");
        let mut w = test_workflow_with(api.clone());
        w.sources
            .insert("suite.sh".to_string(), "./suite.sh".to_string());
        let mut s = step();
        s.populate(&meta("tests"), &w).unwrap();
        s.run(&meta("tests"), &w).await.unwrap();
        // Metadata handshake happened before polling.
        assert_eq!(api.count("set-instance-metadata"), 1);
        assert!(api.calls()[0].contains("test-suite"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_fails_on_failure_marker() {
        let api = Arc::new(TestComputeApi::new());
        api.push_serial("i", "TESTS FAILED");
        let mut w = test_workflow_with(api);
        w.sources
            .insert("suite.sh".to_string(), "./suite.sh".to_string());
        let mut s = step();
        s.populate(&meta("tests"), &w).unwrap();
        let err = s.run(&meta("tests"), &w).await.unwrap_err();
        assert_eq!(err.code(), "EXECUTION_ERROR");
    }
}
