//! StopInstances step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{instance_target, validate_ref, StepAction, StepMeta};
use crate::error::{MultiError, Result};
use crate::workflow::Workflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StopInstances {
    pub instances: Vec<String>,
}

#[async_trait]
impl StepAction for StopInstances {
    fn populate(&mut self, _s: &StepMeta, _w: &Workflow) -> Result<()> {
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        for instance in &self.instances {
            errs.collect(validate_ref(&w.registries.instances, instance, s, w));
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let api = w.compute()?;
        for instance in &self.instances {
            let (project, zone, name) = instance_target(instance, w);
            info!(step = %s.name, instance = %name, "stopping instance");
            api.stop_instance(&project, &zone, &name).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::testing::TestComputeApi;
    use crate::resource::Resource;
    use crate::workflow::testing::test_workflow_with;
    use std::sync::Arc;
    use std::time::Duration;

    fn meta(id: &str) -> StepMeta {
        StepMeta {
            name: id.to_string(),
            id: id.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_run_stops_registry_instance_by_real_name() {
        let api = Arc::new(TestComputeApi::new());
        let w = test_workflow_with(api.clone());
        w.registries
            .instances
            .reg_create(
                Resource {
                    daisy_name: "i".to_string(),
                    real_name: "i-abcde".to_string(),
                    link: "projects/test-project/zones/us-central1-a/instances/i-abcde".to_string(),
                    creator_step: "boot".to_string(),
                    ..Default::default()
                },
                false,
            )
            .unwrap();
        let step = StopInstances {
            instances: vec!["i".to_string()],
        };
        step.run(&meta("stop"), &w).await.unwrap();
        assert_eq!(
            api.calls(),
            vec!["stop-instance test-project/us-central1-a/i-abcde"]
        );
    }
}
