//! UpdateInstancesMetadata step.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{instance_target, validate_ref, StepAction, StepMeta};
use crate::error::{Error, MultiError, Result};
use crate::workflow::Workflow;

/// Metadata keys to merge onto one instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UpdateInstanceMetadata {
    pub instance: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateInstancesMetadata(pub Vec<UpdateInstanceMetadata>);

#[async_trait]
impl StepAction for UpdateInstancesMetadata {
    fn populate(&mut self, _s: &StepMeta, _w: &Workflow) -> Result<()> {
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        for u in &self.0 {
            if u.instance.is_empty() {
                errs.push(Error::InvalidInput(format!(
                    "step {:?}: must specify instance",
                    s.name
                )));
                continue;
            }
            if u.metadata.is_empty() {
                errs.push(Error::InvalidInput(format!(
                    "step {:?}: no metadata to set on instance {:?}",
                    s.name, u.instance
                )));
            }
            errs.collect(validate_ref(&w.registries.instances, &u.instance, s, w));
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let api = w.compute()?;
        for u in &self.0 {
            let (project, zone, name) = instance_target(&u.instance, w);
            info!(
                step = %s.name,
                instance = %name,
                keys = u.metadata.len(),
                "updating instance metadata"
            );
            api.set_instance_metadata(&project, &zone, &name, &u.metadata)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::testing::TestComputeApi;
    use crate::workflow::testing::{test_workflow, test_workflow_with};
    use std::sync::Arc;
    use std::time::Duration;

    fn meta(id: &str) -> StepMeta {
        StepMeta {
            name: id.to_string(),
            id: id.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_validate_requires_metadata() {
        let w = test_workflow();
        let mut step = UpdateInstancesMetadata(vec![UpdateInstanceMetadata {
            instance: "projects/p/zones/z-a/instances/i".to_string(),
            metadata: HashMap::new(),
        }]);
        let err = step.validate(&meta("update"), &w).unwrap_err();
        assert!(err.to_string().contains("no metadata"));
    }

    #[tokio::test]
    async fn test_run_sets_metadata() {
        let api = Arc::new(TestComputeApi::new());
        let w = test_workflow_with(api.clone());
        let mut metadata = HashMap::new();
        metadata.insert("role".to_string(), "builder".to_string());
        let step = UpdateInstancesMetadata(vec![UpdateInstanceMetadata {
            instance: "projects/p/zones/z-a/instances/i".to_string(),
            metadata,
        }]);
        step.run(&meta("update"), &w).await.unwrap();
        assert_eq!(api.calls(), vec!["set-instance-metadata p/z-a/i role"]);
    }
}
