//! Resume step: resume a suspended instance.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{instance_call_target, StepAction, StepMeta};
use crate::error::{Error, MultiError, Result};
use crate::workflow::Workflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Resume {
    pub project: String,
    pub zone: String,
    pub instance: String,
}

#[async_trait]
impl StepAction for Resume {
    fn populate(&mut self, _s: &StepMeta, w: &Workflow) -> Result<()> {
        if self.project.is_empty() {
            self.project = w.project.clone();
        }
        if self.zone.is_empty() {
            self.zone = w.zone.clone();
        }
        Ok(())
    }

    fn validate(&mut self, _s: &StepMeta, _w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        if self.project.is_empty() {
            errs.push(Error::InvalidInput("must specify project".to_string()));
        }
        if self.zone.is_empty() {
            errs.push(Error::InvalidInput("must specify zone".to_string()));
        }
        if self.instance.is_empty() {
            errs.push(Error::InvalidInput("must specify instance".to_string()));
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let (project, zone, instance) =
            instance_call_target(&self.instance, &self.project, &self.zone, w);
        info!(step = %s.name, instance = %instance, "resuming instance");
        w.compute()?
            .resume_instance(&project, &zone, &instance)
            .await?;
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

    fn meta(name: &str) -> StepMeta {
        StepMeta {
            name: name.to_string(),
            id: name.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_populate_defaults_from_workflow() {
        let mut w = test_workflow();
        w.project = "foo".to_string();
        w.zone = "bar".to_string();
        let mut step = Resume {
            instance: "baz".to_string(),
            ..Default::default()
        };
        step.populate(&meta("resume"), &w).unwrap();
        assert_eq!(step.project, "foo");
        assert_eq!(step.zone, "bar");
        assert_eq!(step.instance, "baz");
    }

    #[test]
    fn test_populate_preserves_explicit_values() {
        let mut w = test_workflow();
        w.project = "foo".to_string();
        w.zone = "bar".to_string();
        let mut step = Resume {
            project: "x".to_string(),
            zone: "y".to_string(),
            instance: "baz".to_string(),
        };
        step.populate(&meta("resume"), &w).unwrap();
        assert_eq!(step.project, "x");
        assert_eq!(step.zone, "y");
    }

    #[test]
    fn test_validate_requires_instance() {
        let w = test_workflow();
        let mut step = Resume {
            project: "p".to_string(),
            zone: "z".to_string(),
            ..Default::default()
        };
        let err = step.validate(&meta("resume"), &w).unwrap_err();
        assert!(err.to_string().contains("instance"));
    }

    #[test]
    fn test_validate_accepts_unregistered_instance() {
        let w = test_workflow();
        let mut step = Resume {
            instance: "pre-existing".to_string(),
            ..Default::default()
        };
        step.populate(&meta("resume"), &w).unwrap();
        step.validate(&meta("resume"), &w).unwrap();
    }

    #[tokio::test]
    async fn test_run_uses_registry_link() {
        let api = Arc::new(TestComputeApi::new());
        let w = test_workflow_with(api.clone());
        w.registries
            .instances
            .reg_create(
                crate::resource::Resource {
                    daisy_name: "baz".to_string(),
                    real_name: "baz-abcde".to_string(),
                    link: "projects/test-project/zones/us-central1-a/instances/baz-abcde"
                        .to_string(),
                    creator_step: "make".to_string(),
                    ..Default::default()
                },
                false,
            )
            .unwrap();

        let step = Resume {
            project: "test-project".to_string(),
            zone: "us-central1-a".to_string(),
            instance: "baz".to_string(),
        };
        step.run(&meta("resume"), &w).await.unwrap();
        assert_eq!(
            api.calls(),
            vec!["resume-instance test-project/us-central1-a/baz-abcde"]
        );
    }
}
