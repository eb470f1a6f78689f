//! StartInstances step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{instance_target, validate_ref, StepAction, StepMeta};
use crate::error::{MultiError, Result};
use crate::workflow::Workflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StartInstances {
    pub instances: Vec<String>,
}

#[async_trait]
impl StepAction for StartInstances {
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
            info!(step = %s.name, instance = %name, "starting instance");
            api.start_instance(&project, &zone, &name).await?;
        }
        Ok(())
    }
}
