//! Suspend step: suspend a running instance.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{instance_call_target, StepAction, StepMeta};
use crate::error::{Error, MultiError, Result};
use crate::workflow::Workflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Suspend {
    pub project: String,
    pub zone: String,
    pub instance: String,
}

#[async_trait]
impl StepAction for Suspend {
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
        info!(step = %s.name, instance = %instance, "suspending instance");
        w.compute()?
            .suspend_instance(&project, &zone, &instance)
            .await?;
        Ok(())
    }
}
