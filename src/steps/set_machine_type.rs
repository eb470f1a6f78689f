//! SetMachineType step: change the machine type of a stopped instance.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{instance_call_target, StepAction, StepMeta};
use crate::error::{Error, MultiError, Result};
use crate::resource::url;
use crate::workflow::Workflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SetMachineType {
    pub project: String,
    pub zone: String,
    pub instance: String,
    pub machine_type: String,
}

#[async_trait]
impl StepAction for SetMachineType {
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
        if self.machine_type.is_empty() {
            errs.push(Error::InvalidInput("must specify machine type".to_string()));
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let (project, zone, instance) =
            instance_call_target(&self.instance, &self.project, &self.zone, w);
        let machine_type = if url::MACHINE_TYPE_URL_RGX.is_match(&self.machine_type) {
            url::qualify(&self.machine_type, &project)
        } else {
            format!(
                "projects/{}/zones/{}/machineTypes/{}",
                project, zone, self.machine_type
            )
        };
        info!(step = %s.name, instance = %instance, machine_type = %machine_type, "setting machine type");
        w.compute()?
            .set_machine_type(&project, &zone, &instance, &machine_type)
            .await?;
        Ok(())
    }
}
