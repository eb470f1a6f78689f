//! CreateMachineImages step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{resolve_link, validate_ref, StepAction, StepMeta};
use crate::compute;
use crate::error::{Error, MultiError, Result};
use crate::resource::{url, ResourceFields};
use crate::workflow::Workflow;

/// A machine image capturing a whole instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineImage {
    #[serde(flatten)]
    pub machine_image: compute::MachineImage,
    #[serde(flatten)]
    pub resource: ResourceFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateMachineImages(pub Vec<MachineImage>);

#[async_trait]
impl StepAction for CreateMachineImages {
    fn populate(&mut self, _s: &StepMeta, w: &Workflow) -> Result<()> {
        for mi in &mut self.0 {
            let name = mi.machine_image.name.clone();
            mi.machine_image.name = mi.resource.populate(&name, &w.project, &w.id);
            mi.resource.link = url::global_link(
                &mi.resource.project,
                "machineImages",
                &mi.machine_image.name,
            );
        }
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        for mi in &self.0 {
            let pre = format!("cannot create machine image {:?}", mi.resource.daisy_name);
            if mi.machine_image.name.is_empty() {
                errs.push(Error::InvalidInput(format!("{}: name is mandatory", pre)));
                continue;
            }
            errs.collect(mi.resource.validate_name("machine image"));
            if mi.machine_image.source_instance.is_empty() {
                errs.push(Error::InvalidInput(format!(
                    "{}: source instance is mandatory",
                    pre
                )));
            } else {
                errs.collect(validate_ref(
                    &w.registries.instances,
                    &mi.machine_image.source_instance,
                    s,
                    w,
                ));
            }
            errs.collect(
                w.registries
                    .machine_images
                    .reg_create(mi.resource.to_resource(&s.id), mi.resource.over_write),
            );
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let api = w.compute()?;
        for mi in &self.0 {
            let mut wire = mi.machine_image.clone();
            wire.source_instance =
                resolve_link(&w.registries.instances, &wire.source_instance, w);
            info!(step = %s.name, machine_image = %wire.name, "creating machine image");
            api.create_machine_image(&mi.resource.project, &wire).await?;
            w.registries
                .machine_images
                .mark_created(&mi.resource.daisy_name);
        }
        Ok(())
    }
}
