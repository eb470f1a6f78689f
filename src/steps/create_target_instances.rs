//! CreateTargetInstances step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{resolve_link, validate_ref, StepAction, StepMeta};
use crate::compute;
use crate::error::{Error, MultiError, Result};
use crate::resource::{url, ResourceFields};
use crate::workflow::Workflow;

/// A target instance for protocol forwarding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetInstance {
    #[serde(flatten)]
    pub target: compute::TargetInstance,
    #[serde(flatten)]
    pub resource: ResourceFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateTargetInstances(pub Vec<TargetInstance>);

#[async_trait]
impl StepAction for CreateTargetInstances {
    fn populate(&mut self, _s: &StepMeta, w: &Workflow) -> Result<()> {
        for ti in &mut self.0 {
            let name = ti.target.name.clone();
            ti.target.name = ti.resource.populate(&name, &w.project, &w.id);
            if ti.target.zone.is_empty() {
                ti.target.zone = w.zone.clone();
            }
            ti.resource.link = url::zonal_link(
                &ti.resource.project,
                &ti.target.zone,
                "targetInstances",
                &ti.target.name,
            );
        }
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        for ti in &self.0 {
            let pre = format!(
                "cannot create target instance {:?}",
                ti.resource.daisy_name
            );
            if ti.target.name.is_empty() {
                errs.push(Error::InvalidInput(format!("{}: name is mandatory", pre)));
                continue;
            }
            errs.collect(ti.resource.validate_name("target instance"));
            if ti.target.instance.is_empty() {
                errs.push(Error::InvalidInput(format!(
                    "{}: instance is mandatory",
                    pre
                )));
            } else {
                errs.collect(validate_ref(
                    &w.registries.instances,
                    &ti.target.instance,
                    s,
                    w,
                ));
            }
            errs.collect(
                w.registries
                    .target_instances
                    .reg_create(ti.resource.to_resource(&s.id), ti.resource.over_write),
            );
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let api = w.compute()?;
        for ti in &self.0 {
            let mut wire = ti.target.clone();
            wire.instance = resolve_link(&w.registries.instances, &wire.instance, w);
            info!(step = %s.name, target = %wire.name, "creating target instance");
            api.create_target_instance(&ti.resource.project, &wire.zone, &wire)
                .await?;
            w.registries
                .target_instances
                .mark_created(&ti.resource.daisy_name);
        }
        Ok(())
    }
}
