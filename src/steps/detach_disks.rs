//! DetachDisks step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{instance_target, validate_ref, StepAction, StepMeta};
use crate::error::{Error, MultiError, Result};
use crate::resource::url;
use crate::workflow::Workflow;

/// One disk to detach from one instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DiskDetachment {
    pub disk: String,
    pub instance: String,
    pub device_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetachDisks(pub Vec<DiskDetachment>);

impl DiskDetachment {
    /// The device name to detach: explicit, or derived from the disk ref.
    fn device(&self, w: &Workflow) -> String {
        if !self.device_name.is_empty() {
            return self.device_name.clone();
        }
        if let Some(res) = w.registries.disks.get(&self.disk) {
            return res.real_name;
        }
        let parts = url::named_groups(&url::DISK_URL_RGX, &self.disk);
        parts
            .get("name")
            .cloned()
            .unwrap_or_else(|| self.disk.clone())
    }
}

#[async_trait]
impl StepAction for DetachDisks {
    fn populate(&mut self, _s: &StepMeta, _w: &Workflow) -> Result<()> {
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        for d in &self.0 {
            let pre = format!(
                "cannot detach disk {:?} from instance {:?}",
                d.disk, d.instance
            );
            if d.disk.is_empty() || d.instance.is_empty() {
                errs.push(Error::InvalidInput(format!(
                    "{}: disk and instance are mandatory",
                    pre
                )));
                continue;
            }
            errs.collect(validate_ref(&w.registries.disks, &d.disk, s, w));
            errs.collect(validate_ref(&w.registries.instances, &d.instance, s, w));
            let deps = w.deps.read().unwrap();
            errs.collect(
                w.registries
                    .disks
                    .reg_disconnect(&d.disk, &d.instance, &s.id, &deps),
            );
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let api = w.compute()?;
        for d in &self.0 {
            let (project, zone, instance) = instance_target(&d.instance, w);
            let device = d.device(w);
            info!(step = %s.name, device = %device, instance = %instance, "detaching disk");
            api.detach_disk(&project, &zone, &instance, &device).await?;
        }
        Ok(())
    }
}
