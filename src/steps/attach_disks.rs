//! AttachDisks step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{instance_target, resolve_link, validate_ref, StepAction, StepMeta};
use crate::compute;
use crate::error::{Error, MultiError, Result};
use crate::workflow::Workflow;

const VALID_MODES: [&str; 2] = ["READ_WRITE", "READ_ONLY"];

/// One disk to attach to one instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DiskAttachment {
    #[serde(flatten)]
    pub attached: compute::AttachedDisk,
    pub instance: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachDisks(pub Vec<DiskAttachment>);

#[async_trait]
impl StepAction for AttachDisks {
    fn populate(&mut self, _s: &StepMeta, _w: &Workflow) -> Result<()> {
        for a in &mut self.0 {
            if a.attached.mode.is_empty() {
                a.attached.mode = "READ_WRITE".to_string();
            }
        }
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        for a in &self.0 {
            let pre = format!(
                "cannot attach disk {:?} to instance {:?}",
                a.attached.source, a.instance
            );
            if a.attached.source.is_empty() {
                errs.push(Error::InvalidInput(format!("{}: source is mandatory", pre)));
                continue;
            }
            if a.instance.is_empty() {
                errs.push(Error::InvalidInput(format!(
                    "{}: instance is mandatory",
                    pre
                )));
                continue;
            }
            if !VALID_MODES.contains(&a.attached.mode.as_str()) {
                errs.push(Error::InvalidInput(format!(
                    "{}: invalid mode {:?}, must be one of {:?}",
                    pre, a.attached.mode, VALID_MODES
                )));
            }
            errs.collect(validate_ref(&w.registries.disks, &a.attached.source, s, w));
            errs.collect(validate_ref(&w.registries.instances, &a.instance, s, w));
            let deps = w.deps.read().unwrap();
            errs.collect(
                w.registries
                    .disks
                    .reg_connect(&a.attached.source, &a.instance, &s.id, &deps),
            );
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let api = w.compute()?;
        for a in &self.0 {
            let (project, zone, instance) = instance_target(&a.instance, w);
            let mut attached = a.attached.clone();
            attached.source = resolve_link(&w.registries.disks, &attached.source, w);
            info!(
                step = %s.name,
                disk = %attached.source,
                instance = %instance,
                "attaching disk"
            );
            api.attach_disk(&project, &zone, &instance, &attached).await?;
        }
        Ok(())
    }
}
