//! CreateSnapshots step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{resolve_parts, validate_ref, StepAction, StepMeta};
use crate::compute;
use crate::error::{Error, MultiError, Result};
use crate::resource::{url, ResourceFields};
use crate::workflow::Workflow;

/// A snapshot of a disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub snapshot: compute::Snapshot,
    #[serde(flatten)]
    pub resource: ResourceFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateSnapshots(pub Vec<Snapshot>);

#[async_trait]
impl StepAction for CreateSnapshots {
    fn populate(&mut self, _s: &StepMeta, w: &Workflow) -> Result<()> {
        for sn in &mut self.0 {
            let name = sn.snapshot.name.clone();
            sn.snapshot.name = sn.resource.populate(&name, &w.project, &w.id);
            sn.resource.link =
                url::global_link(&sn.resource.project, "snapshots", &sn.snapshot.name);
        }
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        for sn in &self.0 {
            let pre = format!("cannot create snapshot {:?}", sn.resource.daisy_name);
            if sn.snapshot.name.is_empty() {
                errs.push(Error::InvalidInput(format!("{}: name is mandatory", pre)));
                continue;
            }
            errs.collect(sn.resource.validate_name("snapshot"));
            if sn.snapshot.source_disk.is_empty() {
                errs.push(Error::InvalidInput(format!(
                    "{}: source disk is mandatory",
                    pre
                )));
            } else {
                errs.collect(validate_ref(
                    &w.registries.disks,
                    &sn.snapshot.source_disk,
                    s,
                    w,
                ));
            }
            errs.collect(
                w.registries
                    .snapshots
                    .reg_create(sn.resource.to_resource(&s.id), sn.resource.over_write),
            );
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let api = w.compute()?;
        for sn in &self.0 {
            let parts = resolve_parts(&w.registries.disks, &sn.snapshot.source_disk, w);
            let disk_project = parts
                .get("project")
                .cloned()
                .unwrap_or_else(|| sn.resource.project.clone());
            let zone = parts.get("zone").cloned().unwrap_or_else(|| w.zone.clone());
            let disk = parts
                .get("name")
                .cloned()
                .unwrap_or_else(|| sn.snapshot.source_disk.clone());
            info!(step = %s.name, snapshot = %sn.snapshot.name, disk = %disk, "creating snapshot");
            api.create_snapshot(&disk_project, &zone, &disk, &sn.snapshot)
                .await?;
            w.registries.snapshots.mark_created(&sn.resource.daisy_name);
        }
        Ok(())
    }
}
