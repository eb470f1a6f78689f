//! CreateDisks step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{resolve_link, validate_ref, StepAction, StepMeta};
use crate::compute;
use crate::error::{Error, MultiError, Result};
use crate::resource::{url, ResourceFields};
use crate::workflow::Workflow;

/// A persistent disk to create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Disk {
    #[serde(flatten)]
    pub disk: compute::Disk,
    #[serde(flatten)]
    pub resource: ResourceFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateDisks(pub Vec<Disk>);

#[async_trait]
impl StepAction for CreateDisks {
    fn populate(&mut self, _s: &StepMeta, w: &Workflow) -> Result<()> {
        for d in &mut self.0 {
            let name = d.disk.name.clone();
            d.disk.name = d.resource.populate(&name, &w.project, &w.id);
            if d.disk.zone.is_empty() {
                d.disk.zone = w.zone.clone();
            }
            // Bare type names expand to the zonal diskTypes link.
            if !d.disk.disk_type.is_empty() && !d.disk.disk_type.contains('/') {
                d.disk.disk_type = format!(
                    "projects/{}/zones/{}/diskTypes/{}",
                    d.resource.project, d.disk.zone, d.disk.disk_type
                );
            }
            d.resource.link = url::zonal_link(
                &d.resource.project,
                &d.disk.zone,
                "disks",
                &d.disk.name,
            );
        }
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        for d in &self.0 {
            let pre = format!("cannot create disk {:?}", d.resource.daisy_name);
            if d.disk.name.is_empty() {
                errs.push(Error::InvalidInput(format!("{}: name is mandatory", pre)));
                continue;
            }
            errs.collect(d.resource.validate_name("disk"));
            if d.disk.size_gb == 0
                && d.disk.source_image.is_empty()
                && d.disk.source_snapshot.is_empty()
            {
                errs.push(Error::InvalidInput(format!(
                    "{}: must provide SizeGb, SourceImage or SourceSnapshot",
                    pre
                )));
            }
            if !d.disk.source_image.is_empty() {
                errs.collect(validate_ref(&w.registries.images, &d.disk.source_image, s, w));
            }
            if !d.disk.source_snapshot.is_empty() {
                errs.collect(validate_ref(
                    &w.registries.snapshots,
                    &d.disk.source_snapshot,
                    s,
                    w,
                ));
            }
            errs.collect(
                w.registries
                    .disks
                    .reg_create(d.resource.to_resource(&s.id), d.resource.over_write),
            );
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let api = w.compute()?;
        for d in &self.0 {
            let mut wire = d.disk.clone();
            if !wire.source_image.is_empty() {
                wire.source_image = resolve_link(&w.registries.images, &wire.source_image, w);
            }
            if !wire.source_snapshot.is_empty() {
                wire.source_snapshot =
                    resolve_link(&w.registries.snapshots, &wire.source_snapshot, w);
            }
            info!(step = %s.name, disk = %wire.name, zone = %wire.zone, "creating disk");
            api.create_disk(&d.resource.project, &wire.zone, &wire).await?;
            w.registries.disks.mark_created(&d.resource.daisy_name);
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

    fn meta(name: &str) -> StepMeta {
        StepMeta {
            name: name.to_string(),
            id: name.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    fn disk(raw: &str) -> Disk {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_populate_uniquifies_and_links() {
        let w = test_workflow();
        let mut step = CreateDisks(vec![disk(r#"{"Name": "d1", "SizeGb": 10, "Type": "pd-ssd"}"#)]);
        step.populate(&meta("make-disk"), &w).unwrap();
        let d = &step.0[0];
        assert_eq!(d.disk.name, "d1-abcde");
        assert_eq!(d.resource.daisy_name, "d1");
        assert_eq!(
            d.disk.disk_type,
            "projects/test-project/zones/us-central1-a/diskTypes/pd-ssd"
        );
        assert_eq!(
            d.resource.link,
            "projects/test-project/zones/us-central1-a/disks/d1-abcde"
        );
    }

    #[test]
    fn test_populate_exact_name() {
        let w = test_workflow();
        let mut step = CreateDisks(vec![disk(
            r#"{"Name": "d1", "SizeGb": 10, "ExactName": true}"#,
        )]);
        step.populate(&meta("make-disk"), &w).unwrap();
        assert_eq!(step.0[0].disk.name, "d1");
    }

    #[test]
    fn test_validate_requires_source_or_size() {
        let w = test_workflow();
        let mut step = CreateDisks(vec![disk(r#"{"Name": "d1"}"#)]);
        step.populate(&meta("make-disk"), &w).unwrap();
        let err = step.validate(&meta("make-disk"), &w).unwrap_err();
        assert!(err.to_string().contains("SizeGb"));
    }

    #[test]
    fn test_validate_registers_creation_once() {
        let w = test_workflow();
        let mut step = CreateDisks(vec![disk(r#"{"Name": "d1", "SizeGb": 10}"#)]);
        step.populate(&meta("s1"), &w).unwrap();
        step.validate(&meta("s1"), &w).unwrap();

        let mut dup = CreateDisks(vec![disk(r#"{"Name": "d1", "SizeGb": 10}"#)]);
        dup.populate(&meta("s2"), &w).unwrap();
        let err = dup.validate(&meta("s2"), &w).unwrap_err();
        assert_eq!(err.code(), "MULTIPLE_CREATORS");
    }

    #[test]
    fn test_validate_source_image_needs_creator_dependency() {
        let w = test_workflow();
        {
            let mut g = w.deps.write().unwrap();
            g.add_step("make-image");
            g.add_step("make-disk");
        }
        w.registries
            .images
            .reg_create(
                crate::resource::Resource {
                    daisy_name: "img".to_string(),
                    real_name: "img-abcde".to_string(),
                    creator_step: "make-image".to_string(),
                    ..Default::default()
                },
                false,
            )
            .unwrap();

        let mut step = CreateDisks(vec![disk(r#"{"Name": "d1", "SourceImage": "img"}"#)]);
        step.populate(&meta("make-disk"), &w).unwrap();
        let err = step.validate(&meta("make-disk"), &w).unwrap_err();
        assert_eq!(err.code(), "MISSING_DEPENDENCY");
    }

    #[tokio::test]
    async fn test_run_resolves_source_image_link() {
        let api = Arc::new(TestComputeApi::new());
        let w = test_workflow_with(api.clone());
        w.registries
            .images
            .reg_create(
                crate::resource::Resource {
                    daisy_name: "img".to_string(),
                    real_name: "img-abcde".to_string(),
                    link: "projects/test-project/global/images/img-abcde".to_string(),
                    creator_step: "make-image".to_string(),
                    ..Default::default()
                },
                false,
            )
            .unwrap();

        let mut step = CreateDisks(vec![disk(r#"{"Name": "d1", "SourceImage": "img"}"#)]);
        step.populate(&meta("make-disk"), &w).unwrap();
        step.run(&meta("make-disk"), &w).await.unwrap();
        assert_eq!(
            api.calls(),
            vec!["create-disk test-project/us-central1-a/d1-abcde"]
        );
        assert!(w.registries.disks.get("d1").unwrap().created);
    }
}
