//! CreateImages step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{resolve_link, validate_ref, StepAction, StepMeta};
use crate::compute;
use crate::error::{Error, MultiError, Result};
use crate::resource::{url, ResourceFields};
use crate::workflow::Workflow;

/// An image to create, from a disk or a staged raw-disk file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Image {
    #[serde(flatten)]
    pub image: compute::Image,
    /// Name of a staged source holding a raw disk file.
    #[serde(rename = "SourceFile", default, skip_serializing_if = "String::is_empty")]
    pub source_file: String,
    #[serde(flatten)]
    pub resource: ResourceFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateImages(pub Vec<Image>);

#[async_trait]
impl StepAction for CreateImages {
    fn populate(&mut self, _s: &StepMeta, w: &Workflow) -> Result<()> {
        for img in &mut self.0 {
            let name = img.image.name.clone();
            img.image.name = img.resource.populate(&name, &w.project, &w.id);
            img.resource.link =
                url::global_link(&img.resource.project, "images", &img.image.name);
            if !img.source_file.is_empty() && !img.source_file.starts_with("gs://") {
                img.source_file = format!("{}/{}", w.sources_path, img.source_file);
            }
        }
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        for img in &self.0 {
            let pre = format!("cannot create image {:?}", img.resource.daisy_name);
            if img.image.name.is_empty() {
                errs.push(Error::InvalidInput(format!("{}: name is mandatory", pre)));
                continue;
            }
            errs.collect(img.resource.validate_name("image"));
            let sources =
                (!img.image.source_disk.is_empty()) as u8 + (!img.source_file.is_empty()) as u8;
            if sources != 1 {
                errs.push(Error::InvalidInput(format!(
                    "{}: must provide exactly one of SourceDisk or SourceFile",
                    pre
                )));
            }
            if !img.image.source_disk.is_empty() {
                errs.collect(validate_ref(
                    &w.registries.disks,
                    &img.image.source_disk,
                    s,
                    w,
                ));
            }
            errs.collect(
                w.registries
                    .images
                    .reg_create(img.resource.to_resource(&s.id), img.resource.over_write),
            );
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let api = w.compute()?;
        for img in &self.0 {
            let mut wire = img.image.clone();
            if !wire.source_disk.is_empty() {
                wire.source_disk = resolve_link(&w.registries.disks, &wire.source_disk, w);
            }
            info!(step = %s.name, image = %wire.name, "creating image");
            api.create_image(&img.resource.project, &wire).await?;
            w.registries.images.mark_created(&img.resource.daisy_name);
        }
        Ok(())
    }
}
