//! DeprecateImages step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{validate_ref, StepAction, StepMeta};
use crate::compute::DeprecationStatus;
use crate::error::{Error, MultiError, Result};
use crate::resource::url;
use crate::workflow::Workflow;

const VALID_STATES: [&str; 4] = ["ACTIVE", "DEPRECATED", "OBSOLETE", "DELETED"];

/// A deprecation state transition for one image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DeprecateImage {
    pub image: String,
    pub project: String,
    pub deprecation_status: DeprecationStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeprecateImages(pub Vec<DeprecateImage>);

#[async_trait]
impl StepAction for DeprecateImages {
    fn populate(&mut self, _s: &StepMeta, w: &Workflow) -> Result<()> {
        for d in &mut self.0 {
            if d.project.is_empty() {
                d.project = w.project.clone();
            }
        }
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        for d in &self.0 {
            let pre = format!("cannot deprecate image {:?}", d.image);
            if d.image.is_empty() {
                errs.push(Error::InvalidInput(format!("{}: image is mandatory", pre)));
                continue;
            }
            let state = d.deprecation_status.state.as_str();
            if !VALID_STATES.contains(&state) {
                errs.push(Error::InvalidInput(format!(
                    "{}: invalid deprecation state {:?}, must be one of {:?}",
                    pre, state, VALID_STATES
                )));
                continue;
            }
            if errs
                .collect(validate_ref(&w.registries.images, &d.image, s, w))
                .is_some()
            {
                // Deprecation state is tracked so later users of the image
                // observe OBSOLETE/DELETED transitions.
                w.registries.images.set_deprecation_state(&d.image, state);
            }
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let api = w.compute()?;
        for d in &self.0 {
            let name = if let Some(res) = w.registries.images.get(&d.image) {
                res.real_name
            } else {
                url::named_groups(&url::IMAGE_URL_RGX, &d.image)
                    .get("name")
                    .cloned()
                    .unwrap_or_else(|| d.image.clone())
            };
            info!(
                step = %s.name,
                image = %name,
                state = %d.deprecation_status.state,
                "deprecating image"
            );
            api.deprecate_image(&d.project, &name, &d.deprecation_status)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::testing::TestComputeApi;
    use crate::resource::Resource;
    use crate::workflow::testing::{test_workflow, test_workflow_with};
    use std::sync::Arc;
    use std::time::Duration;

    fn meta(id: &str) -> StepMeta {
        StepMeta {
            name: id.to_string(),
            id: id.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    fn seed_image(w: &crate::workflow::Workflow) {
        {
            let mut g = w.deps.write().unwrap();
            g.add_dep("deprecate", "make-image");
            g.add_dep("use-image", "make-image");
        }
        w.registries
            .images
            .reg_create(
                Resource {
                    daisy_name: "img".to_string(),
                    real_name: "img-abcde".to_string(),
                    link: "projects/test-project/global/images/img-abcde".to_string(),
                    creator_step: "make-image".to_string(),
                    ..Default::default()
                },
                false,
            )
            .unwrap();
    }

    fn deprecation(image: &str, state: &str) -> DeprecateImages {
        DeprecateImages(vec![DeprecateImage {
            image: image.to_string(),
            project: String::new(),
            deprecation_status: DeprecationStatus {
                state: state.to_string(),
                replacement: String::new(),
            },
        }])
    }

    #[test]
    fn test_validate_rejects_unknown_state() {
        let w = test_workflow();
        seed_image(&w);
        let mut step = deprecation("img", "RETIRED");
        let err = step.validate(&meta("deprecate"), &w).unwrap_err();
        assert!(err.to_string().contains("invalid deprecation state"));
    }

    #[test]
    fn test_obsolete_image_blocks_later_users() {
        let w = test_workflow();
        seed_image(&w);
        let mut step = deprecation("img", "OBSOLETE");
        step.populate(&meta("deprecate"), &w).unwrap();
        step.validate(&meta("deprecate"), &w).unwrap();

        let deps = w.deps.read().unwrap();
        let err = w
            .registries
            .images
            .reg_use("img", "use-image", &deps)
            .unwrap_err();
        assert_eq!(err.code(), "IMAGE_OBSOLETE");
    }

    #[tokio::test]
    async fn test_run_deprecates_real_name() {
        let api = Arc::new(TestComputeApi::new());
        let w = test_workflow_with(api.clone());
        seed_image(&w);
        let mut step = deprecation("img", "DEPRECATED");
        step.populate(&meta("deprecate"), &w).unwrap();
        step.run(&meta("deprecate"), &w).await.unwrap();
        assert_eq!(
            api.calls(),
            vec!["deprecate-image test-project/img-abcde DEPRECATED"]
        );
    }
}
