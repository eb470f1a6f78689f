//! CopyGCSObjects step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{StepAction, StepMeta};
use crate::error::{Error, MultiError, Result};
use crate::workflow::Workflow;

/// One object copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CopyObject {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CopyGCSObjects(pub Vec<CopyObject>);

#[async_trait]
impl StepAction for CopyGCSObjects {
    fn populate(&mut self, _s: &StepMeta, _w: &Workflow) -> Result<()> {
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, _w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        for copy in &self.0 {
            for (field, value) in [("Source", &copy.source), ("Destination", &copy.destination)] {
                if !value.starts_with("gs://") {
                    errs.push(Error::InvalidInput(format!(
                        "step {:?}: {} {:?} must be a gs:// path",
                        s.name, field, value
                    )));
                }
            }
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let storage = w.storage()?;
        for copy in &self.0 {
            info!(step = %s.name, source = %copy.source, dest = %copy.destination, "copying object");
            storage.copy_object(&copy.source, &copy.destination).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::test_workflow;
    use crate::workflow::TestStorageApi;
    use std::sync::Arc;
    use std::time::Duration;

    fn meta(id: &str) -> StepMeta {
        StepMeta {
            name: id.to_string(),
            id: id.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_validate_requires_gs_paths() {
        let w = test_workflow();
        let mut step = CopyGCSObjects(vec![CopyObject {
            source: "/tmp/file".to_string(),
            destination: "gs://bucket/file".to_string(),
        }]);
        let err = step.validate(&meta("copy"), &w).unwrap_err();
        assert!(err.to_string().contains("gs://"));
    }

    #[tokio::test]
    async fn test_run_copies_objects() {
        let storage = Arc::new(TestStorageApi::new());
        let w = test_workflow().with_storage(storage.clone());
        let step = CopyGCSObjects(vec![CopyObject {
            source: "gs://a/obj".to_string(),
            destination: "gs://b/obj".to_string(),
        }]);
        step.run(&meta("copy"), &w).await.unwrap();
        assert_eq!(
            storage.copies(),
            vec![("gs://a/obj".to_string(), "gs://b/obj".to_string())]
        );
    }
}
