//! Source staging.
//!
//! `Sources` entries are uploaded to `{GCSPath}/{run-id}/sources/` before
//! any step runs; on VMs `${SOURCESPATH}` resolves to that prefix. The
//! object-storage client itself is an external collaborator behind
//! [`StorageApi`].

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use crate::compute::{ApiError, ApiResult};
use crate::error::{Error, Result};

/// Object-storage surface the engine depends on.
#[async_trait]
pub trait StorageApi: Send + Sync {
    /// Upload a local file or remote object to `dest`.
    async fn upload(&self, source: &str, dest: &str) -> ApiResult<()>;

    /// Copy one object to another location.
    async fn copy_object(&self, source: &str, dest: &str) -> ApiResult<()>;
}

/// Upload every source under the workflow's staging prefix.
pub async fn stage(
    storage: &dyn StorageApi,
    sources: &HashMap<String, String>,
    sources_path: &str,
) -> Result<()> {
    let mut names: Vec<&String> = sources.keys().collect();
    names.sort();
    for name in names {
        let origin = &sources[name];
        if origin.is_empty() {
            return Err(Error::InvalidInput(format!(
                "source {:?} has an empty origin",
                name
            )));
        }
        let dest = format!("{}/{}", sources_path.trim_end_matches('/'), name);
        info!(source = %origin, dest = %dest, "staging source");
        storage.upload(origin, &dest).await?;
    }
    Ok(())
}

/// Recording in-memory [`StorageApi`] double.
#[derive(Default)]
pub struct TestStorageApi {
    uploads: Mutex<Vec<(String, String)>>,
    copies: Mutex<Vec<(String, String)>>,
    fail: Mutex<Option<ApiError>>,
}

impl TestStorageApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, err: ApiError) {
        *self.fail.lock().unwrap() = Some(err);
    }

    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn copies(&self) -> Vec<(String, String)> {
        self.copies.lock().unwrap().clone()
    }

    fn check(&self) -> ApiResult<()> {
        match self.fail.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StorageApi for TestStorageApi {
    async fn upload(&self, source: &str, dest: &str) -> ApiResult<()> {
        self.check()?;
        self.uploads
            .lock()
            .unwrap()
            .push((source.to_string(), dest.to_string()));
        Ok(())
    }

    async fn copy_object(&self, source: &str, dest: &str) -> ApiResult<()> {
        self.check()?;
        self.copies
            .lock()
            .unwrap()
            .push((source.to_string(), dest.to_string()));
        Ok(())
    }
}
