//! Compute API abstraction.
//!
//! The engine never talks to the cloud directly: every mutation goes through
//! the [`ComputeApi`] trait. The production implementation wraps the vendor
//! SDK's HTTP client (retrying transient failures via [`retry`] and
//! long-polling operations via [`operation`]); tests plug in
//! [`testing::TestComputeApi`].

pub mod operation;
pub mod retry;
pub mod testing;
mod types;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

pub use types::{
    AttachedDisk, DeprecationStatus, Disk, ForwardingRule, Image, Instance, MachineImage, Network,
    NetworkInterface, Operation, OperationError, OperationErrorDetail, Quota, Region,
    SerialPortOutput, Snapshot, Subnetwork, TargetInstance,
};

/// Result alias for compute API calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Failures surfaced by a [`ComputeApi`] implementation.
///
/// The variants carry enough structure for the retry policy to classify
/// them; everything else treats them opaquely.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// A transport-level failure (connection reset, truncated stream, HTTP/2
    /// control frames such as GOAWAY).
    #[error("transport error: {0}")]
    Transport(String),

    /// An HTTP error response from the API.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The OAuth token could not be refreshed.
    #[error("failed to refresh oauth token: {0}")]
    TokenRefresh(String),

    /// An operation completed with an error, or reported a status the
    /// engine does not understand.
    #[error("{0}")]
    Operation(String),
}

/// The compute API surface the engine depends on.
///
/// Methods that mutate resources return once the underlying operation has
/// completed; implementations are expected to chain the insert/delete call
/// with [`operation::wait`]. The handle is shared across concurrently
/// running steps, so implementations must be thread-safe.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn create_disk(&self, project: &str, zone: &str, disk: &Disk) -> ApiResult<()>;
    async fn delete_disk(&self, project: &str, zone: &str, disk: &str) -> ApiResult<()>;
    async fn attach_disk(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        disk: &AttachedDisk,
    ) -> ApiResult<()>;
    async fn detach_disk(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        device_name: &str,
    ) -> ApiResult<()>;

    async fn create_image(&self, project: &str, image: &Image) -> ApiResult<()>;
    async fn delete_image(&self, project: &str, image: &str) -> ApiResult<()>;
    async fn deprecate_image(
        &self,
        project: &str,
        image: &str,
        status: &DeprecationStatus,
    ) -> ApiResult<()>;

    async fn create_machine_image(&self, project: &str, mi: &MachineImage) -> ApiResult<()>;
    async fn delete_machine_image(&self, project: &str, mi: &str) -> ApiResult<()>;

    async fn create_instance(&self, project: &str, zone: &str, instance: &Instance)
        -> ApiResult<()>;
    async fn delete_instance(&self, project: &str, zone: &str, instance: &str) -> ApiResult<()>;
    async fn start_instance(&self, project: &str, zone: &str, instance: &str) -> ApiResult<()>;
    async fn stop_instance(&self, project: &str, zone: &str, instance: &str) -> ApiResult<()>;
    async fn suspend_instance(&self, project: &str, zone: &str, instance: &str) -> ApiResult<()>;
    async fn resume_instance(&self, project: &str, zone: &str, instance: &str) -> ApiResult<()>;
    async fn set_machine_type(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        machine_type: &str,
    ) -> ApiResult<()>;
    async fn set_instance_metadata(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        metadata: &HashMap<String, String>,
    ) -> ApiResult<()>;
    async fn instance_stopped(&self, project: &str, zone: &str, instance: &str) -> ApiResult<bool>;
    async fn get_serial_port_output(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        port: i64,
        start: i64,
    ) -> ApiResult<SerialPortOutput>;

    async fn create_network(&self, project: &str, network: &Network) -> ApiResult<()>;
    async fn delete_network(&self, project: &str, network: &str) -> ApiResult<()>;
    async fn create_subnetwork(
        &self,
        project: &str,
        region: &str,
        subnetwork: &Subnetwork,
    ) -> ApiResult<()>;
    async fn delete_subnetwork(
        &self,
        project: &str,
        region: &str,
        subnetwork: &str,
    ) -> ApiResult<()>;

    async fn create_snapshot(
        &self,
        project: &str,
        zone: &str,
        disk: &str,
        snapshot: &Snapshot,
    ) -> ApiResult<()>;
    async fn delete_snapshot(&self, project: &str, snapshot: &str) -> ApiResult<()>;

    async fn create_forwarding_rule(
        &self,
        project: &str,
        region: &str,
        rule: &ForwardingRule,
    ) -> ApiResult<()>;
    async fn delete_forwarding_rule(&self, project: &str, region: &str, rule: &str)
        -> ApiResult<()>;

    async fn create_target_instance(
        &self,
        project: &str,
        zone: &str,
        target: &TargetInstance,
    ) -> ApiResult<()>;
    async fn delete_target_instance(&self, project: &str, zone: &str, target: &str)
        -> ApiResult<()>;

    async fn get_region(&self, project: &str, region: &str) -> ApiResult<Region>;

    async fn get_zone_operation(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> ApiResult<Operation>;
    async fn get_region_operation(
        &self,
        project: &str,
        region: &str,
        name: &str,
    ) -> ApiResult<Operation>;
    async fn get_global_operation(&self, project: &str, name: &str) -> ApiResult<Operation>;
}
