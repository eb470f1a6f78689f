//! stratus - declarative workflow engine for cloud compute resources.
//!
//! A workflow is a JSON document describing parameterized resources (disks,
//! images, instances, networks, ...) and typed steps that create, mutate or
//! observe them. stratus compiles the document (variable substitution,
//! include expansion, link qualification, defaulting), validates the step
//! graph and each step's intended effect against per-kind resource
//! registries, then executes the steps concurrently, honoring dependencies,
//! failure propagation, cancellation, and automatic cleanup of everything
//! it created.
//!
//! ## Example
//!
//! ```json
//! {
//!   "Name": "image-build",
//!   "Project": "my-project",
//!   "Zone": "us-central1-a",
//!   "GCSPath": "gs://my-bucket/builds",
//!   "Steps": {
//!     "make-disk": {"CreateDisks": [{"Name": "boot", "SourceImage": "projects/base/global/images/deb12"}]},
//!     "boot": {"CreateInstances": [{"Name": "builder", "Disks": [{"Source": "boot"}]}]},
//!     "wait": {"WaitForInstancesSignal": [{"Name": "builder", "SerialOutput": {"Port": 1, "SuccessMatch": "BUILD DONE"}}]}
//!   },
//!   "Dependencies": {
//!     "boot": ["make-disk"],
//!     "wait": ["boot"]
//!   }
//! }
//! ```
//!
//! The compute API and object storage are injected as trait objects; see
//! [`compute::ComputeApi`] and [`workflow::StorageApi`].

pub mod compute;
pub mod duration;
pub mod engine;
pub mod error;
pub mod graph;
pub mod resource;
pub mod steps;
pub mod workflow;

pub use error::{Error, MultiError, Result};
pub use workflow::Workflow;
