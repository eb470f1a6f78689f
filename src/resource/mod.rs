//! Resource lifecycle tracking.
//!
//! Each resource kind has a registry recording creation intent, references,
//! attachments and deletions; the bundle of all registries belongs to a
//! workflow (shared with included children). When the root workflow ends,
//! the cleanup driver deletes everything the run created, in reverse
//! topological order of the creating steps.

mod attachment;
mod registry;
pub mod url;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::compute::ComputeApi;
use crate::error::{Error, MultiError, Result};
use crate::graph::DepGraph;

pub use attachment::{AttachmentMap, Connection};
pub use registry::ResourceRegistry;

/// The resource kinds the engine tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Disk,
    Image,
    Instance,
    MachineImage,
    Network,
    Subnetwork,
    Snapshot,
    ForwardingRule,
    TargetInstance,
}

impl ResourceKind {
    /// Singular noun for error messages.
    pub fn noun(&self) -> &'static str {
        match self {
            ResourceKind::Disk => "disk",
            ResourceKind::Image => "image",
            ResourceKind::Instance => "instance",
            ResourceKind::MachineImage => "machine image",
            ResourceKind::Network => "network",
            ResourceKind::Subnetwork => "subnetwork",
            ResourceKind::Snapshot => "snapshot",
            ResourceKind::ForwardingRule => "forwarding rule",
            ResourceKind::TargetInstance => "target instance",
        }
    }

    /// URL collection segment.
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceKind::Disk => "disks",
            ResourceKind::Image => "images",
            ResourceKind::Instance => "instances",
            ResourceKind::MachineImage => "machineImages",
            ResourceKind::Network => "networks",
            ResourceKind::Subnetwork => "subnetworks",
            ResourceKind::Snapshot => "snapshots",
            ResourceKind::ForwardingRule => "forwardingRules",
            ResourceKind::TargetInstance => "targetInstances",
        }
    }

    /// The regex defining this kind's fully-qualified link form.
    pub fn url_rgx(&self) -> &'static Regex {
        match self {
            ResourceKind::Disk => &url::DISK_URL_RGX,
            ResourceKind::Image => &url::IMAGE_URL_RGX,
            ResourceKind::Instance => &url::INSTANCE_URL_RGX,
            ResourceKind::MachineImage => &url::MACHINE_IMAGE_URL_RGX,
            ResourceKind::Network => &url::NETWORK_URL_RGX,
            ResourceKind::Subnetwork => &url::SUBNETWORK_URL_RGX,
            ResourceKind::Snapshot => &url::SNAPSHOT_URL_RGX,
            ResourceKind::ForwardingRule => &url::FORWARDING_RULE_URL_RGX,
            ResourceKind::TargetInstance => &url::TARGET_INSTANCE_URL_RGX,
        }
    }
}

/// How a resource's deletion is (or will be) handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletionDisposition {
    /// Deleted by the cleanup driver at workflow end.
    #[default]
    AutoCleanup,
    /// Deleted explicitly during the run (overwrite or delete registration).
    Explicit,
}

/// A tracked resource.
#[derive(Debug, Clone, Default)]
pub struct Resource {
    /// The name as written in the document.
    pub daisy_name: String,
    /// The uniquified name sent to the cloud.
    pub real_name: String,
    pub project: String,
    /// Fully-qualified link.
    pub link: String,
    pub no_cleanup: bool,
    pub exact_name: bool,
    pub overwrite: bool,
    /// Qualified id of the creating step.
    pub creator_step: String,
    /// Qualified id of the deleting step, if one was registered.
    pub deleter_step: Option<String>,
    /// Qualified ids of steps that use this resource.
    pub users: Vec<String>,
    pub disposition: DeletionDisposition,
    /// Set once the run actually created the resource.
    pub created: bool,
    /// Set once a delete has been attempted.
    pub deleted: bool,
    /// Images only: last registered deprecation state.
    pub deprecation_state: Option<String>,
}

/// The document-level envelope shared by every `Create*` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ResourceFields {
    pub project: String,
    pub no_cleanup: bool,
    pub exact_name: bool,
    pub over_write: bool,
    #[serde(skip)]
    pub daisy_name: String,
    #[serde(skip)]
    pub real_name: String,
    #[serde(skip)]
    pub link: String,
}

impl ResourceFields {
    /// Fill defaults and compute the real name. Returns the real name.
    pub fn populate(&mut self, name: &str, default_project: &str, run_id: &str) -> String {
        self.daisy_name = name.to_string();
        if self.project.is_empty() {
            self.project = default_project.to_string();
        }
        self.real_name = if self.exact_name {
            name.to_string()
        } else {
            uniq_name(name, run_id)
        };
        self.real_name.clone()
    }

    /// Check the computed names against the naming grammars.
    pub fn validate_name(&self, noun: &str) -> Result<()> {
        if !url::NAME_RGX.is_match(&self.real_name) {
            return Err(Error::InvalidInput(format!(
                "{} name {:?} is not a valid RFC 1035 label",
                noun, self.real_name
            )));
        }
        if !url::PROJECT_RGX.is_match(&self.project) {
            return Err(Error::InvalidInput(format!(
                "invalid project id {:?} for {} {:?}",
                self.project, noun, self.daisy_name
            )));
        }
        Ok(())
    }

    /// Build the registry entry for this resource.
    pub fn to_resource(&self, creator_step: &str) -> Resource {
        Resource {
            daisy_name: self.daisy_name.clone(),
            real_name: self.real_name.clone(),
            project: self.project.clone(),
            link: self.link.clone(),
            no_cleanup: self.no_cleanup,
            exact_name: self.exact_name,
            overwrite: self.over_write,
            creator_step: creator_step.to_string(),
            ..Default::default()
        }
    }
}

/// Name length limit for cloud resources.
const MAX_NAME_LEN: usize = 63;

static TRAILING_DASH: Lazy<Regex> = Lazy::new(|| Regex::new("-+$").unwrap());

/// Append the run id to a name, truncated to the length limit with no
/// trailing dash.
pub fn uniq_name(name: &str, run_id: &str) -> String {
    let mut out = format!("{}-{}", name, run_id);
    if out.len() > MAX_NAME_LEN {
        out.truncate(MAX_NAME_LEN);
        out = TRAILING_DASH.replace(&out, "").to_string();
    }
    out
}

/// The per-kind registries of one workflow scope.
pub struct Registries {
    pub disks: ResourceRegistry,
    pub images: ResourceRegistry,
    pub instances: ResourceRegistry,
    pub machine_images: ResourceRegistry,
    pub networks: ResourceRegistry,
    pub subnetworks: ResourceRegistry,
    pub snapshots: ResourceRegistry,
    pub forwarding_rules: ResourceRegistry,
    pub target_instances: ResourceRegistry,
}

impl Registries {
    pub fn new() -> Self {
        Self {
            disks: ResourceRegistry::new(ResourceKind::Disk),
            images: ResourceRegistry::new(ResourceKind::Image),
            instances: ResourceRegistry::new(ResourceKind::Instance),
            machine_images: ResourceRegistry::new(ResourceKind::MachineImage),
            networks: ResourceRegistry::new(ResourceKind::Network),
            subnetworks: ResourceRegistry::new(ResourceKind::Subnetwork),
            snapshots: ResourceRegistry::new(ResourceKind::Snapshot),
            forwarding_rules: ResourceRegistry::new(ResourceKind::ForwardingRule),
            target_instances: ResourceRegistry::new(ResourceKind::TargetInstance),
        }
    }

    fn each(&self) -> [&ResourceRegistry; 9] {
        [
            &self.disks,
            &self.images,
            &self.instances,
            &self.machine_images,
            &self.networks,
            &self.subnetworks,
            &self.snapshots,
            &self.forwarding_rules,
            &self.target_instances,
        ]
    }

    /// Register deletion of an instance, disconnecting it from every disk
    /// and subnetwork it is still connected to.
    pub fn reg_delete_instance(&self, name: &str, step: &str, deps: &DepGraph) -> Result<()> {
        self.instances.reg_delete(name, step, deps)?;
        self.disks.reg_disconnect_all(name, step, deps)?;
        self.subnetworks.reg_disconnect_all(name, step, deps)?;
        Ok(())
    }

    /// Delete every created resource that is not flagged `no_cleanup` and
    /// was not already deleted, in reverse topological order of the steps
    /// that created them (`order` is the forward topological step order).
    /// Failures are logged and aggregated; each delete is attempted exactly
    /// once.
    pub async fn cleanup(&self, api: &dyn ComputeApi, order: &[String]) -> MultiError {
        let position = |step: &str| order.iter().position(|s| s == step).unwrap_or(0);

        let mut doomed: Vec<(ResourceKind, Resource)> = Vec::new();
        for reg in self.each() {
            for res in reg.resources() {
                if res.created && !res.deleted && !res.no_cleanup && res.deleter_step.is_none() {
                    doomed.push((reg.kind(), res));
                }
            }
        }
        doomed.sort_by_key(|(_, res)| std::cmp::Reverse(position(&res.creator_step)));

        let mut errs = MultiError::new();
        for (kind, res) in doomed {
            info!(resource = %res.real_name, kind = kind.noun(), "cleaning up");
            if let Err(e) = delete_by_link(api, kind, &res.link).await {
                warn!(resource = %res.real_name, error = %e, "cleanup delete failed");
                errs.push(Error::CleanupFailed(format!(
                    "failed to delete {} {:?}: {}",
                    kind.noun(),
                    res.real_name,
                    e
                )));
            }
            self.registry_for(kind).mark_deleted(&res.daisy_name);
        }
        errs
    }

    fn registry_for(&self, kind: ResourceKind) -> &ResourceRegistry {
        match kind {
            ResourceKind::Disk => &self.disks,
            ResourceKind::Image => &self.images,
            ResourceKind::Instance => &self.instances,
            ResourceKind::MachineImage => &self.machine_images,
            ResourceKind::Network => &self.networks,
            ResourceKind::Subnetwork => &self.subnetworks,
            ResourceKind::Snapshot => &self.snapshots,
            ResourceKind::ForwardingRule => &self.forwarding_rules,
            ResourceKind::TargetInstance => &self.target_instances,
        }
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}

/// Issue the kind-appropriate delete for a fully-qualified link.
async fn delete_by_link(api: &dyn ComputeApi, kind: ResourceKind, link: &str) -> Result<()> {
    let groups = url::named_groups(kind.url_rgx(), link);
    let part = |key: &str| -> Result<String> {
        groups.get(key).cloned().ok_or_else(|| {
            Error::InvalidInput(format!(
                "link {:?} is not a fully-qualified {} URL",
                link,
                kind.noun()
            ))
        })
    };
    let project = part("project")?;
    let name = part("name")?;
    match kind {
        ResourceKind::Disk => api.delete_disk(&project, &part("zone")?, &name).await?,
        ResourceKind::Image => api.delete_image(&project, &name).await?,
        ResourceKind::Instance => api.delete_instance(&project, &part("zone")?, &name).await?,
        ResourceKind::MachineImage => api.delete_machine_image(&project, &name).await?,
        ResourceKind::Network => api.delete_network(&project, &name).await?,
        ResourceKind::Subnetwork => {
            api.delete_subnetwork(&project, &part("region")?, &name).await?
        }
        ResourceKind::Snapshot => api.delete_snapshot(&project, &name).await?,
        ResourceKind::ForwardingRule => {
            api.delete_forwarding_rule(&project, &part("region")?, &name)
                .await?
        }
        ResourceKind::TargetInstance => {
            api.delete_target_instance(&project, &part("zone")?, &name)
                .await?
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::testing::TestComputeApi;
    use crate::compute::ApiError;

    fn created(kind_link: &str, name: &str, creator: &str) -> Resource {
        Resource {
            daisy_name: name.to_string(),
            real_name: format!("{}-abcde", name),
            link: kind_link.to_string(),
            creator_step: creator.to_string(),
            created: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_uniq_name_truncation() {
        let long = "a".repeat(70);
        let name = uniq_name(&long, "abcde");
        assert_eq!(name.len(), 63);
        assert!(!name.ends_with('-'));

        assert_eq!(uniq_name("disk", "abcde"), "disk-abcde");
    }

    #[tokio::test]
    async fn test_cleanup_reverse_creation_order() {
        let regs = Registries::new();
        let mut deps = DepGraph::new();
        deps.add_dep("make-instance", "make-disk");

        regs.disks
            .reg_create(
                created("projects/p/zones/z-a/disks/d-abcde", "d", "make-disk"),
                false,
            )
            .unwrap();
        regs.instances
            .reg_create(
                created("projects/p/zones/z-a/instances/i-abcde", "i", "make-instance"),
                false,
            )
            .unwrap();

        let api = TestComputeApi::new();
        let errs = regs.cleanup(&api, &deps.topo_order()).await;
        assert!(errs.is_empty());

        let calls = api.calls();
        assert_eq!(calls.len(), 2);
        // The instance was created later, so it is deleted first.
        assert!(calls[0].starts_with("delete-instance"));
        assert!(calls[1].starts_with("delete-disk"));
    }

    #[tokio::test]
    async fn test_cleanup_skips_flagged_and_uncreated() {
        let regs = Registries::new();
        let deps = DepGraph::new();

        let mut keep = created("projects/p/zones/z-a/disks/keep-abcde", "keep", "s1");
        keep.no_cleanup = true;
        regs.disks.reg_create(keep, false).unwrap();

        let mut unbuilt = created("projects/p/zones/z-a/disks/un-abcde", "un", "s1");
        unbuilt.created = false;
        regs.disks.reg_create(unbuilt, false).unwrap();

        let api = TestComputeApi::new();
        let errs = regs.cleanup(&api, &deps.topo_order()).await;
        assert!(errs.is_empty());
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_attempts_each_delete_once_and_aggregates_failures() {
        let regs = Registries::new();
        let deps = DepGraph::new();
        regs.disks
            .reg_create(created("projects/p/zones/z-a/disks/d-abcde", "d", "s1"), false)
            .unwrap();

        let api = TestComputeApi::new();
        api.fail_method(
            "delete-disk",
            ApiError::Http {
                status: 500,
                message: "boom".to_string(),
            },
        );
        let errs = regs.cleanup(&api, &deps.topo_order()).await;
        assert_eq!(errs.len(), 1);
        assert_eq!(api.count("delete-disk"), 1);

        // A second pass does not retry: the attempt was recorded.
        let errs = regs.cleanup(&api, &deps.topo_order()).await;
        assert!(errs.is_empty());
        assert_eq!(api.count("delete-disk"), 1);
    }

    #[test]
    fn test_instance_delete_disconnects_all() {
        let regs = Registries::new();
        let mut deps = DepGraph::new();
        deps.add_dep("attach", "make");
        deps.add_dep("del", "attach");

        regs.instances
            .reg_create(
                created("projects/p/zones/z-a/instances/i-abcde", "i", "make"),
                false,
            )
            .unwrap();
        regs.disks
            .reg_create(created("projects/p/zones/z-a/disks/d-abcde", "d", "make"), false)
            .unwrap();
        regs.disks.reg_connect("d", "i", "attach", &deps).unwrap();

        regs.reg_delete_instance("i", "del", &deps).unwrap();
        assert_eq!(
            regs.disks.connection("d", "i").unwrap().disconnector.as_deref(),
            Some("del")
        );
    }
}
