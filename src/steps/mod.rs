//! Step model and action dispatch.
//!
//! A step object in the document populates exactly one payload field; the
//! populated field selects which action runs. Every payload implements
//! [`StepAction`]: populate canonicalizes the payload, validate registers
//! its intended effect with the registries, run performs the side effect.

mod attach_disks;
mod copy_gcs_objects;
mod create_disks;
mod create_forwarding_rules;
mod create_images;
mod create_instances;
mod create_machine_images;
mod create_networks;
mod create_snapshots;
mod create_subnetworks;
mod create_target_instances;
mod deprecate_images;
mod detach_disks;
mod include_workflow;
mod resume;
mod run_tests;
mod set_machine_type;
mod start_instances;
mod stop_instances;
mod sub_workflow;
mod suspend;
mod update_instances_metadata;
mod wait_for_available_quotas;
mod wait_for_instances_signal;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{Error, Result};
use crate::resource::{url, ResourceRegistry};
use crate::workflow::{vars, Workflow};

pub use attach_disks::AttachDisks;
pub use copy_gcs_objects::CopyGCSObjects;
pub use create_disks::CreateDisks;
pub use create_forwarding_rules::CreateForwardingRules;
pub use create_images::CreateImages;
pub use create_instances::CreateInstances;
pub use create_machine_images::CreateMachineImages;
pub use create_networks::CreateNetworks;
pub use create_snapshots::CreateSnapshots;
pub use create_subnetworks::CreateSubnetworks;
pub use create_target_instances::CreateTargetInstances;
pub use deprecate_images::DeprecateImages;
pub use detach_disks::DetachDisks;
pub use include_workflow::IncludeWorkflow;
pub use resume::Resume;
pub use run_tests::RunTests;
pub use set_machine_type::SetMachineType;
pub use start_instances::StartInstances;
pub use stop_instances::StopInstances;
pub use sub_workflow::SubWorkflow;
pub use suspend::Suspend;
pub use update_instances_metadata::UpdateInstancesMetadata;
pub use wait_for_available_quotas::WaitForAvailableQuotas;
pub use wait_for_instances_signal::WaitForInstancesSignal;

/// Identity and limits of the step currently being processed.
#[derive(Debug, Clone)]
pub struct StepMeta {
    /// Step name as written in the document.
    pub name: String,
    /// Qualified id in the shared dependency graph.
    pub id: String,
    pub timeout: Duration,
}

/// Behavior shared by every step kind.
#[async_trait]
pub trait StepAction: Send + Sync {
    /// Enter any nested workflow's steps into the dependency graph. Runs
    /// for every step before any step validates.
    fn link_graph(&mut self, _s: &StepMeta, _w: &Workflow) -> Result<()> {
        Ok(())
    }

    /// Canonicalize the payload: defaults, name uniquification, link
    /// expansion.
    fn populate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()>;

    /// Check the payload and register its intended effect.
    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()>;

    /// Perform the side effect.
    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()>;
}

macro_rules! step_payloads {
    ($(($field:ident, $ty:ty, $wire:literal)),+ $(,)?) => {
        /// One step of a workflow document.
        ///
        /// Exactly one payload field may be populated; the tag selects the
        /// action.
        #[derive(Default, Serialize, Deserialize)]
        #[serde(default, deny_unknown_fields)]
        pub struct Step {
            #[serde(skip)]
            pub name: String,
            #[serde(skip)]
            pub timeout_d: Duration,
            #[serde(rename = "Timeout", skip_serializing_if = "Option::is_none")]
            pub timeout: Option<String>,
            $(
                #[serde(rename = $wire, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )+
        }

        impl Step {
            /// Wire name of the populated payload.
            pub fn kind(&self) -> &'static str {
                $( if self.$field.is_some() { return $wire; } )+
                "unset"
            }

            fn payload_count(&self) -> usize {
                let mut count = 0;
                $( if self.$field.is_some() { count += 1; } )+
                count
            }

            fn action(&self) -> Result<&dyn StepAction> {
                $( if let Some(payload) = &self.$field { return Ok(payload); } )+
                Err(Error::InvalidInput(format!(
                    "step {:?} has no action",
                    self.name
                )))
            }

            fn action_mut(&mut self) -> Result<&mut dyn StepAction> {
                $( if let Some(payload) = &mut self.$field { return Ok(payload); } )+
                Err(Error::InvalidInput(format!(
                    "step {:?} has no action",
                    self.name
                )))
            }
        }
    };
}

step_payloads! {
    (attach_disks, AttachDisks, "AttachDisks"),
    (copy_gcs_objects, CopyGCSObjects, "CopyGCSObjects"),
    (create_disks, CreateDisks, "CreateDisks"),
    (create_forwarding_rules, CreateForwardingRules, "CreateForwardingRules"),
    (create_images, CreateImages, "CreateImages"),
    (create_instances, CreateInstances, "CreateInstances"),
    (create_machine_images, CreateMachineImages, "CreateMachineImages"),
    (create_networks, CreateNetworks, "CreateNetworks"),
    (create_snapshots, CreateSnapshots, "CreateSnapshots"),
    (create_subnetworks, CreateSubnetworks, "CreateSubnetworks"),
    (create_target_instances, CreateTargetInstances, "CreateTargetInstances"),
    (deprecate_images, DeprecateImages, "DeprecateImages"),
    (detach_disks, DetachDisks, "DetachDisks"),
    (include_workflow, IncludeWorkflow, "IncludeWorkflow"),
    (resume, Resume, "Resume"),
    (run_tests, RunTests, "RunTests"),
    (set_machine_type, SetMachineType, "SetMachineType"),
    (start_instances, StartInstances, "StartInstances"),
    (stop_instances, StopInstances, "StopInstances"),
    (sub_workflow, SubWorkflow, "SubWorkflow"),
    (suspend, Suspend, "Suspend"),
    (update_instances_metadata, UpdateInstancesMetadata, "UpdateInstancesMetadata"),
    (wait_for_available_quotas, WaitForAvailableQuotas, "WaitForAvailableQuotas"),
    (wait_for_instances_signal, WaitForInstancesSignal, "WaitForInstancesSignal"),
}

impl Step {
    /// Substitute vars into the payload, parse the timeout and dispatch the
    /// payload's populate.
    pub(crate) fn populate(
        &mut self,
        name: &str,
        w: &Workflow,
        lookup: &HashMap<String, String>,
    ) -> Result<()> {
        self.name = name.to_string();
        match self.payload_count() {
            1 => {}
            0 => {
                return Err(Error::InvalidInput(format!(
                    "step {:?} has no action",
                    name
                )))
            }
            n => {
                return Err(Error::InvalidInput(format!(
                    "step {:?} has {} actions, expected exactly one",
                    name, n
                )))
            }
        }

        // Nested workflows are runtime state, not document text; park them
        // across the substitution round-trip.
        let inc_child = self.include_workflow.as_mut().and_then(|p| p.workflow.take());
        let sub_child = self.sub_workflow.as_mut().and_then(|p| p.workflow.take());
        let mut value = serde_json::to_value(&*self)?;
        vars::substitute_value(&mut value, lookup)?;
        *self = serde_json::from_value(value)?;
        self.name = name.to_string();
        if let Some(child) = inc_child {
            if let Some(payload) = self.include_workflow.as_mut() {
                payload.workflow = Some(child);
            }
        }
        if let Some(child) = sub_child {
            if let Some(payload) = self.sub_workflow.as_mut() {
                payload.workflow = Some(child);
            }
        }

        self.timeout_d = match &self.timeout {
            Some(t) => parse_duration(t).map_err(|e| {
                Error::InvalidInput(format!("bad timeout for step {:?}: {}", name, e))
            })?,
            None => w.default_timeout_d,
        };

        let meta = self.meta(w);
        self.action_mut()?.populate(&meta, w)
    }

    pub(crate) fn link_graph(&mut self, name: &str, w: &Workflow) -> Result<()> {
        self.name = name.to_string();
        let meta = self.meta(w);
        self.action_mut()?.link_graph(&meta, w)
    }

    pub(crate) fn validate(&mut self, w: &Workflow) -> Result<()> {
        let meta = self.meta(w);
        self.action_mut()?.validate(&meta, w)
    }

    pub(crate) async fn run(&self, w: &Workflow) -> Result<()> {
        let meta = self.meta(w);
        self.action()?.run(&meta, w).await
    }

    fn meta(&self, w: &Workflow) -> StepMeta {
        StepMeta {
            name: self.name.clone(),
            id: w.step_id(&self.name),
            timeout: self.timeout_d,
        }
    }
}

/// Check a reference during validate: fully-qualified links point outside
/// the workflow and pass through; short names must resolve in the registry
/// with the right dependency edge.
pub(crate) fn validate_ref(
    reg: &ResourceRegistry,
    raw: &str,
    s: &StepMeta,
    w: &Workflow,
) -> Result<()> {
    if reg.kind().url_rgx().is_match(raw) {
        return Ok(());
    }
    let deps = w.deps.read().unwrap();
    reg.reg_use(raw, &s.id, &deps)?;
    Ok(())
}

/// Resolve a reference to the named parts of its link, preferring the
/// registry entry (which carries the uniquified real name).
pub(crate) fn resolve_parts(
    reg: &ResourceRegistry,
    raw: &str,
    w: &Workflow,
) -> HashMap<String, String> {
    let rgx = reg.kind().url_rgx();
    if let Some(res) = reg.get(raw) {
        url::named_groups(rgx, &res.link)
    } else if rgx.is_match(raw) {
        url::named_groups(rgx, &url::qualify(raw, &w.project))
    } else {
        HashMap::new()
    }
}

/// Resolve an instance reference to `(project, zone, name)`, falling back
/// to workflow defaults for anything the reference does not carry.
pub(crate) fn instance_target(raw: &str, w: &Workflow) -> (String, String, String) {
    let parts = resolve_parts(&w.registries.instances, raw, w);
    (
        parts
            .get("project")
            .cloned()
            .unwrap_or_else(|| w.project.clone()),
        parts.get("zone").cloned().unwrap_or_else(|| w.zone.clone()),
        parts.get("name").cloned().unwrap_or_else(|| raw.to_string()),
    )
}

/// Resolve the call target for an instance-addressed API method, with the
/// step's own project/zone as fallback. The registry entry's link wins, so
/// steps address the uniquified real name.
pub(crate) fn instance_call_target(
    raw: &str,
    project: &str,
    zone: &str,
    w: &Workflow,
) -> (String, String, String) {
    let rgx = w.registries.instances.kind().url_rgx();
    let parts = if let Some(res) = w.registries.instances.get(raw) {
        url::named_groups(rgx, &res.link)
    } else if rgx.is_match(raw) {
        url::named_groups(rgx, &url::qualify(raw, project))
    } else {
        return (project.to_string(), zone.to_string(), raw.to_string());
    };
    (
        parts
            .get("project")
            .cloned()
            .unwrap_or_else(|| project.to_string()),
        parts.get("zone").cloned().unwrap_or_else(|| zone.to_string()),
        parts.get("name").cloned().unwrap_or_else(|| raw.to_string()),
    )
}

/// Resolve a reference to the link to send over the wire: registry link if
/// the workflow creates it, qualified as-is if already a link, untouched
/// otherwise.
pub(crate) fn resolve_link(reg: &ResourceRegistry, raw: &str, w: &Workflow) -> String {
    if let Some(res) = reg.get(raw) {
        res.link
    } else if reg.kind().url_rgx().is_match(raw) {
        url::qualify(raw, &w.project)
    } else {
        raw.to_string()
    }
}
