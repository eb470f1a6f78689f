//! CreateInstances step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{resolve_link, validate_ref, StepAction, StepMeta};
use crate::compute;
use crate::error::{Error, MultiError, Result};
use crate::resource::{url, ResourceFields};
use crate::workflow::Workflow;

const DEFAULT_MACHINE_TYPE: &str = "n1-standard-1";

/// An instance to create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Instance {
    #[serde(flatten)]
    pub instance: compute::Instance,
    /// Name of a staged source to run at boot.
    #[serde(rename = "StartupScript", default, skip_serializing_if = "String::is_empty")]
    pub startup_script: String,
    #[serde(flatten)]
    pub resource: ResourceFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateInstances(pub Vec<Instance>);

#[async_trait]
impl StepAction for CreateInstances {
    fn populate(&mut self, _s: &StepMeta, w: &Workflow) -> Result<()> {
        for i in &mut self.0 {
            let name = i.instance.name.clone();
            i.instance.name = i.resource.populate(&name, &w.project, &w.id);
            if i.instance.zone.is_empty() {
                i.instance.zone = w.zone.clone();
            }
            if i.instance.machine_type.is_empty() {
                i.instance.machine_type = DEFAULT_MACHINE_TYPE.to_string();
            }
            if !url::MACHINE_TYPE_URL_RGX.is_match(&i.instance.machine_type) {
                i.instance.machine_type = format!(
                    "projects/{}/zones/{}/machineTypes/{}",
                    i.resource.project, i.instance.zone, i.instance.machine_type
                );
            }
            for (index, disk) in i.instance.disks.iter_mut().enumerate() {
                if disk.mode.is_empty() {
                    disk.mode = "READ_WRITE".to_string();
                }
                disk.boot = index == 0;
            }
            if !i.startup_script.is_empty() {
                i.instance.metadata.insert(
                    "startup-script-url".to_string(),
                    format!("{}/{}", w.sources_path, i.startup_script),
                );
            }
            i.resource.link = url::zonal_link(
                &i.resource.project,
                &i.instance.zone,
                "instances",
                &i.instance.name,
            );
        }
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        for i in &self.0 {
            let pre = format!("cannot create instance {:?}", i.resource.daisy_name);
            if i.instance.name.is_empty() {
                errs.push(Error::InvalidInput(format!("{}: name is mandatory", pre)));
                continue;
            }
            errs.collect(i.resource.validate_name("instance"));
            if i.instance.disks.is_empty() {
                errs.push(Error::InvalidInput(format!(
                    "{}: must provide at least one disk",
                    pre
                )));
            }
            for disk in &i.instance.disks {
                if disk.source.is_empty() {
                    errs.push(Error::InvalidInput(format!(
                        "{}: attached disk is missing a source",
                        pre
                    )));
                    continue;
                }
                errs.collect(validate_ref(&w.registries.disks, &disk.source, s, w));
                let deps = w.deps.read().unwrap();
                errs.collect(w.registries.disks.reg_connect(
                    &disk.source,
                    &i.resource.daisy_name,
                    &s.id,
                    &deps,
                ));
            }
            for nic in &i.instance.network_interfaces {
                if !nic.network.is_empty() {
                    errs.collect(validate_ref(&w.registries.networks, &nic.network, s, w));
                }
                if !nic.subnetwork.is_empty() {
                    errs.collect(validate_ref(
                        &w.registries.subnetworks,
                        &nic.subnetwork,
                        s,
                        w,
                    ));
                    let deps = w.deps.read().unwrap();
                    errs.collect(w.registries.subnetworks.reg_connect(
                        &nic.subnetwork,
                        &i.resource.daisy_name,
                        &s.id,
                        &deps,
                    ));
                }
            }
            if !i.startup_script.is_empty() && !w.sources.contains_key(&i.startup_script) {
                errs.push(Error::InvalidInput(format!(
                    "{}: startup script {:?} is not among the workflow sources",
                    pre, i.startup_script
                )));
            }
            errs.collect(
                w.registries
                    .instances
                    .reg_create(i.resource.to_resource(&s.id), i.resource.over_write),
            );
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let api = w.compute()?;
        for i in &self.0 {
            let mut wire = i.instance.clone();
            for disk in &mut wire.disks {
                disk.source = resolve_link(&w.registries.disks, &disk.source, w);
            }
            for nic in &mut wire.network_interfaces {
                if !nic.network.is_empty() {
                    nic.network = resolve_link(&w.registries.networks, &nic.network, w);
                }
                if !nic.subnetwork.is_empty() {
                    nic.subnetwork = resolve_link(&w.registries.subnetworks, &nic.subnetwork, w);
                }
            }
            info!(step = %s.name, instance = %wire.name, zone = %wire.zone, "creating instance");
            api.create_instance(&i.resource.project, &wire.zone, &wire)
                .await?;
            w.registries.instances.mark_created(&i.resource.daisy_name);
        }
        Ok(())
    }
}
