//! CreateSubnetworks step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{resolve_link, StepAction, StepMeta};
use crate::compute;
use crate::error::{Error, MultiError, Result};
use crate::resource::{url, ResourceFields};
use crate::workflow::Workflow;

const VALID_STACK_TYPES: [&str; 3] = ["IPV4_ONLY", "IPV4_IPV6", "IPV6_ONLY"];
const VALID_IPV6_ACCESS_TYPES: [&str; 2] = ["INTERNAL", "EXTERNAL"];

/// A subnetwork to create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subnetwork {
    #[serde(flatten)]
    pub subnetwork: compute::Subnetwork,
    #[serde(flatten)]
    pub resource: ResourceFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateSubnetworks(pub Vec<Subnetwork>);

#[async_trait]
impl StepAction for CreateSubnetworks {
    fn populate(&mut self, _s: &StepMeta, w: &Workflow) -> Result<()> {
        for sn in &mut self.0 {
            let name = sn.subnetwork.name.clone();
            sn.subnetwork.name = sn.resource.populate(&name, &w.project, &w.id);
            if sn.subnetwork.description.is_empty() {
                sn.subnetwork.description = format!(
                    "subnetwork created by workflow {:?} for user {:?}",
                    w.name, w.username
                );
            }
            if sn.subnetwork.region.is_empty() {
                sn.subnetwork.region = url::region_from_zone(&w.zone);
            }
            sn.resource.link = url::regional_link(
                &sn.resource.project,
                &sn.subnetwork.region,
                "subnetworks",
                &sn.subnetwork.name,
            );
        }
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        for sn in &self.0 {
            let pre = format!("cannot create subnetwork {:?}", sn.resource.daisy_name);
            if sn.subnetwork.name.is_empty() {
                errs.push(Error::InvalidInput(format!("{}: name is mandatory", pre)));
                continue;
            }
            errs.collect(sn.resource.validate_name("subnetwork"));
            if sn.subnetwork.network.is_empty() {
                errs.push(Error::InvalidInput(format!("{}: network is mandatory", pre)));
            }

            let stack_type = sn.subnetwork.stack_type.as_str();
            if !stack_type.is_empty() && !VALID_STACK_TYPES.contains(&stack_type) {
                errs.push(Error::InvalidInput(format!(
                    "{}: invalid stack type {:?}, must be one of {:?}",
                    pre, stack_type, VALID_STACK_TYPES
                )));
            }
            // An unspecified stack type defaults to IPV4_ONLY.
            if stack_type.is_empty() || stack_type.contains("IPV4") {
                if let Err(e) = parse_cidr(&sn.subnetwork.ip_cidr_range) {
                    errs.push(Error::InvalidInput(format!(
                        "{}: bad IpCidrRange {:?}: {}",
                        pre, sn.subnetwork.ip_cidr_range, e
                    )));
                }
            }
            if stack_type.contains("IPV6") {
                if stack_type == "IPV6_ONLY" && !sn.subnetwork.ip_cidr_range.is_empty() {
                    errs.push(Error::InvalidInput(format!(
                        "{}: IPv6-only subnetworks must not have an IPv4 CIDR range",
                        pre
                    )));
                }
                let access_type = sn.subnetwork.ipv6_access_type.as_str();
                if access_type.is_empty() {
                    errs.push(Error::InvalidInput(format!(
                        "{}: ipv6 access type is mandatory",
                        pre
                    )));
                } else {
                    if !VALID_IPV6_ACCESS_TYPES.contains(&access_type) {
                        errs.push(Error::InvalidInput(format!(
                            "{}: invalid IPv6 access type {:?}, must be one of {:?}",
                            pre, access_type, VALID_IPV6_ACCESS_TYPES
                        )));
                    }
                    if !sn.subnetwork.internal_ipv6_prefix.is_empty() {
                        if let Err(e) = parse_cidr(&sn.subnetwork.internal_ipv6_prefix) {
                            errs.push(Error::InvalidInput(format!(
                                "{}: bad InternalIpv6Prefix {:?}: {}",
                                pre, sn.subnetwork.internal_ipv6_prefix, e
                            )));
                        }
                    }
                    if access_type == "EXTERNAL" && !sn.subnetwork.external_ipv6_prefix.is_empty() {
                        if let Err(e) = parse_cidr(&sn.subnetwork.external_ipv6_prefix) {
                            errs.push(Error::InvalidInput(format!(
                                "{}: bad ExternalIpv6Prefix {:?}: {}",
                                pre, sn.subnetwork.external_ipv6_prefix, e
                            )));
                        }
                    }
                }
            }

            errs.collect(
                w.registries
                    .subnetworks
                    .reg_create(sn.resource.to_resource(&s.id), sn.resource.over_write),
            );
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let api = w.compute()?;
        for sn in &self.0 {
            let mut wire = sn.subnetwork.clone();
            wire.network = resolve_link(&w.registries.networks, &wire.network, w);
            info!(step = %s.name, subnetwork = %wire.name, region = %wire.region, "creating subnetwork");
            api.create_subnetwork(&sn.resource.project, &wire.region, &wire)
                .await?;
            w.registries
                .subnetworks
                .mark_created(&sn.resource.daisy_name);
        }
        Ok(())
    }
}

/// Check a CIDR string: an IP address, a slash, and an in-range prefix
/// length.
fn parse_cidr(s: &str) -> Result<()> {
    let (addr, len) = s
        .split_once('/')
        .ok_or_else(|| Error::InvalidInput(format!("{:?} is not CIDR notation", s)))?;
    let addr: std::net::IpAddr = addr
        .parse()
        .map_err(|e| Error::InvalidInput(format!("bad address in {:?}: {}", s, e)))?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    let len: u8 = len
        .parse()
        .map_err(|_| Error::InvalidInput(format!("bad prefix length in {:?}", s)))?;
    if len > max {
        return Err(Error::InvalidInput(format!(
            "prefix length {} out of range in {:?}",
            len, s
        )));
    }
    Ok(())
}
