//! CreateForwardingRules step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{resolve_link, validate_ref, StepAction, StepMeta};
use crate::compute;
use crate::error::{Error, MultiError, Result};
use crate::resource::{url, ResourceFields};
use crate::workflow::Workflow;

const VALID_PROTOCOLS: [&str; 6] = ["TCP", "UDP", "ESP", "AH", "SCTP", "ICMP"];

/// A forwarding rule pointing at a target instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForwardingRule {
    #[serde(flatten)]
    pub rule: compute::ForwardingRule,
    #[serde(flatten)]
    pub resource: ResourceFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateForwardingRules(pub Vec<ForwardingRule>);

#[async_trait]
impl StepAction for CreateForwardingRules {
    fn populate(&mut self, _s: &StepMeta, w: &Workflow) -> Result<()> {
        for fr in &mut self.0 {
            let name = fr.rule.name.clone();
            fr.rule.name = fr.resource.populate(&name, &w.project, &w.id);
            if fr.rule.region.is_empty() {
                fr.rule.region = url::region_from_zone(&w.zone);
            }
            fr.resource.link = url::regional_link(
                &fr.resource.project,
                &fr.rule.region,
                "forwardingRules",
                &fr.rule.name,
            );
        }
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        for fr in &self.0 {
            let pre = format!("cannot create forwarding rule {:?}", fr.resource.daisy_name);
            if fr.rule.name.is_empty() {
                errs.push(Error::InvalidInput(format!("{}: name is mandatory", pre)));
                continue;
            }
            errs.collect(fr.resource.validate_name("forwarding rule"));
            if fr.rule.target.is_empty() {
                errs.push(Error::InvalidInput(format!("{}: target is mandatory", pre)));
            } else {
                errs.collect(validate_ref(
                    &w.registries.target_instances,
                    &fr.rule.target,
                    s,
                    w,
                ));
            }
            if !fr.rule.ip_protocol.is_empty()
                && !VALID_PROTOCOLS.contains(&fr.rule.ip_protocol.as_str())
            {
                errs.push(Error::InvalidInput(format!(
                    "{}: invalid IPProtocol {:?}, must be one of {:?}",
                    pre, fr.rule.ip_protocol, VALID_PROTOCOLS
                )));
            }
            errs.collect(
                w.registries
                    .forwarding_rules
                    .reg_create(fr.resource.to_resource(&s.id), fr.resource.over_write),
            );
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let api = w.compute()?;
        for fr in &self.0 {
            let mut wire = fr.rule.clone();
            wire.target = resolve_link(&w.registries.target_instances, &wire.target, w);
            info!(step = %s.name, rule = %wire.name, region = %wire.region, "creating forwarding rule");
            api.create_forwarding_rule(&fr.resource.project, &wire.region, &wire)
                .await?;
            w.registries
                .forwarding_rules
                .mark_created(&fr.resource.daisy_name);
        }
        Ok(())
    }
}
