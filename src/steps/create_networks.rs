//! CreateNetworks step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{StepAction, StepMeta};
use crate::compute;
use crate::error::{Error, MultiError, Result};
use crate::resource::{url, ResourceFields};
use crate::workflow::Workflow;

/// A VPC network to create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    #[serde(flatten)]
    pub network: compute::Network,
    #[serde(flatten)]
    pub resource: ResourceFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateNetworks(pub Vec<Network>);

#[async_trait]
impl StepAction for CreateNetworks {
    fn populate(&mut self, _s: &StepMeta, w: &Workflow) -> Result<()> {
        for n in &mut self.0 {
            let name = n.network.name.clone();
            n.network.name = n.resource.populate(&name, &w.project, &w.id);
            if n.network.auto_create_subnetworks.is_none() {
                n.network.auto_create_subnetworks = Some(false);
            }
            n.resource.link =
                url::global_link(&n.resource.project, "networks", &n.network.name);
        }
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let mut errs = MultiError::new();
        for n in &self.0 {
            let pre = format!("cannot create network {:?}", n.resource.daisy_name);
            if n.network.name.is_empty() {
                errs.push(Error::InvalidInput(format!("{}: name is mandatory", pre)));
                continue;
            }
            errs.collect(n.resource.validate_name("network"));
            errs.collect(
                w.registries
                    .networks
                    .reg_create(n.resource.to_resource(&s.id), n.resource.over_write),
            );
        }
        errs.into_result()
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let api = w.compute()?;
        for n in &self.0 {
            info!(step = %s.name, network = %n.network.name, "creating network");
            api.create_network(&n.resource.project, &n.network).await?;
            w.registries.networks.mark_created(&n.resource.daisy_name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::testing::TestComputeApi;
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

    #[test]
    fn test_populate_defaults_manual_subnetworks() {
        let w = test_workflow();
        let mut step = CreateNetworks(vec![serde_json::from_str(r#"{"Name": "net"}"#).unwrap()]);
        step.populate(&meta("make-net"), &w).unwrap();
        assert_eq!(step.0[0].network.auto_create_subnetworks, Some(false));
        assert_eq!(
            step.0[0].resource.link,
            "projects/test-project/global/networks/net-abcde"
        );
    }

    #[tokio::test]
    async fn test_create_and_register() {
        let api = Arc::new(TestComputeApi::new());
        let w = test_workflow_with(api.clone());
        let mut step = CreateNetworks(vec![serde_json::from_str(r#"{"Name": "net"}"#).unwrap()]);
        step.populate(&meta("make-net"), &w).unwrap();
        step.validate(&meta("make-net"), &w).unwrap();
        step.run(&meta("make-net"), &w).await.unwrap();
        assert_eq!(api.calls(), vec!["create-network test-project/net-abcde"]);
        assert!(w.registries.networks.get("net").unwrap().created);
    }
}
