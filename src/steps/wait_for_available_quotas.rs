//! WaitForAvailableQuotas step: block until a set of regional quotas has
//! headroom at the same time.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{StepAction, StepMeta};
use crate::duration::parse_duration;
use crate::error::{Error, Result};
use crate::workflow::Workflow;

const DEFAULT_QUOTA_INTERVAL: &str = "5s";

/// Units of a metric that must be available in a region.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct QuotaAvailable {
    pub metric: String,
    pub region: String,
    pub units: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WaitForAvailableQuotas {
    /// Poll interval, a duration string.
    pub interval: String,
    pub quotas: Vec<QuotaAvailable>,
    #[serde(skip)]
    parsed_interval: Duration,
}

#[async_trait]
impl StepAction for WaitForAvailableQuotas {
    fn populate(&mut self, s: &StepMeta, _w: &Workflow) -> Result<()> {
        if self.interval.is_empty() {
            self.interval = DEFAULT_QUOTA_INTERVAL.to_string();
        }
        self.parsed_interval = parse_duration(&self.interval).map_err(|e| {
            Error::InvalidInput(format!(
                "failed to parse interval for step {:?}: {}",
                s.name, e
            ))
        })?;
        Ok(())
    }

    fn validate(&mut self, s: &StepMeta, _w: &Workflow) -> Result<()> {
        if self.parsed_interval.is_zero() {
            return Err(Error::InvalidInput(format!(
                "no interval given for step {:?}",
                s.name
            )));
        }
        for q in &self.quotas {
            if q.metric.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "no metric given for step {:?}",
                    s.name
                )));
            }
            if q.region.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "no region given for step {:?}",
                    s.name
                )));
            }
            if q.units < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "units must be non-negative, got {:.2} for step {:?}",
                    q.units, s.name
                )));
            }
        }
        Ok(())
    }

    async fn run(&self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let api = w.compute()?;
        for q in &self.quotas {
            info!(
                step = %s.name,
                metric = %q.metric,
                region = %q.region,
                units = q.units,
                "waiting for quota to be available"
            );
        }
        let mut tick = tokio::time::interval(self.parsed_interval);
        loop {
            tokio::select! {
                _ = w.cancel.cancelled() => return Ok(()),
                _ = tick.tick() => {
                    let mut available = Vec::with_capacity(self.quotas.len());
                    for q in &self.quotas {
                        let region = api.get_region(&w.project, &q.region).await?;
                        for quota in &region.quotas {
                            if quota.metric == q.metric && quota.limit - quota.usage >= q.units {
                                available.push(format!(
                                    "region {} has {:.2} units of {} available",
                                    q.region,
                                    quota.limit - quota.usage,
                                    q.metric
                                ));
                            }
                        }
                    }
                    if available.len() == self.quotas.len() {
                        for msg in available {
                            info!(step = %s.name, "{}", msg);
                        }
                        return Ok(());
                    }
                }
            }
        }
    }
}
