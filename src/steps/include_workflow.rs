//! IncludeWorkflow step: splice another workflow into this one.
//!
//! The included child shares the parent's registries, dependency graph and
//! cancellation token; its resources are cleaned up by the root. In the
//! shared graph the child's steps are bridged through the including step:
//! they depend on everything the include step depends on, and the include
//! step completes only after all of them.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{StepAction, StepMeta};
use crate::error::{Error, Result};
use crate::workflow::Workflow;

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IncludeWorkflow {
    /// Path of the child document, relative to the parent's directory.
    pub path: String,
    /// Var values passed down to the child.
    pub vars: HashMap<String, String>,
    #[serde(skip)]
    pub workflow: Option<Workflow>,
}

impl IncludeWorkflow {
    fn child(&self) -> Result<&Workflow> {
        self.workflow
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("included workflow is not loaded".to_string()))
    }

    fn child_mut(&mut self) -> Result<&mut Workflow> {
        self.workflow
            .as_mut()
            .ok_or_else(|| Error::InvalidInput("included workflow is not loaded".to_string()))
    }
}

#[async_trait]
impl StepAction for IncludeWorkflow {
    fn populate(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        if self.workflow.is_none() {
            if self.path.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "step {:?}: must provide Path",
                    s.name
                )));
            }
            let path = w.workflow_dir.join(&self.path);
            self.workflow = Some(Workflow::from_file(&path)?);
        }
        let vars = self.vars.clone();
        let name = s.name.clone();
        let child = self.child_mut()?;
        child.link_as_child(w, &name, &vars, false);
        child.populate()
    }

    fn link_graph(&mut self, s: &StepMeta, w: &Workflow) -> Result<()> {
        let preds: Vec<String> = w
            .dependencies
            .get(&s.name)
            .map(|deps| deps.iter().map(|d| w.step_id(d)).collect())
            .unwrap_or_default();
        let child = self.child_mut()?;
        child.register_graph()?;

        let mut g = w.deps.write().unwrap();
        for name in child.steps.keys() {
            let child_id = child.step_id(name);
            for pred in &preds {
                g.add_dep(&child_id, pred);
            }
            g.add_dep(&s.id, &child_id);
        }
        Ok(())
    }

    fn validate(&mut self, _s: &StepMeta, _w: &Workflow) -> Result<()> {
        self.child_mut()?.validate_steps()
    }

    async fn run(&self, s: &StepMeta, _w: &Workflow) -> Result<()> {
        let child = self.child()?;
        info!(step = %s.name, workflow = %child.name, "running included workflow");
        child.execute().await
    }
}
