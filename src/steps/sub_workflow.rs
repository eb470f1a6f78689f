//! SubWorkflow step: run another workflow in an isolated scope.
//!
//! Unlike IncludeWorkflow, the child gets its own registries and dependency
//! graph, and deletes its own created resources when it finishes. Only the
//! cancellation token is derived from the parent, so a root cancel still
//! reaches it.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{StepAction, StepMeta};
use crate::error::{Error, Result};
use crate::workflow::Workflow;

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SubWorkflow {
    /// Path of the child document, relative to the parent's directory.
    pub path: String,
    /// Var values passed down to the child.
    pub vars: HashMap<String, String>,
    #[serde(skip)]
    pub workflow: Option<Workflow>,
}

impl SubWorkflow {
    fn child(&self) -> Result<&Workflow> {
        self.workflow
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("sub-workflow is not loaded".to_string()))
    }

    fn child_mut(&mut self) -> Result<&mut Workflow> {
        self.workflow
            .as_mut()
            .ok_or_else(|| Error::InvalidInput("sub-workflow is not loaded".to_string()))
    }
}

#[async_trait]
impl StepAction for SubWorkflow {
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
        child.link_as_child(w, &name, &vars, true);
        child.populate()
    }

    fn link_graph(&mut self, _s: &StepMeta, _w: &Workflow) -> Result<()> {
        // The child's graph is isolated; nothing bridges into the parent.
        self.child_mut()?.register_graph()
    }

    fn validate(&mut self, _s: &StepMeta, _w: &Workflow) -> Result<()> {
        let child = self.child_mut()?;
        child.deps.read().unwrap().check_dag()?;
        child.validate_steps()
    }

    async fn run(&self, s: &StepMeta, _w: &Workflow) -> Result<()> {
        let child = self.child()?;
        info!(step = %s.name, workflow = %child.name, "running sub-workflow");
        child.execute().await
    }
}
