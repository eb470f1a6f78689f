//! Workflow definition, compilation and execution.
//!
//! A workflow document is parsed from JSON, populated (variables resolved,
//! defaults applied, names uniquified, links expanded), validated against
//! the resource registries, then run by the scheduler. The root workflow
//! owns the cancellation token and the registries; included children share
//! them, sub-workflows get isolated copies.

pub mod sources;
pub mod vars;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::compute::ComputeApi;
use crate::duration::parse_duration;
use crate::error::{Error, MultiError, Result};
use crate::graph::DepGraph;
use crate::resource::{url, Registries};
use crate::steps::Step;

pub use sources::{StorageApi, TestStorageApi};
pub use vars::Var;

/// Default per-workflow timeout.
pub const DEFAULT_TIMEOUT: &str = "10m";

/// A workflow: named steps, their dependencies, and everything needed to
/// run them against a project.
#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Workflow {
    pub name: String,
    pub project: String,
    pub zone: String,
    #[serde(rename = "GCSPath")]
    pub gcs_path: String,
    #[serde(rename = "OAuthPath")]
    pub oauth_path: String,
    pub default_timeout: String,
    pub vars: HashMap<String, Var>,
    pub sources: HashMap<String, String>,
    pub steps: HashMap<String, Step>,
    pub dependencies: HashMap<String, Vec<String>>,

    /// Unique run id, generated at populate.
    #[serde(skip)]
    pub id: String,
    #[serde(skip)]
    pub username: String,
    /// Directory the document was loaded from; include paths resolve
    /// against it.
    #[serde(skip)]
    pub workflow_dir: PathBuf,
    /// `{GCSPath}/{id}/sources`, where sources are staged.
    #[serde(skip)]
    pub sources_path: String,
    #[serde(skip)]
    pub default_timeout_d: Duration,
    /// Vars visible from the parent scope, lower priority than our own.
    #[serde(skip)]
    pub parent_vars: HashMap<String, Var>,
    /// Prefix qualifying our step ids in the shared dependency graph.
    #[serde(skip)]
    pub step_prefix: String,
    #[serde(skip)]
    pub registries: Arc<Registries>,
    #[serde(skip)]
    pub deps: Arc<RwLock<DepGraph>>,
    /// Broadcast cancellation signal; fired on the first fatal error.
    #[serde(skip)]
    pub cancel: CancellationToken,
    #[serde(skip)]
    compute: Option<Arc<dyn ComputeApi>>,
    #[serde(skip)]
    storage: Option<Arc<dyn StorageApi>>,
    /// Whether this scope deletes its created resources when it finishes.
    /// True for the root and for sub-workflows; false for includes, whose
    /// resources belong to the root.
    #[serde(skip)]
    pub owns_cleanup: bool,
}

impl Workflow {
    /// Parse a workflow from a JSON document.
    pub fn from_json(data: &str) -> Result<Workflow> {
        let mut w: Workflow = serde_json::from_str(data)?;
        w.owns_cleanup = true;
        Ok(w)
    }

    /// Parse a workflow from a file.
    pub fn from_file(path: &Path) -> Result<Workflow> {
        let data = std::fs::read_to_string(path)?;
        let mut w = Self::from_json(&data)?;
        if let Some(dir) = path.parent() {
            w.workflow_dir = dir.to_path_buf();
        }
        if w.name.is_empty() {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                w.name = stem.to_string();
            }
        }
        Ok(w)
    }

    /// Attach the compute API implementation.
    pub fn with_compute(mut self, api: Arc<dyn ComputeApi>) -> Self {
        self.compute = Some(api);
        self
    }

    /// Attach the object-storage implementation.
    pub fn with_storage(mut self, storage: Arc<dyn StorageApi>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn compute(&self) -> Result<Arc<dyn ComputeApi>> {
        self.compute
            .clone()
            .ok_or_else(|| Error::InvalidInput("no compute client configured".to_string()))
    }

    pub fn storage(&self) -> Result<Arc<dyn StorageApi>> {
        self.storage
            .clone()
            .ok_or_else(|| Error::InvalidInput("no storage client configured".to_string()))
    }

    /// The qualified id of one of our steps in the shared graph.
    pub fn step_id(&self, name: &str) -> String {
        format!("{}{}", self.step_prefix, name)
    }

    /// Populate, validate and execute the workflow, then clean up.
    pub async fn run(&mut self) -> Result<()> {
        self.populate()?;
        self.validate()?;
        info!(workflow = %self.name, id = %self.id, "running workflow");
        self.execute().await
    }

    /// Resolve variables, apply defaults and canonicalize every step.
    pub fn populate(&mut self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidInput("workflow name is required".to_string()));
        }
        if !url::NAME_RGX.is_match(&self.name) {
            return Err(Error::InvalidInput(format!(
                "workflow name {:?} is not a valid RFC 1035 label",
                self.name
            )));
        }
        if self.id.is_empty() {
            self.id = gen_run_id();
        }
        if self.username.is_empty() {
            self.username = std::env::var("USER").unwrap_or_else(|_| "stratus".to_string());
        }
        vars::check_required(&self.vars)?;

        // Lookup priority: own vars, then parent vars, then autovars.
        let mut lookup: HashMap<String, String> = HashMap::new();
        for (k, v) in &self.parent_vars {
            lookup.insert(k.clone(), v.value.clone());
        }
        for (k, v) in &self.vars {
            lookup.insert(k.clone(), v.value.clone());
        }
        let now = chrono::Utc::now();
        let early: [(&str, String); 6] = [
            ("NAME", self.name.clone()),
            ("ID", self.id.clone()),
            ("DATE", now.format("%Y%m%d").to_string()),
            ("DATETIME", now.format("%Y%m%d%H%M%S").to_string()),
            ("USERNAME", self.username.clone()),
            ("WFDIR", self.workflow_dir.display().to_string()),
        ];
        for (k, v) in early {
            lookup.entry(k.to_string()).or_insert(v);
        }

        self.project = vars::substitute_str(&self.project, &lookup)?;
        self.zone = vars::substitute_str(&self.zone, &lookup)?;
        self.gcs_path = vars::substitute_str(&self.gcs_path, &lookup)?;
        self.oauth_path = vars::substitute_str(&self.oauth_path, &lookup)?;
        self.default_timeout = vars::substitute_str(&self.default_timeout, &lookup)?;

        if self.project.is_empty() {
            return Err(Error::InvalidInput(
                "workflow project is required".to_string(),
            ));
        }
        if !url::PROJECT_RGX.is_match(&self.project) {
            return Err(Error::InvalidInput(format!(
                "invalid project id {:?}",
                self.project
            )));
        }
        if self.default_timeout.is_empty() {
            self.default_timeout = DEFAULT_TIMEOUT.to_string();
        }
        self.default_timeout_d = parse_duration(&self.default_timeout)?;
        self.sources_path = format!(
            "{}/{}/sources",
            self.gcs_path.trim_end_matches('/'),
            self.id
        );

        let late: [(&str, String); 4] = [
            ("PROJECT", self.project.clone()),
            ("ZONE", self.zone.clone()),
            ("GCSPATH", self.gcs_path.clone()),
            ("SOURCESPATH", self.sources_path.clone()),
        ];
        for (k, v) in late {
            lookup.entry(k.to_string()).or_insert(v);
        }

        for origin in self.sources.values_mut() {
            *origin = vars::substitute_str(origin, &lookup)?;
        }

        let mut steps = std::mem::take(&mut self.steps);
        let mut errs = MultiError::new();
        for (name, step) in steps.iter_mut() {
            errs.collect(step.populate(name, self, &lookup));
        }
        self.steps = steps;
        errs.into_result()
    }

    /// Validate the dependency graph and every step's intended effect.
    pub fn validate(&mut self) -> Result<()> {
        self.register_graph()?;
        self.deps.read().unwrap().check_dag()?;
        self.validate_steps()
    }

    /// Enter our steps (and any included children's, recursively) into the
    /// dependency graph. Must complete before any step validates, because
    /// registry checks consult the graph across workflow boundaries.
    pub(crate) fn register_graph(&mut self) -> Result<()> {
        for (step, deps) in &self.dependencies {
            if !self.steps.contains_key(step) {
                return Err(Error::InvalidInput(format!(
                    "dependencies reference unknown step {:?}",
                    step
                )));
            }
            for dep in deps {
                if !self.steps.contains_key(dep) {
                    return Err(Error::InvalidInput(format!(
                        "step {:?} depends on unknown step {:?}",
                        step, dep
                    )));
                }
            }
        }
        {
            let mut g = self.deps.write().unwrap();
            for name in self.steps.keys() {
                g.add_step(&self.step_id(name));
            }
            for (step, deps) in &self.dependencies {
                for dep in deps {
                    g.add_dep(&self.step_id(step), &self.step_id(dep));
                }
            }
        }
        let mut steps = std::mem::take(&mut self.steps);
        let mut result = Ok(());
        for (name, step) in steps.iter_mut() {
            result = step.link_graph(name, self);
            if result.is_err() {
                break;
            }
        }
        self.steps = steps;
        result
    }

    /// Run every step's validate in topological order.
    pub(crate) fn validate_steps(&mut self) -> Result<()> {
        let order = self.local_order();
        let mut steps = std::mem::take(&mut self.steps);
        let mut errs = MultiError::new();
        for name in &order {
            if let Some(step) = steps.get_mut(name) {
                errs.collect(step.validate(self));
            }
        }
        self.steps = steps;
        errs.into_result()
    }

    /// Topological order of our own steps, dependencies first.
    pub(crate) fn local_order(&self) -> Vec<String> {
        let mut g = DepGraph::new();
        for name in self.steps.keys() {
            g.add_step(name);
        }
        for (step, deps) in &self.dependencies {
            if self.steps.contains_key(step) {
                for dep in deps {
                    g.add_dep(step, dep);
                }
            }
        }
        g.topo_order()
            .into_iter()
            .filter(|name| self.steps.contains_key(name))
            .collect()
    }

    /// Stage sources, run the DAG, then clean up created resources if this
    /// scope owns them. Cleanup always runs, success or failure.
    pub(crate) async fn execute(&self) -> Result<()> {
        let mut errs = MultiError::new();
        match self.stage_sources().await {
            Ok(()) => {
                let (_, run_errs) = crate::engine::run_steps(self).await;
                errs.extend(run_errs);
            }
            Err(e) => errs.push(e),
        }
        if self.owns_cleanup {
            if let Ok(api) = self.compute() {
                let order = self.deps.read().unwrap().topo_order();
                errs.extend(self.registries.cleanup(api.as_ref(), &order).await);
            }
        }
        errs.into_result()
    }

    async fn stage_sources(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Ok(());
        }
        let storage = self.storage()?;
        sources::stage(storage.as_ref(), &self.sources, &self.sources_path).await
    }

    /// Wire this workflow up as the child of `parent` under `step_name`.
    ///
    /// Included children share the parent's registries, graph and
    /// cancellation; isolated children (sub-workflows) get their own
    /// registries and graph but still derive their cancellation token, so
    /// a root cancel reaches every descendant.
    pub(crate) fn link_as_child(
        &mut self,
        parent: &Workflow,
        step_name: &str,
        overrides: &HashMap<String, String>,
        isolate: bool,
    ) {
        if self.project.is_empty() {
            self.project = parent.project.clone();
        }
        if self.zone.is_empty() {
            self.zone = parent.zone.clone();
        }
        if self.gcs_path.is_empty() {
            self.gcs_path = parent.gcs_path.clone();
        }
        if self.oauth_path.is_empty() {
            self.oauth_path = parent.oauth_path.clone();
        }
        if self.default_timeout.is_empty() {
            self.default_timeout = parent.default_timeout.clone();
        }
        if self.workflow_dir.as_os_str().is_empty() {
            self.workflow_dir = parent.workflow_dir.clone();
        }
        self.id = parent.id.clone();
        self.username = parent.username.clone();

        self.parent_vars = parent.vars.clone();
        for (k, v) in &parent.parent_vars {
            self.parent_vars
                .entry(k.clone())
                .or_insert_with(|| v.clone());
        }
        for (k, v) in overrides {
            self.vars
                .entry(k.clone())
                .and_modify(|var| var.value = v.clone())
                .or_insert_with(|| Var::new(v));
        }

        self.step_prefix = format!("{}{}.", parent.step_prefix, step_name);
        self.cancel = parent.cancel.child_token();
        self.compute = parent.compute.clone();
        self.storage = parent.storage.clone();
        if isolate {
            self.registries = Arc::new(Registries::new());
            self.deps = Arc::new(RwLock::new(DepGraph::new()));
            self.owns_cleanup = true;
        } else {
            self.registries = parent.registries.clone();
            self.deps = parent.deps.clone();
            self.owns_cleanup = false;
        }
    }
}

/// Generate a 5-character run id.
pub(crate) fn gen_run_id() -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..5)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_document() {
        let doc = r#"{
            "Name": "image-build",
            "Project": "my-project",
            "Zone": "us-central1-a",
            "GCSPath": "gs://bucket/build",
            "Vars": {
                "plain": "value",
                "needed": {"Value": "set", "Required": true, "Description": "a var"}
            },
            "Sources": {"startup.sh": "./startup.sh"},
            "Steps": {
                "make-disk": {"CreateDisks": [{"Name": "d1", "SourceImage": "projects/p/global/images/base"}]},
                "boot": {"Timeout": "5m", "CreateInstances": [{"Name": "i1", "Disks": [{"Source": "d1"}]}]}
            },
            "Dependencies": {"boot": ["make-disk"]}
        }"#;
        let w = Workflow::from_json(doc).unwrap();
        assert_eq!(w.name, "image-build");
        assert_eq!(w.steps.len(), 2);
        assert_eq!(w.vars["needed"].value, "set");
        assert!(w.vars["needed"].required);
        assert_eq!(w.dependencies["boot"], vec!["make-disk"]);
        assert_eq!(w.steps["boot"].kind(), "CreateInstances");
    }

    #[test]
    fn test_unknown_step_field_rejected() {
        let doc = r#"{
            "Name": "wf",
            "Project": "p",
            "Steps": {"s": {"CreateDiskz": []}}
        }"#;
        assert!(Workflow::from_json(doc).is_err());
    }

    #[test]
    fn test_populate_requires_required_vars() {
        let mut w = testing::test_workflow();
        w.vars.insert(
            "needed".to_string(),
            Var {
                value: String::new(),
                required: true,
                description: String::new(),
            },
        );
        let err = w.populate().unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
        assert!(err.to_string().contains("needed"));
    }

    #[test]
    fn test_populate_substitutes_vars_and_autovars() {
        let mut w = testing::test_workflow();
        w.vars.insert("disk_base".to_string(), Var::new("base"));
        let step: Step =
            serde_json::from_str(r#"{"CreateDisks": [{"Name": "${disk_base}-${ID}", "SizeGb": 10}]}"#)
                .unwrap();
        w.steps.insert("make".to_string(), step);
        w.populate().unwrap();
        let disks = w.steps["make"].create_disks.as_ref().unwrap();
        assert_eq!(disks.0[0].resource.daisy_name, "base-abcde");
    }

    #[test]
    fn test_populate_rejects_bad_name() {
        let mut w = testing::test_workflow();
        w.name = "Bad_Name".to_string();
        assert!(w.populate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_dependency() {
        let mut w = testing::test_workflow();
        let step: Step = serde_json::from_str(r#"{"StartInstances": {"Instances": []}}"#).unwrap();
        w.steps.insert("s".to_string(), step);
        w.dependencies
            .insert("s".to_string(), vec!["ghost".to_string()]);
        w.populate().unwrap();
        assert!(w.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let mut w = testing::test_workflow();
        for name in ["a", "b"] {
            let step: Step =
                serde_json::from_str(r#"{"StartInstances": {"Instances": []}}"#).unwrap();
            w.steps.insert(name.to_string(), step);
        }
        w.dependencies.insert("a".to_string(), vec!["b".to_string()]);
        w.dependencies.insert("b".to_string(), vec!["a".to_string()]);
        w.populate().unwrap();
        let err = w.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[tokio::test]
    async fn test_failed_run_still_cleans_up_created_resources() {
        use crate::compute::testing::TestComputeApi;
        use crate::compute::ApiError;

        let api = Arc::new(TestComputeApi::new());
        api.fail_method(
            "create-instance",
            ApiError::Http {
                status: 500,
                message: "backend error".to_string(),
            },
        );
        let mut w = testing::test_workflow_with(api.clone());
        let doc: HashMap<String, Step> = serde_json::from_str(
            r#"{
                "make-disk": {"CreateDisks": [{"Name": "d", "SizeGb": 10}]},
                "boot": {"CreateInstances": [{"Name": "i", "Disks": [{"Source": "d"}]}]},
                "extra-disk": {"CreateDisks": [{"Name": "d2", "SizeGb": 10}]}
            }"#,
        )
        .unwrap();
        w.steps = doc;
        w.dependencies
            .insert("boot".to_string(), vec!["make-disk".to_string()]);
        w.dependencies
            .insert("extra-disk".to_string(), vec!["boot".to_string()]);

        let err = w.run().await.unwrap_err();
        assert_eq!(err.code(), "API_ERROR");

        // The disk created before the failure is deleted; the skipped step
        // never created anything, and the failed instance create is not
        // retried by cleanup.
        assert_eq!(api.count("create-disk"), 1);
        assert_eq!(api.count("delete-disk"), 1);
        assert_eq!(api.count("delete-instance"), 0);
    }

    #[test]
    fn test_no_two_resources_share_a_real_name() {
        let mut w = testing::test_workflow();
        for (step, disk) in [("a", "d"), ("b", "d")] {
            let raw = format!(r#"{{"CreateDisks": [{{"Name": "{}", "SizeGb": 10}}]}}"#, disk);
            let parsed: Step = serde_json::from_str(&raw).unwrap();
            w.steps.insert(step.to_string(), parsed);
        }
        w.populate().unwrap();
        let err = w.validate().unwrap_err();
        assert_eq!(err.code(), "MULTIPLE_CREATORS");
    }

    #[test]
    fn test_run_id_shape() {
        let id = gen_run_id();
        assert_eq!(id.len(), 5);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
