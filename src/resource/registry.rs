//! Per-kind resource lifecycle registry.
//!
//! A registry tracks every resource a workflow intends to create, every step
//! that references it, and the step (if any) that deletes it. Registration
//! happens during validate; the run phase only flips the created/deleted
//! markers. All access goes through a per-registry mutex.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::graph::DepGraph;

use super::attachment::{AttachmentMap, Connection};
use super::{DeletionDisposition, Resource, ResourceKind};

pub struct ResourceRegistry {
    kind: ResourceKind,
    inner: Mutex<Inner>,
}

struct Inner {
    resources: HashMap<String, Resource>,
    // Creations displaced by an overwrite; kept so cleanup bookkeeping and
    // tests can still see them.
    displaced: Vec<Resource>,
    attachments: AttachmentMap,
}

impl ResourceRegistry {
    pub fn new(kind: ResourceKind) -> Self {
        let attachments = match kind {
            ResourceKind::Subnetwork => AttachmentMap::new("subnetwork", "connect"),
            _ => AttachmentMap::new(kind.noun(), "attach"),
        };
        Self {
            kind,
            inner: Mutex::new(Inner {
                resources: HashMap::new(),
                displaced: Vec::new(),
                attachments,
            }),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Register the intent to create a resource.
    ///
    /// Fails when an active creation already exists under the same name,
    /// unless `overwrite` is set, in which case the earlier creation is
    /// re-pointed to be deleted by the new creator before it is recreated.
    pub fn reg_create(&self, res: Resource, overwrite: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let active_creator = inner
            .resources
            .get(&res.daisy_name)
            .filter(|existing| existing.deleter_step.is_none())
            .map(|existing| existing.creator_step.clone());
        if let Some(creator) = active_creator {
            if !overwrite {
                return Err(Error::MultipleCreators(format!(
                    "{} {:?} is already created by step {:?}",
                    self.kind.noun(),
                    res.daisy_name,
                    creator
                )));
            }
            if let Some(mut old) = inner.resources.remove(&res.daisy_name) {
                old.deleter_step = Some(res.creator_step.clone());
                old.disposition = DeletionDisposition::Explicit;
                inner.displaced.push(old);
            }
        }
        for other in inner.resources.values() {
            if other.real_name == res.real_name && other.daisy_name != res.daisy_name {
                return Err(Error::InvalidInput(format!(
                    "duplicate {} name {:?}: created by both step {:?} and step {:?}",
                    self.kind.noun(),
                    res.real_name,
                    other.creator_step,
                    res.creator_step
                )));
            }
        }
        inner.resources.insert(res.daisy_name.clone(), res);
        Ok(())
    }

    /// Register `user_step` as a reader of an already-created resource.
    ///
    /// The user must transitively depend on the creator. Using an image that
    /// has been deprecated to `OBSOLETE` or `DELETED` is an error.
    pub fn reg_use(&self, daisy_name: &str, user_step: &str, deps: &DepGraph) -> Result<Resource> {
        let mut inner = self.inner.lock().unwrap();
        let kind = self.kind;
        let res = inner.resources.get_mut(daisy_name).ok_or_else(|| {
            Error::ResourceDoesNotExist(format!(
                "{} {:?} is not created by this workflow",
                kind.noun(),
                daisy_name
            ))
        })?;
        if !deps.depends_on(user_step, &res.creator_step) {
            return Err(Error::MissingDependency(format!(
                "step {:?} uses {} {:?} but does not depend on its creator step {:?}",
                user_step,
                kind.noun(),
                daisy_name,
                res.creator_step
            )));
        }
        if let Some(state) = &res.deprecation_state {
            if state == "OBSOLETE" || state == "DELETED" {
                return Err(Error::ImageObsolete(format!(
                    "image {:?} is deprecated to {}",
                    daisy_name, state
                )));
            }
        }
        res.users.push(user_step.to_string());
        Ok(res.clone())
    }

    /// Register `deleter_step` as the deleter of a resource.
    ///
    /// The deleter must depend on the creator and on every registered user.
    pub fn reg_delete(&self, daisy_name: &str, deleter_step: &str, deps: &DepGraph) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let kind = self.kind;
        let res = inner.resources.get_mut(daisy_name).ok_or_else(|| {
            Error::ResourceDoesNotExist(format!(
                "{} {:?} is not created by this workflow",
                kind.noun(),
                daisy_name
            ))
        })?;
        if let Some(existing) = &res.deleter_step {
            return Err(Error::InvalidInput(format!(
                "{} {:?} is already deleted by step {:?}",
                kind.noun(),
                daisy_name,
                existing
            )));
        }
        if !deps.depends_on(deleter_step, &res.creator_step) {
            return Err(Error::MissingDependency(format!(
                "step {:?} deletes {} {:?} but does not depend on its creator step {:?}",
                deleter_step,
                kind.noun(),
                daisy_name,
                res.creator_step
            )));
        }
        for user in &res.users {
            if !deps.depends_on(deleter_step, user) {
                return Err(Error::MissingDependency(format!(
                    "step {:?} deletes {} {:?} but does not depend on step {:?} which uses it",
                    deleter_step,
                    kind.noun(),
                    daisy_name,
                    user
                )));
            }
        }
        res.deleter_step = Some(deleter_step.to_string());
        res.disposition = DeletionDisposition::Explicit;
        Ok(())
    }

    /// Record a deprecation state transition for an image.
    pub fn set_deprecation_state(&self, daisy_name: &str, state: &str) {
        if let Some(res) = self.inner.lock().unwrap().resources.get_mut(daisy_name) {
            res.deprecation_state = Some(state.to_string());
        }
    }

    /// Mark a resource as actually created in the cloud.
    pub fn mark_created(&self, daisy_name: &str) {
        if let Some(res) = self.inner.lock().unwrap().resources.get_mut(daisy_name) {
            res.created = true;
        }
    }

    /// Mark a resource's delete as attempted.
    pub fn mark_deleted(&self, daisy_name: &str) {
        if let Some(res) = self.inner.lock().unwrap().resources.get_mut(daisy_name) {
            res.deleted = true;
        }
    }

    pub fn get(&self, daisy_name: &str) -> Option<Resource> {
        self.inner.lock().unwrap().resources.get(daisy_name).cloned()
    }

    /// Snapshot of all registered resources.
    pub fn resources(&self) -> Vec<Resource> {
        self.inner.lock().unwrap().resources.values().cloned().collect()
    }

    /// Snapshot of creations displaced by overwrites.
    pub fn displaced(&self) -> Vec<Resource> {
        self.inner.lock().unwrap().displaced.clone()
    }

    pub fn reg_connect(
        &self,
        daisy_name: &str,
        instance: &str,
        step: &str,
        deps: &DepGraph,
    ) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .attachments
            .connect(daisy_name, instance, step, deps)
    }

    pub fn reg_disconnect(
        &self,
        daisy_name: &str,
        instance: &str,
        step: &str,
        deps: &DepGraph,
    ) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .attachments
            .disconnect(daisy_name, instance, step, deps)
    }

    pub fn reg_disconnect_all(&self, instance: &str, step: &str, deps: &DepGraph) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .attachments
            .disconnect_all(instance, step, deps)
    }

    pub fn connection(&self, daisy_name: &str, instance: &str) -> Option<Connection> {
        self.inner.lock().unwrap().attachments.get(daisy_name, instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(name: &str, creator: &str) -> Resource {
        Resource {
            daisy_name: name.to_string(),
            real_name: format!("{}-abcde", name),
            creator_step: creator.to_string(),
            ..Default::default()
        }
    }

    fn chain() -> DepGraph {
        let mut g = DepGraph::new();
        g.add_dep("s2", "s1");
        g.add_dep("s3", "s2");
        g.add_step("s4");
        g
    }

    #[test]
    fn test_duplicate_creation_rejected() {
        let r = ResourceRegistry::new(ResourceKind::Disk);
        r.reg_create(disk("d", "s1"), false).unwrap();
        let err = r.reg_create(disk("d", "s2"), false).unwrap_err();
        assert_eq!(err.code(), "MULTIPLE_CREATORS");
        assert!(err.to_string().contains("s1"));
    }

    #[test]
    fn test_overwrite_repoints_earlier_creation() {
        let r = ResourceRegistry::new(ResourceKind::Disk);
        r.reg_create(disk("d", "s1"), false).unwrap();
        r.reg_create(disk("d", "s2"), true).unwrap();
        assert_eq!(r.get("d").unwrap().creator_step, "s2");
        let displaced = r.displaced();
        assert_eq!(displaced.len(), 1);
        assert_eq!(displaced[0].deleter_step.as_deref(), Some("s2"));
    }

    #[test]
    fn test_use_requires_dependency_on_creator() {
        let g = chain();
        let r = ResourceRegistry::new(ResourceKind::Disk);
        r.reg_create(disk("d", "s1"), false).unwrap();
        assert!(r.reg_use("d", "s2", &g).is_ok());
        let err = r.reg_use("d", "s4", &g).unwrap_err();
        assert_eq!(err.code(), "MISSING_DEPENDENCY");
    }

    #[test]
    fn test_use_unknown_resource() {
        let g = chain();
        let r = ResourceRegistry::new(ResourceKind::Disk);
        let err = r.reg_use("nope", "s1", &g).unwrap_err();
        assert_eq!(err.code(), "RESOURCE_DOES_NOT_EXIST");
    }

    #[test]
    fn test_delete_requires_dependency_on_users() {
        let g = chain();
        let r = ResourceRegistry::new(ResourceKind::Disk);
        r.reg_create(disk("d", "s1"), false).unwrap();
        r.reg_use("d", "s2", &g).unwrap();
        // s4 depends on neither the creator nor the user.
        assert_eq!(
            r.reg_delete("d", "s4", &g).unwrap_err().code(),
            "MISSING_DEPENDENCY"
        );
        // s3 depends on both.
        r.reg_delete("d", "s3", &g).unwrap();
        // A second delete is rejected.
        assert!(r.reg_delete("d", "s3", &g).is_err());
    }

    #[test]
    fn test_obsolete_image_rejected() {
        let g = chain();
        let r = ResourceRegistry::new(ResourceKind::Image);
        r.reg_create(disk("img", "s1"), false).unwrap();
        r.set_deprecation_state("img", "OBSOLETE");
        let err = r.reg_use("img", "s2", &g).unwrap_err();
        assert_eq!(err.code(), "IMAGE_OBSOLETE");
    }

    #[test]
    fn test_exact_name_collision() {
        let r = ResourceRegistry::new(ResourceKind::Disk);
        let mut a = disk("a", "s1");
        a.real_name = "fixed".to_string();
        let mut b = disk("b", "s2");
        b.real_name = "fixed".to_string();
        r.reg_create(a, false).unwrap();
        let err = r.reg_create(b, false).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
