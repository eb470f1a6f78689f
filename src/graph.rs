//! Step dependency graph.
//!
//! Tracks which step depends on which, across a workflow and any included
//! children. Registries consult it to decide whether a step that uses,
//! deletes or disconnects a resource is ordered after the step that created
//! or connected it.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};

/// A directed graph of step dependencies.
///
/// An edge `a -> b` means step `a` depends on step `b`. Steps from included
/// workflows are entered under their qualified ids and bridged through the
/// including step, so transitive queries cross workflow boundaries.
#[derive(Debug, Default)]
pub struct DepGraph {
    deps: HashMap<String, HashSet<String>>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step with no dependencies yet.
    pub fn add_step(&mut self, id: &str) {
        self.deps.entry(id.to_string()).or_default();
    }

    /// Record that `step` depends on `dep`.
    pub fn add_dep(&mut self, step: &str, dep: &str) {
        self.deps
            .entry(step.to_string())
            .or_default()
            .insert(dep.to_string());
        self.deps.entry(dep.to_string()).or_default();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.deps.contains_key(id)
    }

    /// Reflexive-transitive dependency query: does `step` depend on `dep`,
    /// possibly through intermediate steps? A step depends on itself.
    pub fn depends_on(&self, step: &str, dep: &str) -> bool {
        if step == dep {
            return true;
        }
        let mut seen = HashSet::new();
        let mut stack = vec![step];
        while let Some(cur) = stack.pop() {
            if !seen.insert(cur) {
                continue;
            }
            if let Some(edges) = self.deps.get(cur) {
                for next in edges {
                    if next == dep {
                        return true;
                    }
                    stack.push(next);
                }
            }
        }
        false
    }

    /// Check the graph is acyclic.
    pub fn check_dag(&self) -> Result<()> {
        let mut visited = HashSet::new();
        let mut in_stack = HashSet::new();
        for id in self.deps.keys() {
            if !visited.contains(id.as_str()) && self.has_cycle(id, &mut visited, &mut in_stack) {
                return Err(Error::InvalidInput(format!(
                    "workflow has a dependency cycle involving step {:?}",
                    id
                )));
            }
        }
        Ok(())
    }

    fn has_cycle<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
        in_stack: &mut HashSet<&'a str>,
    ) -> bool {
        visited.insert(id);
        in_stack.insert(id);
        if let Some(edges) = self.deps.get(id) {
            for next in edges {
                if !visited.contains(next.as_str()) {
                    if self.has_cycle(next, visited, in_stack) {
                        return true;
                    }
                } else if in_stack.contains(next.as_str()) {
                    return true;
                }
            }
        }
        in_stack.remove(id);
        false
    }

    /// Topological order: dependencies come before their dependents.
    ///
    /// Useful both for validation order and, reversed, for cleanup order.
    pub fn topo_order(&self) -> Vec<String> {
        let mut ids: Vec<&String> = self.deps.keys().collect();
        ids.sort();

        let mut order = Vec::with_capacity(self.deps.len());
        let mut visited = HashSet::new();
        for id in ids {
            self.visit(id, &mut visited, &mut order);
        }
        order
    }

    fn visit(&self, id: &str, visited: &mut HashSet<String>, order: &mut Vec<String>) {
        if !visited.insert(id.to_string()) {
            return;
        }
        if let Some(edges) = self.deps.get(id) {
            let mut deps: Vec<&String> = edges.iter().collect();
            deps.sort();
            for dep in deps {
                self.visit(dep, visited, order);
            }
        }
        order.push(id.to_string());
    }
}
