//! Connection bookkeeping between resources and instances.
//!
//! Disk attachments and subnetwork connections follow the same rules: a
//! connection gets at most one disconnector, the disconnector must depend
//! on the connector, and a later re-connect must depend on the earlier
//! disconnect. The registries that carry connections embed this map.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::graph::DepGraph;

/// A live or closed connection between a resource and an instance.
#[derive(Debug, Clone)]
pub struct Connection {
    pub connector: String,
    pub disconnector: Option<String>,
}

/// Connections keyed by resource name, then instance name.
#[derive(Debug)]
pub struct AttachmentMap {
    noun: &'static str,
    verb: &'static str,
    connections: HashMap<String, HashMap<String, Connection>>,
}

impl AttachmentMap {
    /// `noun` names the resource side for error messages ("disk",
    /// "subnetwork"); `verb` is the connect action ("attach", "connect").
    pub fn new(noun: &'static str, verb: &'static str) -> Self {
        Self {
            noun,
            verb,
            connections: HashMap::new(),
        }
    }

    /// Record `step` as connector of `(res, instance)`.
    pub fn connect(&mut self, res: &str, instance: &str, step: &str, deps: &DepGraph) -> Result<()> {
        let pre = format!(
            "step {:?} cannot {} instance {:?} to {} {:?}",
            step, self.verb, instance, self.noun, res
        );
        if let Some(conn) = self
            .connections
            .get(res)
            .and_then(|by_instance| by_instance.get(instance))
        {
            match &conn.disconnector {
                None => {
                    return Err(Error::MissingDependency(format!(
                        "{}: concurrently connected by step {:?}",
                        pre, conn.connector
                    )))
                }
                Some(d) if !deps.depends_on(step, d) => {
                    return Err(Error::MissingDependency(format!(
                        "{}: step {:?} does not depend on disconnecting step {:?}",
                        pre, step, d
                    )))
                }
                Some(_) => {}
            }
        }
        self.connections
            .entry(res.to_string())
            .or_default()
            .insert(
                instance.to_string(),
                Connection {
                    connector: step.to_string(),
                    disconnector: None,
                },
            );
        Ok(())
    }

    /// Record `step` as disconnector of `(res, instance)`.
    pub fn disconnect(
        &mut self,
        res: &str,
        instance: &str,
        step: &str,
        deps: &DepGraph,
    ) -> Result<()> {
        let pre = format!(
            "step {:?} cannot disconnect instance {:?} from {} {:?}",
            step, instance, self.noun, res
        );
        let conn = self
            .connections
            .get_mut(res)
            .and_then(|by_instance| by_instance.get_mut(instance))
            .ok_or_else(|| Error::InvalidInput(format!("{}: not attached", pre)))?;
        if let Some(d) = &conn.disconnector {
            return Err(Error::InvalidInput(format!(
                "{}: already disconnected by step {:?}",
                pre, d
            )));
        }
        if !deps.depends_on(step, &conn.connector) {
            return Err(Error::MissingDependency(format!(
                "{}: step {:?} does not depend on connecting step {:?}",
                pre, step, conn.connector
            )));
        }
        conn.disconnector = Some(step.to_string());
        Ok(())
    }

    /// Mark `step` as disconnector of every live connection involving
    /// `instance`.
    pub fn disconnect_all(&mut self, instance: &str, step: &str, deps: &DepGraph) -> Result<()> {
        let resources: Vec<String> = self
            .connections
            .iter()
            .filter(|(_, by_instance)| {
                by_instance
                    .get(instance)
                    .is_some_and(|c| c.disconnector.is_none())
            })
            .map(|(res, _)| res.clone())
            .collect();
        for res in resources {
            self.disconnect(&res, instance, step, deps)?;
        }
        Ok(())
    }

    pub fn get(&self, res: &str, instance: &str) -> Option<Connection> {
        self.connections
            .get(res)
            .and_then(|by_instance| by_instance.get(instance))
            .cloned()
    }
}
