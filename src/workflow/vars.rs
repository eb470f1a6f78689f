//! Workflow variables and `${}` substitution.
//!
//! Substitution is single-pass: each original string is scanned once and
//! replacement text is never re-scanned, so a var whose value contains
//! `${...}` expands literally.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// A declared workflow variable.
///
/// The document accepts either a bare string value or the full object form
/// `{"Value": ..., "Required": ..., "Description": ...}`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Var {
    pub value: String,
    pub required: bool,
    pub description: String,
}

impl Var {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.to_string(),
            ..Default::default()
        }
    }
}

impl<'de> Deserialize<'de> for Var {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Plain(String),
            Full {
                #[serde(default, rename = "Value")]
                value: String,
                #[serde(default, rename = "Required")]
                required: bool,
                #[serde(default, rename = "Description")]
                description: String,
            },
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Plain(value) => Var {
                value,
                required: false,
                description: String::new(),
            },
            Raw::Full {
                value,
                required,
                description,
            } => Var {
                value,
                required,
                description,
            },
        })
    }
}

static VAR_RGX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Substitute every `${NAME}` token in `s` from `lookup`.
///
/// Unknown names are an error; the caller's lookup already folds in parent
/// vars and autovars, so anything left over is a typo in the document.
pub fn substitute_str(s: &str, lookup: &HashMap<String, String>) -> Result<String> {
    let mut missing: Vec<String> = Vec::new();
    let out = VAR_RGX.replace_all(s, |caps: &Captures| {
        let name = &caps[1];
        match lookup.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });
    if !missing.is_empty() {
        return Err(Error::InvalidInput(format!(
            "unresolved var(s) {} in {:?}",
            missing
                .iter()
                .map(|m| format!("${{{}}}", m))
                .collect::<Vec<_>>()
                .join(", "),
            s
        )));
    }
    Ok(out.into_owned())
}

/// Substitute `${NAME}` tokens in every string of a JSON tree, including
/// object keys.
pub fn substitute_value(value: &mut serde_json::Value, lookup: &HashMap<String, String>) -> Result<()> {
    match value {
        serde_json::Value::String(s) => {
            *s = substitute_str(s, lookup)?;
        }
        serde_json::Value::Array(items) => {
            for item in items {
                substitute_value(item, lookup)?;
            }
        }
        serde_json::Value::Object(map) => {
            let mut replaced = serde_json::Map::with_capacity(map.len());
            for (key, mut val) in std::mem::take(map) {
                substitute_value(&mut val, lookup)?;
                replaced.insert(substitute_str(&key, lookup)?, val);
            }
            *map = replaced;
        }
        _ => {}
    }
    Ok(())
}

/// Fail on any required var with no bound value.
pub fn check_required(vars: &HashMap<String, Var>) -> Result<()> {
    let mut unset: Vec<&str> = vars
        .iter()
        .filter(|(_, v)| v.required && v.value.is_empty())
        .map(|(name, _)| name.as_str())
        .collect();
    unset.sort();
    if unset.is_empty() {
        return Ok(());
    }
    Err(Error::InvalidInput(format!(
        "required var(s) not set: {}",
        unset.join(", ")
    )))
}
