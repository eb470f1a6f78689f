//! Resource naming grammar and URL regexes.
//!
//! Short names written in a workflow document are rewritten to
//! fully-qualified links (`projects/P/zones/Z/disks/N` and friends) during
//! populate. The per-kind regexes below define the fully-qualified form;
//! anything that already matches is left intact.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// RFC 1035 label, the name grammar for most resources.
pub const RFC1035: &str = "[a-z]([-a-z0-9]*[a-z0-9])?";

/// Project ids allow dots and colons in addition to the label grammar.
pub const PROJECT_RGX_STR: &str = "[a-z]([-.:a-z0-9]*[a-z0-9])?";

pub static NAME_RGX: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^{}$", RFC1035)).unwrap());

pub static PROJECT_RGX: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^{}$", PROJECT_RGX_STR)).unwrap());

/// Where a resource collection lives in the URL hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Zonal,
    Regional,
    Global,
}

fn compile(scope: Scope, collection: &str) -> Regex {
    let pattern = match scope {
        Scope::Zonal => format!(
            "^(projects/(?P<project>{p})/)?zones/(?P<zone>{n})/{c}/(?P<name>{n})$",
            p = PROJECT_RGX_STR,
            n = RFC1035,
            c = collection
        ),
        Scope::Regional => format!(
            "^(projects/(?P<project>{p})/)?regions/(?P<region>{n})/{c}/(?P<name>{n})$",
            p = PROJECT_RGX_STR,
            n = RFC1035,
            c = collection
        ),
        Scope::Global => format!(
            "^(projects/(?P<project>{p})/)?global/{c}/(?P<name>{n})$",
            p = PROJECT_RGX_STR,
            n = RFC1035,
            c = collection
        ),
    };
    Regex::new(&pattern).unwrap()
}

pub static DISK_URL_RGX: Lazy<Regex> = Lazy::new(|| compile(Scope::Zonal, "disks"));
pub static IMAGE_URL_RGX: Lazy<Regex> = Lazy::new(|| compile(Scope::Global, "images"));
pub static INSTANCE_URL_RGX: Lazy<Regex> = Lazy::new(|| compile(Scope::Zonal, "instances"));
pub static MACHINE_IMAGE_URL_RGX: Lazy<Regex> =
    Lazy::new(|| compile(Scope::Global, "machineImages"));
pub static NETWORK_URL_RGX: Lazy<Regex> = Lazy::new(|| compile(Scope::Global, "networks"));
pub static SUBNETWORK_URL_RGX: Lazy<Regex> =
    Lazy::new(|| compile(Scope::Regional, "subnetworks"));
pub static SNAPSHOT_URL_RGX: Lazy<Regex> = Lazy::new(|| compile(Scope::Global, "snapshots"));
pub static FORWARDING_RULE_URL_RGX: Lazy<Regex> =
    Lazy::new(|| compile(Scope::Regional, "forwardingRules"));
pub static TARGET_INSTANCE_URL_RGX: Lazy<Regex> =
    Lazy::new(|| compile(Scope::Zonal, "targetInstances"));
pub static MACHINE_TYPE_URL_RGX: Lazy<Regex> = Lazy::new(|| compile(Scope::Zonal, "machineTypes"));

/// Extract named capture groups of a match.
pub fn named_groups(rgx: &Regex, s: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Some(caps) = rgx.captures(s) {
        for name in rgx.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                out.insert(name.to_string(), m.as_str().to_string());
            }
        }
    }
    out
}

/// Derive a region name from a zone name (`us-central1-a` -> `us-central1`).
pub fn region_from_zone(zone: &str) -> String {
    match zone.rfind('-') {
        Some(idx) => zone[..idx].to_string(),
        None => zone.to_string(),
    }
}

/// Prefix a partial link with `projects/P/` when the project part is absent.
pub fn qualify(link: &str, project: &str) -> String {
    if link.starts_with("projects/") {
        link.to_string()
    } else {
        format!("projects/{}/{}", project, link)
    }
}

pub fn zonal_link(project: &str, zone: &str, collection: &str, name: &str) -> String {
    format!("projects/{}/zones/{}/{}/{}", project, zone, collection, name)
}

pub fn regional_link(project: &str, region: &str, collection: &str, name: &str) -> String {
    format!("projects/{}/regions/{}/{}/{}", project, region, collection, name)
}

pub fn global_link(project: &str, collection: &str, name: &str) -> String {
    format!("projects/{}/global/{}/{}", project, collection, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_grammar() {
        assert!(NAME_RGX.is_match("disk-1"));
        assert!(NAME_RGX.is_match("a"));
        assert!(!NAME_RGX.is_match("Disk"));
        assert!(!NAME_RGX.is_match("disk-"));
        assert!(!NAME_RGX.is_match("1disk"));
    }

    #[test]
    fn test_zonal_url_matching() {
        assert!(DISK_URL_RGX.is_match("projects/p1/zones/us-central1-a/disks/d1"));
        assert!(DISK_URL_RGX.is_match("zones/us-central1-a/disks/d1"));
        assert!(!DISK_URL_RGX.is_match("d1"));
        assert!(!DISK_URL_RGX.is_match("projects/p1/zones/us-central1-a/disks/d1/extra"));
    }

    #[test]
    fn test_named_groups() {
        let groups = named_groups(
            &SUBNETWORK_URL_RGX,
            "projects/p1/regions/us-central1/subnetworks/sn1",
        );
        assert_eq!(groups["project"], "p1");
        assert_eq!(groups["region"], "us-central1");
        assert_eq!(groups["name"], "sn1");
    }

    #[test]
    fn test_region_from_zone() {
        assert_eq!(region_from_zone("us-central1-a"), "us-central1");
        assert_eq!(region_from_zone("europe-west4-b"), "europe-west4");
    }

    #[test]
    fn test_qualify() {
        assert_eq!(
            qualify("zones/z/disks/d", "p"),
            "projects/p/zones/z/disks/d"
        );
        assert_eq!(
            qualify("projects/other/zones/z/disks/d", "p"),
            "projects/other/zones/z/disks/d"
        );
    }

    #[test]
    fn test_machine_type_url() {
        assert!(MACHINE_TYPE_URL_RGX.is_match("projects/p/zones/z-a/machineTypes/n1-standard-1"));
        assert!(!MACHINE_TYPE_URL_RGX.is_match("n1-standard-1"));
    }
}
