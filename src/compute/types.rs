//! Wire types exchanged with the compute API.
//!
//! These are deliberately small: only the fields the engine reads or sets.
//! The production client maps them onto the vendor SDK; test doubles use
//! them directly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A persistent disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Disk {
    pub name: String,
    pub description: String,
    pub size_gb: i64,
    pub source_image: String,
    pub source_snapshot: String,
    #[serde(rename = "Type")]
    pub disk_type: String,
    pub zone: String,
}

/// A disk attached (or to be attached) to an instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AttachedDisk {
    pub source: String,
    pub device_name: String,
    pub mode: String,
    pub boot: bool,
    pub auto_delete: bool,
}

/// A network interface on an instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NetworkInterface {
    pub network: String,
    pub subnetwork: String,
    #[serde(rename = "NetworkIP")]
    pub network_ip: String,
}

/// A compute instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Instance {
    pub name: String,
    pub description: String,
    pub machine_type: String,
    pub zone: String,
    pub disks: Vec<AttachedDisk>,
    pub network_interfaces: Vec<NetworkInterface>,
    pub metadata: HashMap<String, String>,
}

/// A disk image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Image {
    pub name: String,
    pub description: String,
    pub family: String,
    pub source_disk: String,
    pub licenses: Vec<String>,
    pub guest_os_features: Vec<String>,
}

/// Image deprecation state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DeprecationStatus {
    pub state: String,
    pub replacement: String,
}

/// A machine image (full-instance capture).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MachineImage {
    pub name: String,
    pub description: String,
    pub source_instance: String,
}

/// A VPC network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Network {
    pub name: String,
    pub description: String,
    pub auto_create_subnetworks: Option<bool>,
    pub mtu: Option<i64>,
}

/// A subnetwork of a VPC network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Subnetwork {
    pub name: String,
    pub description: String,
    pub network: String,
    pub region: String,
    pub ip_cidr_range: String,
    pub stack_type: String,
    pub ipv6_access_type: String,
    pub internal_ipv6_prefix: String,
    pub external_ipv6_prefix: String,
}

/// A disk snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Snapshot {
    pub name: String,
    pub description: String,
    pub source_disk: String,
}

/// A forwarding rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ForwardingRule {
    pub name: String,
    pub description: String,
    pub region: String,
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    pub port_range: String,
    pub target: String,
}

/// A target instance for protocol forwarding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TargetInstance {
    pub name: String,
    pub description: String,
    pub zone: String,
    pub instance: String,
}

/// An asynchronous compute operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Operation {
    pub name: String,
    pub status: String,
    pub error: Option<OperationError>,
}

/// The error payload of a finished operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OperationError {
    pub errors: Vec<OperationErrorDetail>,
}

/// One entry of an operation's error list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OperationErrorDetail {
    pub code: String,
    pub message: String,
}

/// A region, as returned by the region getter. Only quotas are read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Region {
    pub name: String,
    pub quotas: Vec<Quota>,
}

/// A single quota entry of a region.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Quota {
    pub metric: String,
    pub limit: f64,
    pub usage: f64,
}

/// A chunk of an instance's serial console output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SerialPortOutput {
    pub contents: String,
    pub next: i64,
}
