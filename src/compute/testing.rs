//! In-memory compute API double for tests.
//!
//! Records every call and lets tests program region quotas, serial console
//! output, instance power state, operation responses and per-method
//! failures. No call ever leaves the process.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    ApiError, ApiResult, AttachedDisk, ComputeApi, DeprecationStatus, Disk, ForwardingRule, Image,
    Instance, MachineImage, Network, Operation, Region, SerialPortOutput, Snapshot, Subnetwork,
    TargetInstance,
};

/// Programmable [`ComputeApi`] implementation.
#[derive(Default)]
pub struct TestComputeApi {
    calls: Mutex<Vec<String>>,
    fail: Mutex<HashMap<String, ApiError>>,
    regions: Mutex<HashMap<String, Region>>,
    serial: Mutex<HashMap<String, VecDeque<SerialPortOutput>>>,
    stopped: Mutex<HashSet<String>>,
    operations: Mutex<VecDeque<Operation>>,
}

impl TestComputeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Program the region returned by `get_region`.
    pub fn set_region(&self, project: &str, region: Region) {
        self.regions
            .lock()
            .unwrap()
            .insert(format!("{}/{}", project, region.name), region);
    }

    /// Queue a serial console chunk for an instance.
    pub fn push_serial(&self, instance: &str, contents: &str) {
        self.serial
            .lock()
            .unwrap()
            .entry(instance.to_string())
            .or_default()
            .push_back(SerialPortOutput {
                contents: contents.to_string(),
                next: 0,
            });
    }

    /// Mark an instance as stopped.
    pub fn set_stopped(&self, instance: &str) {
        self.stopped.lock().unwrap().insert(instance.to_string());
    }

    /// Queue an operation response for the operation getters.
    pub fn push_operation(&self, op: Operation) {
        self.operations.lock().unwrap().push_back(op);
    }

    /// Make every call to `method` fail with `err`.
    pub fn fail_method(&self, method: &str, err: ApiError) {
        self.fail.lock().unwrap().insert(method.to_string(), err);
    }

    /// All recorded calls, in order, as `"method detail"` strings.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Count of recorded calls whose method matches `method`.
    pub fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(method))
            .count()
    }

    fn call(&self, method: &str, detail: String) -> ApiResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", method, detail));
        if let Some(err) = self.fail.lock().unwrap().get(method) {
            return Err(err.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl ComputeApi for TestComputeApi {
    async fn create_disk(&self, project: &str, zone: &str, disk: &Disk) -> ApiResult<()> {
        self.call("create-disk", format!("{}/{}/{}", project, zone, disk.name))
    }

    async fn delete_disk(&self, project: &str, zone: &str, disk: &str) -> ApiResult<()> {
        self.call("delete-disk", format!("{}/{}/{}", project, zone, disk))
    }

    async fn attach_disk(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        disk: &AttachedDisk,
    ) -> ApiResult<()> {
        self.call(
            "attach-disk",
            format!("{}/{}/{} {}", project, zone, instance, disk.source),
        )
    }

    async fn detach_disk(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        device_name: &str,
    ) -> ApiResult<()> {
        self.call(
            "detach-disk",
            format!("{}/{}/{} {}", project, zone, instance, device_name),
        )
    }

    async fn create_image(&self, project: &str, image: &Image) -> ApiResult<()> {
        self.call("create-image", format!("{}/{}", project, image.name))
    }

    async fn delete_image(&self, project: &str, image: &str) -> ApiResult<()> {
        self.call("delete-image", format!("{}/{}", project, image))
    }

    async fn deprecate_image(
        &self,
        project: &str,
        image: &str,
        status: &DeprecationStatus,
    ) -> ApiResult<()> {
        self.call(
            "deprecate-image",
            format!("{}/{} {}", project, image, status.state),
        )
    }

    async fn create_machine_image(&self, project: &str, mi: &MachineImage) -> ApiResult<()> {
        self.call("create-machine-image", format!("{}/{}", project, mi.name))
    }

    async fn delete_machine_image(&self, project: &str, mi: &str) -> ApiResult<()> {
        self.call("delete-machine-image", format!("{}/{}", project, mi))
    }

    async fn create_instance(
        &self,
        project: &str,
        zone: &str,
        instance: &Instance,
    ) -> ApiResult<()> {
        self.call(
            "create-instance",
            format!("{}/{}/{}", project, zone, instance.name),
        )
    }

    async fn delete_instance(&self, project: &str, zone: &str, instance: &str) -> ApiResult<()> {
        self.call(
            "delete-instance",
            format!("{}/{}/{}", project, zone, instance),
        )
    }

    async fn start_instance(&self, project: &str, zone: &str, instance: &str) -> ApiResult<()> {
        self.call(
            "start-instance",
            format!("{}/{}/{}", project, zone, instance),
        )
    }

    async fn stop_instance(&self, project: &str, zone: &str, instance: &str) -> ApiResult<()> {
        self.call("stop-instance", format!("{}/{}/{}", project, zone, instance))
    }

    async fn suspend_instance(&self, project: &str, zone: &str, instance: &str) -> ApiResult<()> {
        self.call(
            "suspend-instance",
            format!("{}/{}/{}", project, zone, instance),
        )
    }

    async fn resume_instance(&self, project: &str, zone: &str, instance: &str) -> ApiResult<()> {
        self.call(
            "resume-instance",
            format!("{}/{}/{}", project, zone, instance),
        )
    }

    async fn set_machine_type(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        machine_type: &str,
    ) -> ApiResult<()> {
        self.call(
            "set-machine-type",
            format!("{}/{}/{} {}", project, zone, instance, machine_type),
        )
    }

    async fn set_instance_metadata(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        metadata: &std::collections::HashMap<String, String>,
    ) -> ApiResult<()> {
        let mut keys: Vec<&String> = metadata.keys().collect();
        keys.sort();
        let keys = keys
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(",");
        self.call(
            "set-instance-metadata",
            format!("{}/{}/{} {}", project, zone, instance, keys),
        )
    }

    async fn instance_stopped(&self, project: &str, zone: &str, instance: &str) -> ApiResult<bool> {
        self.call(
            "instance-stopped",
            format!("{}/{}/{}", project, zone, instance),
        )?;
        Ok(self.stopped.lock().unwrap().contains(instance))
    }

    async fn get_serial_port_output(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        port: i64,
        start: i64,
    ) -> ApiResult<SerialPortOutput> {
        self.call(
            "get-serial-port-output",
            format!("{}/{}/{} port={} start={}", project, zone, instance, port, start),
        )?;
        let mut serial = self.serial.lock().unwrap();
        let queue = serial.entry(instance.to_string()).or_default();
        Ok(queue.pop_front().unwrap_or_default())
    }

    async fn create_network(&self, project: &str, network: &Network) -> ApiResult<()> {
        self.call("create-network", format!("{}/{}", project, network.name))
    }

    async fn delete_network(&self, project: &str, network: &str) -> ApiResult<()> {
        self.call("delete-network", format!("{}/{}", project, network))
    }

    async fn create_subnetwork(
        &self,
        project: &str,
        region: &str,
        subnetwork: &Subnetwork,
    ) -> ApiResult<()> {
        self.call(
            "create-subnetwork",
            format!("{}/{}/{}", project, region, subnetwork.name),
        )
    }

    async fn delete_subnetwork(
        &self,
        project: &str,
        region: &str,
        subnetwork: &str,
    ) -> ApiResult<()> {
        self.call(
            "delete-subnetwork",
            format!("{}/{}/{}", project, region, subnetwork),
        )
    }

    async fn create_snapshot(
        &self,
        project: &str,
        zone: &str,
        disk: &str,
        snapshot: &Snapshot,
    ) -> ApiResult<()> {
        self.call(
            "create-snapshot",
            format!("{}/{}/{} {}", project, zone, disk, snapshot.name),
        )
    }

    async fn delete_snapshot(&self, project: &str, snapshot: &str) -> ApiResult<()> {
        self.call("delete-snapshot", format!("{}/{}", project, snapshot))
    }

    async fn create_forwarding_rule(
        &self,
        project: &str,
        region: &str,
        rule: &ForwardingRule,
    ) -> ApiResult<()> {
        self.call(
            "create-forwarding-rule",
            format!("{}/{}/{}", project, region, rule.name),
        )
    }

    async fn delete_forwarding_rule(
        &self,
        project: &str,
        region: &str,
        rule: &str,
    ) -> ApiResult<()> {
        self.call(
            "delete-forwarding-rule",
            format!("{}/{}/{}", project, region, rule),
        )
    }

    async fn create_target_instance(
        &self,
        project: &str,
        zone: &str,
        target: &TargetInstance,
    ) -> ApiResult<()> {
        self.call(
            "create-target-instance",
            format!("{}/{}/{}", project, zone, target.name),
        )
    }

    async fn delete_target_instance(
        &self,
        project: &str,
        zone: &str,
        target: &str,
    ) -> ApiResult<()> {
        self.call(
            "delete-target-instance",
            format!("{}/{}/{}", project, zone, target),
        )
    }

    async fn get_region(&self, project: &str, region: &str) -> ApiResult<Region> {
        self.call("get-region", format!("{}/{}", project, region))?;
        self.regions
            .lock()
            .unwrap()
            .get(&format!("{}/{}", project, region))
            .cloned()
            .ok_or_else(|| ApiError::Http {
                status: 404,
                message: format!("region {:?} not found", region),
            })
    }

    async fn get_zone_operation(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> ApiResult<Operation> {
        self.call("get-zone-operation", format!("{}/{}/{}", project, zone, name))?;
        Ok(self.next_operation())
    }

    async fn get_region_operation(
        &self,
        project: &str,
        region: &str,
        name: &str,
    ) -> ApiResult<Operation> {
        self.call(
            "get-region-operation",
            format!("{}/{}/{}", project, region, name),
        )?;
        Ok(self.next_operation())
    }

    async fn get_global_operation(&self, project: &str, name: &str) -> ApiResult<Operation> {
        self.call("get-global-operation", format!("{}/{}", project, name))?;
        Ok(self.next_operation())
    }
}

impl TestComputeApi {
    fn next_operation(&self) -> Operation {
        self.operations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Operation {
                name: "op-done".to_string(),
                status: "DONE".to_string(),
                error: None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls_and_injects_failures() {
        let api = TestComputeApi::new();
        api.create_disk("p", "z", &Disk {
            name: "d1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(api.count("create-disk"), 1);
        assert_eq!(api.calls()[0], "create-disk p/z/d1");

        api.fail_method(
            "delete-disk",
            ApiError::Http {
                status: 500,
                message: "boom".to_string(),
            },
        );
        assert!(api.delete_disk("p", "z", "d1").await.is_err());
    }

    #[tokio::test]
    async fn test_programmed_region() {
        let api = TestComputeApi::new();
        api.set_region(
            "p",
            Region {
                name: "us-central1".to_string(),
                quotas: vec![],
            },
        );
        assert!(api.get_region("p", "us-central1").await.is_ok());
        assert!(api.get_region("p", "europe-west1").await.is_err());
    }
}
