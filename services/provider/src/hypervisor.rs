//! Hypervisor API interface and mock implementation.
//!
//! The interface is the narrow surface the provider core needs:
//! - Authenticating a session
//! - Asking for the next free VM id at or above a floor
//! - Create/read/update/delete of QEMU guests
//!
//! A mock implementation is provided for testing and development.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use pxp_id::VmId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ApiError;

/// Desired guest settings sent on create and update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    /// Guest name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Number of vCPU cores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,

    /// Memory in MiB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,

    /// Any other hypervisor config keys (`net0`, `scsi0`, `ostype`, ...).
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl VmSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_cores(mut self, cores: u32) -> Self {
        self.cores = Some(cores);
        self
    }

    pub fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Flatten into hypervisor config key/value pairs.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::with_capacity(self.params.len() + 3);
        if let Some(name) = &self.name {
            params.push(("name".to_string(), name.clone()));
        }
        if let Some(cores) = self.cores {
            params.push(("cores".to_string(), cores.to_string()));
        }
        if let Some(memory) = self.memory_mb {
            params.push(("memory".to_string(), memory.to_string()));
        }
        params.extend(self.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        params
    }
}

/// Current guest configuration as reported by the hypervisor.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct VmConfig {
    pub values: BTreeMap<String, serde_json::Value>,
}

impl VmConfig {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    /// Integer config value; the hypervisor reports these as numbers or strings.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.values.get(key)? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.get_str("name")
    }

    pub fn cores(&self) -> Option<u64> {
        self.get_u64("cores")
    }

    pub fn memory_mb(&self) -> Option<u64> {
        self.get_u64("memory")
    }
}

impl From<&VmSpec> for VmConfig {
    fn from(spec: &VmSpec) -> Self {
        Self {
            values: spec
                .to_params()
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect(),
        }
    }
}

/// Hypervisor management API.
///
/// Implementations must be safe for concurrent use from many tasks.
#[async_trait]
pub trait HypervisorApi: Send + Sync {
    /// Authenticate and keep the session for later calls.
    async fn login(&self) -> Result<(), ApiError>;

    /// Next free VM id at or above `floor`.
    async fn next_free_id(&self, floor: u32) -> Result<VmId, ApiError>;

    /// Create a QEMU guest and wait for the hypervisor task to finish.
    async fn create_vm(&self, node: &str, id: VmId, spec: &VmSpec) -> Result<(), ApiError>;

    /// Read a QEMU guest's current configuration.
    async fn read_vm(&self, node: &str, id: VmId) -> Result<VmConfig, ApiError>;

    /// Apply configuration changes to a QEMU guest.
    async fn update_vm(&self, node: &str, id: VmId, spec: &VmSpec) -> Result<(), ApiError>;

    /// Destroy a QEMU guest.
    async fn delete_vm(&self, node: &str, id: VmId) -> Result<(), ApiError>;
}

/// Mock hypervisor for testing and development.
///
/// Keeps guests in memory. `next_free_id` answers with the lowest id at or
/// above `max(floor, VmId::MIN)` that no guest uses, like the real API, unless
/// scripted answers are queued.
pub struct MockHypervisor {
    vms: Mutex<BTreeMap<(String, VmId), VmConfig>>,
    reserved: Mutex<BTreeSet<VmId>>,
    floors: Mutex<Vec<u32>>,
    scripted: Mutex<VecDeque<Result<VmId, String>>>,
    operation_delay: Duration,
    logged_in: AtomicBool,
    reject_login: bool,
    operations: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockHypervisor {
    /// Create a new mock hypervisor.
    pub fn new() -> Self {
        Self {
            vms: Mutex::new(BTreeMap::new()),
            reserved: Mutex::new(BTreeSet::new()),
            floors: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            operation_delay: Duration::from_millis(10),
            logged_in: AtomicBool::new(false),
            reject_login: false,
            operations: AtomicUsize::new(0),
        }
    }

    /// Create a mock hypervisor that rejects every login.
    pub fn rejecting_login() -> Self {
        Self {
            reject_login: true,
            ..Self::new()
        }
    }

    /// Simulated duration of create/update/delete.
    pub fn with_operation_delay(mut self, delay: Duration) -> Self {
        self.operation_delay = delay;
        self
    }

    /// Mark ids as used by some other client.
    pub fn reserve(&self, ids: impl IntoIterator<Item = u32>) {
        lock(&self.reserved).extend(ids.into_iter().map(VmId::new));
    }

    /// Queue a successful `next_free_id` answer, returned regardless of floor.
    pub fn script_next_id(&self, id: u32) {
        lock(&self.scripted).push_back(Ok(VmId::new(id)));
    }

    /// Queue a failing `next_free_id` answer.
    pub fn script_next_id_failure(&self, message: impl Into<String>) {
        lock(&self.scripted).push_back(Err(message.into()));
    }

    /// Floors passed to `next_free_id`, in call order.
    pub fn floors(&self) -> Vec<u32> {
        lock(&self.floors).clone()
    }

    /// Whether `login` has succeeded.
    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    /// Number of create/update/delete calls seen.
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// Number of guests currently present.
    pub fn vm_count(&self) -> usize {
        lock(&self.vms).len()
    }

    fn not_found(node: &str, id: VmId) -> ApiError {
        ApiError::Api {
            status: 500,
            message: format!("Configuration file 'nodes/{node}/qemu-server/{id}.conf' does not exist"),
        }
    }

    async fn simulate_operation(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.operation_delay).await;
    }
}

impl Default for MockHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HypervisorApi for MockHypervisor {
    async fn login(&self) -> Result<(), ApiError> {
        if self.reject_login {
            return Err(ApiError::Api {
                status: 401,
                message: "authentication failure".to_string(),
            });
        }
        self.logged_in.store(true, Ordering::SeqCst);
        debug!("[MOCK] Logged in");
        Ok(())
    }

    async fn next_free_id(&self, floor: u32) -> Result<VmId, ApiError> {
        lock(&self.floors).push(floor);

        if let Some(answer) = lock(&self.scripted).pop_front() {
            return answer.map_err(|message| ApiError::Api {
                status: 500,
                message,
            });
        }

        let vms = lock(&self.vms);
        let reserved = lock(&self.reserved);
        let in_use = |id: &VmId| reserved.contains(id) || vms.keys().any(|(_, vm)| vm == id);

        (floor.max(VmId::MIN.value())..=VmId::MAX.value())
            .map(VmId::new)
            .find(|id| !in_use(id))
            .ok_or(ApiError::IdSpaceExhausted { floor })
    }

    async fn create_vm(&self, node: &str, id: VmId, spec: &VmSpec) -> Result<(), ApiError> {
        info!(node = node, vm_id = %id, "[MOCK] Creating VM");
        {
            let vms = lock(&self.vms);
            if vms.keys().any(|(_, vm)| *vm == id) || lock(&self.reserved).contains(&id) {
                return Err(ApiError::Api {
                    status: 500,
                    message: format!("VM {id} already exists"),
                });
            }
        }

        self.simulate_operation().await;

        let mut vms = lock(&self.vms);
        if vms.keys().any(|(_, vm)| *vm == id) {
            return Err(ApiError::Api {
                status: 500,
                message: format!("VM {id} already exists"),
            });
        }
        vms.insert((node.to_string(), id), VmConfig::from(spec));
        Ok(())
    }

    async fn read_vm(&self, node: &str, id: VmId) -> Result<VmConfig, ApiError> {
        lock(&self.vms)
            .get(&(node.to_string(), id))
            .cloned()
            .ok_or_else(|| Self::not_found(node, id))
    }

    async fn update_vm(&self, node: &str, id: VmId, spec: &VmSpec) -> Result<(), ApiError> {
        info!(node = node, vm_id = %id, "[MOCK] Updating VM");
        self.simulate_operation().await;

        let mut vms = lock(&self.vms);
        let config = vms
            .get_mut(&(node.to_string(), id))
            .ok_or_else(|| Self::not_found(node, id))?;
        config.values.extend(VmConfig::from(spec).values);
        Ok(())
    }

    async fn delete_vm(&self, node: &str, id: VmId) -> Result<(), ApiError> {
        info!(node = node, vm_id = %id, "[MOCK] Deleting VM");
        self.simulate_operation().await;

        lock(&self.vms)
            .remove(&(node.to_string(), id))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(node, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_to_params() {
        let spec = VmSpec::named("web-1")
            .with_cores(2)
            .with_memory_mb(2048)
            .with_param("net0", "virtio,bridge=vmbr0");
        assert_eq!(
            spec.to_params(),
            vec![
                ("name".to_string(), "web-1".to_string()),
                ("cores".to_string(), "2".to_string()),
                ("memory".to_string(), "2048".to_string()),
                ("net0".to_string(), "virtio,bridge=vmbr0".to_string()),
            ]
        );
    }

    #[test]
    fn test_config_numeric_values() {
        let config: VmConfig =
            serde_json::from_value(serde_json::json!({"memory": "2048", "cores": 2, "name": "db"}))
                .unwrap();
        assert_eq!(config.memory_mb(), Some(2048));
        assert_eq!(config.cores(), Some(2));
        assert_eq!(config.name(), Some("db"));
    }

    #[tokio::test]
    async fn test_mock_next_free_id_skips_used() {
        let mock = MockHypervisor::new().with_operation_delay(Duration::ZERO);
        mock.reserve([100, 101]);
        mock.create_vm("pve1", VmId::new(102), &VmSpec::default())
            .await
            .unwrap();

        assert_eq!(mock.next_free_id(0).await.unwrap(), VmId::new(103));
        assert_eq!(mock.next_free_id(200).await.unwrap(), VmId::new(200));
        assert_eq!(mock.floors(), vec![0, 200]);
    }

    #[tokio::test]
    async fn test_mock_scripted_answers_come_first() {
        let mock = MockHypervisor::new();
        mock.script_next_id(7);
        mock.script_next_id_failure("boom");

        assert_eq!(mock.next_free_id(0).await.unwrap(), VmId::new(7));
        assert!(mock.next_free_id(0).await.is_err());
        assert_eq!(mock.next_free_id(0).await.unwrap(), VmId::new(100));
    }

    #[tokio::test]
    async fn test_mock_rejecting_login() {
        let mock = MockHypervisor::rejecting_login();
        assert_eq!(mock.login().await.unwrap_err().status(), Some(401));
        assert!(!mock.is_logged_in());
    }
}
