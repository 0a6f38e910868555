//! pxp Provider Library
//!
//! Coordination core a provisioning tool uses to drive a Proxmox VE cluster
//! from many concurrent resource operations. The HTTP calls themselves are
//! simple; what this crate adds is the discipline around them.
//!
//! ## Architecture
//!
//! ```text
//! Session (one per process, passed explicitly)
//! ├── HypervisorApi    (authenticated API handle, shared read-only)
//! ├── AdmissionGate    (at most N long-running operations in flight)
//! └── IdAllocator      (serialized, monotonic VM id allocation)
//! ```
//!
//! `VmLifecycle` shows the intended use: the gate around every
//! create/update/delete, the allocator when a create has no id, and a
//! [`Locator`] as the durable handle returned to the caller.
//!
//! ## Modules
//!
//! - `config`: Provider settings from explicit values or `PM_*` variables
//! - `gate`: Admission gate and permits
//! - `allocator`: VM id allocator
//! - `hypervisor`: Hypervisor API trait and mock
//! - `proxmox`: Proxmox VE HTTP client
//! - `session`: Session construction and accessors
//! - `lifecycle`: QEMU guest create/read/update/delete

pub mod allocator;
pub mod config;
pub mod error;
pub mod gate;
pub mod hypervisor;
pub mod lifecycle;
pub mod proxmox;
pub mod session;

// Re-export commonly used types
pub use allocator::IdAllocator;
pub use config::{ConfigError, ProviderConfig};
pub use error::{ApiError, ProviderError};
pub use gate::{AdmissionGate, AdmissionPermit};
pub use hypervisor::{HypervisorApi, MockHypervisor, VmConfig, VmSpec};
pub use lifecycle::VmLifecycle;
pub use proxmox::ProxmoxClient;
pub use pxp_id::{decode_locator, encode_locator, Locator, LocatorError, VmId};
pub use session::Session;
