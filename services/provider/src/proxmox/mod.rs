//! Proxmox VE implementation of the hypervisor API.
//!
//! ## Components
//!
//! - `api`: HTTP client for the Proxmox VE JSON API (ticket auth, id search, QEMU guests)
//! - `types`: Response envelopes and task status payloads

mod api;
mod types;

pub use api::ProxmoxClient;
pub use types::TaskStatus;
