//! Wire types for the Proxmox VE JSON API.

use pxp_id::VmId;
use serde::Deserialize;

use crate::error::ApiError;

/// Every response wraps its payload in `{"data": ...}`.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: T,
}

/// Payload of `POST /access/ticket`.
#[derive(Debug, Deserialize)]
pub(crate) struct TicketData {
    pub ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    pub csrf_prevention_token: String,
}

/// `/cluster/nextid` answers with a string, older releases with a number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum IdValue {
    Text(String),
    Number(u64),
}

impl IdValue {
    pub fn into_vm_id(self) -> Result<VmId, ApiError> {
        let raw = match self {
            IdValue::Text(s) => s.trim().parse::<u64>().map_err(|e| {
                ApiError::InvalidResponse(format!("next id '{s}' is not an integer: {e}"))
            })?,
            IdValue::Number(n) => n,
        };
        u32::try_from(raw)
            .map(VmId::new)
            .map_err(|_| ApiError::InvalidResponse(format!("next id {raw} out of range")))
    }
}

/// Status of an asynchronous hypervisor task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskStatus {
    /// `running` or `stopped`.
    pub status: String,

    /// `OK` on success, an error message otherwise. Only set once stopped.
    #[serde(default)]
    pub exitstatus: Option<String>,
}

impl TaskStatus {
    pub fn is_running(&self) -> bool {
        self.status != "stopped"
    }

    pub fn is_ok(&self) -> bool {
        self.exitstatus.as_deref() == Some("OK")
    }
}
