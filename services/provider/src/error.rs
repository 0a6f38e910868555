//! Error types for the provider core.

use pxp_id::{LocatorError, VmId};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors from the hypervisor management API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("task {upid} failed: {exit_status}")]
    Task { upid: String, exit_status: String },

    #[error("not authenticated: call login first")]
    NotAuthenticated,

    #[error("invalid API response: {0}")]
    InvalidResponse(String),

    #[error("cannot build request URL from {0}")]
    InvalidUrl(String),

    #[error("no free VM id at or above {floor}")]
    IdSpaceExhausted { floor: u32 },
}

impl ApiError {
    /// Returns the HTTP status for API errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            ApiError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Errors surfaced by the provider core to its callers.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid provider configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("authentication against {url} failed: {source}")]
    Authentication {
        url: String,
        #[source]
        source: ApiError,
    },

    #[error("failed to allocate a VM id at or above {floor}: {source}")]
    Allocation {
        floor: u32,
        #[source]
        source: ApiError,
    },

    #[error("hypervisor returned VM id {returned} below requested floor {floor}")]
    AllocationBelowFloor { floor: u32, returned: VmId },

    #[error("VM id space exhausted after {last}")]
    AllocationExhausted { last: VmId },

    #[error(transparent)]
    Locator(#[from] LocatorError),

    #[error("VM id {id} is outside the guest range 100..=999999999")]
    InvalidVmId { id: VmId },

    #[error("unsupported resource kind '{kind}'")]
    UnsupportedKind { kind: String },

    #[error("hypervisor API error: {0}")]
    Api(#[from] ApiError),
}

impl ProviderError {
    /// Returns true for errors raised by the id allocator.
    pub fn is_allocation(&self) -> bool {
        matches!(
            self,
            ProviderError::Allocation { .. }
                | ProviderError::AllocationBelowFloor { .. }
                | ProviderError::AllocationExhausted { .. }
        )
    }
}
