//! Provider-wide session state.
//!
//! One `Session` exists per provider process. It is built once after a
//! successful login and passed explicitly to whatever drives resource
//! operations; there is no global.

use std::num::NonZeroUsize;
use std::sync::Arc;

use pxp_id::VmId;
use tracing::{error, info};

use crate::allocator::IdAllocator;
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::gate::{AdmissionGate, AdmissionPermit};
use crate::hypervisor::HypervisorApi;
use crate::proxmox::ProxmoxClient;

/// Shared session: API handle, admission gate, and id allocator.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    api: Arc<dyn HypervisorApi>,
    gate: AdmissionGate,
    allocator: IdAllocator,
}

impl Session {
    /// Log in to the configured Proxmox VE API and build the session.
    ///
    /// Authentication failures are returned as-is; nothing is retried.
    pub async fn configure(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = ProxmoxClient::new(config)?;

        client.login().await.map_err(|source| {
            error!(
                api_url = %config.api_url,
                user = %config.user,
                error = %source,
                "Authentication failed"
            );
            ProviderError::Authentication {
                url: config.api_url.clone(),
                source,
            }
        })?;

        info!(
            api_url = %config.api_url,
            user = %config.user,
            parallel = config.parallel.get(),
            tls_insecure = config.tls_insecure,
            "Session configured"
        );

        Ok(Self::new(Arc::new(client), config.parallel))
    }

    /// Build a session around an already authenticated API handle.
    pub fn new(api: Arc<dyn HypervisorApi>, max_concurrent: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                allocator: IdAllocator::new(Arc::clone(&api)),
                gate: AdmissionGate::new(max_concurrent),
                api,
            }),
        }
    }

    /// Hypervisor API handle.
    pub fn api(&self) -> &Arc<dyn HypervisorApi> {
        &self.inner.api
    }

    /// Admission gate for long-running operations.
    pub fn gate(&self) -> &AdmissionGate {
        &self.inner.gate
    }

    /// VM id allocator.
    pub fn allocator(&self) -> &IdAllocator {
        &self.inner.allocator
    }

    /// Shorthand for `gate().acquire()`.
    pub async fn acquire(&self) -> AdmissionPermit {
        self.inner.gate.acquire().await
    }

    /// Shorthand for `allocator().next_id()`.
    pub async fn next_id(&self) -> Result<VmId, ProviderError> {
        self.inner.allocator.next_id().await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("gate", &self.inner.gate)
            .finish_non_exhaustive()
    }
}
