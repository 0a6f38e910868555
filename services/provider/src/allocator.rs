//! VM id allocation.
//!
//! The hypervisor only answers "which id at or above X is free right now"; it
//! does not reserve the answer. Two callers asking with the same floor would
//! get the same id. The allocator therefore serializes the query and keeps a
//! watermark of the last id it handed out, always asking with a floor above
//! it. Ids from one process are strictly increasing.
//!
//! Allocation does not go through the admission gate; it is a short metadata
//! query.

use std::sync::Arc;

use pxp_id::VmId;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::hypervisor::HypervisorApi;

/// Serialized, monotonic VM id allocator.
pub struct IdAllocator {
    api: Arc<dyn HypervisorApi>,
    /// Last id handed out; `None` until the first successful allocation.
    last_allocated: Mutex<Option<VmId>>,
}

impl IdAllocator {
    pub fn new(api: Arc<dyn HypervisorApi>) -> Self {
        Self {
            api,
            last_allocated: Mutex::new(None),
        }
    }

    /// Allocate the next VM id.
    ///
    /// The remote query runs while the watermark lock is held. On any error
    /// the watermark is left as it was, so a later call asks with the same
    /// floor. Nothing is retried here.
    pub async fn next_id(&self) -> Result<VmId, ProviderError> {
        let mut last_allocated = self.last_allocated.lock().await;

        let floor = match *last_allocated {
            None => 0,
            Some(last) => last
                .next()
                .ok_or(ProviderError::AllocationExhausted { last })?
                .value(),
        };

        let id = self.api.next_free_id(floor).await.map_err(|source| {
            warn!(floor, error = %source, "VM id query failed");
            ProviderError::Allocation { floor, source }
        })?;

        if id.value() < floor {
            warn!(floor, returned = %id, "Hypervisor returned VM id below floor");
            return Err(ProviderError::AllocationBelowFloor {
                floor,
                returned: id,
            });
        }

        *last_allocated = Some(id);
        debug!(floor, vm_id = %id, "Allocated VM id");
        Ok(id)
    }

    /// Last id handed out, if any.
    pub async fn last_allocated(&self) -> Option<VmId> {
        *self.last_allocated.lock().await
    }
}
