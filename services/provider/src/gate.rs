//! Admission gate bounding concurrent long-running hypervisor operations.
//!
//! A thin wrapper around a [`Semaphore`] holding one permit per slot. Acquiring
//! suspends the calling task only, never the worker thread, and the owned
//! permit returns its slot when dropped.
//!
//! Tokio's semaphore hands out permits in arrival order, but callers should
//! not depend on any particular admission order.
//!
//! There is no timeout or cancellation here. Callers that need one wrap
//! `acquire` in `tokio::time::timeout`; dropping a pending `acquire` is safe.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

/// Bounded-concurrency throttle shared by all resource operations.
///
/// Cloning is cheap; clones share the same capacity.
#[derive(Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl AdmissionGate {
    /// Create a gate admitting at most `max_concurrent` operations at once.
    ///
    /// Ceilings above [`Semaphore::MAX_PERMITS`] are clamped to it.
    pub fn new(max_concurrent: NonZeroUsize) -> Self {
        let max_concurrent = max_concurrent.get().min(Semaphore::MAX_PERMITS);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Configured ceiling.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Operations currently admitted.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.available()
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait until a slot is free and take it.
    ///
    /// The slot is returned when the permit is dropped or released, on every
    /// exit path of the guarded work.
    pub async fn acquire(&self) -> AdmissionPermit {
        if let Some(permit) = self.try_acquire() {
            return permit;
        }

        trace!(max_concurrent = self.max_concurrent, "Admission gate full, waiting");
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("admission semaphore is never closed");
        self.admitted(permit)
    }

    /// Take a slot if one is free, without waiting.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(self.admitted(permit))
    }

    /// Run `work` while holding a slot.
    ///
    /// The slot is released when `work` completes, fails, panics, or is
    /// cancelled.
    pub async fn run<F>(&self, work: F) -> F::Output
    where
        F: Future,
    {
        let _permit = self.acquire().await;
        work.await
    }

    fn admitted(&self, permit: OwnedSemaphorePermit) -> AdmissionPermit {
        debug!(
            in_flight = self.in_flight(),
            max_concurrent = self.max_concurrent,
            "Admitted operation"
        );
        AdmissionPermit { _permit: permit }
    }
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("max_concurrent", &self.max_concurrent)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// One admitted slot. Dropping it releases the slot and wakes a waiter.
///
/// Leaking a permit (`std::mem::forget`) loses that slot for the life of the
/// gate. That is a caller bug; the gate does not try to recover it.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionPermit {
    /// Release the slot now.
    pub fn release(self) {
        trace!("Released operation");
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit").finish()
    }
}
