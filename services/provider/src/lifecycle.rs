//! QEMU guest lifecycle driven through the session.
//!
//! Every mutating call (create, update, delete) runs under the admission
//! gate. Reads do not. Creating without an explicit id allocates one first,
//! outside the gate.

use pxp_id::{Locator, VmId};
use tracing::{info, Instrument};

use crate::error::ProviderError;
use crate::hypervisor::{VmConfig, VmSpec};
use crate::session::Session;

/// Drives QEMU guest operations for one session.
#[derive(Debug, Clone)]
pub struct VmLifecycle {
    session: Session,
}

impl VmLifecycle {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Parse a persisted locator and check it names a QEMU guest.
    pub fn parse_locator(s: &str) -> Result<Locator, ProviderError> {
        let locator = Locator::decode(s)?;
        ensure_qemu(&locator)?;
        Ok(locator)
    }

    /// Create a guest on `node` and return its locator.
    ///
    /// A caller-supplied id must be in the hypervisor's guest range; it is
    /// rejected before any remote call.
    pub async fn create(
        &self,
        node: &str,
        id: Option<VmId>,
        spec: &VmSpec,
    ) -> Result<Locator, ProviderError> {
        let id = match id {
            Some(id) if !id.is_guest_range() => {
                return Err(ProviderError::InvalidVmId { id });
            }
            Some(id) => id,
            None => self.session.next_id().await?,
        };

        let span = tracing::info_span!("vm.create", node = node, vm_id = %id);
        self.session
            .gate()
            .run(self.session.api().create_vm(node, id, spec))
            .instrument(span)
            .await?;

        let locator = Locator::qemu(node, id);
        info!(locator = %locator, "VM created");
        Ok(locator)
    }

    /// Read a guest's current configuration.
    pub async fn read(&self, locator: &Locator) -> Result<VmConfig, ProviderError> {
        ensure_qemu(locator)?;
        Ok(self
            .session
            .api()
            .read_vm(locator.node(), locator.id())
            .await?)
    }

    /// Apply configuration changes to a guest.
    pub async fn update(&self, locator: &Locator, spec: &VmSpec) -> Result<(), ProviderError> {
        ensure_qemu(locator)?;

        let span = tracing::info_span!("vm.update", locator = %locator);
        self.session
            .gate()
            .run(self.session.api().update_vm(locator.node(), locator.id(), spec))
            .instrument(span)
            .await?;

        info!(locator = %locator, "VM updated");
        Ok(())
    }

    /// Destroy a guest.
    pub async fn delete(&self, locator: &Locator) -> Result<(), ProviderError> {
        ensure_qemu(locator)?;

        let span = tracing::info_span!("vm.delete", locator = %locator);
        self.session
            .gate()
            .run(self.session.api().delete_vm(locator.node(), locator.id()))
            .instrument(span)
            .await?;

        info!(locator = %locator, "VM deleted");
        Ok(())
    }
}

fn ensure_qemu(locator: &Locator) -> Result<(), ProviderError> {
    if locator.kind() == Locator::QEMU_KIND {
        Ok(())
    } else {
        Err(ProviderError::UnsupportedKind {
            kind: locator.kind().to_string(),
        })
    }
}
