use repairdesk_core::TenantId;

use crate::{EventEnvelope, StreamKey};

/// Messages that belong to exactly one tenant.
///
/// Lets workers pinned to a tenant drop foreign messages before handling them.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;
}

impl<E> TenantScoped for EventEnvelope<E> {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id()
    }
}

impl TenantScoped for StreamKey {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
