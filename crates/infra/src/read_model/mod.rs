//! Tenant-isolated read model storage and paging.

pub mod paging;
pub mod tenant_store;

pub use paging::{MAX_PAGE_SIZE, Page, PageRequest};
pub use tenant_store::{InMemoryTenantStore, TenantStore};
