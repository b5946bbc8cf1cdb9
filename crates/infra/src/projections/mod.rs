//! Projection implementations (read model builders).
//!
//! Projections consume published envelopes and build query-optimized read
//! models. They are rebuildable from the event store, tenant-isolated, and
//! idempotent under at-least-once delivery.

pub mod device_catalog;

pub use device_catalog::{
    CatalogProjectionError, CatalogStats, DeviceCatalogProjection, DeviceSearch, DeviceSortField,
    SortDirection,
};
