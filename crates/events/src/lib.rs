//! Domain events, envelopes and the pub/sub bus.
//!
//! Domain crates implement [`Event`] for their event enums; infrastructure wraps
//! committed events in tenant-scoped [`EventEnvelope`]s and fans them out over an
//! [`EventBus`].

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use envelope::{EventEnvelope, StreamKey};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use tenant::TenantScoped;
