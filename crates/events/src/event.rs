use chrono::{DateTime, Utc};
use repairdesk_core::UserId;

/// A domain event: an immutable, append-only fact.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "inventory.device.moved").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Who caused the event.
    fn actor(&self) -> UserId;
}
