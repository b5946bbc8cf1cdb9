//! Application services: the tenant-scoped entry points callers use.
//!
//! Each service owns a shared [`CommandDispatcher`](crate::command_dispatcher::CommandDispatcher)
//! and turns requests into commands, unit-of-work appends and typed results.

pub mod bookings;
pub mod ledger;
pub mod parties;

pub use bookings::BookingDesk;
pub use ledger::{InventoryLedger, MovementRecorded};
pub use parties::PartyDirectory;

use crate::command_dispatcher::DispatchError;

/// On create, an id that resolves to a stream of another type is taken.
pub(crate) fn id_in_use(err: DispatchError) -> DispatchError {
    match err {
        DispatchError::NotFound => {
            DispatchError::Conflict("id is already used by another record".to_string())
        }
        other => other,
    }
}
