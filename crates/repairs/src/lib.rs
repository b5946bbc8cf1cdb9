//! Bookings, repair tickets and the one-way conversion between them.
//!
//! Pure domain logic; the unit of work that persists a conversion lives in infra.

pub mod booking;
pub mod conversion;
pub mod intake;
pub mod repair;

pub use booking::{
    Booking, BookingCancelled, BookingCommand, BookingConfirmed, BookingConverted,
    BookingDeleted, BookingEvent, BookingId, BookingRescheduled, BookingScheduled, BookingStatus,
    CancelBooking, ConfirmBooking, Conversion, DeleteBooking, MarkBookingConverted,
    RescheduleBooking, ScheduleBooking,
};
pub use conversion::{ConversionOverrides, ConversionPlan, RepairSummary, plan_conversion, repair_code};
pub use intake::{CustomerRef, DeviceDescription};
pub use repair::{
    ChangeRepairStatus, OpenRepair, Repair, RepairCommand, RepairEvent, RepairId, RepairOpened,
    RepairStatus, RepairStatusChanged,
};
