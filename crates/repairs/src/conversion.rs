//! Booking → repair conversion planning.
//!
//! `plan_conversion` is pure: it checks the booking's preconditions and returns
//! the two commands that the infrastructure must persist in one unit of work
//! (open the repair on a fresh stream, mark the booking converted).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use repairdesk_core::error::ensure_max_len;
use repairdesk_core::{DomainError, DomainResult, Money, TenantId, UserId};

use crate::booking::{Booking, BookingId, MarkBookingConverted};
use crate::repair::{OpenRepair, Repair, RepairId, RepairStatus, TEXT_MAX};

/// Optional fields the counter clerk may add while converting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOverrides {
    /// Appended to the booking notes on a new line.
    pub notes: Option<String>,
    pub unlock_code: Option<String>,
    pub courtesy_phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionPlan {
    pub open_repair: OpenRepair,
    pub mark_converted: MarkBookingConverted,
}

/// What callers display after a conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairSummary {
    pub repair_id: RepairId,
    pub repair_code: String,
    pub booking_id: BookingId,
    pub brand: String,
    pub model: String,
    pub status: RepairStatus,
    pub estimated_price: Option<Money>,
    pub message: String,
}

impl RepairSummary {
    /// Summary of a repair opened from `booking_id`; `None` if the repair was never opened.
    pub fn of(repair: &Repair, booking_id: BookingId) -> Option<Self> {
        let intake = repair.intake()?;
        Some(Self {
            repair_id: repair.id_typed(),
            repair_code: intake.code.clone(),
            booking_id,
            brand: intake.device.brand.clone(),
            model: intake.device.model.clone(),
            status: repair.status(),
            estimated_price: intake.estimated_price,
            message: format!("booking converted into repair {}", intake.code),
        })
    }
}

/// Human repair code: `REP-YYYYMMDD-XXXXXX`, the suffix taken from the repair id.
pub fn repair_code(opened_at: DateTime<Utc>, repair_id: RepairId) -> String {
    let hex = repair_id.0.as_uuid().simple().to_string();
    let suffix = &hex[hex.len() - 6..];
    format!(
        "REP-{}-{}",
        opened_at.format("%Y%m%d"),
        suffix.to_ascii_uppercase()
    )
}

fn merge_notes(booking: Option<&str>, extra: Option<&str>) -> Option<String> {
    match (booking, extra.map(str::trim).filter(|s| !s.is_empty())) {
        (Some(b), Some(e)) => Some(format!("{b}\n{e}")),
        (Some(b), None) => Some(b.to_string()),
        (None, Some(e)) => Some(e.to_string()),
        (None, None) => None,
    }
}

/// Decide the conversion of `booking` into a new repair `repair_id`.
///
/// Fails with `NotFound` (missing/deleted), `AlreadyConverted` (carrying the
/// existing repair id) or `InvalidStateTransition` (cancelled).
pub fn plan_conversion(
    booking: &Booking,
    tenant_id: TenantId,
    booking_id: BookingId,
    repair_id: RepairId,
    overrides: &ConversionOverrides,
    actor: UserId,
    now: DateTime<Utc>,
) -> DomainResult<ConversionPlan> {
    booking.ensure_open(tenant_id, booking_id, "converted")?;
    if let Some(notes) = &overrides.notes {
        ensure_max_len("notes", notes, TEXT_MAX)?;
    }

    let (Some(customer), Some(device)) = (booking.customer(), booking.device()) else {
        return Err(DomainError::invariant("scheduled booking without intake data"));
    };

    let open_repair = OpenRepair {
        tenant_id,
        repair_id,
        code: repair_code(now, repair_id),
        source_booking: Some(booking_id),
        customer: customer.clone(),
        device: device.clone(),
        fault_description: booking.problem_description().to_string(),
        estimated_price: booking.estimated_price(),
        technician: booking.technician().map(str::to_string),
        notes: merge_notes(booking.notes(), overrides.notes.as_deref()),
        unlock_code: overrides.unlock_code.clone(),
        courtesy_phone: overrides.courtesy_phone.clone(),
        actor,
        occurred_at: now,
    };

    let mark_converted = MarkBookingConverted {
        tenant_id,
        booking_id,
        repair_id,
        actor,
        occurred_at: now,
    };

    Ok(ConversionPlan {
        open_repair,
        mark_converted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::tests::{scheduled, scheduled_with_notes};
    use crate::booking::{BookingCommand, CancelBooking};
    use crate::repair::RepairCommand;
    use chrono::TimeZone;
    use repairdesk_core::{Aggregate, AggregateId};
    use rust_decimal::Decimal;

    #[test]
    fn plan_carries_price_exactly_and_merges_notes() {
        let tenant_id = TenantId::new();
        let booking = scheduled(tenant_id);
        let repair_id = RepairId::new(AggregateId::new());
        let overrides = ConversionOverrides {
            notes: Some("left charger".to_string()),
            unlock_code: Some("1234".to_string()),
            courtesy_phone: None,
        };

        let plan = plan_conversion(
            &booking,
            tenant_id,
            booking.id_typed(),
            repair_id,
            &overrides,
            UserId::new(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(
            plan.open_repair.estimated_price,
            Some(Money::new(Decimal::new(15000, 2)))
        );
        assert_eq!(
            plan.open_repair.notes.as_deref(),
            Some("customer prefers mornings\nleft charger")
        );
        assert_eq!(plan.open_repair.source_booking, Some(booking.id_typed()));
        assert_eq!(plan.mark_converted.repair_id, repair_id);

        let mut repair = Repair::empty(repair_id);
        let events = repair
            .handle(&RepairCommand::OpenRepair(plan.open_repair))
            .unwrap();
        repair.apply(&events[0]);
        let summary = RepairSummary::of(&repair, booking.id_typed()).unwrap();
        assert_eq!(summary.brand, "Samsung");
        assert_eq!(summary.status, RepairStatus::Received);
        assert_eq!(summary.estimated_price.unwrap().to_string(), "150.00");
    }

    #[test]
    fn full_booking_notes_still_fit_after_a_clerk_note() {
        let tenant_id = TenantId::new();
        let booking = scheduled_with_notes(tenant_id, &"n".repeat(1000));

        let repair_id = RepairId::new(AggregateId::new());
        let overrides = ConversionOverrides {
            notes: Some("charger".to_string()),
            ..ConversionOverrides::default()
        };
        let plan = plan_conversion(&booking, tenant_id, booking.id_typed(), repair_id, &overrides, UserId::new(), Utc::now())
            .unwrap();
        assert_eq!(plan.open_repair.notes.as_ref().map(|n| n.chars().count()), Some(1008));
        assert!(Repair::empty(repair_id).handle(&RepairCommand::OpenRepair(plan.open_repair)).is_ok());

        let too_long = ConversionOverrides {
            notes: Some("x".repeat(1001)),
            ..ConversionOverrides::default()
        };
        assert!(matches!(
            plan_conversion(&booking, tenant_id, booking.id_typed(), repair_id, &too_long, UserId::new(), Utc::now()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn cancelled_booking_cannot_be_converted() {
        let tenant_id = TenantId::new();
        let mut booking = scheduled(tenant_id);
        let events = booking
            .handle(&BookingCommand::CancelBooking(CancelBooking {
                tenant_id,
                booking_id: booking.id_typed(),
                reason: None,
                actor: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        booking.apply(&events[0]);

        let result = plan_conversion(
            &booking,
            tenant_id,
            booking.id_typed(),
            RepairId::new(AggregateId::new()),
            &ConversionOverrides::default(),
            UserId::new(),
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(DomainError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn missing_booking_is_not_found() {
        let booking_id = BookingId::new(AggregateId::new());
        let booking = Booking::empty(booking_id);
        let result = plan_conversion(
            &booking,
            TenantId::new(),
            booking_id,
            RepairId::new(AggregateId::new()),
            &ConversionOverrides::default(),
            UserId::new(),
            Utc::now(),
        );
        assert_eq!(result, Err(DomainError::NotFound));
    }

    #[test]
    fn repair_code_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap();
        let code = repair_code(at, RepairId::new(AggregateId::new()));
        assert!(code.starts_with("REP-20240309-"));
        assert_eq!(code.len(), "REP-20240309-".len() + 6);
    }
}
