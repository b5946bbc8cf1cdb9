use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::info;

use repairdesk_core::{AggregateId, Money, TenantId, UserId};
use repairdesk_events::{EventEnvelope, InMemoryEventBus};
use repairdesk_infra::command_dispatcher::CommandDispatcher;
use repairdesk_infra::config::{AppConfig, StoreKind};
use repairdesk_infra::event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use repairdesk_infra::projections::{DeviceCatalogProjection, DeviceSearch};
use repairdesk_infra::read_model::{InMemoryTenantStore, PageRequest};
use repairdesk_infra::services::{BookingDesk, InventoryLedger, PartyDirectory};
use repairdesk_infra::workers::ProjectionWorker;
use repairdesk_inventory::{
    DeviceCondition, DeviceDetails, DeviceStatus, DeviceType, DeviceUnit, DeviceUnitId, Imei,
    LoanDevice, RegisterDevice, ReturnDevice,
};
use repairdesk_parties::{PartyId, PartyKind, RegisterParty};
use repairdesk_repairs::{
    BookingId, ConversionOverrides, CustomerRef, DeviceDescription, ScheduleBooking,
};

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Catalog = DeviceCatalogProjection<InMemoryTenantStore<DeviceUnitId, DeviceUnit>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    repairdesk_observability::init();

    let config = AppConfig::from_env().context("loading configuration")?;
    info!(store = ?config.store, retries = config.max_conflict_retries, "starting repairdesk");

    match config.store {
        StoreKind::Memory => run(InMemoryEventStore::new(), &config),
        StoreKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL missing")?;
            let pool = sqlx::PgPool::connect(url)
                .await
                .context("connecting to postgres")?;
            let store = PostgresEventStore::new(pool);
            store.migrate().await.context("running migrations")?;
            run(store, &config)
        }
    }
}

/// Wire the services over `store` and walk through a loan and a booking conversion.
fn run<S>(store: S, config: &AppConfig) -> anyhow::Result<()>
where
    S: EventStore + 'static,
{
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let dispatcher = Arc::new(
        CommandDispatcher::new(store, bus.clone()).with_max_conflict_retries(config.max_conflict_retries),
    );
    let ledger = InventoryLedger::new(dispatcher.clone());
    let desk = BookingDesk::new(dispatcher.clone());
    let parties = PartyDirectory::new(dispatcher.clone());

    let catalog = Arc::new(Catalog::new(InMemoryTenantStore::new()));
    let projection = catalog.clone();
    let worker = ProjectionWorker::spawn("device-catalog", &bus, None, move |env: EventEnvelope<JsonValue>| {
        projection.apply_envelope(&env)
    })
    .context("spawning projection worker")?;

    let tenant_id = TenantId::new();
    let actor = UserId::new();

    let customer_id = PartyId::new(AggregateId::new());
    parties.register(RegisterParty {
        tenant_id,
        party_id: customer_id,
        kind: PartyKind::Customer,
        name: "Giulia Verdi".to_string(),
        contact: None,
        actor,
        occurred_at: Utc::now(),
    })?;

    let unit_id = DeviceUnitId::new(AggregateId::new());
    ledger.register(RegisterDevice {
        tenant_id,
        unit_id,
        imei: Imei::parse("123456789012345")?,
        details: DeviceDetails {
            code: "DEV-001".to_string(),
            device_type: DeviceType::Smartphone,
            brand: "Apple".to_string(),
            model: "iPhone 11".to_string(),
            esn: None,
            serial_number: None,
            color: Some("black".to_string()),
            condition: DeviceCondition::Used,
            is_courtesy_device: true,
            supplier_id: None,
            purchase_price: Some(Money::new(Decimal::new(18000, 2))),
            selling_price: Some(Money::new(Decimal::new(25000, 2))),
            notes: None,
        },
        initial_status: None,
        location: None,
        reference: None,
        actor,
        occurred_at: Utc::now(),
    })?;
    ledger.loan(LoanDevice {
        tenant_id,
        unit_id,
        customer_id,
        reference: None,
        notes: Some("courtesy phone during repair".to_string()),
        actor,
        occurred_at: Utc::now(),
    })?;
    ledger.return_device(ReturnDevice {
        tenant_id,
        unit_id,
        return_status: DeviceStatus::Available,
        reference: None,
        notes: None,
        actor,
        occurred_at: Utc::now(),
    })?;

    for m in ledger.movement_history(tenant_id, unit_id)? {
        info!(
            sequence = m.sequence,
            movement = m.movement_type.as_str(),
            from = ?m.from_status,
            to = %m.to_status,
            "movement"
        );
    }

    let booking_id = BookingId::new(AggregateId::new());
    desk.schedule(ScheduleBooking {
        tenant_id,
        booking_id,
        code: "B1".to_string(),
        customer: CustomerRef::Registered { customer_id },
        device: DeviceDescription {
            device_type: DeviceType::Smartphone,
            brand: "Samsung".to_string(),
            model: "Galaxy S21".to_string(),
            imei: None,
            serial_number: None,
            color: None,
        },
        scheduled_at: Utc::now(),
        technician: None,
        problem_description: "display flickers".to_string(),
        estimated_price: Some(Money::new(Decimal::new(15000, 2))),
        notes: None,
        actor,
        occurred_at: Utc::now(),
    })?;
    let summary = desk.convert_booking(tenant_id, booking_id, &ConversionOverrides::default(), actor)?;
    info!(repair_code = %summary.repair_code, message = %summary.message, "conversion done");

    std::thread::sleep(Duration::from_millis(50));
    let page = catalog.search(tenant_id, &DeviceSearch::default(), PageRequest::first(config.default_page_size));
    let stats = catalog.stats(tenant_id);
    info!(
        listed = page.items.len(),
        units = stats.total_units,
        potential_profit = %stats.potential_profit(),
        "catalog"
    );

    worker.shutdown();
    Ok(())
}
