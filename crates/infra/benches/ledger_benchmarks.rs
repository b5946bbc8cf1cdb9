use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use repairdesk_core::{AggregateId, Money, TenantId, UserId};
use repairdesk_events::{EventEnvelope, InMemoryEventBus};
use repairdesk_infra::command_dispatcher::CommandDispatcher;
use repairdesk_infra::event_store::InMemoryEventStore;
use repairdesk_infra::projections::{DeviceCatalogProjection, DeviceSearch, DeviceSortField, SortDirection};
use repairdesk_infra::read_model::{InMemoryTenantStore, PageRequest};
use repairdesk_infra::services::InventoryLedger;
use repairdesk_inventory::{
    ChangeDeviceStatus, DeviceCondition, DeviceDetails, DeviceStatus, DeviceType, DeviceUnit,
    DeviceUnitId, Imei, RegisterDevice,
};
use rust_decimal::Decimal;
use std::sync::Arc;

type Bus = Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>;
type Dispatcher = CommandDispatcher<InMemoryEventStore, Bus>;

fn setup() -> (Arc<Dispatcher>, InventoryLedger<InMemoryEventStore, Bus>) {
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let dispatcher = Arc::new(CommandDispatcher::new(InMemoryEventStore::new(), bus));
    (dispatcher.clone(), InventoryLedger::new(dispatcher))
}

fn ledger() -> InventoryLedger<InMemoryEventStore, Bus> {
    setup().1
}

fn register_cmd(tenant_id: TenantId, n: u64) -> RegisterDevice {
    let brands = ["Apple", "Samsung", "Xiaomi", "Oppo"];
    RegisterDevice {
        tenant_id,
        unit_id: DeviceUnitId::new(AggregateId::new()),
        imei: Imei::parse(&format!("{n:015}")).expect("15 digits"),
        details: DeviceDetails {
            code: format!("DEV-{n:05}"),
            device_type: if n % 3 == 0 { DeviceType::Tablet } else { DeviceType::Smartphone },
            brand: brands[(n % 4) as usize].to_string(),
            model: format!("Model {}", n % 17),
            esn: None,
            serial_number: None,
            color: None,
            condition: DeviceCondition::Used,
            is_courtesy_device: n % 5 == 0,
            supplier_id: None,
            purchase_price: Some(Money::new(Decimal::new(10_000 + (n as i64 % 500) * 100, 2))),
            selling_price: Some(Money::new(Decimal::new(15_000 + (n as i64 % 500) * 100, 2))),
            notes: None,
        },
        initial_status: None,
        location: None,
        reference: None,
        actor: UserId::new(),
        occurred_at: Utc::now(),
    }
}

fn toggle(tenant_id: TenantId, unit_id: DeviceUnitId, i: usize) -> ChangeDeviceStatus {
    ChangeDeviceStatus {
        tenant_id,
        unit_id,
        target: if i % 2 == 0 { DeviceStatus::Unavailable } else { DeviceStatus::Available },
        notes: None,
        actor: UserId::new(),
        occurred_at: Utc::now(),
    }
}

fn bench_ledger_operation_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_operation_latency");
    group.sample_size(500);

    group.bench_function("register_with_imei_claim", |b| {
        let ledger = ledger();
        let tenant_id = TenantId::new();
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            black_box(ledger.register(register_cmd(tenant_id, n)).expect("register"));
        });
    });

    group.bench_function("status_change_with_history", |b| {
        let ledger = ledger();
        let tenant_id = TenantId::new();
        let unit_id = ledger.register(register_cmd(tenant_id, 1)).expect("register").unit.unit_id;
        for i in 0..100 {
            ledger.change_status(toggle(tenant_id, unit_id, i)).expect("warm-up");
        }
        let mut i = 100;
        b.iter(|| {
            black_box(ledger.change_status(toggle(tenant_id, unit_id, i)).expect("change"));
            i += 1;
        });
    });

    group.finish();
}

fn bench_movement_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("movement_history");

    for movements in [10usize, 100, 1000] {
        let ledger = ledger();
        let tenant_id = TenantId::new();
        let unit_id = ledger.register(register_cmd(tenant_id, 1)).expect("register").unit.unit_id;
        for i in 1..movements {
            ledger.change_status(toggle(tenant_id, unit_id, i - 1)).expect("change");
        }

        group.throughput(Throughput::Elements(movements as u64));
        group.bench_with_input(BenchmarkId::from_parameter(movements), &movements, |b, _| {
            b.iter(|| black_box(ledger.movement_history(tenant_id, unit_id).expect("history")));
        });
    }

    group.finish();
}

fn bench_catalog(c: &mut Criterion) {
    let mut group = c.benchmark_group("device_catalog");

    for units in [100u64, 1000, 5000] {
        let (dispatcher, ledger) = setup();
        let tenant_id = TenantId::new();
        for n in 1..=units {
            ledger.register(register_cmd(tenant_id, n)).expect("register");
        }

        let catalog = DeviceCatalogProjection::<InMemoryTenantStore<DeviceUnitId, DeviceUnit>>::new(InMemoryTenantStore::new());
        group.throughput(Throughput::Elements(units));
        group.bench_with_input(BenchmarkId::new("rebuild", units), &units, |b, _| {
            b.iter(|| black_box(catalog.rebuild_tenant(dispatcher.store(), tenant_id).expect("rebuild")));
        });

        let query = DeviceSearch {
            brand: Some("samsung".to_string()),
            text: Some("model 1".to_string()),
            sort_by: DeviceSortField::Code,
            direction: SortDirection::Asc,
            ..DeviceSearch::default()
        };
        group.bench_with_input(BenchmarkId::new("search", units), &units, |b, _| {
            b.iter(|| black_box(catalog.search(tenant_id, &query, PageRequest::first(20))));
        });
        group.bench_with_input(BenchmarkId::new("stats", units), &units, |b, _| {
            b.iter(|| black_box(catalog.stats(tenant_id)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ledger_operation_latency,
    bench_movement_history,
    bench_catalog
);
criterion_main!(benches);
