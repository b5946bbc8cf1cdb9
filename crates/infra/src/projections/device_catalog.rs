use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use repairdesk_core::{Aggregate, AggregateId, Money, TenantId};
use repairdesk_events::EventEnvelope;
use repairdesk_inventory::{
    DeviceCondition, DeviceEvent, DeviceStatus, DeviceType, DeviceUnit, DeviceUnitId, DeviceView,
};
use repairdesk_parties::PartyId;

use crate::event_store::{EventStore, EventStoreError};
use crate::read_model::{Page, PageRequest, TenantStore};

/// Tenant+aggregate cursor to support at-least-once delivery (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum CatalogProjectionError {
    #[error("failed to deserialize device event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("projection state lock poisoned")]
    Poisoned,

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSortField {
    Code,
    Brand,
    Model,
    Status,
    #[default]
    CreatedAt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Catalog query. Every filter is optional; absent filters match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSearch {
    pub device_type: Option<DeviceType>,
    /// Case-insensitive exact brand.
    pub brand: Option<String>,
    pub condition: Option<DeviceCondition>,
    pub status: Option<DeviceStatus>,
    pub supplier_id: Option<PartyId>,
    pub min_purchase_price: Option<Money>,
    pub max_purchase_price: Option<Money>,
    /// Case-insensitive substring over code, brand, model and IMEI.
    pub text: Option<String>,
    pub is_courtesy_device: Option<bool>,
    pub sort_by: DeviceSortField,
    pub direction: SortDirection,
}

impl DeviceSearch {
    fn matches(&self, view: &DeviceView) -> bool {
        let d = &view.details;
        if self.device_type.is_some_and(|t| t != d.device_type)
            || self.condition.is_some_and(|c| c != d.condition)
            || self.status.is_some_and(|s| s != view.status)
            || self.is_courtesy_device.is_some_and(|c| c != d.is_courtesy_device)
        {
            return false;
        }
        if self.supplier_id.is_some() && self.supplier_id != d.supplier_id {
            return false;
        }
        if let Some(brand) = &self.brand {
            if !d.brand.eq_ignore_ascii_case(brand.trim()) {
                return false;
            }
        }
        if self.min_purchase_price.is_some() || self.max_purchase_price.is_some() {
            let Some(price) = d.purchase_price else {
                return false;
            };
            if self.min_purchase_price.is_some_and(|min| price < min)
                || self.max_purchase_price.is_some_and(|max| price > max)
            {
                return false;
            }
        }
        if let Some(text) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let needle = text.to_lowercase();
            let hit = [d.code.as_str(), d.brand.as_str(), d.model.as_str(), view.imei.as_str()]
                .iter()
                .any(|hay| hay.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }

    fn compare(&self, a: &DeviceView, b: &DeviceView) -> Ordering {
        let primary = match self.sort_by {
            DeviceSortField::Code => a.details.code.cmp(&b.details.code),
            DeviceSortField::Brand => a
                .details
                .brand
                .to_lowercase()
                .cmp(&b.details.brand.to_lowercase()),
            DeviceSortField::Model => a
                .details
                .model
                .to_lowercase()
                .cmp(&b.details.model.to_lowercase()),
            DeviceSortField::Status => a.status.cmp(&b.status),
            DeviceSortField::CreatedAt => a.created_at.cmp(&b.created_at),
        };
        let ordered = primary.then_with(|| a.unit_id.0.as_uuid().cmp(b.unit_id.0.as_uuid()));
        match self.direction {
            SortDirection::Asc => ordered,
            SortDirection::Desc => ordered.reverse(),
        }
    }
}

/// Aggregate figures over the non-deleted units of a tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub total_units: usize,
    pub by_status: BTreeMap<DeviceStatus, usize>,
    pub by_condition: BTreeMap<DeviceCondition, usize>,
    pub by_type: BTreeMap<DeviceType, usize>,
    pub total_purchase_value: Money,
    pub total_selling_value: Money,
}

impl CatalogStats {
    pub fn potential_profit(&self) -> Money {
        self.total_selling_value - self.total_purchase_value
    }

    pub fn count(&self, status: DeviceStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Device catalog projection: one rehydrated `DeviceUnit` per stream.
///
/// Consumes published envelopes and ignores streams of other aggregate types.
/// Read models are disposable and rebuildable from the event store.
#[derive(Debug)]
pub struct DeviceCatalogProjection<S>
where
    S: TenantStore<DeviceUnitId, DeviceUnit>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> DeviceCatalogProjection<S>
where
    S: TenantStore<DeviceUnitId, DeviceUnit>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Current view of one unit, deleted units included.
    pub fn get(&self, tenant_id: TenantId, unit_id: DeviceUnitId) -> Option<DeviceView> {
        self.store.get(tenant_id, &unit_id).and_then(|u| u.view())
    }

    fn active_views(&self, tenant_id: TenantId) -> impl Iterator<Item = DeviceView> {
        self.store
            .list(tenant_id)
            .into_iter()
            .filter(DeviceUnit::exists)
            .filter_map(|u| u.view())
    }

    /// Filter, sort and page the tenant's non-deleted units.
    pub fn search(&self, tenant_id: TenantId, query: &DeviceSearch, page: PageRequest) -> Page<DeviceView> {
        let mut hits: Vec<DeviceView> = self
            .active_views(tenant_id)
            .filter(|v| query.matches(v))
            .collect();
        hits.sort_by(|a, b| query.compare(a, b));
        page.slice(hits)
    }

    pub fn stats(&self, tenant_id: TenantId) -> CatalogStats {
        let mut stats = CatalogStats::default();
        for view in self.active_views(tenant_id) {
            stats.total_units += 1;
            *stats.by_status.entry(view.status).or_default() += 1;
            *stats.by_condition.entry(view.details.condition).or_default() += 1;
            *stats.by_type.entry(view.details.device_type).or_default() += 1;
            if let Some(p) = view.details.purchase_price {
                stats.total_purchase_value = stats.total_purchase_value + p;
            }
            if let Some(p) = view.details.selling_price {
                stats.total_selling_value = stats.total_selling_value + p;
            }
        }
        stats
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Enforces tenant isolation
    /// - Enforces monotonic sequence per (tenant, aggregate) stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), CatalogProjectionError> {
        if !envelope.is_from(DeviceUnit::AGGREGATE_TYPE) {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = self.cursors.write().map_err(|_| CatalogProjectionError::Poisoned)?;
        let key = CursorKey {
            tenant_id,
            aggregate_id,
        };
        let last = cursors.get(&key).copied().unwrap_or(0);

        if seq == 0 {
            return Err(CatalogProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            debug!(%aggregate_id, seq, event_type = envelope.event_type(), "ignoring already-projected device event");
            return Ok(());
        }
        if seq != last + 1 {
            return Err(CatalogProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: DeviceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| CatalogProjectionError::Deserialize(e.to_string()))?;

        if event.tenant_id() != tenant_id {
            return Err(CatalogProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        let unit_id = event.unit_id();
        if unit_id.0 != aggregate_id {
            return Err(CatalogProjectionError::TenantIsolation(
                "event unit_id does not match envelope aggregate_id".to_string(),
            ));
        }

        self.store.modify(tenant_id, unit_id, &mut |current| {
            let mut unit = current.unwrap_or_else(|| DeviceUnit::empty(unit_id));
            unit.apply(&event);
            Some(unit)
        });

        cursors.insert(key, seq);
        Ok(())
    }

    /// Drop the tenant's catalog and replay it from the event store.
    pub fn rebuild_tenant<E: EventStore + ?Sized>(
        &self,
        events: &E,
        tenant_id: TenantId,
    ) -> Result<usize, CatalogProjectionError> {
        let stored = events.load_by_type(tenant_id, DeviceUnit::AGGREGATE_TYPE)?;

        {
            let mut cursors = self.cursors.write().map_err(|_| CatalogProjectionError::Poisoned)?;
            cursors.retain(|k, _| k.tenant_id != tenant_id);
        }
        self.store.clear_tenant(tenant_id);

        for e in &stored {
            self.apply_envelope(&e.to_envelope())?;
        }
        Ok(stored.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use repairdesk_core::UserId;
    use repairdesk_events::{Event, StreamKey};
    use repairdesk_inventory::{
        DeviceDeleted, DeviceDetails, DeviceMoved, DeviceRegistered, Imei, MovementType,
    };
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use crate::read_model::InMemoryTenantStore;

    type Catalog = DeviceCatalogProjection<InMemoryTenantStore<DeviceUnitId, DeviceUnit>>;

    fn envelope(tenant_id: TenantId, unit_id: DeviceUnitId, seq: u64, ev: &DeviceEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            StreamKey::new(tenant_id, unit_id.0, DeviceUnit::AGGREGATE_TYPE),
            seq,
            ev.event_type(),
            ev.occurred_at(),
            serde_json::to_value(ev).unwrap(),
        )
    }

    fn registered(
        tenant_id: TenantId,
        code: &str,
        brand: &str,
        condition: DeviceCondition,
        purchase: i64,
        selling: i64,
        minutes_ago: i64,
    ) -> (DeviceUnitId, DeviceEvent) {
        let unit_id = DeviceUnitId::new(AggregateId::new());
        let ev = DeviceEvent::DeviceRegistered(DeviceRegistered {
            tenant_id,
            unit_id,
            imei: Imei::parse(&format!("35{:013}", purchase)).unwrap(),
            details: DeviceDetails {
                code: code.to_string(),
                device_type: DeviceType::Smartphone,
                brand: brand.to_string(),
                model: "X".to_string(),
                esn: None,
                serial_number: None,
                color: None,
                condition,
                is_courtesy_device: false,
                supplier_id: None,
                purchase_price: Some(Money::new(Decimal::new(purchase, 0))),
                selling_price: Some(Money::new(Decimal::new(selling, 0))),
                notes: None,
            },
            initial_status: DeviceStatus::Available,
            location: None,
            reference: None,
            actor: UserId::new(),
            occurred_at: Utc::now() - Duration::minutes(minutes_ago),
        });
        (unit_id, ev)
    }

    fn seeded() -> (Catalog, TenantId, Vec<DeviceUnitId>) {
        let catalog = Catalog::new(InMemoryTenantStore::new());
        let tenant_id = TenantId::new();
        let mut ids = vec![];
        for (code, brand, cond, buy, sell, age) in [
            ("DEV-001", "Apple", DeviceCondition::Used, 300, 450, 30),
            ("DEV-002", "Samsung", DeviceCondition::New, 500, 650, 20),
            ("DEV-003", "apple", DeviceCondition::Refurbished, 200, 260, 10),
        ] {
            let (id, ev) = registered(tenant_id, code, brand, cond, buy, sell, age);
            catalog.apply_envelope(&envelope(tenant_id, id, 1, &ev)).unwrap();
            ids.push(id);
        }
        (catalog, tenant_id, ids)
    }

    #[test]
    fn default_sort_is_newest_first() {
        let (catalog, tenant_id, _) = seeded();
        let page = catalog.search(tenant_id, &DeviceSearch::default(), PageRequest::default());
        let codes: Vec<_> = page.items.iter().map(|v| v.details.code.as_str()).collect();
        assert_eq!(codes, vec!["DEV-003", "DEV-002", "DEV-001"]);
    }

    #[test]
    fn filters_combine() {
        let (catalog, tenant_id, _) = seeded();
        let query = DeviceSearch {
            brand: Some("APPLE".to_string()),
            max_purchase_price: Some(Money::new(Decimal::new(250, 0))),
            ..DeviceSearch::default()
        };
        let page = catalog.search(tenant_id, &query, PageRequest::default());
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].details.code, "DEV-003");

        let by_text = DeviceSearch {
            text: Some("dev-00".to_string()),
            sort_by: DeviceSortField::Code,
            direction: SortDirection::Asc,
            ..DeviceSearch::default()
        };
        let page = catalog.search(tenant_id, &by_text, PageRequest::clamped(1, 2));
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].details.code, "DEV-001");
    }

    #[test]
    fn stats_skip_deleted_units() {
        let (catalog, tenant_id, ids) = seeded();
        let delete = DeviceEvent::DeviceDeleted(DeviceDeleted {
            tenant_id,
            unit_id: ids[1],
            actor: UserId::new(),
            occurred_at: Utc::now(),
        });
        catalog.apply_envelope(&envelope(tenant_id, ids[1], 2, &delete)).unwrap();

        let stats = catalog.stats(tenant_id);
        assert_eq!(stats.total_units, 2);
        assert_eq!(stats.total_purchase_value, Money::new(Decimal::new(500, 0)));
        assert_eq!(stats.total_selling_value, Money::new(Decimal::new(710, 0)));
        assert_eq!(stats.potential_profit(), Money::new(Decimal::new(210, 0)));
        assert_eq!(stats.by_condition.get(&DeviceCondition::New), None);
        assert!(catalog.get(tenant_id, ids[1]).is_some());
    }

    #[test]
    fn replayed_envelopes_are_ignored_and_gaps_rejected() {
        let (catalog, tenant_id, ids) = seeded();
        let loan = DeviceEvent::DeviceMoved(DeviceMoved {
            tenant_id,
            unit_id: ids[0],
            movement_type: MovementType::Loan,
            from_status: DeviceStatus::Available,
            to_status: DeviceStatus::Loaned,
            customer_id: None,
            sale_price: None,
            from_location: None,
            to_location: None,
            reference: None,
            notes: None,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        });
        let env = envelope(tenant_id, ids[0], 2, &loan);
        catalog.apply_envelope(&env).unwrap();
        catalog.apply_envelope(&env).unwrap();
        assert_eq!(catalog.stats(tenant_id).count(DeviceStatus::Loaned), 1);
        assert_eq!(catalog.get(tenant_id, ids[0]).unwrap().version, 2);

        let gap = envelope(tenant_id, ids[0], 5, &loan);
        assert!(matches!(
            catalog.apply_envelope(&gap),
            Err(CatalogProjectionError::NonMonotonicSequence { last: 2, found: 5 })
        ));
    }

    #[test]
    fn other_tenants_see_nothing() {
        let (catalog, _, _) = seeded();
        let other = TenantId::new();
        assert_eq!(catalog.search(other, &DeviceSearch::default(), PageRequest::default()).total, 0);
        assert_eq!(catalog.stats(other).total_units, 0);
    }
}
