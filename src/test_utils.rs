//! Shared test fixtures: database setup, catalog seeding, entity
//! builders, and stub collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::catalog::{self, CatalogEntityKind};
use crate::ids::{ActorId, CustomerId, DriverId, OrderId, OrganizationId, TripId};
use crate::notification::{NotificationIntent, Notifier, NotifyError};
use crate::orchestrator::{CreatedGroup, Orchestrator};
use crate::status::TripStatus;
use crate::timeline::DatePolicy;
use crate::trip::{NewTrip, OrderTrip};
use crate::warehouse::{InboundAck, InboundOrderRequest, WarehouseClient, WarehouseError};
use crate::{order, organization, party};

/// In-memory SQLite database with all migrations applied.
pub(crate) async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();
    pool
}

static CODE_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_code(prefix: &str) -> String {
    format!("{prefix}-{}", CODE_COUNTER.fetch_add(1, Ordering::Relaxed))
}

pub(crate) async fn seed_organization(pool: &SqlitePool, name: &str) -> OrganizationId {
    organization::insert(pool, name, DatePolicy::StatusCreatedAt, Utc::now())
        .await
        .unwrap()
}

pub(crate) async fn seed_customer(
    pool: &SqlitePool,
    org: OrganizationId,
    name: &str,
) -> CustomerId {
    party::insert_customer(pool, org, name).await.unwrap()
}

pub(crate) async fn seed_driver(
    pool: &SqlitePool,
    org: OrganizationId,
    full_name: &str,
    unit: Option<&str>,
) -> DriverId {
    party::insert_driver(pool, org, full_name, unit).await.unwrap()
}

pub(crate) async fn seed_order(
    pool: &SqlitePool,
    org: OrganizationId,
    customer: CustomerId,
    code: &str,
) -> OrderId {
    order::insert(pool, org, customer, code, Utc::now())
        .await
        .unwrap()
}

/// The standard catalog layout used across tests: the full trip sequence
/// plus the full group sequence.
pub(crate) fn catalog_statuses() -> Vec<(CatalogEntityKind, &'static str, i64)> {
    let trips = [
        "NEW",
        "PENDING_CONFIRMATION",
        "CONFIRMED",
        "WAITING_FOR_PICKUP",
        "DELIVERED",
        "COMPLETED",
        "CANCELED",
    ];
    let groups = [
        "PLAN",
        "APPROVED",
        "IN_PROGRESS",
        "INBOUND",
        "IN_STOCK",
        "DELIVERED",
        "COMPLETED",
    ];

    trips
        .into_iter()
        .enumerate()
        .map(|(i, status)| (CatalogEntityKind::Trip, status, i as i64 + 1))
        .chain(
            groups
                .into_iter()
                .enumerate()
                .map(|(i, status)| (CatalogEntityKind::OrderGroup, status, i as i64 + 1)),
        )
        .collect()
}

pub(crate) async fn seed_trip_catalog(pool: &SqlitePool, org: OrganizationId) {
    for (kind, status, order) in catalog_statuses() {
        catalog::insert_stage(pool, org, kind, status, status, order)
            .await
            .unwrap();
    }
}

/// Builder for [`NewTrip`] inputs with sensible defaults.
pub(crate) struct NewTripBuilder {
    new: NewTrip,
}

impl NewTripBuilder {
    pub(crate) fn new(order_id: OrderId) -> Self {
        Self {
            new: NewTrip {
                order_id,
                driver_id: None,
                subcontractor_id: None,
                route_id: None,
                vehicle_number: Some("51C-123.45".to_string()),
                pickup_date: "2024-01-10T00:00:00Z".parse().unwrap(),
                delivery_date: "2024-01-20T00:00:00Z".parse().unwrap(),
                weight: Decimal::ONE,
                driver_cost: Decimal::ZERO,
                bridge_toll: Decimal::ZERO,
                subcontractor_cost: Decimal::ZERO,
                other_cost: Decimal::ZERO,
            },
        }
    }

    #[must_use]
    pub(crate) fn with_driver(mut self, driver_id: DriverId) -> Self {
        self.new.driver_id = Some(driver_id);
        self
    }

    #[must_use]
    pub(crate) fn with_pickup_date(mut self, at: DateTime<Utc>) -> Self {
        self.new.pickup_date = at;
        self
    }

    #[must_use]
    pub(crate) fn with_delivery_date(mut self, at: DateTime<Utc>) -> Self {
        self.new.delivery_date = at;
        self
    }

    #[must_use]
    pub(crate) fn with_weight(mut self, weight: Decimal) -> Self {
        self.new.weight = weight;
        self
    }

    #[must_use]
    pub(crate) fn with_driver_cost(mut self, cost: Decimal) -> Self {
        self.new.driver_cost = cost;
        self
    }

    pub(crate) fn build(self) -> NewTrip {
        self.new
    }

    /// An in-memory trip for pure timeline tests, no database involved.
    pub(crate) fn sample_trip(
        id: TripId,
        pickup_date: DateTime<Utc>,
        delivery_date: DateTime<Utc>,
    ) -> OrderTrip {
        OrderTrip {
            id,
            order_id: OrderId(1),
            organization_id: OrganizationId(1),
            code: format!("TRP-{}", id.0),
            driver_id: None,
            subcontractor_id: None,
            route_id: None,
            vehicle_number: None,
            pickup_date,
            delivery_date,
            weight: Decimal::ONE,
            driver_cost: Decimal::ZERO,
            bridge_toll: Decimal::ZERO,
            subcontractor_cost: Decimal::ZERO,
            other_cost: Decimal::ZERO,
            last_status: TripStatus::New,
            published: true,
            created_at: pickup_date,
        }
    }
}

/// Notifier stub that records every dispatched intent, optionally
/// failing each dispatch.
#[derive(Debug, Default)]
pub(crate) struct RecordingNotifier {
    dispatched: Mutex<Vec<NotificationIntent>>,
    fail: bool,
}

impl RecordingNotifier {
    pub(crate) fn failing() -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub(crate) fn dispatched(&self) -> Vec<NotificationIntent> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn dispatch(&self, intent: &NotificationIntent) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError("stubbed outage".to_string()));
        }
        self.dispatched.lock().unwrap().push(intent.clone());
        Ok(())
    }
}

/// Warehouse stub: accepts or rejects every handoff.
#[derive(Debug)]
pub(crate) struct StubWarehouse {
    accept: bool,
}

impl StubWarehouse {
    pub(crate) fn accepting() -> Arc<Self> {
        Arc::new(Self { accept: true })
    }

    pub(crate) fn rejecting() -> Arc<Self> {
        Arc::new(Self { accept: false })
    }
}

#[async_trait]
impl WarehouseClient for StubWarehouse {
    async fn send_inbound_orders(
        &self,
        _request: &InboundOrderRequest,
    ) -> Result<InboundAck, WarehouseError> {
        if self.accept {
            Ok(InboundAck {
                status: "SUCCESS".to_string(),
                warehouse_ref: "WH-REF-1".to_string(),
            })
        } else {
            Ok(InboundAck {
                status: "REJECTED".to_string(),
                warehouse_ref: String::new(),
            })
        }
    }
}

/// A fully-wired orchestrator over a fresh in-memory database: one
/// organization with seeded catalogs, a customer, and a driver.
pub(crate) struct TestWorld {
    pub(crate) org: OrganizationId,
    pub(crate) actor: ActorId,
    pub(crate) customer: CustomerId,
    pub(crate) driver: DriverId,
    pub(crate) notifier: Arc<RecordingNotifier>,
    pub(crate) warehouse: Arc<StubWarehouse>,
    pub(crate) orchestrator: Orchestrator,
}

impl TestWorld {
    pub(crate) async fn create(
        policy: DatePolicy,
        stages: Vec<(CatalogEntityKind, &'static str, i64)>,
    ) -> Self {
        let pool = setup_test_db().await;
        let org = organization::insert(&pool, "org1", policy, Utc::now())
            .await
            .unwrap();
        for (kind, status, order) in stages {
            catalog::insert_stage(&pool, org, kind, status, status, order)
                .await
                .unwrap();
        }

        let customer = seed_customer(&pool, org, "ACME Logistics").await;
        let driver = seed_driver(&pool, org, "Binh Tran", Some("Unit 2")).await;

        let notifier = Arc::new(RecordingNotifier::default());
        let warehouse = StubWarehouse::accepting();
        let orchestrator = Orchestrator::new(pool, notifier.clone(), warehouse.clone());

        Self {
            org,
            actor: ActorId(1),
            customer,
            driver,
            notifier,
            warehouse,
            orchestrator,
        }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        self.orchestrator.pool()
    }

    /// Rebuild the orchestrator after swapping a collaborator stub.
    pub(crate) fn rebuild_orchestrator(self) -> Self {
        let pool = self.orchestrator.pool().clone();
        let orchestrator = Orchestrator::new(pool, self.notifier.clone(), self.warehouse.clone());
        Self {
            orchestrator,
            ..self
        }
    }

    /// One order per trip, then the scheduler transition.
    pub(crate) async fn seed_group_with_trips(&self, count: usize) -> CreatedGroup {
        let mut specs = Vec::with_capacity(count);
        for _ in 0..count {
            let order_id = seed_order(
                self.pool(),
                self.org,
                self.customer,
                &next_code("ORD-SEED"),
            )
            .await;
            specs.push(NewTripBuilder::new(order_id).with_driver(self.driver).build());
        }

        self.orchestrator
            .create_order_group(self.org, self.actor, specs)
            .await
            .unwrap()
    }
}
