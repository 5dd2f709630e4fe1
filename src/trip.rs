//! Order trip entity and repository.
//!
//! The trip is the unit that advances through the ordered stage catalog.
//! `pickup_date`/`delivery_date` are the contracted dates, not the
//! effective dates used for billing -- those are reconstructed from the
//! ledger. `last_status` mirrors the latest non-voided ledger event and
//! is rewritten only in the same transaction as an append.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqliteExecutor;

use crate::error::RepoError;
use crate::ids::{DriverId, OrderGroupId, OrderId, OrganizationId, RouteId, SubcontractorId, TripId};
use crate::status::TripStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTrip {
    pub id: TripId,
    pub order_id: OrderId,
    pub organization_id: OrganizationId,
    pub code: String,
    pub driver_id: Option<DriverId>,
    pub subcontractor_id: Option<SubcontractorId>,
    pub route_id: Option<RouteId>,
    pub vehicle_number: Option<String>,
    pub pickup_date: DateTime<Utc>,
    pub delivery_date: DateTime<Utc>,
    pub weight: Decimal,
    pub driver_cost: Decimal,
    pub bridge_toll: Decimal,
    pub subcontractor_cost: Decimal,
    pub other_cost: Decimal,
    pub last_status: TripStatus,
    pub published: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for creating one trip under an order.
#[derive(Debug, Clone)]
pub struct NewTrip {
    pub order_id: OrderId,
    pub driver_id: Option<DriverId>,
    pub subcontractor_id: Option<SubcontractorId>,
    pub route_id: Option<RouteId>,
    pub vehicle_number: Option<String>,
    pub pickup_date: DateTime<Utc>,
    pub delivery_date: DateTime<Utc>,
    pub weight: Decimal,
    pub driver_cost: Decimal,
    pub bridge_toll: Decimal,
    pub subcontractor_cost: Decimal,
    pub other_cost: Decimal,
}

#[derive(Debug, sqlx::FromRow)]
struct TripRow {
    id: i64,
    order_id: i64,
    organization_id: i64,
    code: String,
    driver_id: Option<i64>,
    subcontractor_id: Option<i64>,
    route_id: Option<i64>,
    vehicle_number: Option<String>,
    pickup_date: DateTime<Utc>,
    delivery_date: DateTime<Utc>,
    weight: String,
    driver_cost: String,
    bridge_toll: String,
    subcontractor_cost: String,
    other_cost: String,
    last_status: String,
    published: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<TripRow> for OrderTrip {
    type Error = RepoError;

    fn try_from(row: TripRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: TripId(row.id),
            order_id: OrderId(row.order_id),
            organization_id: OrganizationId(row.organization_id),
            code: row.code,
            driver_id: row.driver_id.map(DriverId),
            subcontractor_id: row.subcontractor_id.map(SubcontractorId),
            route_id: row.route_id.map(RouteId),
            vehicle_number: row.vehicle_number,
            pickup_date: row.pickup_date,
            delivery_date: row.delivery_date,
            weight: row.weight.parse::<Decimal>()?,
            driver_cost: row.driver_cost.parse::<Decimal>()?,
            bridge_toll: row.bridge_toll.parse::<Decimal>()?,
            subcontractor_cost: row.subcontractor_cost.parse::<Decimal>()?,
            other_cost: row.other_cost.parse::<Decimal>()?,
            last_status: row.last_status.parse()?,
            published: row.published,
            created_at: row.created_at,
        })
    }
}

const SELECT_COLUMNS: &str = "id, order_id, organization_id, code, driver_id, subcontractor_id, \
                              route_id, vehicle_number, pickup_date, delivery_date, weight, \
                              driver_cost, bridge_toll, subcontractor_cost, other_cost, \
                              last_status, published, created_at";

pub async fn insert<'e>(
    executor: impl SqliteExecutor<'e>,
    organization_id: OrganizationId,
    code: &str,
    new: &NewTrip,
    at: DateTime<Utc>,
) -> Result<TripId, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO order_trips
             (order_id, organization_id, code, driver_id, subcontractor_id, route_id,
              vehicle_number, pickup_date, delivery_date, weight, driver_cost, bridge_toll,
              subcontractor_cost, other_cost, last_status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 'NEW', ?15)",
    )
    .bind(new.order_id.0)
    .bind(organization_id.0)
    .bind(code)
    .bind(new.driver_id.map(|id| id.0))
    .bind(new.subcontractor_id.map(|id| id.0))
    .bind(new.route_id.map(|id| id.0))
    .bind(new.vehicle_number.as_deref())
    .bind(new.pickup_date)
    .bind(new.delivery_date)
    .bind(new.weight.to_string())
    .bind(new.driver_cost.to_string())
    .bind(new.bridge_toll.to_string())
    .bind(new.subcontractor_cost.to_string())
    .bind(new.other_cost.to_string())
    .bind(at)
    .execute(executor)
    .await?;

    Ok(TripId(result.last_insert_rowid()))
}

pub async fn find<'e>(
    executor: impl SqliteExecutor<'e>,
    id: TripId,
) -> Result<Option<OrderTrip>, RepoError> {
    let row = sqlx::query_as::<_, TripRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM order_trips WHERE id = ?1",
    ))
    .bind(id.0)
    .fetch_optional(executor)
    .await?;

    row.map(OrderTrip::try_from).transpose()
}

/// Published trips of every member order of a group.
pub async fn find_for_group<'e>(
    executor: impl SqliteExecutor<'e>,
    group_id: OrderGroupId,
) -> Result<Vec<OrderTrip>, RepoError> {
    let rows = sqlx::query_as::<_, TripRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM order_trips
         WHERE published = 1
           AND order_id IN
               (SELECT order_id FROM order_group_members WHERE order_group_id = ?1)
         ORDER BY id",
    ))
    .bind(group_id.0)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(OrderTrip::try_from).collect()
}

/// Published, non-canceled trips of an organization. Candidate set for
/// report aggregation; window filtering happens on top of this.
pub async fn find_candidates_for_report<'e>(
    executor: impl SqliteExecutor<'e>,
    organization_id: OrganizationId,
) -> Result<Vec<OrderTrip>, RepoError> {
    let rows = sqlx::query_as::<_, TripRow>(
        "SELECT t.id, t.order_id, t.organization_id, t.code, t.driver_id, t.subcontractor_id,
                t.route_id, t.vehicle_number, t.pickup_date, t.delivery_date, t.weight,
                t.driver_cost, t.bridge_toll, t.subcontractor_cost, t.other_cost,
                t.last_status, t.published, t.created_at
         FROM order_trips t
         JOIN orders o ON o.id = t.order_id
         WHERE t.organization_id = ?1
           AND t.published = 1
           AND t.last_status != 'CANCELED'
           AND o.published = 1
           AND o.status != 'CANCELED'
         ORDER BY t.pickup_date, t.id",
    )
    .bind(organization_id.0)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(OrderTrip::try_from).collect()
}

/// Rewrite the denormalized status mirror. Must only be called next to
/// the matching ledger append, inside the same transaction.
pub async fn set_last_status<'e>(
    executor: impl SqliteExecutor<'e>,
    id: TripId,
    status: TripStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE order_trips SET last_status = ?1 WHERE id = ?2")
        .bind(status.as_str())
        .bind(id.0)
        .execute(executor)
        .await?;

    Ok(())
}

pub async fn unpublish<'e>(
    executor: impl SqliteExecutor<'e>,
    id: TripId,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE order_trips SET published = 0 WHERE id = ?1")
        .bind(id.0)
        .execute(executor)
        .await?;

    Ok(())
}

pub async fn exists_code<'e>(
    executor: impl SqliteExecutor<'e>,
    code: &str,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_trips WHERE code = ?1")
        .bind(code)
        .fetch_one(executor)
        .await?;

    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{NewTripBuilder, seed_customer, seed_order, seed_organization, setup_test_db};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn insert_round_trips_decimals_exactly() {
        let pool = setup_test_db().await;
        let org = seed_organization(&pool, "org1").await;
        let customer = seed_customer(&pool, org, "ACME").await;
        let order_id = seed_order(&pool, org, customer, "ORD-1").await;
        let at = "2024-01-05T00:00:00Z".parse().unwrap();

        let new = NewTripBuilder::new(order_id)
            .with_weight(dec!(12.345))
            .with_driver_cost(dec!(1500000.10))
            .build();
        let id = insert(&pool, org, "TRIP-1", &new, at).await.unwrap();

        let trip = find(&pool, id).await.unwrap().unwrap();
        assert_eq!(trip.weight, dec!(12.345));
        assert_eq!(trip.driver_cost, dec!(1500000.10));
        assert_eq!(trip.last_status, TripStatus::New);
        assert!(trip.published);
    }

    #[tokio::test]
    async fn unpublished_trips_are_excluded_from_report_candidates() {
        let pool = setup_test_db().await;
        let org = seed_organization(&pool, "org1").await;
        let customer = seed_customer(&pool, org, "ACME").await;
        let order_id = seed_order(&pool, org, customer, "ORD-1").await;
        let at = "2024-01-05T00:00:00Z".parse().unwrap();

        let keep = insert(&pool, org, "TRIP-1", &NewTripBuilder::new(order_id).build(), at)
            .await
            .unwrap();
        let gone = insert(&pool, org, "TRIP-2", &NewTripBuilder::new(order_id).build(), at)
            .await
            .unwrap();
        unpublish(&pool, gone).await.unwrap();

        let candidates = find_candidates_for_report(&pool, org).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, keep);
    }

    #[tokio::test]
    async fn canceled_trips_are_excluded_from_report_candidates() {
        let pool = setup_test_db().await;
        let org = seed_organization(&pool, "org1").await;
        let customer = seed_customer(&pool, org, "ACME").await;
        let order_id = seed_order(&pool, org, customer, "ORD-1").await;
        let at = "2024-01-05T00:00:00Z".parse().unwrap();

        let id = insert(&pool, org, "TRIP-1", &NewTripBuilder::new(order_id).build(), at)
            .await
            .unwrap();
        set_last_status(&pool, id, TripStatus::Canceled).await.unwrap();

        let candidates = find_candidates_for_report(&pool, org).await.unwrap();
        assert!(candidates.is_empty());
    }
}
