//! Driver cash-advance records.
//!
//! An advance offsets payable amounts in financial reports. Only
//! `PAYMENT`-status advances whose payment date falls inside the report
//! period contribute; a trip with no matching advance contributes zero.
//! Amounts are summed as exact decimals, never floats.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqliteExecutor;

use crate::error::RepoError;
use crate::ids::{AdvanceId, DriverId, OrganizationId, TripId};
use crate::status::AdvanceStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    pub id: AdvanceId,
    pub organization_id: OrganizationId,
    pub driver_id: DriverId,
    pub amount: Decimal,
    pub payment_date: Option<DateTime<Utc>>,
    pub status: AdvanceStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct AdvanceRow {
    id: i64,
    organization_id: i64,
    driver_id: i64,
    amount: String,
    payment_date: Option<DateTime<Utc>>,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AdvanceRow> for Advance {
    type Error = RepoError;

    fn try_from(row: AdvanceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: AdvanceId(row.id),
            organization_id: OrganizationId(row.organization_id),
            driver_id: DriverId(row.driver_id),
            amount: row.amount.parse::<Decimal>()?,
            payment_date: row.payment_date,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

pub async fn insert<'e>(
    executor: impl SqliteExecutor<'e>,
    organization_id: OrganizationId,
    driver_id: DriverId,
    amount: Decimal,
    status: AdvanceStatus,
    payment_date: Option<DateTime<Utc>>,
    at: DateTime<Utc>,
) -> Result<AdvanceId, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO advances (organization_id, driver_id, amount, payment_date, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(organization_id.0)
    .bind(driver_id.0)
    .bind(amount.to_string())
    .bind(payment_date)
    .bind(status.as_str())
    .bind(at)
    .execute(executor)
    .await?;

    Ok(AdvanceId(result.last_insert_rowid()))
}

pub async fn link_trip<'e>(
    executor: impl SqliteExecutor<'e>,
    advance_id: AdvanceId,
    trip_id: TripId,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO advance_trips (advance_id, trip_id) VALUES (?1, ?2)")
        .bind(advance_id.0)
        .bind(trip_id.0)
        .execute(executor)
        .await?;

    Ok(())
}

pub async fn find<'e>(
    executor: impl SqliteExecutor<'e>,
    id: AdvanceId,
) -> Result<Option<Advance>, RepoError> {
    let row = sqlx::query_as::<_, AdvanceRow>(
        "SELECT id, organization_id, driver_id, amount, payment_date, status, created_at
         FROM advances WHERE id = ?1",
    )
    .bind(id.0)
    .fetch_optional(executor)
    .await?;

    row.map(Advance::try_from).transpose()
}

/// Exact sum of `PAYMENT` advances linked to a trip whose payment date
/// falls inside `[start, end]`. Zero when none match.
pub async fn payment_total_for_trip<'e>(
    executor: impl SqliteExecutor<'e>,
    trip_id: TripId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Decimal, RepoError> {
    let amounts: Vec<String> = sqlx::query_scalar(
        "SELECT a.amount FROM advances a
         JOIN advance_trips link ON link.advance_id = a.id
         WHERE link.trip_id = ?1
           AND a.status = 'PAYMENT'
           AND a.payment_date IS NOT NULL
           AND a.payment_date >= ?2
           AND a.payment_date <= ?3",
    )
    .bind(trip_id.0)
    .bind(start)
    .bind(end)
    .fetch_all(executor)
    .await?;

    let mut total = Decimal::ZERO;
    for amount in amounts {
        total += amount.parse::<Decimal>()?;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        NewTripBuilder, seed_customer, seed_driver, seed_order, seed_organization, setup_test_db,
    };
    use rust_decimal_macros::dec;

    fn date(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn only_payment_status_in_period_contributes() {
        let pool = setup_test_db().await;
        let org = seed_organization(&pool, "org1").await;
        let driver = seed_driver(&pool, org, "Binh Tran", Some("Unit 2")).await;
        let customer = seed_customer(&pool, org, "ACME Logistics").await;
        let order = seed_order(&pool, org, customer, "ORD-ADV-1").await;
        let created = date("2024-01-01T00:00:00Z");
        let trip = crate::trip::insert(
            &pool,
            org,
            "TRP-ADV-1",
            &NewTripBuilder::new(order).with_driver(driver).build(),
            created,
        )
        .await
        .unwrap();

        let in_period = insert(
            &pool,
            org,
            driver,
            dec!(500000.50),
            AdvanceStatus::Payment,
            Some(date("2024-01-15T00:00:00Z")),
            created,
        )
        .await
        .unwrap();
        let pending = insert(
            &pool,
            org,
            driver,
            dec!(100),
            AdvanceStatus::Pending,
            Some(date("2024-01-16T00:00:00Z")),
            created,
        )
        .await
        .unwrap();
        let out_of_period = insert(
            &pool,
            org,
            driver,
            dec!(100),
            AdvanceStatus::Payment,
            Some(date("2024-03-01T00:00:00Z")),
            created,
        )
        .await
        .unwrap();
        for advance in [in_period, pending, out_of_period] {
            link_trip(&pool, advance, trip).await.unwrap();
        }
        let second = insert(
            &pool,
            org,
            driver,
            dec!(0.25),
            AdvanceStatus::Payment,
            Some(date("2024-01-20T00:00:00Z")),
            created,
        )
        .await
        .unwrap();
        link_trip(&pool, second, trip).await.unwrap();

        let total = payment_total_for_trip(
            &pool,
            trip,
            date("2024-01-01T00:00:00Z"),
            date("2024-01-31T23:59:59Z"),
        )
        .await
        .unwrap();
        assert_eq!(total, dec!(500000.75));
    }

    #[tokio::test]
    async fn unlinked_trip_sums_to_zero() {
        let pool = setup_test_db().await;
        let total = payment_total_for_trip(
            &pool,
            TripId(99),
            date("2024-01-01T00:00:00Z"),
            date("2024-01-31T00:00:00Z"),
        )
        .await
        .unwrap();
        assert_eq!(total, Decimal::ZERO);
    }
}
