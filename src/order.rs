//! Order entity and repository.
//!
//! An order aggregates one or more trips and carries its own coarse
//! status. The status column mirrors the order's latest non-voided ledger
//! event and is rewritten only in the same transaction as an append.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::error::RepoError;
use crate::ids::{CustomerId, OrderId, OrganizationId};
use crate::status::{OrderStatus, ParseStatusError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub organization_id: OrganizationId,
    pub customer_id: CustomerId,
    pub code: String,
    pub status: OrderStatus,
    pub published: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i64,
    organization_id: i64,
    customer_id: i64,
    code: String,
    status: String,
    published: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = ParseStatusError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: OrderId(row.id),
            organization_id: OrganizationId(row.organization_id),
            customer_id: CustomerId(row.customer_id),
            code: row.code,
            status: row.status.parse()?,
            published: row.published,
            created_at: row.created_at,
        })
    }
}

const SELECT_COLUMNS: &str =
    "id, organization_id, customer_id, code, status, published, created_at";

pub async fn insert<'e>(
    executor: impl SqliteExecutor<'e>,
    organization_id: OrganizationId,
    customer_id: CustomerId,
    code: &str,
    at: DateTime<Utc>,
) -> Result<OrderId, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO orders (organization_id, customer_id, code, status, created_at)
         VALUES (?1, ?2, ?3, 'NEW', ?4)",
    )
    .bind(organization_id.0)
    .bind(customer_id.0)
    .bind(code)
    .bind(at)
    .execute(executor)
    .await?;

    Ok(OrderId(result.last_insert_rowid()))
}

pub async fn find<'e>(
    executor: impl SqliteExecutor<'e>,
    id: OrderId,
) -> Result<Option<Order>, RepoError> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM orders WHERE id = ?1",
    ))
    .bind(id.0)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(Order::try_from).transpose()?)
}

/// Rewrite the denormalized status mirror. Must only be called next to
/// the matching ledger append, inside the same transaction.
pub async fn set_status<'e>(
    executor: impl SqliteExecutor<'e>,
    id: OrderId,
    status: OrderStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE orders SET status = ?1 WHERE id = ?2")
        .bind(status.as_str())
        .bind(id.0)
        .execute(executor)
        .await?;

    Ok(())
}

pub async fn exists_code<'e>(
    executor: impl SqliteExecutor<'e>,
    code: &str,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE code = ?1")
        .bind(code)
        .fetch_one(executor)
        .await?;

    Ok(count > 0)
}
