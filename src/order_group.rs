//! Order group entity, membership, and repository.
//!
//! A billing/dispatch aggregate over a set of orders with its own ordered
//! lifecycle. Advancement to DELIVERED and COMPLETED is gated on every
//! member trip having reached the same milestone; the orchestrator
//! computes those gates after each trip transition.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::error::RepoError;
use crate::ids::{OrderGroupId, OrderId, OrganizationId};
use crate::status::{OrderGroupStatus, ParseStatusError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderGroup {
    pub id: OrderGroupId,
    pub organization_id: OrganizationId,
    pub code: String,
    pub status: OrderGroupStatus,
    pub warehouse_ref: Option<String>,
    pub published: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderGroupRow {
    id: i64,
    organization_id: i64,
    code: String,
    status: String,
    warehouse_ref: Option<String>,
    published: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderGroupRow> for OrderGroup {
    type Error = ParseStatusError;

    fn try_from(row: OrderGroupRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: OrderGroupId(row.id),
            organization_id: OrganizationId(row.organization_id),
            code: row.code,
            status: row.status.parse()?,
            warehouse_ref: row.warehouse_ref,
            published: row.published,
            created_at: row.created_at,
        })
    }
}

const SELECT_COLUMNS: &str = "id, organization_id, code, status, warehouse_ref, published, created_at";

pub async fn insert<'e>(
    executor: impl SqliteExecutor<'e>,
    organization_id: OrganizationId,
    code: &str,
    at: DateTime<Utc>,
) -> Result<OrderGroupId, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO order_groups (organization_id, code, status, created_at)
         VALUES (?1, ?2, 'PLAN', ?3)",
    )
    .bind(organization_id.0)
    .bind(code)
    .bind(at)
    .execute(executor)
    .await?;

    Ok(OrderGroupId(result.last_insert_rowid()))
}

pub async fn find<'e>(
    executor: impl SqliteExecutor<'e>,
    id: OrderGroupId,
) -> Result<Option<OrderGroup>, RepoError> {
    let row = sqlx::query_as::<_, OrderGroupRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM order_groups WHERE id = ?1",
    ))
    .bind(id.0)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(OrderGroup::try_from).transpose()?)
}

pub async fn find_by_code<'e>(
    executor: impl SqliteExecutor<'e>,
    organization_id: OrganizationId,
    code: &str,
) -> Result<Option<OrderGroup>, RepoError> {
    let row = sqlx::query_as::<_, OrderGroupRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM order_groups
         WHERE organization_id = ?1 AND code = ?2 AND published = 1",
    ))
    .bind(organization_id.0)
    .bind(code)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(OrderGroup::try_from).transpose()?)
}

/// Rewrite the denormalized status mirror. Must only be called next to
/// the matching ledger append, inside the same transaction.
pub async fn set_status<'e>(
    executor: impl SqliteExecutor<'e>,
    id: OrderGroupId,
    status: OrderGroupStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE order_groups SET status = ?1 WHERE id = ?2")
        .bind(status.as_str())
        .bind(id.0)
        .execute(executor)
        .await?;

    Ok(())
}

pub async fn set_warehouse_ref<'e>(
    executor: impl SqliteExecutor<'e>,
    id: OrderGroupId,
    warehouse_ref: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE order_groups SET warehouse_ref = ?1 WHERE id = ?2")
        .bind(warehouse_ref)
        .bind(id.0)
        .execute(executor)
        .await?;

    Ok(())
}

pub async fn unpublish<'e>(
    executor: impl SqliteExecutor<'e>,
    id: OrderGroupId,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE order_groups SET published = 0 WHERE id = ?1")
        .bind(id.0)
        .execute(executor)
        .await?;

    Ok(())
}

pub async fn exists_code<'e>(
    executor: impl SqliteExecutor<'e>,
    code: &str,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_groups WHERE code = ?1")
        .bind(code)
        .fetch_one(executor)
        .await?;

    Ok(count > 0)
}

pub async fn add_member<'e>(
    executor: impl SqliteExecutor<'e>,
    group_id: OrderGroupId,
    order_id: OrderId,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO order_group_members (order_group_id, order_id) VALUES (?1, ?2)",
    )
    .bind(group_id.0)
    .bind(order_id.0)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn remove_member<'e>(
    executor: impl SqliteExecutor<'e>,
    group_id: OrderGroupId,
    order_id: OrderId,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM order_group_members WHERE order_group_id = ?1 AND order_id = ?2",
    )
    .bind(group_id.0)
    .bind(order_id.0)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn member_order_ids<'e>(
    executor: impl SqliteExecutor<'e>,
    group_id: OrderGroupId,
) -> Result<Vec<OrderId>, sqlx::Error> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT order_id FROM order_group_members WHERE order_group_id = ?1 ORDER BY order_id",
    )
    .bind(group_id.0)
    .fetch_all(executor)
    .await?;

    Ok(ids.into_iter().map(OrderId).collect())
}

pub async fn member_count<'e>(
    executor: impl SqliteExecutor<'e>,
    group_id: OrderGroupId,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM order_group_members WHERE order_group_id = ?1")
        .bind(group_id.0)
        .fetch_one(executor)
        .await
}

/// The group an order currently belongs to, if any.
pub async fn group_of_order<'e>(
    executor: impl SqliteExecutor<'e>,
    order_id: OrderId,
) -> Result<Option<OrderGroupId>, sqlx::Error> {
    let id: Option<i64> = sqlx::query_scalar(
        "SELECT m.order_group_id FROM order_group_members m
         JOIN order_groups g ON g.id = m.order_group_id
         WHERE m.order_id = ?1 AND g.published = 1
         LIMIT 1",
    )
    .bind(order_id.0)
    .fetch_optional(executor)
    .await?;

    Ok(id.map(OrderGroupId))
}
