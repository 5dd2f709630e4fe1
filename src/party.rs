//! Reference parties: customers, drivers, subcontractors, routes.
//! Thin lookups and inserts; maintained by the out-of-scope admin
//! surface, but the warehouse handoff creates synthetic rows here.

use sqlx::SqliteExecutor;

use crate::ids::{CustomerId, DriverId, OrganizationId, RouteId};

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Driver {
    #[sqlx(rename = "id")]
    pub raw_id: i64,
    pub full_name: String,
    pub unit: Option<String>,
}

impl Driver {
    pub const fn id(&self) -> DriverId {
        DriverId(self.raw_id)
    }
}

pub async fn insert_customer<'e>(
    executor: impl SqliteExecutor<'e>,
    organization_id: OrganizationId,
    name: &str,
) -> Result<CustomerId, sqlx::Error> {
    let result = sqlx::query("INSERT INTO customers (organization_id, name) VALUES (?1, ?2)")
        .bind(organization_id.0)
        .bind(name)
        .execute(executor)
        .await?;

    Ok(CustomerId(result.last_insert_rowid()))
}

pub async fn find_customer_by_name<'e>(
    executor: impl SqliteExecutor<'e>,
    organization_id: OrganizationId,
    name: &str,
) -> Result<Option<CustomerId>, sqlx::Error> {
    let id: Option<i64> =
        sqlx::query_scalar("SELECT id FROM customers WHERE organization_id = ?1 AND name = ?2")
            .bind(organization_id.0)
            .bind(name)
            .fetch_optional(executor)
            .await?;

    Ok(id.map(CustomerId))
}

pub async fn insert_driver<'e>(
    executor: impl SqliteExecutor<'e>,
    organization_id: OrganizationId,
    full_name: &str,
    unit: Option<&str>,
) -> Result<DriverId, sqlx::Error> {
    let result =
        sqlx::query("INSERT INTO drivers (organization_id, full_name, unit) VALUES (?1, ?2, ?3)")
            .bind(organization_id.0)
            .bind(full_name)
            .bind(unit)
            .execute(executor)
            .await?;

    Ok(DriverId(result.last_insert_rowid()))
}

pub async fn find_driver<'e>(
    executor: impl SqliteExecutor<'e>,
    id: DriverId,
) -> Result<Option<Driver>, sqlx::Error> {
    sqlx::query_as::<_, Driver>("SELECT id, full_name, unit FROM drivers WHERE id = ?1")
        .bind(id.0)
        .fetch_optional(executor)
        .await
}

pub async fn insert_route<'e>(
    executor: impl SqliteExecutor<'e>,
    organization_id: OrganizationId,
    name: &str,
) -> Result<RouteId, sqlx::Error> {
    let result = sqlx::query("INSERT INTO routes (organization_id, name) VALUES (?1, ?2)")
        .bind(organization_id.0)
        .bind(name)
        .execute(executor)
        .await?;

    Ok(RouteId(result.last_insert_rowid()))
}
