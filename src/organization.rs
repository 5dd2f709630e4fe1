//! Organization row and its report date policy.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::error::RepoError;
use crate::ids::OrganizationId;
use crate::status::ParseStatusError;
use crate::timeline::DatePolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub date_policy: DatePolicy,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrganizationRow {
    id: i64,
    name: String,
    date_policy: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrganizationRow> for Organization {
    type Error = ParseStatusError;

    fn try_from(row: OrganizationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: OrganizationId(row.id),
            name: row.name,
            date_policy: row.date_policy.parse()?,
            created_at: row.created_at,
        })
    }
}

pub async fn insert<'e>(
    executor: impl SqliteExecutor<'e>,
    name: &str,
    date_policy: DatePolicy,
    at: DateTime<Utc>,
) -> Result<OrganizationId, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO organizations (name, date_policy, created_at) VALUES (?1, ?2, ?3)",
    )
    .bind(name)
    .bind(date_policy.as_str())
    .bind(at)
    .execute(executor)
    .await?;

    Ok(OrganizationId(result.last_insert_rowid()))
}

pub async fn find<'e>(
    executor: impl SqliteExecutor<'e>,
    id: OrganizationId,
) -> Result<Option<Organization>, RepoError> {
    let row = sqlx::query_as::<_, OrganizationRow>(
        "SELECT id, name, date_policy, created_at FROM organizations WHERE id = ?1",
    )
    .bind(id.0)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(Organization::try_from).transpose()?)
}

pub async fn set_date_policy<'e>(
    executor: impl SqliteExecutor<'e>,
    id: OrganizationId,
    policy: DatePolicy,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE organizations SET date_policy = ?1 WHERE id = ?2")
        .bind(policy.as_str())
        .bind(id.0)
        .execute(executor)
        .await?;

    Ok(())
}
