//! Organization-scoped, ordered stage catalogs ("driver reports").
//!
//! A stage gives a status type its rank (`display_order`) within an
//! organization. Trip stages and order-group stages are separate
//! sequences. The catalog is maintained by admin configuration; the core
//! only looks stages up and treats a missing required stage as a
//! user-visible validation failure.

use sqlx::SqliteExecutor;
use std::fmt;
use std::str::FromStr;

use crate::error::{ReportError, TransitionError, ValidationError};
use crate::ids::{OrganizationId, StageId};
use crate::status::{ParseStatusError, TripStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogEntityKind {
    Trip,
    OrderGroup,
}

impl CatalogEntityKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trip => "TRIP",
            Self::OrderGroup => "ORDER_GROUP",
        }
    }
}

impl FromStr for CatalogEntityKind {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRIP" => Ok(Self::Trip),
            "ORDER_GROUP" => Ok(Self::OrderGroup),
            other => Err(ParseStatusError {
                kind: "catalog entity",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for CatalogEntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCatalogStage {
    pub id: StageId,
    pub organization_id: OrganizationId,
    pub entity_kind: CatalogEntityKind,
    pub status_type: String,
    pub name: String,
    pub display_order: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct StageRow {
    id: i64,
    organization_id: i64,
    entity_kind: String,
    status_type: String,
    name: String,
    display_order: i64,
}

impl TryFrom<StageRow> for StatusCatalogStage {
    type Error = ParseStatusError;

    fn try_from(row: StageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: StageId(row.id),
            organization_id: OrganizationId(row.organization_id),
            entity_kind: row.entity_kind.parse()?,
            status_type: row.status_type,
            name: row.name,
            display_order: row.display_order,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("organization has no '{status_type}' stage configured for {entity_kind}")]
    StageNotConfigured {
        entity_kind: &'static str,
        status_type: String,
    },

    #[error(transparent)]
    Parse(#[from] ParseStatusError),

    #[error("persistence failure")]
    Database(#[from] sqlx::Error),
}

impl From<CatalogError> for TransitionError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::StageNotConfigured {
                entity_kind,
                status_type,
            } => Self::Validation(ValidationError::StageNotConfigured {
                entity_kind,
                status_type,
            }),
            CatalogError::Parse(parse) => Self::Validation(ValidationError::Status(parse)),
            CatalogError::Database(db) => db.into(),
        }
    }
}

impl From<CatalogError> for ReportError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::StageNotConfigured {
                entity_kind,
                status_type,
            } => Self::Validation(ValidationError::StageNotConfigured {
                entity_kind,
                status_type,
            }),
            CatalogError::Parse(parse) => Self::Validation(ValidationError::Status(parse)),
            CatalogError::Database(db) => Self::Database(db),
        }
    }
}

/// Look up the stage for a status type, failing with a validation error
/// when the organization has not configured it.
pub async fn require_stage<'e>(
    executor: impl SqliteExecutor<'e>,
    organization_id: OrganizationId,
    entity_kind: CatalogEntityKind,
    status_type: &str,
) -> Result<StatusCatalogStage, CatalogError> {
    let row = sqlx::query_as::<_, StageRow>(
        "SELECT id, organization_id, entity_kind, status_type, name, display_order
         FROM status_catalog_stages
         WHERE organization_id = ?1 AND entity_kind = ?2 AND status_type = ?3",
    )
    .bind(organization_id.0)
    .bind(entity_kind.as_str())
    .bind(status_type)
    .fetch_optional(executor)
    .await?;

    match row {
        Some(row) => Ok(row.try_into()?),
        None => Err(CatalogError::StageNotConfigured {
            entity_kind: entity_kind.as_str(),
            status_type: status_type.to_string(),
        }),
    }
}

/// The full ordered trip-stage catalog of one organization, loaded once
/// per report call and shared across every trip's reconstruction.
#[derive(Debug, Clone)]
pub struct TripStageCatalog {
    stages: Vec<StatusCatalogStage>,
}

impl TripStageCatalog {
    /// Build a catalog from already-loaded stages, ordering by
    /// `display_order`.
    pub fn from_stages(mut stages: Vec<StatusCatalogStage>) -> Self {
        stages.sort_by_key(|stage| stage.display_order);
        Self { stages }
    }

    pub async fn load<'e>(
        executor: impl SqliteExecutor<'e>,
        organization_id: OrganizationId,
    ) -> Result<Self, CatalogError> {
        let rows = sqlx::query_as::<_, StageRow>(
            "SELECT id, organization_id, entity_kind, status_type, name, display_order
             FROM status_catalog_stages
             WHERE organization_id = ?1 AND entity_kind = 'TRIP'
             ORDER BY display_order",
        )
        .bind(organization_id.0)
        .fetch_all(executor)
        .await?;

        let stages = rows
            .into_iter()
            .map(StatusCatalogStage::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { stages })
    }

    pub fn stage(&self, status: TripStatus) -> Result<&StatusCatalogStage, CatalogError> {
        self.stages
            .iter()
            .find(|stage| stage.status_type == status.as_str())
            .ok_or_else(|| CatalogError::StageNotConfigured {
                entity_kind: CatalogEntityKind::Trip.as_str(),
                status_type: status.as_str().to_string(),
            })
    }

    pub fn display_order(&self, status: TripStatus) -> Result<i64, CatalogError> {
        self.stage(status).map(|stage| stage.display_order)
    }

    pub fn stages(&self) -> &[StatusCatalogStage] {
        &self.stages
    }
}

/// Insert one catalog stage. Admin/config concern; exposed for seeding.
pub async fn insert_stage<'e>(
    executor: impl SqliteExecutor<'e>,
    organization_id: OrganizationId,
    entity_kind: CatalogEntityKind,
    status_type: &str,
    name: &str,
    display_order: i64,
) -> Result<StageId, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO status_catalog_stages
             (organization_id, entity_kind, status_type, name, display_order)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(organization_id.0)
    .bind(entity_kind.as_str())
    .bind(status_type)
    .bind(name)
    .bind(display_order)
    .execute(executor)
    .await?;

    Ok(StageId(result.last_insert_rowid()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{seed_organization, seed_trip_catalog, setup_test_db};

    #[tokio::test]
    async fn loaded_catalog_is_ordered_and_resolves_stages() {
        let pool = setup_test_db().await;
        let org = seed_organization(&pool, "org1").await;
        seed_trip_catalog(&pool, org).await;

        let catalog = TripStageCatalog::load(&pool, org).await.unwrap();

        let orders: Vec<i64> = catalog
            .stages()
            .iter()
            .map(|stage| stage.display_order)
            .collect();
        let mut sorted = orders.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(orders, sorted, "display_order must be strictly increasing");

        let wfp = catalog.stage(TripStatus::WaitingForPickup).unwrap();
        let delivered = catalog.stage(TripStatus::Delivered).unwrap();
        assert!(wfp.display_order < delivered.display_order);
    }

    #[tokio::test]
    async fn missing_stage_is_a_configuration_failure() {
        let pool = setup_test_db().await;
        let org = seed_organization(&pool, "org1").await;
        // Only NEW is configured; WAITING_FOR_PICKUP is absent.
        insert_stage(&pool, org, CatalogEntityKind::Trip, "NEW", "New", 1)
            .await
            .unwrap();

        let catalog = TripStageCatalog::load(&pool, org).await.unwrap();
        let err = catalog.stage(TripStatus::WaitingForPickup).unwrap_err();
        assert!(matches!(err, CatalogError::StageNotConfigured { .. }));

        let err = require_stage(&pool, org, CatalogEntityKind::Trip, "WAITING_FOR_PICKUP")
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::StageNotConfigured { .. }));
    }

    #[tokio::test]
    async fn duplicate_display_order_is_rejected_by_schema() {
        let pool = setup_test_db().await;
        let org = seed_organization(&pool, "org1").await;
        insert_stage(&pool, org, CatalogEntityKind::Trip, "NEW", "New", 1)
            .await
            .unwrap();
        let err = insert_stage(
            &pool,
            org,
            CatalogEntityKind::Trip,
            "CONFIRMED",
            "Confirmed",
            1,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, sqlx::Error::Database(_)));
    }

    #[tokio::test]
    async fn trip_and_group_sequences_are_independent() {
        let pool = setup_test_db().await;
        let org = seed_organization(&pool, "org1").await;
        insert_stage(&pool, org, CatalogEntityKind::Trip, "NEW", "New", 1)
            .await
            .unwrap();
        // Same display_order in the group sequence is fine.
        insert_stage(&pool, org, CatalogEntityKind::OrderGroup, "PLAN", "Plan", 1)
            .await
            .unwrap();

        let stage = require_stage(&pool, org, CatalogEntityKind::OrderGroup, "PLAN")
            .await
            .unwrap();
        assert_eq!(stage.entity_kind, CatalogEntityKind::OrderGroup);
    }
}
