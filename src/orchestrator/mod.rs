//! Lifecycle orchestrator.
//!
//! Owns every legal transition for orders, trips, and order groups. The
//! contract is identical for all of them: validate preconditions, apply
//! the full cascading write set inside one transaction, commit, then
//! fan out notifications best-effort through the outbox. The ledger and
//! the denormalized status mirrors are written together and can never
//! disagree; on any failure nothing partially applied is visible.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::sync::Arc;
use tracing::warn;

use crate::catalog::{self, CatalogEntityKind};
use crate::error::{TransitionError, ValidationError};
use crate::ids::{ActorId, OrderGroupId, OrderId, OrganizationId, TripId};
use crate::notification::{self, Notifier};
use crate::status::{OrderGroupStatus, OrderStatus, SubjectKind, SubjectStatus, TripStatus};
use crate::status_event::{self, StatusEvent, SubjectRef};
use crate::warehouse::WarehouseClient;
use crate::{order, order_group, trip};

mod dispatch;
mod scheduler;
mod warehouse;

pub use dispatch::{CheckInTarget, GeoCheckIn};
pub use scheduler::CreatedGroup;
pub use warehouse::InboundHandoff;

const CODE_LENGTH: usize = 8;

pub struct Orchestrator {
    pool: SqlitePool,
    notifier: Arc<dyn Notifier>,
    warehouse: Arc<dyn WarehouseClient>,
    code_attempts: u32,
    outbox_batch: u32,
}

impl Orchestrator {
    pub fn new(
        pool: SqlitePool,
        notifier: Arc<dyn Notifier>,
        warehouse: Arc<dyn WarehouseClient>,
    ) -> Self {
        Self {
            pool,
            notifier,
            warehouse,
            code_attempts: 10,
            outbox_batch: 64,
        }
    }

    /// Override the code-generation retry budget and outbox drain batch.
    #[must_use]
    pub fn with_limits(mut self, code_attempts: u32, outbox_batch: u32) -> Self {
        self.code_attempts = code_attempts;
        self.outbox_batch = outbox_batch;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Post-commit notification fan-out. Failures are logged and left in
    /// the outbox for the next drain; they never surface to the caller.
    pub(crate) async fn drain_outbox_best_effort(&self) {
        if let Err(err) =
            notification::drain_outbox(&self.pool, self.notifier.as_ref(), self.outbox_batch).await
        {
            warn!("post-commit outbox drain failed: {err}");
        }
    }
}

/// Append a trip status event and rewrite the trip's status mirror in the
/// same transaction. The stage for the target status must be configured.
pub(crate) async fn append_trip_status(
    tx: &mut Transaction<'_, Sqlite>,
    organization_id: OrganizationId,
    trip_id: TripId,
    status: TripStatus,
    actor_id: ActorId,
    at: DateTime<Utc>,
) -> Result<StatusEvent, TransitionError> {
    let stage = catalog::require_stage(
        &mut **tx,
        organization_id,
        CatalogEntityKind::Trip,
        status.as_str(),
    )
    .await?;

    let event = status_event::append(
        &mut **tx,
        SubjectRef::Trip(trip_id),
        SubjectStatus::Trip(status),
        Some(stage.id),
        actor_id,
        at,
    )
    .await?;

    trip::set_last_status(&mut **tx, trip_id, status).await?;

    Ok(event)
}

/// Append an order status event and rewrite the order's status mirror.
/// Orders have no ordered catalog, so no stage is referenced.
pub(crate) async fn append_order_status(
    tx: &mut Transaction<'_, Sqlite>,
    order_id: OrderId,
    status: OrderStatus,
    actor_id: ActorId,
    at: DateTime<Utc>,
) -> Result<StatusEvent, TransitionError> {
    let event = status_event::append(
        &mut **tx,
        SubjectRef::Order(order_id),
        SubjectStatus::Order(status),
        None,
        actor_id,
        at,
    )
    .await?;

    order::set_status(&mut **tx, order_id, status).await?;

    Ok(event)
}

/// Append an order-group status event and rewrite the group's status
/// mirror. The group-stage catalog must contain the target status.
pub(crate) async fn append_group_status(
    tx: &mut Transaction<'_, Sqlite>,
    organization_id: OrganizationId,
    group_id: OrderGroupId,
    status: OrderGroupStatus,
    actor_id: ActorId,
    at: DateTime<Utc>,
) -> Result<StatusEvent, TransitionError> {
    let stage = catalog::require_stage(
        &mut **tx,
        organization_id,
        CatalogEntityKind::OrderGroup,
        status.as_str(),
    )
    .await?;

    let event = status_event::append(
        &mut **tx,
        SubjectRef::OrderGroup(group_id),
        SubjectStatus::OrderGroup(status),
        Some(stage.id),
        actor_id,
        at,
    )
    .await?;

    order_group::set_status(&mut **tx, group_id, status).await?;

    Ok(event)
}

/// Group completion gates, applied after any trip status change within
/// the same transaction.
///
/// The group advances to DELIVERED only once every member trip has
/// reached at least DELIVERED, and to COMPLETED only once every trip has
/// reached COMPLETED. The status guard keeps each milestone event
/// single-shot.
pub(crate) async fn apply_group_gates(
    tx: &mut Transaction<'_, Sqlite>,
    organization_id: OrganizationId,
    group_id: OrderGroupId,
    actor_id: ActorId,
    at: DateTime<Utc>,
) -> Result<(), TransitionError> {
    let trips = trip::find_for_group(&mut **tx, group_id).await?;
    if trips.is_empty() {
        return Ok(());
    }

    let group = order_group::find(&mut **tx, group_id)
        .await?
        .ok_or(ValidationError::NotFound {
            kind: SubjectKind::OrderGroup,
            id: group_id.0,
        })?;

    let all_completed = trips
        .iter()
        .all(|trip| trip.last_status == TripStatus::Completed);
    let all_delivered = trips.iter().all(|trip| {
        matches!(
            trip.last_status,
            TripStatus::Delivered | TripStatus::Completed
        )
    });

    if all_completed && group.status != OrderGroupStatus::Completed {
        append_group_status(
            tx,
            organization_id,
            group_id,
            OrderGroupStatus::Completed,
            actor_id,
            at,
        )
        .await?;
    } else if all_delivered
        && !all_completed
        && !matches!(
            group.status,
            OrderGroupStatus::Delivered | OrderGroupStatus::Completed
        )
    {
        append_group_status(
            tx,
            organization_id,
            group_id,
            OrderGroupStatus::Delivered,
            actor_id,
            at,
        )
        .await?;
    }

    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum CodeKind {
    Order,
    Trip,
    Group,
}

impl CodeKind {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Order => "ORD",
            Self::Trip => "TRP",
            Self::Group => "GRP",
        }
    }
}

/// Generate a unique public code with bounded retries. The uniqueness
/// check races concurrent generators; the UNIQUE constraint on the code
/// column is the final arbiter.
pub(crate) async fn generate_unique_code(
    conn: &mut SqliteConnection,
    kind: CodeKind,
    attempts: u32,
) -> Result<String, TransitionError> {
    for _ in 0..attempts {
        let code = random_code(kind.prefix());
        let taken = match kind {
            CodeKind::Order => order::exists_code(&mut *conn, &code).await?,
            CodeKind::Trip => trip::exists_code(&mut *conn, &code).await?,
            CodeKind::Group => order_group::exists_code(&mut *conn, &code).await?,
        };
        if !taken {
            return Ok(code);
        }
    }

    Err(ValidationError::CodeGenerationExhausted { attempts }.into())
}

fn random_code(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LENGTH)
        .map(char::from)
        .collect();

    format!("{prefix}-{}", suffix.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_codes_carry_the_prefix_and_length() {
        let code = random_code("TRP");
        assert!(code.starts_with("TRP-"));
        assert_eq!(code.len(), 4 + CODE_LENGTH);
        assert!(code.chars().skip(4).all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn consecutive_codes_differ() {
        assert_ne!(random_code("GRP"), random_code("GRP"));
    }
}
