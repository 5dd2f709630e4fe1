//! Append-only status ledger.
//!
//! The ledger is the source of truth for a subject's current status: the
//! most recent event wins. It is deliberately dumb -- transition legality
//! lives in the orchestrator, and every append runs inside the
//! orchestrator's transaction next to the denormalized status mirror so
//! the two can never disagree.
//!
//! Events are never edited. A correction is a new event; unpublishing a
//! trip or order soft-voids its events instead of deleting them.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::error::RepoError;
use crate::ids::{ActorId, OrderGroupId, OrderId, StageId, StatusEventId, TripId};
use crate::status::{OrderGroupStatus, ParseStatusError, SubjectKind, SubjectStatus, TripStatus};

/// A typed reference to the subject a ledger row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectRef {
    Trip(TripId),
    Order(OrderId),
    OrderGroup(OrderGroupId),
}

impl SubjectRef {
    pub const fn kind(self) -> SubjectKind {
        match self {
            Self::Trip(_) => SubjectKind::Trip,
            Self::Order(_) => SubjectKind::Order,
            Self::OrderGroup(_) => SubjectKind::OrderGroup,
        }
    }

    pub const fn raw_id(self) -> i64 {
        match self {
            Self::Trip(TripId(id)) | Self::Order(OrderId(id)) | Self::OrderGroup(OrderGroupId(id)) => {
                id
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub id: StatusEventId,
    pub subject_id: i64,
    pub subject_kind: SubjectKind,
    pub status_type: String,
    pub catalog_stage_id: Option<StageId>,
    pub actor_id: ActorId,
    pub voided: bool,
    pub created_at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn trip_status(&self) -> Result<TripStatus, ParseStatusError> {
        self.status_type.parse()
    }

    pub fn group_status(&self) -> Result<OrderGroupStatus, ParseStatusError> {
        self.status_type.parse()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StatusEventRow {
    id: i64,
    subject_id: i64,
    subject_kind: String,
    status_type: String,
    catalog_stage_id: Option<i64>,
    actor_id: i64,
    voided: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<StatusEventRow> for StatusEvent {
    type Error = ParseStatusError;

    fn try_from(row: StatusEventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: StatusEventId(row.id),
            subject_id: row.subject_id,
            subject_kind: row.subject_kind.parse()?,
            status_type: row.status_type,
            catalog_stage_id: row.catalog_stage_id.map(StageId),
            actor_id: ActorId(row.actor_id),
            voided: row.voided,
            created_at: row.created_at,
        })
    }
}

const SELECT_COLUMNS: &str = "id, subject_id, subject_kind, status_type, catalog_stage_id, \
                              actor_id, voided, created_at";

/// Append one event. Always succeeds if the subject row exists; legality
/// of the transition is the caller's concern.
pub async fn append<'e>(
    executor: impl SqliteExecutor<'e>,
    subject: SubjectRef,
    status: SubjectStatus,
    catalog_stage_id: Option<StageId>,
    actor_id: ActorId,
    at: DateTime<Utc>,
) -> Result<StatusEvent, sqlx::Error> {
    debug_assert_eq!(subject.kind(), status.kind());

    let result = sqlx::query(
        "INSERT INTO status_events
             (subject_id, subject_kind, status_type, catalog_stage_id, actor_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(subject.raw_id())
    .bind(subject.kind().as_str())
    .bind(status.as_str())
    .bind(catalog_stage_id.map(|id| id.0))
    .bind(actor_id.0)
    .bind(at)
    .execute(executor)
    .await?;

    Ok(StatusEvent {
        id: StatusEventId(result.last_insert_rowid()),
        subject_id: subject.raw_id(),
        subject_kind: subject.kind(),
        status_type: status.as_str().to_string(),
        catalog_stage_id,
        actor_id,
        voided: false,
        created_at: at,
    })
}

/// The most recent non-voided event for a subject, if any.
pub async fn latest<'e>(
    executor: impl SqliteExecutor<'e>,
    subject: SubjectRef,
) -> Result<Option<StatusEvent>, RepoError> {
    let row = sqlx::query_as::<_, StatusEventRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM status_events
         WHERE subject_id = ?1 AND subject_kind = ?2 AND voided = 0
         ORDER BY created_at DESC, id DESC
         LIMIT 1",
    ))
    .bind(subject.raw_id())
    .bind(subject.kind().as_str())
    .fetch_optional(executor)
    .await?;

    Ok(row.map(StatusEvent::try_from).transpose()?)
}

/// Full non-voided history of a subject, oldest first.
pub async fn history<'e>(
    executor: impl SqliteExecutor<'e>,
    subject: SubjectRef,
) -> Result<Vec<StatusEvent>, RepoError> {
    let rows = sqlx::query_as::<_, StatusEventRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM status_events
         WHERE subject_id = ?1 AND subject_kind = ?2 AND voided = 0
         ORDER BY created_at, id",
    ))
    .bind(subject.raw_id())
    .bind(subject.kind().as_str())
    .fetch_all(executor)
    .await?;

    rows.into_iter()
        .map(|row| StatusEvent::try_from(row).map_err(RepoError::from))
        .collect()
}

/// Most recent event of the given status type, searching newest first.
/// Recovers, e.g., the instant a trip first became WAITING_FOR_PICKUP
/// even after later statuses superseded it.
pub async fn first_matching<'e>(
    executor: impl SqliteExecutor<'e>,
    subject: SubjectRef,
    status: SubjectStatus,
) -> Result<Option<StatusEvent>, RepoError> {
    debug_assert_eq!(subject.kind(), status.kind());

    let row = sqlx::query_as::<_, StatusEventRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM status_events
         WHERE subject_id = ?1 AND subject_kind = ?2 AND status_type = ?3 AND voided = 0
         ORDER BY created_at DESC, id DESC
         LIMIT 1",
    ))
    .bind(subject.raw_id())
    .bind(subject.kind().as_str())
    .bind(status.as_str())
    .fetch_optional(executor)
    .await?;

    Ok(row.map(StatusEvent::try_from).transpose()?)
}

/// Soft-void a subject's events, keeping those of the given status type.
/// Used when an order is detached from its group: its non-NEW events are
/// voided while the NEW event survives.
pub async fn void_events_except<'e>(
    executor: impl SqliteExecutor<'e>,
    subject: SubjectRef,
    keep: SubjectStatus,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE status_events SET voided = 1
         WHERE subject_id = ?1 AND subject_kind = ?2 AND status_type != ?3",
    )
    .bind(subject.raw_id())
    .bind(subject.kind().as_str())
    .bind(keep.as_str())
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Soft-void every event of a subject. Used when the owning trip or group
/// is unpublished.
pub async fn void_all_events<'e>(
    executor: impl SqliteExecutor<'e>,
    subject: SubjectRef,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE status_events SET voided = 1
         WHERE subject_id = ?1 AND subject_kind = ?2",
    )
    .bind(subject.raw_id())
    .bind(subject.kind().as_str())
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
