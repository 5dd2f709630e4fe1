//! Error taxonomy for lifecycle transitions and report queries.
//! Separates user-visible validation failures from retryable conflicts,
//! external-dependency failures, and opaque persistence errors.

use crate::ids::{OrderGroupId, OrderId, TripId};
use crate::status::{ParseStatusError, SubjectKind};

/// User-visible validation failures. Non-retryable without changing the
/// input: the caller sent a reference that does not resolve, or the
/// organization has not configured a required catalog stage.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("organization has no '{status_type}' stage configured for {entity_kind}")]
    StageNotConfigured {
        entity_kind: &'static str,
        status_type: String,
    },

    #[error("{kind} {id} not found")]
    NotFound { kind: SubjectKind, id: i64 },

    #[error("organization {0} not found")]
    OrganizationNotFound(crate::ids::OrganizationId),

    #[error("order group with code '{0}' not found")]
    GroupCodeNotFound(String),

    #[error("order {order_id} is not a member of order group {group_id}")]
    NotAMember {
        order_id: OrderId,
        group_id: OrderGroupId,
    },

    #[error("no trips selected for transition")]
    EmptySelection,

    #[error("could not generate a unique code after {attempts} attempts")]
    CodeGenerationExhausted { attempts: u32 },

    #[error("report period start {start} is after end {end}")]
    InvalidPeriod {
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    },

    #[error("trip {trip_id} is canceled and cannot be advanced")]
    TripCanceled { trip_id: TripId },

    #[error(transparent)]
    Status(#[from] ParseStatusError),
}

/// External collaborator failures, surfaced distinctly so callers can
/// retry against the dependency rather than re-validating input.
#[derive(Debug, thiserror::Error)]
pub enum ExternalError {
    #[error("warehouse integration rejected the request: {status}")]
    Warehouse { status: String },
}

/// Failure of a lifecycle transition. Everything inside the transition's
/// transaction either commits or leaves no trace.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Concurrent modification of the same subject. The caller may retry
    /// the whole transition: re-appending the same target status is safe.
    #[error("transition conflicted with a concurrent write, retry: {0}")]
    Conflict(#[source] sqlx::Error),

    #[error(transparent)]
    External(#[from] ExternalError),

    #[error("persistence failure")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for TransitionError {
    fn from(err: sqlx::Error) -> Self {
        if is_conflict(&err) {
            Self::Conflict(err)
        } else {
            Self::Database(err)
        }
    }
}

impl From<ParseStatusError> for TransitionError {
    fn from(err: ParseStatusError) -> Self {
        Self::Validation(ValidationError::Status(err))
    }
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6) mean another writer held the
/// database past the busy timeout; the transition can be retried whole.
fn is_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("5" | "6" | "517" | "262"))
        }
        _ => false,
    }
}

/// Row-mapping failures shared by the entity repositories: a stored
/// status or decimal column that no longer parses is corruption, not a
/// caller mistake, and surfaces as a decode-level database error.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Status(#[from] ParseStatusError),

    #[error("invalid decimal value in stored row: {0}")]
    Decimal(#[from] rust_decimal::Error),

    #[error("persistence failure")]
    Database(#[from] sqlx::Error),
}

impl From<RepoError> for TransitionError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Status(e) => Self::Database(sqlx::Error::Decode(Box::new(e))),
            RepoError::Decimal(e) => Self::Database(sqlx::Error::Decode(Box::new(e))),
            RepoError::Database(e) => e.into(),
        }
    }
}

impl From<RepoError> for ReportError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Status(e) => Self::Database(sqlx::Error::Decode(Box::new(e))),
            RepoError::Decimal(e) => Self::Database(sqlx::Error::Decode(Box::new(e))),
            RepoError::Database(e) => Self::Database(e),
        }
    }
}

/// Failure of a report query. Reports never write, so there is no
/// conflict variant.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("persistence failure")]
    Database(#[from] sqlx::Error),
}

impl From<ParseStatusError> for ReportError {
    fn from(err: ParseStatusError) -> Self {
        Self::Validation(ValidationError::Status(err))
    }
}
