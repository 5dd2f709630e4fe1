//! Notification seam and transactional outbox.
//!
//! Transitions never call the notifier directly. They write intents into
//! `notification_outbox` inside their transaction; after commit the
//! orchestrator drains the outbox and hands each intent to the
//! [`Notifier`] collaborator. A failed dispatch bumps the row's attempt
//! counter and is logged -- it never invalidates the committed transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteExecutor, SqlitePool};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::ids::{ActorId, OrganizationId};
use crate::status::ParseStatusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrgRole {
    Manager,
    Accountant,
    Dispatch,
}

impl OrgRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manager => "MANAGER",
            Self::Accountant => "ACCOUNTANT",
            Self::Dispatch => "DISPATCH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationEventType {
    TripPendingConfirmation,
    TripConfirmed,
    TripWaitingForPickup,
    OrderCompleted,
    GroupInStock,
    GroupInProgress,
    GroupCloseToExpiry,
}

impl NotificationEventType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TripPendingConfirmation => "TRIP_PENDING_CONFIRMATION",
            Self::TripConfirmed => "TRIP_CONFIRMED",
            Self::TripWaitingForPickup => "TRIP_WAITING_FOR_PICKUP",
            Self::OrderCompleted => "ORDER_COMPLETED",
            Self::GroupInStock => "GROUP_IN_STOCK",
            Self::GroupInProgress => "GROUP_IN_PROGRESS",
            Self::GroupCloseToExpiry => "GROUP_CLOSE_TO_EXPIRY",
        }
    }
}

impl FromStr for NotificationEventType {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRIP_PENDING_CONFIRMATION" => Ok(Self::TripPendingConfirmation),
            "TRIP_CONFIRMED" => Ok(Self::TripConfirmed),
            "TRIP_WAITING_FOR_PICKUP" => Ok(Self::TripWaitingForPickup),
            "ORDER_COMPLETED" => Ok(Self::OrderCompleted),
            "GROUP_IN_STOCK" => Ok(Self::GroupInStock),
            "GROUP_IN_PROGRESS" => Ok(Self::GroupInProgress),
            "GROUP_CLOSE_TO_EXPIRY" => Ok(Self::GroupCloseToExpiry),
            other => Err(ParseStatusError {
                kind: "notification event",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for NotificationEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One notification to fan out: who, about what, with which payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationIntent {
    pub event_type: NotificationEventType,
    pub organization_id: OrganizationId,
    pub actor_id: ActorId,
    pub target_id: i64,
    pub payload: serde_json::Value,
    /// Explicit receiver member ids (e.g. the assigned driver).
    pub receivers: Vec<i64>,
    /// Role-based broadcast on top of explicit receivers.
    pub member_roles: Vec<OrgRole>,
    /// Also fan out to the subject's default participants.
    pub broadcast_default: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("notification dispatch failed: {0}")]
pub struct NotifyError(pub String);

/// Fire-and-forget delivery collaborator. Implementations own their own
/// retry/delivery concerns; the core never awaits delivery guarantees.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, intent: &NotificationIntent) -> Result<(), NotifyError>;
}

/// Write an intent into the outbox. Called inside the transition's
/// transaction so an intent exists iff the transition committed.
pub async fn enqueue<'e>(
    executor: impl SqliteExecutor<'e>,
    intent: &NotificationIntent,
    at: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let receivers = serde_json::to_string(&intent.receivers)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    let roles: Vec<&str> = intent.member_roles.iter().map(|role| role.as_str()).collect();
    let roles = serde_json::to_string(&roles).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    let payload = intent.payload.to_string();

    let result = sqlx::query(
        "INSERT INTO notification_outbox
             (organization_id, actor_id, event_type, target_id, payload,
              receivers, member_roles, broadcast_default, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(intent.organization_id.0)
    .bind(intent.actor_id.0)
    .bind(intent.event_type.as_str())
    .bind(intent.target_id)
    .bind(payload)
    .bind(receivers)
    .bind(roles)
    .bind(intent.broadcast_default)
    .bind(at)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    organization_id: i64,
    actor_id: i64,
    event_type: String,
    target_id: i64,
    payload: String,
    receivers: String,
    member_roles: String,
    broadcast_default: bool,
}

impl OutboxRow {
    fn into_intent(self) -> Result<(i64, NotificationIntent), NotifyError> {
        let event_type = self
            .event_type
            .parse()
            .map_err(|e: ParseStatusError| NotifyError(e.to_string()))?;
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| NotifyError(format!("bad payload: {e}")))?;
        let receivers: Vec<i64> = serde_json::from_str(&self.receivers)
            .map_err(|e| NotifyError(format!("bad receivers: {e}")))?;
        let roles: Vec<String> = serde_json::from_str(&self.member_roles)
            .map_err(|e| NotifyError(format!("bad roles: {e}")))?;
        let member_roles = roles
            .iter()
            .map(|role| match role.as_str() {
                "MANAGER" => Ok(OrgRole::Manager),
                "ACCOUNTANT" => Ok(OrgRole::Accountant),
                "DISPATCH" => Ok(OrgRole::Dispatch),
                other => Err(NotifyError(format!("unknown role: {other}"))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok((
            self.id,
            NotificationIntent {
                event_type,
                organization_id: OrganizationId(self.organization_id),
                actor_id: ActorId(self.actor_id),
                target_id: self.target_id,
                payload,
                receivers,
                member_roles,
                broadcast_default: self.broadcast_default,
            },
        ))
    }
}

/// Dispatch pending outbox rows, oldest first. Returns how many were
/// delivered. Per-row failures are logged and retried on the next drain;
/// they never propagate.
pub async fn drain_outbox(
    pool: &SqlitePool,
    notifier: &dyn Notifier,
    batch_size: u32,
) -> Result<u32, sqlx::Error> {
    let rows = sqlx::query_as::<_, OutboxRow>(
        "SELECT id, organization_id, actor_id, event_type, target_id, payload,
                receivers, member_roles, broadcast_default
         FROM notification_outbox
         WHERE dispatched = 0
         ORDER BY created_at, id
         LIMIT ?1",
    )
    .bind(i64::from(batch_size))
    .fetch_all(pool)
    .await?;

    let mut delivered = 0;
    for row in rows {
        let row_id = row.id;
        let outcome = match row.into_intent() {
            Ok((_, intent)) => notifier.dispatch(&intent).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                sqlx::query(
                    "UPDATE notification_outbox
                     SET dispatched = 1, dispatched_at = ?1, attempts = attempts + 1
                     WHERE id = ?2",
                )
                .bind(Utc::now())
                .bind(row_id)
                .execute(pool)
                .await?;
                delivered += 1;
            }
            Err(err) => {
                warn!("outbox row {row_id} dispatch failed, will retry: {err}");
                sqlx::query("UPDATE notification_outbox SET attempts = attempts + 1 WHERE id = ?1")
                    .bind(row_id)
                    .execute(pool)
                    .await?;
            }
        }
    }

    debug!("outbox drain delivered {delivered} notifications");
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingNotifier, seed_organization, setup_test_db};
    use serde_json::json;

    fn intent(event_type: NotificationEventType) -> NotificationIntent {
        NotificationIntent {
            event_type,
            organization_id: OrganizationId(1),
            actor_id: ActorId(9),
            target_id: 42,
            payload: json!({"tripCode": "TRIP-1"}),
            receivers: vec![7],
            member_roles: vec![OrgRole::Accountant],
            broadcast_default: true,
        }
    }

    #[tokio::test]
    async fn enqueued_intents_survive_the_round_trip() {
        let pool = setup_test_db().await;
        seed_organization(&pool, "org1").await;
        let notifier = RecordingNotifier::default();
        let sent = intent(NotificationEventType::TripWaitingForPickup);

        enqueue(&pool, &sent, Utc::now()).await.unwrap();
        let delivered = drain_outbox(&pool, &notifier, 16).await.unwrap();
        assert_eq!(delivered, 1);

        let received = notifier.dispatched();
        assert_eq!(received, vec![sent]);
    }

    #[tokio::test]
    async fn dispatched_rows_are_not_redelivered() {
        let pool = setup_test_db().await;
        seed_organization(&pool, "org1").await;
        let notifier = RecordingNotifier::default();

        enqueue(&pool, &intent(NotificationEventType::TripConfirmed), Utc::now())
            .await
            .unwrap();
        drain_outbox(&pool, &notifier, 16).await.unwrap();
        let second = drain_outbox(&pool, &notifier, 16).await.unwrap();

        assert_eq!(second, 0);
        assert_eq!(notifier.dispatched().len(), 1);
    }

    #[tokio::test]
    async fn failed_dispatch_is_kept_for_retry() {
        let pool = setup_test_db().await;
        seed_organization(&pool, "org1").await;
        let notifier = RecordingNotifier::failing();

        enqueue(&pool, &intent(NotificationEventType::GroupInStock), Utc::now())
            .await
            .unwrap();
        let delivered = drain_outbox(&pool, &notifier, 16).await.unwrap();
        assert_eq!(delivered, 0);

        let attempts: i64 =
            sqlx::query_scalar("SELECT attempts FROM notification_outbox WHERE dispatched = 0")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(attempts, 1);

        // The collaborator recovers; the next drain delivers it.
        let notifier = RecordingNotifier::default();
        let delivered = drain_outbox(&pool, &notifier, 16).await.unwrap();
        assert_eq!(delivered, 1);
    }
}
