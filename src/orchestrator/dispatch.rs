//! Dispatch transitions: handing a group to its drivers and advancing
//! trips through the catalog, including geo-tagged driver check-ins.
//!
//! Receiver selection varies by target status: PENDING_CONFIRMATION goes
//! to the assigned driver only, CONFIRMED to the default participant
//! fan-out, WAITING_FOR_PICKUP to the default fan-out plus the
//! accountant role.

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{Sqlite, Transaction};
use std::collections::BTreeSet;
use tracing::info;

use crate::catalog::{self, CatalogEntityKind};
use crate::error::{TransitionError, ValidationError};
use crate::ids::{ActorId, OrderGroupId, OrganizationId, StatusEventId, TripId};
use crate::notification::{self, NotificationEventType, NotificationIntent, OrgRole};
use crate::status::{OrderGroupStatus, SubjectKind, TripStatus};
use crate::trip::OrderTrip;
use crate::{order_group, party, trip};

use super::{Orchestrator, append_group_status, append_trip_status, apply_group_gates};

/// Target statuses reachable through a driver check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInTarget {
    PendingConfirmation,
    Confirmed,
    WaitingForPickup,
}

impl CheckInTarget {
    pub const fn status(self) -> TripStatus {
        match self {
            Self::PendingConfirmation => TripStatus::PendingConfirmation,
            Self::Confirmed => TripStatus::Confirmed,
            Self::WaitingForPickup => TripStatus::WaitingForPickup,
        }
    }
}

/// Optional geo tag supplied by the driver app with a check-in.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoCheckIn {
    pub longitude: f64,
    pub latitude: f64,
    pub message: Option<String>,
}

impl Orchestrator {
    /// Hand the whole group to its drivers: every trip of every member
    /// order advances to PENDING_CONFIRMATION and the group moves to
    /// IN_PROGRESS. Each assigned driver is notified -- only the driver.
    #[tracing::instrument(skip(self), level = tracing::Level::INFO)]
    pub async fn send_to_drivers(
        &self,
        organization_id: OrganizationId,
        group_id: OrderGroupId,
        actor_id: ActorId,
    ) -> Result<(), TransitionError> {
        let group = order_group::find(&self.pool, group_id)
            .await?
            .ok_or(ValidationError::NotFound {
                kind: SubjectKind::OrderGroup,
                id: group_id.0,
            })?;

        catalog::require_stage(
            &self.pool,
            organization_id,
            CatalogEntityKind::Trip,
            TripStatus::PendingConfirmation.as_str(),
        )
        .await?;

        let mut tx = self.pool.begin().await?;
        let at = Utc::now();

        let trips = trip::find_for_group(&mut *tx, group_id).await?;
        for t in &trips {
            append_trip_status(
                &mut tx,
                organization_id,
                t.id,
                TripStatus::PendingConfirmation,
                actor_id,
                at,
            )
            .await?;

            enqueue_trip_notification(
                &mut tx,
                organization_id,
                actor_id,
                t,
                &group.code,
                CheckInTarget::PendingConfirmation,
                at,
            )
            .await?;
        }

        append_group_status(
            &mut tx,
            organization_id,
            group_id,
            OrderGroupStatus::InProgress,
            actor_id,
            at,
        )
        .await?;

        tx.commit().await?;
        info!("group {} sent to drivers ({} trips)", group.code, trips.len());

        self.drain_outbox_best_effort().await;
        Ok(())
    }

    /// Advance a set of trips via driver check-in, optionally attaching a
    /// geo-tagged message to each new ledger event.
    #[tracing::instrument(skip(self, geo), level = tracing::Level::INFO)]
    pub async fn check_in_trips(
        &self,
        organization_id: OrganizationId,
        actor_id: ActorId,
        trip_ids: Vec<TripId>,
        target: CheckInTarget,
        geo: Option<GeoCheckIn>,
    ) -> Result<(), TransitionError> {
        if trip_ids.is_empty() {
            return Err(ValidationError::EmptySelection.into());
        }

        catalog::require_stage(
            &self.pool,
            organization_id,
            CatalogEntityKind::Trip,
            target.status().as_str(),
        )
        .await?;

        let mut tx = self.pool.begin().await?;
        let at = Utc::now();

        for trip_id in &trip_ids {
            let t = load_live_trip(&mut tx, *trip_id).await?;

            let event =
                append_trip_status(&mut tx, organization_id, t.id, target.status(), actor_id, at)
                    .await?;

            if let Some(geo) = &geo {
                insert_trip_message(&mut tx, t.id, event.id, geo, at).await?;
            }

            let group_code = group_code_of_trip(&mut tx, &t).await?;
            enqueue_trip_notification(
                &mut tx,
                organization_id,
                actor_id,
                &t,
                group_code.as_deref().unwrap_or(""),
                target,
                at,
            )
            .await?;
        }

        tx.commit().await?;
        self.drain_outbox_best_effort().await;
        Ok(())
    }

    /// Mark trips DELIVERED. Informational only -- no notification -- but
    /// each affected group's DELIVERED gate is evaluated in the same
    /// transaction.
    #[tracing::instrument(skip(self), level = tracing::Level::INFO)]
    pub async fn mark_trips_delivered(
        &self,
        organization_id: OrganizationId,
        actor_id: ActorId,
        trip_ids: Vec<TripId>,
    ) -> Result<(), TransitionError> {
        self.advance_trips_with_gates(organization_id, actor_id, trip_ids, TripStatus::Delivered)
            .await
    }

    /// Mark trips COMPLETED; each affected group's COMPLETED gate is
    /// evaluated in the same transaction.
    #[tracing::instrument(skip(self), level = tracing::Level::INFO)]
    pub async fn mark_trips_completed(
        &self,
        organization_id: OrganizationId,
        actor_id: ActorId,
        trip_ids: Vec<TripId>,
    ) -> Result<(), TransitionError> {
        self.advance_trips_with_gates(organization_id, actor_id, trip_ids, TripStatus::Completed)
            .await
    }

    /// Cancel trips. Reachable from most states; no notification and no
    /// group gates.
    #[tracing::instrument(skip(self), level = tracing::Level::INFO)]
    pub async fn cancel_trips(
        &self,
        organization_id: OrganizationId,
        actor_id: ActorId,
        trip_ids: Vec<TripId>,
    ) -> Result<(), TransitionError> {
        if trip_ids.is_empty() {
            return Err(ValidationError::EmptySelection.into());
        }

        catalog::require_stage(
            &self.pool,
            organization_id,
            CatalogEntityKind::Trip,
            TripStatus::Canceled.as_str(),
        )
        .await?;

        let mut tx = self.pool.begin().await?;
        let at = Utc::now();

        for trip_id in trip_ids {
            load_live_trip(&mut tx, trip_id).await?;
            append_trip_status(
                &mut tx,
                organization_id,
                trip_id,
                TripStatus::Canceled,
                actor_id,
                at,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn advance_trips_with_gates(
        &self,
        organization_id: OrganizationId,
        actor_id: ActorId,
        trip_ids: Vec<TripId>,
        status: TripStatus,
    ) -> Result<(), TransitionError> {
        if trip_ids.is_empty() {
            return Err(ValidationError::EmptySelection.into());
        }

        catalog::require_stage(
            &self.pool,
            organization_id,
            CatalogEntityKind::Trip,
            status.as_str(),
        )
        .await?;

        let mut tx = self.pool.begin().await?;
        let at = Utc::now();

        let mut touched_groups = BTreeSet::new();
        for trip_id in trip_ids {
            let t = load_live_trip(&mut tx, trip_id).await?;
            append_trip_status(&mut tx, organization_id, t.id, status, actor_id, at).await?;

            if let Some(group_id) = order_group::group_of_order(&mut *tx, t.order_id).await? {
                touched_groups.insert(group_id);
            }
        }

        for group_id in touched_groups {
            apply_group_gates(&mut tx, organization_id, group_id, actor_id, at).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

async fn load_live_trip(
    tx: &mut Transaction<'_, Sqlite>,
    trip_id: TripId,
) -> Result<OrderTrip, TransitionError> {
    let t = trip::find(&mut **tx, trip_id)
        .await?
        .filter(|t| t.published)
        .ok_or(ValidationError::NotFound {
            kind: SubjectKind::Trip,
            id: trip_id.0,
        })?;

    if t.last_status == TripStatus::Canceled {
        return Err(ValidationError::TripCanceled { trip_id }.into());
    }

    Ok(t)
}

async fn insert_trip_message(
    tx: &mut Transaction<'_, Sqlite>,
    trip_id: TripId,
    event_id: StatusEventId,
    geo: &GeoCheckIn,
    at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO trip_messages (trip_id, status_event_id, longitude, latitude, body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(trip_id.0)
    .bind(event_id.0)
    .bind(geo.longitude)
    .bind(geo.latitude)
    .bind(geo.message.as_deref())
    .bind(at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn group_code_of_trip(
    tx: &mut Transaction<'_, Sqlite>,
    t: &OrderTrip,
) -> Result<Option<String>, TransitionError> {
    let Some(group_id) = order_group::group_of_order(&mut **tx, t.order_id).await? else {
        return Ok(None);
    };

    Ok(order_group::find(&mut **tx, group_id)
        .await?
        .map(|group| group.code))
}

/// Build and enqueue the notification for a trip transition. Receivers
/// and payload vary with the target status.
async fn enqueue_trip_notification(
    tx: &mut Transaction<'_, Sqlite>,
    organization_id: OrganizationId,
    actor_id: ActorId,
    t: &OrderTrip,
    group_code: &str,
    target: CheckInTarget,
    at: DateTime<Utc>,
) -> Result<(), TransitionError> {
    let driver = match t.driver_id {
        Some(driver_id) => party::find_driver(&mut **tx, driver_id).await?,
        None => None,
    };

    let order_code: String = sqlx::query_scalar("SELECT code FROM orders WHERE id = ?1")
        .bind(t.order_id.0)
        .fetch_one(&mut **tx)
        .await?;

    let intent = match target {
        CheckInTarget::PendingConfirmation => {
            // The assigned driver, and only the driver.
            let Some(driver) = driver else {
                return Ok(());
            };
            NotificationIntent {
                event_type: NotificationEventType::TripPendingConfirmation,
                organization_id,
                actor_id,
                target_id: t.id.0,
                payload: json!({
                    "driverName": driver.full_name,
                    "orderCode": order_code,
                    "tripCode": t.code,
                    "groupCode": group_code,
                    "unit": driver.unit,
                    "vehicleNumber": t.vehicle_number,
                    "participantFullName": driver.full_name,
                    "weight": t.weight.to_string(),
                }),
                receivers: vec![driver.id().0],
                member_roles: vec![],
                broadcast_default: false,
            }
        }
        CheckInTarget::Confirmed => NotificationIntent {
            event_type: NotificationEventType::TripConfirmed,
            organization_id,
            actor_id,
            target_id: t.id.0,
            payload: json!({
                "driverName": driver.as_ref().map(|d| d.full_name.clone()),
                "tripCode": t.code,
                "orderCode": order_code,
                "groupCode": group_code,
            }),
            receivers: vec![],
            member_roles: vec![],
            broadcast_default: true,
        },
        CheckInTarget::WaitingForPickup => {
            let stage = catalog::require_stage(
                &mut **tx,
                organization_id,
                CatalogEntityKind::Trip,
                TripStatus::WaitingForPickup.as_str(),
            )
            .await?;

            NotificationIntent {
                event_type: NotificationEventType::TripWaitingForPickup,
                organization_id,
                actor_id,
                target_id: t.id.0,
                payload: json!({
                    "driverReportName": stage.name,
                    "driverReportId": stage.id.0,
                    "vehicleNumber": t.vehicle_number,
                }),
                receivers: vec![],
                member_roles: vec![OrgRole::Accountant],
                broadcast_default: true,
            }
        }
    };

    notification::enqueue(&mut **tx, &intent, at).await?;
    Ok(())
}
