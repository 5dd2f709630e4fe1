//! Scheduler transitions: creating an order group with its trips, adding
//! more orders to an existing group, and removing orders from one.
//!
//! Bulk creation deliberately dispatches no notification; the dispatch
//! step (`send_to_drivers`) is where drivers are first told.

use chrono::Utc;
use sqlx::{Sqlite, Transaction};
use std::collections::BTreeSet;
use tracing::info;

use crate::catalog::{self, CatalogEntityKind};
use crate::error::{TransitionError, ValidationError};
use crate::ids::{ActorId, OrderGroupId, OrderId, OrganizationId, TripId};
use crate::status::{OrderGroupStatus, OrderStatus, SubjectKind, SubjectStatus, TripStatus};
use crate::status_event::{self, SubjectRef};
use crate::trip::NewTrip;
use crate::{order, order_group, trip};

use super::{
    CodeKind, Orchestrator, append_group_status, append_order_status, generate_unique_code,
};

/// Result of the scheduler transition: the new group and its trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedGroup {
    pub group_id: OrderGroupId,
    pub code: String,
    pub trip_ids: Vec<TripId>,
}

impl Orchestrator {
    /// Create trips for a new order group.
    ///
    /// Every trip gets a NEW ledger event; every distinct member order is
    /// advanced RECEIVED then IN_PROGRESS; the group is created at PLAN
    /// with its matching group event. All of it commits atomically.
    #[tracing::instrument(skip(self, trips), level = tracing::Level::INFO)]
    pub async fn create_order_group(
        &self,
        organization_id: OrganizationId,
        actor_id: ActorId,
        trips: Vec<NewTrip>,
    ) -> Result<CreatedGroup, TransitionError> {
        if trips.is_empty() {
            return Err(ValidationError::EmptySelection.into());
        }

        // Fail fast before the transaction: the NEW trip stage and the
        // PLAN group stage must be configured.
        catalog::require_stage(
            &self.pool,
            organization_id,
            CatalogEntityKind::Trip,
            TripStatus::New.as_str(),
        )
        .await?;
        catalog::require_stage(
            &self.pool,
            organization_id,
            CatalogEntityKind::OrderGroup,
            OrderGroupStatus::Plan.as_str(),
        )
        .await?;

        let mut tx = self.pool.begin().await?;
        let at = Utc::now();

        let code = generate_unique_code(&mut tx, CodeKind::Group, self.code_attempts).await?;
        let group_id = order_group::insert(&mut *tx, organization_id, &code, at).await?;
        append_group_status(
            &mut tx,
            organization_id,
            group_id,
            OrderGroupStatus::Plan,
            actor_id,
            at,
        )
        .await?;

        enroll_orders_and_trips(&mut tx, self.code_attempts, organization_id, group_id, &trips, actor_id)
            .await?;

        let trip_ids = created_trip_ids(&mut tx, group_id).await?;
        tx.commit().await?;

        info!("created order group {code} with {} trips", trip_ids.len());
        Ok(CreatedGroup {
            group_id,
            code,
            trip_ids,
        })
    }

    /// Add more orders (with their trips) to an existing group. Same
    /// per-order and per-trip writes as group creation; membership rows
    /// are extended. No notification.
    #[tracing::instrument(skip(self, trips), level = tracing::Level::INFO)]
    pub async fn add_orders_to_group(
        &self,
        organization_id: OrganizationId,
        group_id: OrderGroupId,
        actor_id: ActorId,
        trips: Vec<NewTrip>,
    ) -> Result<Vec<TripId>, TransitionError> {
        if trips.is_empty() {
            return Err(ValidationError::EmptySelection.into());
        }

        order_group::find(&self.pool, group_id)
            .await?
            .ok_or(ValidationError::NotFound {
                kind: SubjectKind::OrderGroup,
                id: group_id.0,
            })?;

        let mut tx = self.pool.begin().await?;

        let before: BTreeSet<TripId> = created_trip_ids(&mut tx, group_id).await?.into_iter().collect();
        enroll_orders_and_trips(&mut tx, self.code_attempts, organization_id, group_id, &trips, actor_id)
            .await?;
        let added = created_trip_ids(&mut tx, group_id)
            .await?
            .into_iter()
            .filter(|id| !before.contains(id))
            .collect();

        tx.commit().await?;
        Ok(added)
    }

    /// Remove orders from a group, reverting each to NEW.
    ///
    /// The order's non-NEW ledger events are voided, its trips are
    /// unpublished with their events, and the membership link detached.
    /// When no members remain the group itself is unpublished.
    #[tracing::instrument(skip(self), level = tracing::Level::INFO)]
    pub async fn remove_orders_from_group(
        &self,
        organization_id: OrganizationId,
        group_id: OrderGroupId,
        actor_id: ActorId,
        order_ids: Vec<OrderId>,
    ) -> Result<(), TransitionError> {
        if order_ids.is_empty() {
            return Err(ValidationError::EmptySelection.into());
        }

        let members: BTreeSet<OrderId> = order_group::member_order_ids(&self.pool, group_id)
            .await?
            .into_iter()
            .collect();
        for order_id in &order_ids {
            if !members.contains(order_id) {
                return Err(ValidationError::NotAMember {
                    order_id: *order_id,
                    group_id,
                }
                .into());
            }
        }

        let mut tx = self.pool.begin().await?;

        for order_id in &order_ids {
            detach_order(&mut tx, group_id, *order_id).await?;
        }

        let remaining = order_group::member_count(&mut *tx, group_id).await?;
        if remaining == 0 {
            order_group::unpublish(&mut *tx, group_id).await?;
            status_event::void_all_events(&mut *tx, SubjectRef::OrderGroup(group_id)).await?;
            info!("order group {group_id} emptied and unpublished");
        }

        tx.commit().await?;
        Ok(())
    }
}

/// Per-order and per-trip write set shared by group creation and
/// order addition. Orders already counted as members are not re-advanced.
async fn enroll_orders_and_trips(
    tx: &mut Transaction<'_, Sqlite>,
    code_attempts: u32,
    organization_id: OrganizationId,
    group_id: OrderGroupId,
    trips: &[NewTrip],
    actor_id: ActorId,
) -> Result<(), TransitionError> {
    let at = Utc::now();
    let existing: BTreeSet<OrderId> = order_group::member_order_ids(&mut **tx, group_id)
        .await?
        .into_iter()
        .collect();

    let order_ids: BTreeSet<OrderId> = trips.iter().map(|spec| spec.order_id).collect();
    for order_id in order_ids {
        order::find(&mut **tx, order_id)
            .await?
            .ok_or(ValidationError::NotFound {
                kind: SubjectKind::Order,
                id: order_id.0,
            })?;

        if existing.contains(&order_id) {
            continue;
        }

        order_group::add_member(&mut **tx, group_id, order_id).await?;

        // Backfill the genesis NEW event for orders with no ledger rows yet.
        if status_event::latest(&mut **tx, SubjectRef::Order(order_id))
            .await?
            .is_none()
        {
            append_order_status(tx, order_id, OrderStatus::New, actor_id, at).await?;
        }

        append_order_status(tx, order_id, OrderStatus::Received, actor_id, at).await?;
        append_order_status(tx, order_id, OrderStatus::InProgress, actor_id, at).await?;
    }

    for spec in trips {
        let code = generate_unique_code(tx, CodeKind::Trip, code_attempts).await?;
        let trip_id = trip::insert(&mut **tx, organization_id, &code, spec, at).await?;

        // Trip creation precedes its ledger append; the NEW stage was
        // checked as a precondition but is resolved again here so the
        // event references the stage row.
        super::append_trip_status(tx, organization_id, trip_id, TripStatus::New, actor_id, at)
            .await?;
    }

    Ok(())
}

async fn detach_order(
    tx: &mut Transaction<'_, Sqlite>,
    group_id: OrderGroupId,
    order_id: OrderId,
) -> Result<(), TransitionError> {
    let trips = trip_ids_of_order(tx, order_id).await?;
    for trip_id in trips {
        trip::unpublish(&mut **tx, trip_id).await?;
        status_event::void_all_events(&mut **tx, SubjectRef::Trip(trip_id)).await?;
    }

    status_event::void_events_except(
        &mut **tx,
        SubjectRef::Order(order_id),
        SubjectStatus::Order(OrderStatus::New),
    )
    .await?;
    order::set_status(&mut **tx, order_id, OrderStatus::New).await?;
    order_group::remove_member(&mut **tx, group_id, order_id).await?;

    Ok(())
}

async fn trip_ids_of_order(
    tx: &mut Transaction<'_, Sqlite>,
    order_id: OrderId,
) -> Result<Vec<TripId>, sqlx::Error> {
    let ids: Vec<i64> =
        sqlx::query_scalar("SELECT id FROM order_trips WHERE order_id = ?1 AND published = 1")
            .bind(order_id.0)
            .fetch_all(&mut **tx)
            .await?;

    Ok(ids.into_iter().map(TripId).collect())
}

async fn created_trip_ids(
    tx: &mut Transaction<'_, Sqlite>,
    group_id: OrderGroupId,
) -> Result<Vec<TripId>, sqlx::Error> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM order_trips
         WHERE published = 1
           AND order_id IN (SELECT order_id FROM order_group_members WHERE order_group_id = ?1)
         ORDER BY id",
    )
    .bind(group_id.0)
    .fetch_all(&mut **tx)
    .await?;

    Ok(ids.into_iter().map(TripId).collect())
}
