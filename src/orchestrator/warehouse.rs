//! Warehouse transitions: the outbound inbound-orders handoff and the
//! three inbound callbacks.
//!
//! The handoff talks to the warehouse collaborator before opening its
//! transaction -- a non-success answer aborts with zero local writes.

use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::error::{ExternalError, TransitionError, ValidationError};
use crate::ids::{ActorId, OrderGroupId, OrganizationId, TripId};
use crate::notification::{self, NotificationEventType, NotificationIntent, OrgRole};
use crate::order_group::OrderGroup;
use crate::status::{OrderGroupStatus, OrderStatus, SubjectKind, TripStatus};
use crate::trip::NewTrip;
use crate::warehouse::{InboundOrderRequest, InboundTripLine, WarehouseError};
use crate::{order, order_group, party, trip};

use super::{
    CodeKind, Orchestrator, append_group_status, append_order_status, append_trip_status,
    generate_unique_code,
};

/// Name under which the warehouse appears as an internal customer for
/// synthetic inbound orders.
const WAREHOUSE_CUSTOMER: &str = "WAREHOUSE";
const WAREHOUSE_ROUTE: &str = "WAREHOUSE_INBOUND";

/// Result of the inbound handoff: the synthetic order created to track
/// the inbound leg, and the warehouse's reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundHandoff {
    pub warehouse_ref: String,
    pub inbound_trip_id: TripId,
}

impl Orchestrator {
    /// Hand a group over to the warehouse.
    ///
    /// The warehouse must acknowledge receipt first; only then are the
    /// synthetic inbound customer/order/route/trip created with their
    /// full NEW -> RECEIVED -> IN_PROGRESS chain and the source group moved
    /// to INBOUND. With `notify_drivers` the group re-enters the
    /// send-to-drivers transition afterwards.
    #[tracing::instrument(skip(self), level = tracing::Level::INFO)]
    pub async fn warehouse_inbound_handoff(
        &self,
        organization_id: OrganizationId,
        group_id: OrderGroupId,
        actor_id: ActorId,
        notify_drivers: bool,
    ) -> Result<InboundHandoff, TransitionError> {
        let group = order_group::find(&self.pool, group_id)
            .await?
            .ok_or(ValidationError::NotFound {
                kind: SubjectKind::OrderGroup,
                id: group_id.0,
            })?;

        let trips = trip::find_for_group(&self.pool, group_id).await?;

        let request = InboundOrderRequest {
            organization_id,
            group_code: group.code.clone(),
            trips: trips
                .iter()
                .map(|t| InboundTripLine {
                    trip_code: t.code.clone(),
                    weight: t.weight,
                    pickup_date: t.pickup_date,
                    delivery_date: t.delivery_date,
                })
                .collect(),
        };

        // External call first. No local write happens unless the
        // warehouse accepted the handoff.
        let ack = self
            .warehouse
            .send_inbound_orders(&request)
            .await
            .map_err(|WarehouseError::Transport(status)| ExternalError::Warehouse { status })?;
        if !ack.is_success() {
            return Err(ExternalError::Warehouse { status: ack.status }.into());
        }

        let mut tx = self.pool.begin().await?;
        let at = Utc::now();

        let customer_id =
            match party::find_customer_by_name(&mut *tx, organization_id, WAREHOUSE_CUSTOMER)
                .await?
            {
                Some(id) => id,
                None => party::insert_customer(&mut *tx, organization_id, WAREHOUSE_CUSTOMER).await?,
            };
        let route_id = party::insert_route(&mut *tx, organization_id, WAREHOUSE_ROUTE).await?;

        let order_code = generate_unique_code(&mut tx, CodeKind::Order, self.code_attempts).await?;
        let inbound_order = order::insert(&mut *tx, organization_id, customer_id, &order_code, at)
            .await?;
        append_order_status(&mut tx, inbound_order, OrderStatus::New, actor_id, at).await?;
        append_order_status(&mut tx, inbound_order, OrderStatus::Received, actor_id, at).await?;
        append_order_status(&mut tx, inbound_order, OrderStatus::InProgress, actor_id, at).await?;

        let (pickup_date, delivery_date) = trips
            .iter()
            .map(|t| (t.pickup_date, t.delivery_date))
            .fold(
                None::<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)>,
                |acc, (pickup, delivery)| {
                Some(match acc {
                    None => (pickup, delivery),
                    Some((min_pickup, max_delivery)) => {
                        (min_pickup.min(pickup), max_delivery.max(delivery))
                    }
                })
                },
            )
            .unwrap_or((at, at));

        let trip_code = generate_unique_code(&mut tx, CodeKind::Trip, self.code_attempts).await?;
        let inbound_trip = trip::insert(
            &mut *tx,
            organization_id,
            &trip_code,
            &NewTrip {
                order_id: inbound_order,
                driver_id: None,
                subcontractor_id: None,
                route_id: Some(route_id),
                vehicle_number: None,
                pickup_date,
                delivery_date,
                weight: trips.iter().map(|t| t.weight).sum(),
                driver_cost: rust_decimal::Decimal::ZERO,
                bridge_toll: rust_decimal::Decimal::ZERO,
                subcontractor_cost: rust_decimal::Decimal::ZERO,
                other_cost: rust_decimal::Decimal::ZERO,
            },
            at,
        )
        .await?;
        append_trip_status(
            &mut tx,
            organization_id,
            inbound_trip,
            TripStatus::New,
            actor_id,
            at,
        )
        .await?;

        append_group_status(
            &mut tx,
            organization_id,
            group_id,
            OrderGroupStatus::Inbound,
            actor_id,
            at,
        )
        .await?;
        order_group::set_warehouse_ref(&mut *tx, group_id, &ack.warehouse_ref).await?;

        tx.commit().await?;
        info!(
            "group {} handed to warehouse as {}",
            group.code, ack.warehouse_ref
        );

        if notify_drivers {
            self.send_to_drivers(organization_id, group_id, actor_id)
                .await?;
        }

        Ok(InboundHandoff {
            warehouse_ref: ack.warehouse_ref,
            inbound_trip_id: inbound_trip,
        })
    }

    /// Warehouse reports the groups are in stock: each group moves to
    /// IN_STOCK and its member orders and trips complete. Broadcast to
    /// manager, accountant, and dispatch roles.
    #[tracing::instrument(skip(self), level = tracing::Level::INFO)]
    pub async fn warehouse_in_stock(
        &self,
        organization_id: OrganizationId,
        actor_id: ActorId,
        group_codes: Vec<String>,
    ) -> Result<(), TransitionError> {
        let groups = self.resolve_groups(organization_id, &group_codes).await?;

        let mut tx = self.pool.begin().await?;
        let at = Utc::now();

        for group in &groups {
            let trips = trip::find_for_group(&mut *tx, group.id).await?;
            for t in &trips {
                append_trip_status(
                    &mut tx,
                    organization_id,
                    t.id,
                    TripStatus::Completed,
                    actor_id,
                    at,
                )
                .await?;
            }

            for order_id in order_group::member_order_ids(&mut *tx, group.id).await? {
                append_order_status(&mut tx, order_id, OrderStatus::Completed, actor_id, at)
                    .await?;

                notification::enqueue(
                    &mut *tx,
                    &NotificationIntent {
                        event_type: NotificationEventType::OrderCompleted,
                        organization_id,
                        actor_id,
                        target_id: order_id.0,
                        payload: json!({ "groupCode": group.code }),
                        receivers: vec![],
                        member_roles: vec![OrgRole::Manager, OrgRole::Accountant, OrgRole::Dispatch],
                        broadcast_default: false,
                    },
                    at,
                )
                .await?;
            }

            append_group_status(
                &mut tx,
                organization_id,
                group.id,
                OrderGroupStatus::InStock,
                actor_id,
                at,
            )
            .await?;

            notification::enqueue(
                &mut *tx,
                &NotificationIntent {
                    event_type: NotificationEventType::GroupInStock,
                    organization_id,
                    actor_id,
                    target_id: group.id.0,
                    payload: json!({ "groupCode": group.code }),
                    receivers: vec![],
                    member_roles: vec![OrgRole::Manager, OrgRole::Accountant, OrgRole::Dispatch],
                    broadcast_default: false,
                },
                at,
            )
            .await?;
        }

        tx.commit().await?;
        self.drain_outbox_best_effort().await;
        Ok(())
    }

    /// Warehouse reports the groups re-entered processing (export leg).
    /// Broadcast to dispatch and manager roles.
    #[tracing::instrument(skip(self), level = tracing::Level::INFO)]
    pub async fn warehouse_in_progress(
        &self,
        organization_id: OrganizationId,
        actor_id: ActorId,
        group_codes: Vec<String>,
    ) -> Result<(), TransitionError> {
        let groups = self.resolve_groups(organization_id, &group_codes).await?;

        let mut tx = self.pool.begin().await?;
        let at = Utc::now();

        for group in &groups {
            append_group_status(
                &mut tx,
                organization_id,
                group.id,
                OrderGroupStatus::InProgress,
                actor_id,
                at,
            )
            .await?;

            notification::enqueue(
                &mut *tx,
                &NotificationIntent {
                    event_type: NotificationEventType::GroupInProgress,
                    organization_id,
                    actor_id,
                    target_id: group.id.0,
                    payload: json!({ "groupCode": group.code }),
                    receivers: vec![],
                    member_roles: vec![OrgRole::Dispatch, OrgRole::Manager],
                    broadcast_default: false,
                },
                at,
            )
            .await?;
        }

        tx.commit().await?;
        self.drain_outbox_best_effort().await;
        Ok(())
    }

    /// Warehouse warns the groups are close to expiry. Read-only for
    /// lifecycle state; only a dispatch-role broadcast goes out.
    #[tracing::instrument(skip(self), level = tracing::Level::INFO)]
    pub async fn warehouse_close_to_expiry(
        &self,
        organization_id: OrganizationId,
        actor_id: ActorId,
        group_codes: Vec<String>,
    ) -> Result<(), TransitionError> {
        let groups = self.resolve_groups(organization_id, &group_codes).await?;
        let at = Utc::now();

        for group in &groups {
            notification::enqueue(
                &self.pool,
                &NotificationIntent {
                    event_type: NotificationEventType::GroupCloseToExpiry,
                    organization_id,
                    actor_id,
                    target_id: group.id.0,
                    payload: json!({ "groupCode": group.code }),
                    receivers: vec![],
                    member_roles: vec![OrgRole::Dispatch],
                    broadcast_default: false,
                },
                at,
            )
            .await?;
        }

        self.drain_outbox_best_effort().await;
        Ok(())
    }

    /// Resolve every group code up front so a single unknown code fails
    /// the whole callback before any write.
    async fn resolve_groups(
        &self,
        organization_id: OrganizationId,
        group_codes: &[String],
    ) -> Result<Vec<OrderGroup>, TransitionError> {
        if group_codes.is_empty() {
            return Err(ValidationError::EmptySelection.into());
        }

        let mut groups = Vec::with_capacity(group_codes.len());
        for code in group_codes {
            let group = order_group::find_by_code(&self.pool, organization_id, code)
                .await?
                .ok_or_else(|| ValidationError::GroupCodeNotFound(code.clone()))?;
            groups.push(group);
        }

        Ok(groups)
    }
}
