//! Payable report aggregation.
//!
//! Joins the trips of a period -- per the organization's date policy --
//! with their parties, latest status, cost fields, and settled advances
//! to produce one payable row per trip. All monetary arithmetic is exact
//! decimal; a trip with no matching advance contributes zero.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use tracing::debug;

use crate::catalog::TripStageCatalog;
use crate::error::{ReportError, ValidationError};
use crate::ids::{OrganizationId, TripId};
use crate::status::TripStatus;
use crate::status_event::{self, SubjectRef};
use crate::timeline::{self, DatePolicy, EffectiveWindow};
use crate::trip::{self, OrderTrip};
use crate::{advance, organization};

/// Whose payables the report describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayableRole {
    Driver,
    Customer,
    Subcontractor,
}

/// A validated, inclusive report period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportPeriod {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ReportPeriod {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvalidPeriod { start, end });
        }
        Ok(Self { start, end })
    }

    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

/// One payable line: a trip with its parties, window, and costs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayableRow {
    pub trip_id: TripId,
    pub trip_code: String,
    pub order_code: String,
    pub group_code: Option<String>,
    pub counterparty: Option<String>,
    pub vehicle_number: Option<String>,
    pub route_name: Option<String>,
    pub latest_status: TripStatus,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub weight: Decimal,
    pub driver_cost: Decimal,
    pub bridge_toll: Decimal,
    pub subcontractor_cost: Decimal,
    pub other_cost: Decimal,
    pub advance_total: Decimal,
}

#[derive(Debug, sqlx::FromRow)]
struct TripMetaRow {
    order_code: String,
    customer_name: String,
    driver_name: Option<String>,
    subcontractor_name: Option<String>,
    route_name: Option<String>,
    group_code: Option<String>,
}

/// Payable summary for one organization, period, and role.
///
/// The organization's date policy decides the candidate window: the
/// reconstructed effective window, or the raw planned pickup/delivery
/// date with reconstruction skipped. Rows are ordered by window start.
#[tracing::instrument(skip(pool), level = tracing::Level::DEBUG)]
pub async fn payable_report(
    pool: &SqlitePool,
    organization_id: OrganizationId,
    period: ReportPeriod,
    role: PayableRole,
) -> Result<Vec<PayableRow>, ReportError> {
    let org = organization::find(pool, organization_id)
        .await?
        .ok_or(ValidationError::OrganizationNotFound(organization_id))?;

    let catalog = match org.date_policy {
        DatePolicy::StatusCreatedAt => Some(TripStageCatalog::load(pool, organization_id).await?),
        DatePolicy::TripPickupDate | DatePolicy::TripDeliveryDate => None,
    };

    let candidates = trip::find_candidates_for_report(pool, organization_id).await?;
    debug!(
        "payable report over {} candidate trips, policy {}",
        candidates.len(),
        org.date_policy
    );

    let mut rows = Vec::new();
    for t in candidates {
        let relevant = match role {
            PayableRole::Driver => t.driver_id.is_some(),
            PayableRole::Subcontractor => t.subcontractor_id.is_some(),
            PayableRole::Customer => true,
        };
        if !relevant {
            continue;
        }

        let Some(window) =
            resolve_window(pool, &t, org.date_policy, catalog.as_ref(), period).await?
        else {
            continue;
        };

        let meta = load_trip_meta(pool, t.id).await?;
        let advance_total =
            advance::payment_total_for_trip(pool, t.id, period.start, period.end).await?;

        let counterparty = match role {
            PayableRole::Driver => meta.driver_name,
            PayableRole::Customer => Some(meta.customer_name),
            PayableRole::Subcontractor => meta.subcontractor_name,
        };

        rows.push(PayableRow {
            trip_id: t.id,
            trip_code: t.code,
            order_code: meta.order_code,
            group_code: meta.group_code,
            counterparty,
            vehicle_number: t.vehicle_number,
            route_name: meta.route_name,
            latest_status: t.last_status,
            window_start: window.start,
            window_end: window.end,
            weight: t.weight,
            driver_cost: t.driver_cost,
            bridge_toll: t.bridge_toll,
            subcontractor_cost: t.subcontractor_cost,
            other_cost: t.other_cost,
            advance_total,
        });
    }

    rows.sort_by(|a, b| (a.window_start, a.trip_id).cmp(&(b.window_start, b.trip_id)));
    Ok(rows)
}

/// The trip's reporting window under the given policy, or `None` when it
/// falls outside the period.
async fn resolve_window(
    pool: &SqlitePool,
    t: &OrderTrip,
    policy: DatePolicy,
    catalog: Option<&TripStageCatalog>,
    period: ReportPeriod,
) -> Result<Option<EffectiveWindow>, ReportError> {
    match policy {
        DatePolicy::StatusCreatedAt => {
            let catalog = catalog.expect("catalog loaded for status policy");
            let history = status_event::history(pool, SubjectRef::Trip(t.id)).await?;
            let window = timeline::effective_window(t, catalog, &history)?;
            Ok(window
                .intersects(period.start, period.end)
                .then_some(window))
        }
        DatePolicy::TripPickupDate => {
            let in_period = t.pickup_date >= period.start && t.pickup_date <= period.end;
            Ok(in_period.then_some(EffectiveWindow {
                start: t.pickup_date,
                end: t.delivery_date,
            }))
        }
        DatePolicy::TripDeliveryDate => {
            let in_period = t.delivery_date >= period.start && t.delivery_date <= period.end;
            Ok(in_period.then_some(EffectiveWindow {
                start: t.pickup_date,
                end: t.delivery_date,
            }))
        }
    }
}

async fn load_trip_meta(pool: &SqlitePool, trip_id: TripId) -> Result<TripMetaRow, sqlx::Error> {
    sqlx::query_as::<_, TripMetaRow>(
        "SELECT o.code AS order_code,
                c.name AS customer_name,
                d.full_name AS driver_name,
                s.name AS subcontractor_name,
                r.name AS route_name,
                g.code AS group_code
         FROM order_trips t
         JOIN orders o ON o.id = t.order_id
         JOIN customers c ON c.id = o.customer_id
         LEFT JOIN drivers d ON d.id = t.driver_id
         LEFT JOIN subcontractors s ON s.id = t.subcontractor_id
         LEFT JOIN routes r ON r.id = t.route_id
         LEFT JOIN order_group_members m ON m.order_id = o.id
         LEFT JOIN order_groups g ON g.id = m.order_group_id AND g.published = 1
         WHERE t.id = ?1
         LIMIT 1",
    )
    .bind(trip_id.0)
    .fetch_one(pool)
    .await
}
