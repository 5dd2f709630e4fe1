//! Effective-timeline reconstruction.
//!
//! A trip's contracted pickup/delivery dates are planned dates; billing
//! needs the instant the trip actually entered and left the billable
//! window. Stages strictly before WAITING_FOR_PICKUP have not started
//! the billable clock, so the planned pickup date stands. From the
//! moment the trip is marked waiting-for-pickup (or later), the actual
//! transition timestamp is the true start, recovered by walking back
//! through the ledger when the trip has since moved further along. The
//! same logic, mirrored against DELIVERED, produces the effective end:
//! once the trip is at or past the DELIVERED anchor, the current event's
//! own timestamp is the end -- uniformly, so a COMPLETED trip reports the
//! COMPLETED event's instant.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::catalog::{CatalogError, TripStageCatalog};
use crate::status::{ParseStatusError, TripStatus};
use crate::status_event::StatusEvent;
use crate::trip::OrderTrip;

/// Organization-level switch selecting which dates a report filters by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePolicy {
    /// Reconstructed effective window from the status ledger.
    StatusCreatedAt,
    /// Raw planned pickup dates; reconstruction skipped.
    TripPickupDate,
    /// Raw planned delivery dates; reconstruction skipped.
    TripDeliveryDate,
}

impl DatePolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StatusCreatedAt => "STATUS_CREATED_AT",
            Self::TripPickupDate => "TRIP_PICKUP_DATE",
            Self::TripDeliveryDate => "TRIP_DELIVERY_DATE",
        }
    }
}

impl FromStr for DatePolicy {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STATUS_CREATED_AT" => Ok(Self::StatusCreatedAt),
            "TRIP_PICKUP_DATE" => Ok(Self::TripPickupDate),
            "TRIP_DELIVERY_DATE" => Ok(Self::TripDeliveryDate),
            other => Err(ParseStatusError {
                kind: "date policy",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for DatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The reconstructed as-actually-happened start/end of a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl EffectiveWindow {
    pub fn intersects(&self, period_start: DateTime<Utc>, period_end: DateTime<Utc>) -> bool {
        self.start <= period_end && self.end >= period_start
    }
}

/// Derive a trip's effective window from its ledger history (oldest
/// first, voided events already excluded) and the organization's trip
/// stage catalog.
///
/// Fails when the catalog lacks the WAITING_FOR_PICKUP or DELIVERED
/// anchor, or a stage for the trip's current status -- both configuration
/// failures, not system errors.
pub fn effective_window(
    trip: &OrderTrip,
    catalog: &TripStageCatalog,
    history: &[StatusEvent],
) -> Result<EffectiveWindow, CatalogError> {
    let wfp_order = catalog.display_order(TripStatus::WaitingForPickup)?;
    let delivered_order = catalog.display_order(TripStatus::Delivered)?;

    let Some(current) = history.last() else {
        // No events at all: the trip has not started, planned dates stand.
        return Ok(EffectiveWindow {
            start: trip.pickup_date,
            end: trip.delivery_date,
        });
    };

    let current_status: TripStatus = current.trip_status()?;
    let current_order = catalog.display_order(current_status)?;

    let start = if current_order < wfp_order {
        trip.pickup_date
    } else if current_order == wfp_order {
        current.created_at
    } else {
        history
            .iter()
            .rev()
            .find(|event| event.status_type == TripStatus::WaitingForPickup.as_str())
            .map_or(trip.pickup_date, |event| event.created_at)
    };

    let end = if current_order < delivered_order {
        trip.delivery_date
    } else {
        current.created_at
    };

    Ok(EffectiveWindow { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntityKind, StatusCatalogStage};
    use crate::ids::{ActorId, OrganizationId, StageId, StatusEventId, TripId};
    use crate::status::SubjectKind;
    use crate::test_utils::NewTripBuilder;

    fn date(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn catalog() -> TripStageCatalog {
        let stages = [
            (TripStatus::New, 1),
            (TripStatus::PendingConfirmation, 2),
            (TripStatus::Confirmed, 3),
            (TripStatus::WaitingForPickup, 4),
            (TripStatus::Delivered, 5),
            (TripStatus::Completed, 6),
        ]
        .into_iter()
        .map(|(status, order)| StatusCatalogStage {
            id: StageId(order),
            organization_id: OrganizationId(1),
            entity_kind: CatalogEntityKind::Trip,
            status_type: status.as_str().to_string(),
            name: status.as_str().to_string(),
            display_order: order,
        })
        .collect();

        TripStageCatalog::from_stages(stages)
    }

    fn trip() -> OrderTrip {
        NewTripBuilder::sample_trip(
            TripId(1),
            date("2024-01-10T00:00:00Z"),
            date("2024-01-20T00:00:00Z"),
        )
    }

    fn event(status: TripStatus, at: DateTime<Utc>) -> StatusEvent {
        StatusEvent {
            id: StatusEventId(0),
            subject_id: 1,
            subject_kind: SubjectKind::Trip,
            status_type: status.as_str().to_string(),
            catalog_stage_id: None,
            actor_id: ActorId(1),
            voided: false,
            created_at: at,
        }
    }

    #[test]
    fn before_waiting_for_pickup_planned_dates_stand() {
        let history = vec![
            event(TripStatus::New, date("2024-01-01T08:00:00Z")),
            event(TripStatus::Confirmed, date("2024-01-02T08:00:00Z")),
        ];

        let window = effective_window(&trip(), &catalog(), &history).unwrap();
        assert_eq!(window.start, date("2024-01-10T00:00:00Z"));
        assert_eq!(window.end, date("2024-01-20T00:00:00Z"));
    }

    #[test]
    fn at_waiting_for_pickup_uses_the_event_instant() {
        let wfp_at = date("2024-01-11T06:30:00Z");
        let history = vec![
            event(TripStatus::New, date("2024-01-01T08:00:00Z")),
            event(TripStatus::WaitingForPickup, wfp_at),
        ];

        let window = effective_window(&trip(), &catalog(), &history).unwrap();
        assert_eq!(window.start, wfp_at);
        assert_eq!(window.end, date("2024-01-20T00:00:00Z"));
    }

    #[test]
    fn monotonic_three_step_advance() {
        let t1 = date("2024-01-11T06:00:00Z");
        let t2 = date("2024-01-11T09:00:00Z");
        let t3 = date("2024-01-12T17:00:00Z");
        let history = vec![
            event(TripStatus::New, t1),
            event(TripStatus::WaitingForPickup, t2),
            event(TripStatus::Delivered, t3),
        ];

        let window = effective_window(&trip(), &catalog(), &history).unwrap();
        assert_eq!(window.start, t2);
        assert_eq!(window.end, t3);
        assert!(window.start <= window.end);
    }

    #[test]
    fn skipped_pickup_stage_falls_back_to_planned_date() {
        // Advanced straight to DELIVERED without ever recording
        // WAITING_FOR_PICKUP.
        let delivered_at = date("2024-01-12T08:00:00Z");
        let history = vec![event(TripStatus::Delivered, delivered_at)];

        let window = effective_window(&trip(), &catalog(), &history).unwrap();
        assert_eq!(window.start, date("2024-01-10T00:00:00Z"));
        assert_eq!(window.end, delivered_at);
    }

    #[test]
    fn completed_trip_uses_its_own_event_instant_for_the_end() {
        let wfp_at = date("2024-01-11T09:00:00Z");
        let delivered_at = date("2024-01-12T17:00:00Z");
        let completed_at = date("2024-01-14T10:00:00Z");
        let history = vec![
            event(TripStatus::WaitingForPickup, wfp_at),
            event(TripStatus::Delivered, delivered_at),
            event(TripStatus::Completed, completed_at),
        ];

        let window = effective_window(&trip(), &catalog(), &history).unwrap();
        assert_eq!(window.start, wfp_at);
        assert_eq!(window.end, completed_at);
    }

    #[test]
    fn empty_history_keeps_planned_window() {
        let window = effective_window(&trip(), &catalog(), &[]).unwrap();
        assert_eq!(window.start, date("2024-01-10T00:00:00Z"));
        assert_eq!(window.end, date("2024-01-20T00:00:00Z"));
    }

    #[test]
    fn missing_anchor_stage_is_rejected() {
        let stages = vec![StatusCatalogStage {
            id: StageId(1),
            organization_id: OrganizationId(1),
            entity_kind: CatalogEntityKind::Trip,
            status_type: TripStatus::New.as_str().to_string(),
            name: "New".to_string(),
            display_order: 1,
        }];
        let catalog = TripStageCatalog::from_stages(stages);

        let err = effective_window(&trip(), &catalog, &[]).unwrap_err();
        assert!(matches!(err, CatalogError::StageNotConfigured { .. }));
    }

    #[test]
    fn window_intersection() {
        let window = EffectiveWindow {
            start: date("2024-01-10T00:00:00Z"),
            end: date("2024-01-12T00:00:00Z"),
        };
        assert!(window.intersects(date("2024-01-11T00:00:00Z"), date("2024-01-15T00:00:00Z")));
        assert!(window.intersects(date("2024-01-01T00:00:00Z"), date("2024-01-10T00:00:00Z")));
        assert!(!window.intersects(date("2024-01-13T00:00:00Z"), date("2024-01-15T00:00:00Z")));
    }

    #[test]
    fn date_policy_round_trips_through_text() {
        for policy in [
            DatePolicy::StatusCreatedAt,
            DatePolicy::TripPickupDate,
            DatePolicy::TripDeliveryDate,
        ] {
            assert_eq!(policy.as_str().parse::<DatePolicy>().unwrap(), policy);
        }
    }
}
