//! Closed status enumerations per subject kind.
//!
//! Statuses are stored as their canonical TEXT form in both the entity
//! tables and the status ledger, and parsed back into these enums at the
//! row boundary. Control flow always branches on the typed variants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown {kind} status: {value}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

/// Lifecycle stages an individual trip advances through. The per-organization
/// stage catalog assigns each of these a display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TripStatus {
    New,
    PendingConfirmation,
    Confirmed,
    WaitingForPickup,
    Delivered,
    Completed,
    Canceled,
}

impl TripStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::PendingConfirmation => "PENDING_CONFIRMATION",
            Self::Confirmed => "CONFIRMED",
            Self::WaitingForPickup => "WAITING_FOR_PICKUP",
            Self::Delivered => "DELIVERED",
            Self::Completed => "COMPLETED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl FromStr for TripStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "PENDING_CONFIRMATION" => Ok(Self::PendingConfirmation),
            "CONFIRMED" => Ok(Self::Confirmed),
            "WAITING_FOR_PICKUP" => Ok(Self::WaitingForPickup),
            "DELIVERED" => Ok(Self::Delivered),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(ParseStatusError {
                kind: "trip",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse order status. Orders have no ordered catalog; their ledger events
/// carry no catalog stage reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Received,
    InProgress,
    Completed,
    Canceled,
}

impl OrderStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Received => "RECEIVED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "RECEIVED" => Ok(Self::Received),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(ParseStatusError {
                kind: "order",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing/dispatch aggregate lifecycle. `Delivered` is a computed milestone
/// reached only when every member trip has delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderGroupStatus {
    Plan,
    Approved,
    InProgress,
    Inbound,
    InStock,
    Delivered,
    Completed,
}

impl OrderGroupStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "PLAN",
            Self::Approved => "APPROVED",
            Self::InProgress => "IN_PROGRESS",
            Self::Inbound => "INBOUND",
            Self::InStock => "IN_STOCK",
            Self::Delivered => "DELIVERED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl FromStr for OrderGroupStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PLAN" => Ok(Self::Plan),
            "APPROVED" => Ok(Self::Approved),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "INBOUND" => Ok(Self::Inbound),
            "IN_STOCK" => Ok(Self::InStock),
            "DELIVERED" => Ok(Self::Delivered),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(ParseStatusError {
                kind: "order group",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for OrderGroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Driver cash-advance settlement state. Only `Payment` advances count
/// toward payable aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvanceStatus {
    Pending,
    Payment,
    Rejected,
}

impl AdvanceStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Payment => "PAYMENT",
            Self::Rejected => "REJECTED",
        }
    }
}

impl FromStr for AdvanceStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PAYMENT" => Ok(Self::Payment),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(ParseStatusError {
                kind: "advance",
                value: other.to_string(),
            }),
        }
    }
}

/// The entity kind a ledger row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectKind {
    Trip,
    Order,
    OrderGroup,
}

impl SubjectKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trip => "TRIP",
            Self::Order => "ORDER",
            Self::OrderGroup => "ORDER_GROUP",
        }
    }
}

impl FromStr for SubjectKind {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRIP" => Ok(Self::Trip),
            "ORDER" => Ok(Self::Order),
            "ORDER_GROUP" => Ok(Self::OrderGroup),
            other => Err(ParseStatusError {
                kind: "subject",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed status paired with the subject kind it applies to. Lets the
/// ledger accept appends for any subject without loosening to raw strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectStatus {
    Trip(TripStatus),
    Order(OrderStatus),
    OrderGroup(OrderGroupStatus),
}

impl SubjectStatus {
    pub const fn kind(self) -> SubjectKind {
        match self {
            Self::Trip(_) => SubjectKind::Trip,
            Self::Order(_) => SubjectKind::Order,
            Self::OrderGroup(_) => SubjectKind::OrderGroup,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trip(s) => s.as_str(),
            Self::Order(s) => s.as_str(),
            Self::OrderGroup(s) => s.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trip_status_round_trips_through_text() {
        for status in [
            TripStatus::New,
            TripStatus::PendingConfirmation,
            TripStatus::Confirmed,
            TripStatus::WaitingForPickup,
            TripStatus::Delivered,
            TripStatus::Completed,
            TripStatus::Canceled,
        ] {
            assert_eq!(status.as_str().parse::<TripStatus>().unwrap(), status);
        }
    }

    #[test]
    fn order_group_status_round_trips_through_text() {
        for status in [
            OrderGroupStatus::Plan,
            OrderGroupStatus::Approved,
            OrderGroupStatus::InProgress,
            OrderGroupStatus::Inbound,
            OrderGroupStatus::InStock,
            OrderGroupStatus::Delivered,
            OrderGroupStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<OrderGroupStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = "TELEPORTED".parse::<TripStatus>().unwrap_err();
        assert_eq!(err.value, "TELEPORTED");
    }

    #[test]
    fn subject_status_reports_matching_kind() {
        assert_eq!(
            SubjectStatus::Trip(TripStatus::Delivered).kind(),
            SubjectKind::Trip
        );
        assert_eq!(
            SubjectStatus::Order(OrderStatus::Received).as_str(),
            "RECEIVED"
        );
    }
}
