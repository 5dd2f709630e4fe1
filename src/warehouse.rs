//! Warehouse integration seam.
//!
//! The core only speaks this trait; the HTTP client lives outside. The
//! inbound handoff calls [`WarehouseClient::send_inbound_orders`] before
//! opening its transaction -- a non-success answer aborts the transition
//! with no local writes. Inbound callbacks (`in stock`, `in progress`,
//! `close to expiry`) arrive as orchestrator calls keyed by organization
//! and order-group code.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::OrganizationId;

#[derive(Debug, Clone, Serialize)]
pub struct InboundOrderRequest {
    pub organization_id: OrganizationId,
    pub group_code: String,
    pub trips: Vec<InboundTripLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InboundTripLine {
    pub trip_code: String,
    pub weight: Decimal,
    pub pickup_date: DateTime<Utc>,
    pub delivery_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundAck {
    pub status: String,
    pub warehouse_ref: String,
}

impl InboundAck {
    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("success")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("warehouse transport failure: {0}")]
    Transport(String),
}

#[async_trait]
pub trait WarehouseClient: Send + Sync {
    async fn send_inbound_orders(
        &self,
        request: &InboundOrderRequest,
    ) -> Result<InboundAck, WarehouseError>;
}
