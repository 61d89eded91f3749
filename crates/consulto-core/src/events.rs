use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DomainEventKind {
    CheckoutSessionCreated,
    CheckoutReconciliationRequired,
    BookingCanceled,
    BookingRescheduled,
}

impl DomainEventKind {
    /// Bus channel the event is published on.
    pub fn channel(self) -> &'static str {
        match self {
            Self::CheckoutSessionCreated => "checkout.created",
            Self::CheckoutReconciliationRequired => "checkout.reconciliation",
            Self::BookingCanceled => "bookings.canceled",
            Self::BookingRescheduled => "bookings.rescheduled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub aggregate_id: String,
    pub kind: DomainEventKind,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl DomainEvent {
    pub fn new(
        kind: DomainEventKind,
        aggregate_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id: aggregate_id.into(),
            kind,
            occurred_at: Utc::now(),
            payload,
        }
    }
}
