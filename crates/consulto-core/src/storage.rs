use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::events::DomainEvent;
use crate::models::{Booking, PaymentAccountStatus, PaymentSessionRecord, Practitioner};

#[async_trait]
pub trait PaymentAccountStore: Send + Sync {
    async fn find_by_owner(&self, owner_id: &str) -> anyhow::Result<Option<PaymentAccountStatus>>;
}

#[async_trait]
pub trait PaymentSessionStore: Send + Sync {
    /// Inserts or replaces the record keyed by `provider_session_id`.
    async fn upsert(&self, record: &PaymentSessionRecord) -> anyhow::Result<()>;
}

/// Raised by [`BookingStore::reschedule`] when the booking is no longer
/// confirmed at write time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("booking {0} is not open for rescheduling")]
pub struct BookingNotReschedulable(pub String);

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn find(&self, booking_id: &str) -> anyhow::Result<Option<Booking>>;
    /// Returns `true` when the booking moved to canceled, `false` if it already was.
    async fn cancel(&self, booking_id: &str) -> anyhow::Result<bool>;
    /// Moves a confirmed booking. Anything else fails with
    /// [`BookingNotReschedulable`].
    async fn reschedule(&self, booking_id: &str, starts_at: DateTime<Utc>) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PractitionerDirectory: Send + Sync {
    async fn find_by_token_hash(&self, token_hash: &str) -> anyhow::Result<Option<Practitioner>>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Hosted checkout session parameters handed to the payment provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSessionRequest {
    pub booking_id: String,
    pub connected_account_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub customer_email: String,
    pub description: String,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSession {
    pub session_id: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &ProviderSessionRequest,
    ) -> anyhow::Result<ProviderSession>;

    async fn expire_checkout_session(&self, session_id: &str) -> anyhow::Result<()>;
}
