//! In-process implementations of the `consulto-core` store traits.
//!
//! Every double records what it was asked to do and can be switched into a
//! failing mode, which is what the checkout and gateway tests lean on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use consulto_core::{
    Booking, BookingNotReschedulable, BookingStatus, BookingStore, DomainEvent, EventPublisher, PaymentAccountStatus,
    PaymentAccountStore, PaymentProvider, PaymentSessionRecord, PaymentSessionStore,
    Practitioner, PractitionerDirectory, ProviderSession, ProviderSessionRequest,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryPaymentAccounts {
    accounts: RwLock<HashMap<String, PaymentAccountStatus>>,
    lookups: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryPaymentAccounts {
    pub async fn insert(&self, owner_id: &str, status: PaymentAccountStatus) {
        self.accounts
            .write()
            .await
            .insert(owner_id.to_string(), status);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentAccountStore for InMemoryPaymentAccounts {
    async fn find_by_owner(&self, owner_id: &str) -> anyhow::Result<Option<PaymentAccountStatus>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("payment account store unavailable");
        }

        let accounts = self.accounts.read().await;
        Ok(accounts.get(owner_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryPaymentSessions {
    records: RwLock<HashMap<String, PaymentSessionRecord>>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryPaymentSessions {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Attempted writes, including failed ones.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn get(&self, provider_session_id: &str) -> Option<PaymentSessionRecord> {
        self.records.read().await.get(provider_session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl PaymentSessionStore for InMemoryPaymentSessions {
    async fn upsert(&self, record: &PaymentSessionRecord) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("payment_sessions write timed out");
        }

        let mut records = self.records.write().await;
        records.insert(record.provider_session_id.clone(), record.clone());
        Ok(())
    }
}

/// Provider double that hands out `cs_test_*` sessions.
///
/// Requests carrying an idempotency key are replayed the way Stripe does: the
/// same key with the same parameters returns the first session (expired or
/// not), and the same key with different parameters is rejected.
pub struct RecordingPaymentProvider {
    checkout_base_url: String,
    requests: RwLock<Vec<ProviderSessionRequest>>,
    replays: RwLock<HashMap<String, (ProviderSessionRequest, ProviderSession)>>,
    expired: RwLock<Vec<String>>,
    failing: AtomicBool,
    expire_failing: AtomicBool,
}

impl Default for RecordingPaymentProvider {
    fn default() -> Self {
        Self::new("https://checkout.test")
    }
}

impl RecordingPaymentProvider {
    pub fn new(checkout_base_url: &str) -> Self {
        Self {
            checkout_base_url: checkout_base_url.to_string(),
            requests: RwLock::new(Vec::new()),
            replays: RwLock::new(HashMap::new()),
            expired: RwLock::new(Vec::new()),
            failing: AtomicBool::new(false),
            expire_failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_expire_failing(&self, failing: bool) {
        self.expire_failing.store(failing, Ordering::SeqCst);
    }

    pub async fn requests(&self) -> Vec<ProviderSessionRequest> {
        self.requests.read().await.clone()
    }

    pub async fn expired(&self) -> Vec<String> {
        self.expired.read().await.clone()
    }
}

#[async_trait]
impl PaymentProvider for RecordingPaymentProvider {
    async fn create_checkout_session(
        &self,
        request: &ProviderSessionRequest,
    ) -> anyhow::Result<ProviderSession> {
        self.requests.write().await.push(request.clone());
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("provider rejected request: account_invalid");
        }

        let mut replays = self.replays.write().await;
        if let Some(key) = &request.idempotency_key {
            if let Some((original, session)) = replays.get(key) {
                if original != request {
                    anyhow::bail!("idempotency_error: key {key} reused with different parameters");
                }
                return Ok(session.clone());
            }
        }

        let session_id = format!("cs_test_{}", Uuid::new_v4().simple());
        let url = format!("{}/c/pay/{}", self.checkout_base_url, session_id);
        let session = ProviderSession { session_id, url };
        if let Some(key) = &request.idempotency_key {
            replays.insert(key.clone(), (request.clone(), session.clone()));
        }
        Ok(session)
    }

    async fn expire_checkout_session(&self, session_id: &str) -> anyhow::Result<()> {
        if self.expire_failing.load(Ordering::SeqCst) {
            anyhow::bail!("provider unreachable while expiring {session_id}");
        }
        self.expired.write().await.push(session_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEventPublisher {
    events: RwLock<Vec<DomainEvent>>,
    failing: AtomicBool,
}

impl RecordingEventPublisher {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn events(&self) -> Vec<DomainEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, event: &DomainEvent) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("event bus unavailable");
        }
        self.events.write().await.push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryBookings {
    bookings: RwLock<HashMap<String, Booking>>,
}

impl InMemoryBookings {
    pub async fn insert(&self, booking: Booking) {
        self.bookings
            .write()
            .await
            .insert(booking.id.clone(), booking);
    }
}

#[async_trait]
impl BookingStore for InMemoryBookings {
    async fn find(&self, booking_id: &str) -> anyhow::Result<Option<Booking>> {
        Ok(self.bookings.read().await.get(booking_id).cloned())
    }

    async fn cancel(&self, booking_id: &str) -> anyhow::Result<bool> {
        let mut bookings = self.bookings.write().await;
        let Some(booking) = bookings.get_mut(booking_id) else {
            anyhow::bail!("booking {booking_id} not found");
        };

        if booking.status == BookingStatus::Canceled {
            return Ok(false);
        }
        booking.status = BookingStatus::Canceled;
        Ok(true)
    }

    async fn reschedule(&self, booking_id: &str, starts_at: DateTime<Utc>) -> anyhow::Result<()> {
        let mut bookings = self.bookings.write().await;
        let Some(booking) = bookings.get_mut(booking_id) else {
            anyhow::bail!("booking {booking_id} not found");
        };

        if booking.status != BookingStatus::Confirmed {
            return Err(BookingNotReschedulable(booking_id.to_string()).into());
        }
        booking.starts_at = starts_at;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPractitioners {
    by_token_hash: RwLock<HashMap<String, Practitioner>>,
}

impl InMemoryPractitioners {
    pub async fn insert(&self, token_hash: &str, practitioner: Practitioner) {
        self.by_token_hash
            .write()
            .await
            .insert(token_hash.to_string(), practitioner);
    }
}

#[async_trait]
impl PractitionerDirectory for InMemoryPractitioners {
    async fn find_by_token_hash(&self, token_hash: &str) -> anyhow::Result<Option<Practitioner>> {
        Ok(self.by_token_hash.read().await.get(token_hash).cloned())
    }
}
