use std::sync::Arc;

use chrono::Utc;
use consulto_core::{
    CheckoutRequest, CheckoutSession, DomainEvent, DomainEventKind, EventPublisher,
    PaymentAccountStore, PaymentProvider, PaymentSessionRecord, PaymentSessionStore,
    ProviderSessionRequest,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::error::CheckoutError;
use crate::validate::{ValidatedCheckout, validate_request};

pub const SESSION_STATUS_OPEN: &str = "open";
/// The session was never recorded and the provider confirmed it expired.
pub const SESSION_STATUS_EXPIRED: &str = "expired";
/// The session was never recorded and expiring it at the provider failed.
pub const SESSION_STATUS_UNRECORDED: &str = "unrecorded";

#[derive(Debug, Clone, Default)]
pub struct CheckoutSettings {
    /// Send a provider idempotency key derived from the booking and the
    /// session parameters, so identical retries reuse one session.
    pub idempotent_sessions: bool,
}

/// Validates account readiness, opens a hosted checkout session on the
/// practitioner's connected account and records it.
pub struct CheckoutOrchestrator {
    accounts: Arc<dyn PaymentAccountStore>,
    provider: Arc<dyn PaymentProvider>,
    sessions: Arc<dyn PaymentSessionStore>,
    events: Arc<dyn EventPublisher>,
    settings: CheckoutSettings,
}

impl CheckoutOrchestrator {
    pub fn new(
        accounts: Arc<dyn PaymentAccountStore>,
        provider: Arc<dyn PaymentProvider>,
        sessions: Arc<dyn PaymentSessionStore>,
        events: Arc<dyn EventPublisher>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            accounts,
            provider,
            sessions,
            events,
            settings,
        }
    }

    pub async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, CheckoutError> {
        let checkout = validate_request(request)?;

        let account = match self
            .accounts
            .find_by_owner(&checkout.practitioner_account_id)
            .await
        {
            Ok(Some(account)) => account,
            Ok(None) => {
                warn!(
                    booking_id = %checkout.booking_id,
                    owner_id = %checkout.practitioner_account_id,
                    "checkout refused: no payment account"
                );
                return Err(CheckoutError::AccountNotFound);
            }
            Err(err) => {
                error!(
                    booking_id = %checkout.booking_id,
                    owner_id = %checkout.practitioner_account_id,
                    "payment account lookup failed: {err:#}"
                );
                return Err(CheckoutError::Orchestration(format!("{err:#}")));
            }
        };

        if !account.is_ready() {
            warn!(
                booking_id = %checkout.booking_id,
                account_id = %account.account_id,
                onboarding_completed = account.onboarding_completed,
                payments_enabled = account.payments_enabled,
                "checkout refused: payment account not ready"
            );
            return Err(CheckoutError::AccountNotReady {
                onboarding_completed: account.onboarding_completed,
                payments_enabled: account.payments_enabled,
            });
        }

        let provider_request = self.provider_request(&checkout, &account.account_id);
        let session = self
            .provider
            .create_checkout_session(&provider_request)
            .await
            .map_err(|err| {
                error!(
                    booking_id = %checkout.booking_id,
                    account_id = %account.account_id,
                    "checkout session creation failed: {err:#}"
                );
                CheckoutError::Provider(format!("{err:#}"))
            })?;

        let record = PaymentSessionRecord {
            provider_session_id: session.session_id.clone(),
            booking_id: checkout.booking_id.clone(),
            account_id: account.account_id.clone(),
            amount: checkout.amount,
            currency: checkout.currency.clone(),
            checkout_url: session.url.clone(),
            status: SESSION_STATUS_OPEN.to_string(),
            created_at: Utc::now(),
        };

        if let Err(err) = self.sessions.upsert(&record).await {
            error!(
                booking_id = %record.booking_id,
                session_id = %record.provider_session_id,
                "checkout session created but not recorded: {err:#}"
            );
            self.contain_unrecorded_session(&provider_request, record.clone())
                .await;
            return Err(CheckoutError::Persistence {
                session_id: record.provider_session_id,
                message: format!("{err:#}"),
            });
        }

        self.publish(DomainEvent::new(
            DomainEventKind::CheckoutSessionCreated,
            &record.booking_id,
            json!({
                "session_id": record.provider_session_id,
                "account_id": record.account_id,
                "amount": record.amount,
                "currency": record.currency,
            }),
        ))
        .await;

        info!(
            booking_id = %record.booking_id,
            session_id = %record.provider_session_id,
            "checkout session created"
        );

        Ok(CheckoutSession {
            session_id: session.session_id,
            checkout_url: session.url,
        })
    }

    fn provider_request(
        &self,
        checkout: &ValidatedCheckout,
        connected_account_id: &str,
    ) -> ProviderSessionRequest {
        let mut request = ProviderSessionRequest {
            booking_id: checkout.booking_id.clone(),
            connected_account_id: connected_account_id.to_string(),
            amount: checkout.amount,
            currency: checkout.currency.clone(),
            customer_email: checkout.client_email.clone(),
            description: checkout.description(),
            idempotency_key: None,
        };
        if self.settings.idempotent_sessions {
            request.idempotency_key = Some(idempotency_key(&request));
        }
        request
    }

    /// Queues the unrecorded session for the reconciler with a status that
    /// matches the provider's state. Best effort.
    ///
    /// A keyed session is left open: the provider replays it for a retry with
    /// the same parameters, so expiring it would hand that retry a dead URL.
    /// An unkeyed session is expired, since nothing will ever return it again.
    async fn contain_unrecorded_session(
        &self,
        provider_request: &ProviderSessionRequest,
        mut record: PaymentSessionRecord,
    ) {
        if provider_request.idempotency_key.is_none() {
            record.status = match self
                .provider
                .expire_checkout_session(&record.provider_session_id)
                .await
            {
                Ok(()) => SESSION_STATUS_EXPIRED.to_string(),
                Err(err) => {
                    warn!(
                        session_id = %record.provider_session_id,
                        "failed to expire unrecorded checkout session: {err:#}"
                    );
                    SESSION_STATUS_UNRECORDED.to_string()
                }
            };
        }

        match serde_json::to_value(&record) {
            Ok(payload) => {
                self.publish(DomainEvent::new(
                    DomainEventKind::CheckoutReconciliationRequired,
                    &record.booking_id,
                    payload,
                ))
                .await;
            }
            Err(err) => error!(
                session_id = %record.provider_session_id,
                "failed to encode reconciliation payload: {err}"
            ),
        }
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(err) = self.events.publish(&event).await {
            warn!(
                booking_id = %event.aggregate_id,
                channel = event.kind.channel(),
                "failed to publish event: {err:#}"
            );
        }
    }
}

/// `checkout-{booking_id}-{fingerprint}`, where the fingerprint covers every
/// parameter the provider compares on replay. A corrected amount or currency
/// gets a fresh key instead of an idempotency conflict.
fn idempotency_key(request: &ProviderSessionRequest) -> String {
    let amount = request.amount.normalize().to_string();
    let mut digest = Sha256::new();
    for part in [
        request.connected_account_id.as_str(),
        amount.as_str(),
        request.currency.as_str(),
        request.customer_email.as_str(),
        request.description.as_str(),
    ] {
        digest.update(part.as_bytes());
        digest.update([0u8]);
    }
    let fingerprint = format!("{:x}", digest.finalize());
    format!("checkout-{}-{}", request.booking_id, &fingerprint[..16])
}
