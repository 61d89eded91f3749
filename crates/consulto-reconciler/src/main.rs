use anyhow::{Context, Result};
use consulto_core::{DomainEvent, DomainEventKind, PaymentSessionRecord, PaymentSessionStore};
use consulto_platform::{PgPaymentSessionStore, RedisBus, WorkerConfig, connect_database};
use futures_util::StreamExt;
use redis::Msg;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "consulto_reconciler=info".to_string()),
        )
        .init();

    let config = WorkerConfig::from_env()?;
    let pool = connect_database(&config.database_url).await?;
    let redis = RedisBus::connect(&config.redis_url)?;
    let sessions = PgPaymentSessionStore::new(pool);

    let channel = DomainEventKind::CheckoutReconciliationRequired.channel();
    let mut pubsub = redis
        .subscribe(DomainEventKind::CheckoutReconciliationRequired)
        .await?;
    let mut messages = pubsub.on_message();

    info!("reconciler subscribed to {channel}");

    loop {
        let msg = messages
            .next()
            .await
            .with_context(|| format!("{channel} stream ended unexpectedly"))?;
        if let Err(err) = handle_message(&sessions, msg).await {
            error!("failed to reconcile checkout session: {err:#}");
        }
    }
}

async fn handle_message(sessions: &dyn PaymentSessionStore, msg: Msg) -> Result<()> {
    let payload: String = msg.get_payload()?;
    reconcile(sessions, &payload).await
}

/// Writes the queued record as published. Its status already says whether the
/// provider session is still open, expired, or left unrecorded.
async fn reconcile(sessions: &dyn PaymentSessionStore, payload: &str) -> Result<()> {
    let record = decode_record(payload)?;

    if let Err(err) = sessions.upsert(&record).await {
        warn!(
            session_id = %record.provider_session_id,
            booking_id = %record.booking_id,
            status = %record.status,
            checkout_url = %record.checkout_url,
            "payment session still unrecorded; manual repair needed"
        );
        return Err(err);
    }

    info!(
        session_id = %record.provider_session_id,
        booking_id = %record.booking_id,
        status = %record.status,
        "recorded previously orphaned checkout session"
    );
    Ok(())
}

fn decode_record(payload: &str) -> Result<PaymentSessionRecord> {
    let event: DomainEvent =
        serde_json::from_str(payload).context("reconciliation message is not a domain event")?;
    if event.kind != DomainEventKind::CheckoutReconciliationRequired {
        anyhow::bail!("unexpected event kind {:?}", event.kind);
    }

    serde_json::from_value(event.payload).context("reconciliation payload is not a session record")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use consulto_memstore::InMemoryPaymentSessions;
    use rust_decimal::Decimal;

    fn record() -> PaymentSessionRecord {
        PaymentSessionRecord {
            provider_session_id: "cs_test_1".to_string(),
            booking_id: "bk_42".to_string(),
            account_id: "acct_1".to_string(),
            amount: Decimal::new(12000, 2),
            currency: "EUR".to_string(),
            checkout_url: "https://checkout.test/c/pay/cs_test_1".to_string(),
            status: "open".to_string(),
            created_at: Utc::now(),
        }
    }

    fn encode(kind: DomainEventKind, payload: serde_json::Value) -> String {
        serde_json::to_string(&DomainEvent::new(kind, "bk_42", payload)).unwrap()
    }

    #[test]
    fn decodes_reconciliation_event() {
        let original = record();
        let message = encode(
            DomainEventKind::CheckoutReconciliationRequired,
            serde_json::to_value(&original).unwrap(),
        );

        assert_eq!(decode_record(&message).unwrap(), original);
    }

    #[test]
    fn rejects_other_event_kinds() {
        let message = encode(
            DomainEventKind::BookingCanceled,
            serde_json::to_value(record()).unwrap(),
        );

        assert!(decode_record(&message).is_err());
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(decode_record("not json").is_err());

        let message = encode(
            DomainEventKind::CheckoutReconciliationRequired,
            serde_json::json!({ "booking_id": "bk_42" }),
        );
        assert!(decode_record(&message).is_err());
    }

    #[tokio::test]
    async fn stores_expired_session_with_its_status() {
        let sessions = InMemoryPaymentSessions::default();
        let mut expired = record();
        expired.status = "expired".to_string();
        let message = encode(
            DomainEventKind::CheckoutReconciliationRequired,
            serde_json::to_value(&expired).unwrap(),
        );

        reconcile(&sessions, &message).await.unwrap();

        let stored = sessions.get("cs_test_1").await.unwrap();
        assert_eq!(stored.status, "expired");
        assert_eq!(stored, expired);
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_error() {
        let sessions = InMemoryPaymentSessions::default();
        sessions.set_failing(true);
        let message = encode(
            DomainEventKind::CheckoutReconciliationRequired,
            serde_json::to_value(record()).unwrap(),
        );

        assert!(reconcile(&sessions, &message).await.is_err());
        assert_eq!(sessions.writes(), 1);
    }
}
