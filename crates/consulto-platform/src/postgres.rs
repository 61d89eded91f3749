use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use consulto_core::{
    Booking, BookingNotReschedulable, BookingStatus, BookingStore, PaymentAccountStatus,
    PaymentAccountStore, PaymentSessionRecord, PaymentSessionStore, Practitioner,
    PractitionerDirectory,
};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};

pub async fn connect_database(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("failed to connect to postgres")?;

    Ok(pool)
}

#[derive(Clone)]
pub struct PgPaymentAccountStore {
    pool: PgPool,
}

impl PgPaymentAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentAccountStore for PgPaymentAccountStore {
    async fn find_by_owner(&self, owner_id: &str) -> Result<Option<PaymentAccountStatus>> {
        let row = sqlx::query(
            r#"
            SELECT stripe_account_id, onboarding_completed, payments_enabled
            FROM payment_accounts
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(PaymentAccountStatus {
            account_id: row.try_get("stripe_account_id")?,
            onboarding_completed: row.try_get("onboarding_completed")?,
            payments_enabled: row.try_get("payments_enabled")?,
        }))
    }
}

#[derive(Clone)]
pub struct PgPaymentSessionStore {
    pool: PgPool,
}

impl PgPaymentSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentSessionStore for PgPaymentSessionStore {
    async fn upsert(&self, record: &PaymentSessionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_sessions (
                provider_session_id, booking_id, account_id, amount, currency, checkout_url, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            ON CONFLICT (provider_session_id) DO UPDATE SET
                booking_id = EXCLUDED.booking_id,
                account_id = EXCLUDED.account_id,
                amount = EXCLUDED.amount,
                currency = EXCLUDED.currency,
                checkout_url = EXCLUDED.checkout_url,
                status = EXCLUDED.status,
                updated_at = now()
            "#,
        )
        .bind(&record.provider_session_id)
        .bind(&record.booking_id)
        .bind(&record.account_id)
        .bind(record.amount)
        .bind(&record.currency)
        .bind(&record.checkout_url)
        .bind(&record.status)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn find(&self, booking_id: &str) -> Result<Option<Booking>> {
        let row = sqlx::query(
            r#"
            SELECT id, practitioner_id, client_email, client_name, starts_at, status
            FROM bookings
            WHERE id = $1
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.try_get("status")?;
        Ok(Some(Booking {
            id: row.try_get("id")?,
            practitioner_id: row.try_get("practitioner_id")?,
            client_email: row.try_get("client_email")?,
            client_name: row.try_get("client_name")?,
            starts_at: row.try_get("starts_at")?,
            status: status.parse::<BookingStatus>()?,
        }))
    }

    async fn cancel(&self, booking_id: &str) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE bookings
            SET status = 'canceled', updated_at = now()
            WHERE id = $1 AND status <> 'canceled'
            "#,
        )
        .bind(booking_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated > 0 {
            return Ok(true);
        }
        if self.find(booking_id).await?.is_none() {
            anyhow::bail!("booking {booking_id} not found");
        }
        Ok(false)
    }

    async fn reschedule(&self, booking_id: &str, starts_at: DateTime<Utc>) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE bookings
            SET starts_at = $2, updated_at = now()
            WHERE id = $1 AND status = 'confirmed'
            "#,
        )
        .bind(booking_id)
        .bind(starts_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(BookingNotReschedulable(booking_id.to_string()).into());
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgPractitionerDirectory {
    pool: PgPool,
}

impl PgPractitionerDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PractitionerDirectory for PgPractitionerDirectory {
    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Practitioner>> {
        let row = sqlx::query(
            r#"
            SELECT p.id, p.display_name
            FROM practitioner_api_tokens t
            JOIN practitioners p ON p.id = t.practitioner_id
            WHERE t.token_sha256 = $1 AND t.revoked_at IS NULL
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Practitioner> {
            Ok(Practitioner {
                id: row.try_get("id")?,
                display_name: row.try_get("display_name")?,
            })
        })
        .transpose()
    }
}
