use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use consulto_core::{PaymentProvider, ProviderSession, ProviderSessionRequest, to_minor_units};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::info;

use crate::config::StripeConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Stripe Checkout over the REST API, charging on behalf of a connected account.
#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    secret_key: String,
    api_base: String,
    success_url: String,
    cancel_url: String,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionBody {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build stripe http client")?;

        Ok(Self {
            http,
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.clone(),
            success_url: config.success_url.clone(),
            cancel_url: config.cancel_url.clone(),
        })
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_checkout_session(
        &self,
        request: &ProviderSessionRequest,
    ) -> Result<ProviderSession> {
        let form = checkout_session_form(request, &self.success_url, &self.cancel_url)?;

        let mut call = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form);
        if let Some(key) = &request.idempotency_key {
            call = call.header("Idempotency-Key", key);
        }

        let response = call.send().await.context("stripe request failed")?;
        let status = response.status();
        let body = response.text().await.context("stripe response unreadable")?;

        parse_checkout_session(status, &body)
    }

    async fn expire_checkout_session(&self, session_id: &str) -> Result<()> {
        let response = self
            .http
            .post(format!(
                "{}/v1/checkout/sessions/{}/expire",
                self.api_base, session_id
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .context("stripe request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(describe_error(status, &body));
        }

        info!(session_id, "expired checkout session");
        Ok(())
    }
}

/// Form-encoded Checkout Session parameters. Funds settle to the connected
/// account, and `booking_id` rides along in both session and payment intent
/// metadata.
pub fn checkout_session_form(
    request: &ProviderSessionRequest,
    success_url: &str,
    cancel_url: &str,
) -> Result<Vec<(&'static str, String)>> {
    let unit_amount = to_minor_units(request.amount, &request.currency).with_context(|| {
        format!(
            "amount {} {} has no exact minor-unit value",
            request.amount, request.currency
        )
    })?;

    Ok(vec![
        ("mode", "payment".to_string()),
        ("success_url", success_url.to_string()),
        ("cancel_url", cancel_url.to_string()),
        ("customer_email", request.customer_email.clone()),
        ("client_reference_id", request.booking_id.clone()),
        ("line_items[0][quantity]", "1".to_string()),
        (
            "line_items[0][price_data][currency]",
            request.currency.to_ascii_lowercase(),
        ),
        (
            "line_items[0][price_data][unit_amount]",
            unit_amount.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]",
            request.description.clone(),
        ),
        (
            "payment_intent_data[on_behalf_of]",
            request.connected_account_id.clone(),
        ),
        (
            "payment_intent_data[transfer_data][destination]",
            request.connected_account_id.clone(),
        ),
        (
            "payment_intent_data[metadata][booking_id]",
            request.booking_id.clone(),
        ),
        ("metadata[booking_id]", request.booking_id.clone()),
    ])
}

fn parse_checkout_session(status: StatusCode, body: &str) -> Result<ProviderSession> {
    if !status.is_success() {
        anyhow::bail!(describe_error(status, body));
    }

    let session: CheckoutSessionBody =
        serde_json::from_str(body).context("unexpected checkout session payload")?;
    let url = session
        .url
        .filter(|url| !url.is_empty())
        .with_context(|| format!("checkout session {} has no url", session.id))?;

    Ok(ProviderSession {
        session_id: session.id,
        url,
    })
}

fn describe_error(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope { error }) => format!(
            "stripe returned {}: {} ({})",
            status.as_u16(),
            error.message.unwrap_or_else(|| "no message".to_string()),
            error
                .code
                .or(error.kind)
                .unwrap_or_else(|| "unknown".to_string()),
        ),
        Err(_) => format!("stripe returned {}", status.as_u16()),
    }
}
