use chrono::{DateTime, Utc};
use consulto_checkout::CheckoutError;
use consulto_core::{BookingStatus, CheckoutRequest, CheckoutSession, ManageAction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Checkout body posted by an authenticated practitioner. The practitioner
/// identity comes from the bearer token, never from the body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateCheckoutRequest {
    #[serde(default)]
    pub booking_id: String,
    #[serde(default)]
    pub client_email: String,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub consultation_date: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub practitioner_name: String,
}

impl CreateCheckoutRequest {
    pub fn into_checkout_request(self, practitioner_id: &str) -> CheckoutRequest {
        CheckoutRequest {
            booking_id: self.booking_id,
            client_email: self.client_email,
            client_name: self.client_name,
            consultation_date: self.consultation_date,
            amount: self.amount,
            currency: self.currency,
            practitioner_name: self.practitioner_name,
            practitioner_account_id: practitioner_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckoutResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onboarding_completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payments_enabled: Option<bool>,
}

impl CheckoutResponse {
    pub fn succeeded(session: CheckoutSession) -> Self {
        Self {
            success: true,
            checkout_url: Some(session.checkout_url),
            session_id: Some(session.session_id),
            ..Self::default()
        }
    }

    pub fn failed(err: &CheckoutError) -> Self {
        let mut response = Self {
            success: false,
            code: Some(err.kind().to_string()),
            guidance: err.guidance().map(str::to_string),
            ..Self::default()
        };

        match err {
            CheckoutError::Validation {
                code,
                field,
                message,
            } => {
                response.error = Some(message.clone());
                response.reason = Some(code.as_str().to_string());
                response.field = Some((*field).to_string());
            }
            CheckoutError::AccountNotFound => {
                response.error = Some(err.to_string());
            }
            CheckoutError::AccountNotReady {
                onboarding_completed,
                payments_enabled,
            } => {
                response.error = Some("Payment account is not ready to accept payments".to_string());
                response.onboarding_completed = Some(*onboarding_completed);
                response.payments_enabled = Some(*payments_enabled);
            }
            CheckoutError::Provider(_)
            | CheckoutError::Persistence { .. }
            | CheckoutError::Orchestration(_) => {
                response.error = Some("Failed to create checkout session".to_string());
                response.details = Some(err.to_string());
            }
        }

        response
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManageLinksResponse {
    pub booking_id: String,
    pub reschedule_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManageLinkQuery {
    #[serde(default)]
    pub sig: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManagedBookingView {
    pub booking_id: String,
    pub action: ManageAction,
    pub client_name: String,
    pub starts_at: DateTime<Utc>,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelBookingResponse {
    pub booking_id: String,
    pub status: BookingStatus,
    pub already_canceled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleBookingRequest {
    pub starts_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RescheduleBookingResponse {
    pub booking_id: String,
    pub starts_at: DateTime<Utc>,
}
