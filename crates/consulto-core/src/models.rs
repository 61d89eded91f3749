use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Action a manage link authorizes on a single booking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ManageAction {
    Reschedule,
    Cancel,
}

impl ManageAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reschedule => "reschedule",
            Self::Cancel => "cancel",
        }
    }

    /// Path segment of the manage URL for this action.
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Reschedule => "reschedulings",
            Self::Cancel => "cancellations",
        }
    }
}

impl fmt::Display for ManageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown manage action: {0}")]
pub struct UnknownManageAction(pub String);

impl FromStr for ManageAction {
    type Err = UnknownManageAction;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "reschedule" => Ok(Self::Reschedule),
            "cancel" => Ok(Self::Cancel),
            other => Err(UnknownManageAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentAccountStatus {
    pub account_id: String,
    pub onboarding_completed: bool,
    pub payments_enabled: bool,
}

impl PaymentAccountStatus {
    pub fn is_ready(&self) -> bool {
        self.onboarding_completed && self.payments_enabled
    }
}

/// Input to checkout creation. String fields default to empty so that an
/// absent field reaches validation instead of failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutRequest {
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
    #[serde(default)]
    pub practitioner_account_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckoutSession {
    pub session_id: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentSessionRecord {
    pub provider_session_id: String,
    pub booking_id: String,
    pub account_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub checkout_url: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Canceled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Canceled => "canceled",
        }
    }
}

impl FromStr for BookingStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "confirmed" => Ok(Self::Confirmed),
            "canceled" => Ok(Self::Canceled),
            other => anyhow::bail!("unknown booking status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub practitioner_id: String,
    pub client_email: String,
    pub client_name: String,
    pub starts_at: DateTime<Utc>,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Practitioner {
    pub id: String,
    pub display_name: String,
}
