use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCode {
    MissingField,
    InvalidAmount,
    InvalidCurrency,
}

impl ValidationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::InvalidAmount => "invalid_amount",
            Self::InvalidCurrency => "invalid_currency",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckoutError {
    #[error("{message}")]
    Validation {
        code: ValidationCode,
        field: &'static str,
        message: String,
    },
    #[error("payment account not found; complete onboarding first")]
    AccountNotFound,
    #[error(
        "payment account is not ready (onboarding_completed={onboarding_completed}, payments_enabled={payments_enabled})"
    )]
    AccountNotReady {
        onboarding_completed: bool,
        payments_enabled: bool,
    },
    #[error("payment provider error: {0}")]
    Provider(String),
    #[error("checkout session {session_id} was created but could not be recorded: {message}")]
    Persistence { session_id: String, message: String },
    #[error("checkout failed: {0}")]
    Orchestration(String),
}

impl CheckoutError {
    pub(crate) fn missing(field: &'static str) -> Self {
        Self::Validation {
            code: ValidationCode::MissingField,
            field,
            message: format!("{field} is required"),
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::AccountNotFound => "account_not_found",
            Self::AccountNotReady { .. } => "account_not_ready",
            Self::Provider(_) => "provider_error",
            Self::Persistence { .. } => "persistence_error",
            Self::Orchestration(_) => "orchestration_error",
        }
    }

    /// A provider-side session exists that no local record points at.
    pub fn is_reconciliation_required(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }

    /// Caller-fixable failures, as opposed to faults on our side or the provider's.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::AccountNotFound | Self::AccountNotReady { .. }
        )
    }

    /// Next step to show the practitioner for precondition failures.
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            Self::AccountNotFound => {
                Some("Connect a payment account and complete onboarding before taking payments.")
            }
            Self::AccountNotReady {
                onboarding_completed: false,
                ..
            } => Some("Finish payment account onboarding to start accepting payments."),
            Self::AccountNotReady {
                payments_enabled: false,
                ..
            } => Some(
                "Payments are disabled on your payment account; review the requirements in your provider dashboard.",
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_persistence_needs_reconciliation() {
        let persistence = CheckoutError::Persistence {
            session_id: "cs_1".to_string(),
            message: "timeout".to_string(),
        };

        assert!(persistence.is_reconciliation_required());
        assert!(!persistence.is_client_error());
        assert!(!CheckoutError::Provider("declined".to_string()).is_reconciliation_required());
        assert!(!CheckoutError::missing("amount").is_reconciliation_required());
    }

    #[test]
    fn guidance_follows_the_missing_flag() {
        let onboarding = CheckoutError::AccountNotReady {
            onboarding_completed: false,
            payments_enabled: true,
        };
        let disabled = CheckoutError::AccountNotReady {
            onboarding_completed: true,
            payments_enabled: false,
        };

        assert!(onboarding.guidance().unwrap().contains("onboarding"));
        assert!(disabled.guidance().unwrap().contains("disabled"));
        assert!(CheckoutError::Orchestration("x".to_string()).guidance().is_none());
    }
}
