use consulto_core::{CheckoutRequest, normalize_currency, to_minor_units};
use rust_decimal::Decimal;

use crate::error::{CheckoutError, ValidationCode};

/// A request that passed field validation, trimmed and normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCheckout {
    pub booking_id: String,
    pub client_email: String,
    pub client_name: String,
    pub consultation_date: String,
    pub amount: Decimal,
    pub currency: String,
    pub practitioner_name: String,
    pub practitioner_account_id: String,
}

impl ValidatedCheckout {
    pub fn description(&self) -> String {
        format!(
            "Consultation with {} on {}",
            self.practitioner_name, self.consultation_date
        )
    }
}

pub fn validate_request(request: &CheckoutRequest) -> Result<ValidatedCheckout, CheckoutError> {
    let booking_id = required(&request.booking_id, "booking_id")?;
    let client_email = required(&request.client_email, "client_email")?;
    let client_name = required(&request.client_name, "client_name")?;
    let consultation_date = required(&request.consultation_date, "consultation_date")?;
    let practitioner_name = required(&request.practitioner_name, "practitioner_name")?;
    let practitioner_account_id =
        required(&request.practitioner_account_id, "practitioner_account_id")?;

    let amount = request.amount.ok_or_else(|| CheckoutError::missing("amount"))?;
    if amount <= Decimal::ZERO {
        return Err(CheckoutError::Validation {
            code: ValidationCode::InvalidAmount,
            field: "amount",
            message: "amount must be greater than zero".to_string(),
        });
    }

    if request.currency.trim().is_empty() {
        return Err(CheckoutError::missing("currency"));
    }
    let currency =
        normalize_currency(&request.currency).map_err(|err| CheckoutError::Validation {
            code: ValidationCode::InvalidCurrency,
            field: "currency",
            message: err.to_string(),
        })?;

    if to_minor_units(amount, &currency).is_none() {
        return Err(CheckoutError::Validation {
            code: ValidationCode::InvalidAmount,
            field: "amount",
            message: format!("amount {amount} is not a whole number of {currency} minor units"),
        });
    }

    Ok(ValidatedCheckout {
        booking_id,
        client_email,
        client_name,
        consultation_date,
        amount,
        currency,
        practitioner_name,
        practitioner_account_id,
    })
}

fn required(value: &str, field: &'static str) -> Result<String, CheckoutError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CheckoutError::missing(field));
    }
    Ok(trimmed.to_string())
}
