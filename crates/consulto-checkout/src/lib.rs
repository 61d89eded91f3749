pub mod error;
pub mod orchestrator;
pub mod validate;

pub use error::{CheckoutError, ValidationCode};
pub use orchestrator::{
    CheckoutOrchestrator, CheckoutSettings, SESSION_STATUS_EXPIRED, SESSION_STATUS_OPEN,
    SESSION_STATUS_UNRECORDED,
};
pub use validate::{ValidatedCheckout, validate_request};
