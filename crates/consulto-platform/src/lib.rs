pub mod auth;
pub mod config;
pub mod contracts;
pub mod postgres;
pub mod redis_bus;
pub mod stripe;

pub use auth::hash_api_token;
pub use config::{ServiceConfig, StripeConfig, WorkerConfig};
pub use contracts::{
    CancelBookingResponse, CheckoutResponse, CreateCheckoutRequest, ManageLinkQuery,
    ManageLinksResponse, ManagedBookingView, RescheduleBookingRequest, RescheduleBookingResponse,
};
pub use postgres::{
    PgBookingStore, PgPaymentAccountStore, PgPaymentSessionStore, PgPractitionerDirectory,
    connect_database,
};
pub use redis_bus::RedisBus;
pub use stripe::StripeClient;
