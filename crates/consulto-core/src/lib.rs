pub mod events;
pub mod models;
pub mod money;
pub mod storage;

pub use events::{DomainEvent, DomainEventKind};
pub use models::{
    Booking, BookingStatus, CheckoutRequest, CheckoutSession, ManageAction, PaymentAccountStatus,
    PaymentSessionRecord, Practitioner, UnknownManageAction,
};
pub use money::{minor_unit_exponent, normalize_currency, to_minor_units};
pub use storage::{
    BookingNotReschedulable, BookingStore, EventPublisher, PaymentAccountStore, PaymentProvider, PaymentSessionStore,
    PractitionerDirectory, ProviderSession, ProviderSessionRequest,
};
