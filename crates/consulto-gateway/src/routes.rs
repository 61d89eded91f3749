use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    routing::{get, post},
};
use chrono::Utc;
use consulto_checkout::{CheckoutError, CheckoutOrchestrator};
use consulto_core::{
    Booking, BookingNotReschedulable, BookingStatus, BookingStore, DomainEvent, DomainEventKind, EventPublisher,
    ManageAction, Practitioner, PractitionerDirectory,
};
use consulto_links::LinkSigner;
use consulto_platform::{
    CancelBookingResponse, CheckoutResponse, CreateCheckoutRequest, ManageLinkQuery,
    ManageLinksResponse, ManagedBookingView, RescheduleBookingRequest,
    RescheduleBookingResponse, auth::bearer_token, hash_api_token,
};
use serde_json::json;
use tracing::{error, info, warn};

const INVALID_LINK: &str = "invalid or expired link";

#[derive(Clone)]
pub struct AppState {
    pub checkout: Arc<CheckoutOrchestrator>,
    pub signer: LinkSigner,
    pub public_base_url: String,
    pub bookings: Arc<dyn BookingStore>,
    pub practitioners: Arc<dyn PractitionerDirectory>,
    pub events: Arc<dyn EventPublisher>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/payments/checkout", post(create_checkout))
        .route(
            "/bookings/{booking_id}/manage-links",
            post(create_manage_links),
        )
        .route(
            "/cancellations/{booking_id}",
            get(view_cancellation).post(cancel_booking),
        )
        .route(
            "/reschedulings/{booking_id}",
            get(view_rescheduling).post(reschedule_booking),
        )
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateCheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), (StatusCode, String)> {
    let practitioner = authenticate(&state, &headers).await?;
    let request = payload.into_checkout_request(&practitioner.id);

    match state.checkout.create_checkout(&request).await {
        Ok(session) => Ok((
            StatusCode::CREATED,
            Json(CheckoutResponse::succeeded(session)),
        )),
        Err(err) => Ok((
            checkout_error_status(&err),
            Json(CheckoutResponse::failed(&err)),
        )),
    }
}

async fn create_manage_links(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
) -> Result<Json<ManageLinksResponse>, (StatusCode, String)> {
    let practitioner = authenticate(&state, &headers).await?;

    let booking = state
        .bookings
        .find(&booking_id)
        .await
        .map_err(internal_error)?
        .filter(|booking| booking.practitioner_id == practitioner.id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "booking not found".to_string()))?;

    let url_for = |action| {
        state.signer.build_manage_url(
            &state.public_base_url,
            action,
            &booking.id,
            &booking.client_email,
        )
    };

    Ok(Json(ManageLinksResponse {
        booking_id: booking.id.clone(),
        reschedule_url: url_for(ManageAction::Reschedule),
        cancel_url: url_for(ManageAction::Cancel),
    }))
}

async fn view_cancellation(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
    Query(query): Query<ManageLinkQuery>,
) -> Result<Json<ManagedBookingView>, (StatusCode, String)> {
    let booking = verified_booking(&state, &booking_id, &query.sig, ManageAction::Cancel).await?;
    Ok(Json(managed_view(booking, ManageAction::Cancel)))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
    Query(query): Query<ManageLinkQuery>,
) -> Result<Json<CancelBookingResponse>, (StatusCode, String)> {
    let booking = verified_booking(&state, &booking_id, &query.sig, ManageAction::Cancel).await?;

    let changed = state
        .bookings
        .cancel(&booking.id)
        .await
        .map_err(internal_error)?;

    if changed {
        info!(booking_id = %booking.id, "booking canceled via manage link");
        publish(
            &state,
            DomainEvent::new(
                DomainEventKind::BookingCanceled,
                &booking.id,
                json!({ "starts_at": booking.starts_at }),
            ),
        )
        .await;
    }

    Ok(Json(CancelBookingResponse {
        booking_id: booking.id,
        status: BookingStatus::Canceled,
        already_canceled: !changed,
    }))
}

async fn view_rescheduling(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
    Query(query): Query<ManageLinkQuery>,
) -> Result<Json<ManagedBookingView>, (StatusCode, String)> {
    let booking =
        verified_booking(&state, &booking_id, &query.sig, ManageAction::Reschedule).await?;
    ensure_not_canceled(&booking)?;
    Ok(Json(managed_view(booking, ManageAction::Reschedule)))
}

async fn reschedule_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
    Query(query): Query<ManageLinkQuery>,
    Json(payload): Json<RescheduleBookingRequest>,
) -> Result<Json<RescheduleBookingResponse>, (StatusCode, String)> {
    let booking =
        verified_booking(&state, &booking_id, &query.sig, ManageAction::Reschedule).await?;
    ensure_not_canceled(&booking)?;

    if payload.starts_at <= Utc::now() {
        return Err((
            StatusCode::BAD_REQUEST,
            "starts_at must be in the future".to_string(),
        ));
    }

    state
        .bookings
        .reschedule(&booking.id, payload.starts_at)
        .await
        .map_err(|err| {
            if err.is::<BookingNotReschedulable>() {
                warn!(booking_id = %booking.id, "booking canceled before reschedule landed");
                canceled_conflict()
            } else {
                internal_error(err)
            }
        })?;

    info!(booking_id = %booking.id, "booking rescheduled via manage link");
    publish(
        &state,
        DomainEvent::new(
            DomainEventKind::BookingRescheduled,
            &booking.id,
            json!({ "previous_starts_at": booking.starts_at, "starts_at": payload.starts_at }),
        ),
    )
    .await;

    Ok(Json(RescheduleBookingResponse {
        booking_id: booking.id,
        starts_at: payload.starts_at,
    }))
}

async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Practitioner, (StatusCode, String)> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(unauthorized)?;

    state
        .practitioners
        .find_by_token_hash(&hash_api_token(token))
        .await
        .map_err(internal_error)?
        .ok_or_else(unauthorized)
}

/// Loads the booking and checks the link signature against its client email.
/// A missing booking and a bad signature are indistinguishable to the caller.
async fn verified_booking(
    state: &AppState,
    booking_id: &str,
    signature: &str,
    action: ManageAction,
) -> Result<Booking, (StatusCode, String)> {
    let booking = state
        .bookings
        .find(booking_id)
        .await
        .map_err(internal_error)?;

    match booking {
        Some(booking)
            if state
                .signer
                .verify(signature, &booking.id, &booking.client_email, action) =>
        {
            Ok(booking)
        }
        _ => {
            warn!(booking_id, %action, "rejected manage link");
            Err((StatusCode::UNAUTHORIZED, INVALID_LINK.to_string()))
        }
    }
}

fn ensure_not_canceled(booking: &Booking) -> Result<(), (StatusCode, String)> {
    if booking.status == BookingStatus::Canceled {
        return Err(canceled_conflict());
    }
    Ok(())
}

fn canceled_conflict() -> (StatusCode, String) {
    (
        StatusCode::CONFLICT,
        "booking has been canceled".to_string(),
    )
}

fn managed_view(booking: Booking, action: ManageAction) -> ManagedBookingView {
    ManagedBookingView {
        booking_id: booking.id,
        action,
        client_name: booking.client_name,
        starts_at: booking.starts_at,
        status: booking.status,
    }
}

async fn publish(state: &AppState, event: DomainEvent) {
    if let Err(err) = state.events.publish(&event).await {
        warn!(
            booking_id = %event.aggregate_id,
            channel = event.kind.channel(),
            "failed to publish event: {err:#}"
        );
    }
}

fn checkout_error_status(err: &CheckoutError) -> StatusCode {
    if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn unauthorized() -> (StatusCode, String) {
    (StatusCode::UNAUTHORIZED, "unauthorized".to_string())
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    error!("request failed: {err:#}");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::Request,
    };
    use chrono::Duration;
    use consulto_checkout::CheckoutSettings;
    use consulto_core::PaymentAccountStatus;
    use consulto_memstore::{
        InMemoryBookings, InMemoryPaymentAccounts, InMemoryPaymentSessions, InMemoryPractitioners,
        RecordingEventPublisher, RecordingPaymentProvider,
    };
    use async_trait::async_trait;
    use chrono::DateTime;
    use serde_json::Value;
    use tower::ServiceExt;

    const TOKEN: &str = "tok_practitioner_7";
    const BASE_URL: &str = "https://book.example.com";

    struct TestApp {
        state: AppState,
        router: Router,
        signer: LinkSigner,
        accounts: Arc<InMemoryPaymentAccounts>,
        sessions: Arc<InMemoryPaymentSessions>,
        bookings: Arc<InMemoryBookings>,
        events: Arc<RecordingEventPublisher>,
    }

    impl TestApp {
        async fn new() -> Self {
            let signer = LinkSigner::new("gateway-test-secret").unwrap();
            let accounts = Arc::new(InMemoryPaymentAccounts::default());
            let sessions = Arc::new(InMemoryPaymentSessions::default());
            let bookings = Arc::new(InMemoryBookings::default());
            let practitioners = Arc::new(InMemoryPractitioners::default());
            let events = Arc::new(RecordingEventPublisher::default());

            practitioners
                .insert(
                    &hash_api_token(TOKEN),
                    Practitioner {
                        id: "pr_7".to_string(),
                        display_name: "Dr. Sam Reyes".to_string(),
                    },
                )
                .await;
            bookings
                .insert(Booking {
                    id: "bk_42".to_string(),
                    practitioner_id: "pr_7".to_string(),
                    client_email: "client@example.com".to_string(),
                    client_name: "Robin Client".to_string(),
                    starts_at: Utc::now() + Duration::days(3),
                    status: BookingStatus::Confirmed,
                })
                .await;

            let checkout = CheckoutOrchestrator::new(
                accounts.clone(),
                Arc::new(RecordingPaymentProvider::default()),
                sessions.clone(),
                events.clone(),
                CheckoutSettings::default(),
            );

            let state = AppState {
                checkout: Arc::new(checkout),
                signer: signer.clone(),
                public_base_url: BASE_URL.to_string(),
                bookings: bookings.clone(),
                practitioners,
                events: events.clone(),
            };
            let router = build_router(state.clone());

            Self {
                state,
                router,
                signer,
                accounts,
                sessions,
                bookings,
                events,
            }
        }

        async fn ready_account(&self) {
            self.accounts
                .insert(
                    "pr_7",
                    PaymentAccountStatus {
                        account_id: "acct_1Practitioner".to_string(),
                        onboarding_completed: true,
                        payments_enabled: true,
                    },
                )
                .await;
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body = serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
            (status, body)
        }

        fn sig(&self, action: ManageAction) -> String {
            self.signer.sign("bk_42", "client@example.com", action)
        }
    }

    /// Reports every booking as confirmed, like a read taken just before a
    /// concurrent cancel committed.
    struct StaleStatusBookings(Arc<InMemoryBookings>);

    #[async_trait]
    impl BookingStore for StaleStatusBookings {
        async fn find(&self, booking_id: &str) -> anyhow::Result<Option<Booking>> {
            Ok(self.0.find(booking_id).await?.map(|mut booking| {
                booking.status = BookingStatus::Confirmed;
                booking
            }))
        }

        async fn cancel(&self, booking_id: &str) -> anyhow::Result<bool> {
            self.0.cancel(booking_id).await
        }

        async fn reschedule(
            &self,
            booking_id: &str,
            starts_at: DateTime<Utc>,
        ) -> anyhow::Result<()> {
            self.0.reschedule(booking_id, starts_at).await
        }
    }

    fn checkout_request(token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/payments/checkout")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn checkout_body() -> Value {
        json!({
            "booking_id": "bk_42",
            "client_email": "client@example.com",
            "client_name": "Robin Client",
            "consultation_date": "2026-11-02",
            "amount": "120.00",
            "currency": "EUR",
            "practitioner_name": "Dr. Sam Reyes",
        })
    }

    #[tokio::test]
    async fn checkout_requires_bearer_token() {
        let app = TestApp::new().await;

        let (status, _) = app.send(checkout_request(None, checkout_body())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .send(checkout_request(Some("wrong"), checkout_body()))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn checkout_returns_provider_url() {
        let app = TestApp::new().await;
        app.ready_account().await;

        let (status, body) = app
            .send(checkout_request(Some(TOKEN), checkout_body()))
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        let url = body["checkout_url"].as_str().unwrap();
        let session_id = body["session_id"].as_str().unwrap();
        assert!(url.ends_with(session_id));
        assert!(body.get("error").is_none());
        assert_eq!(app.sessions.writes(), 1);
    }

    #[tokio::test]
    async fn checkout_validation_failure_is_bad_request() {
        let app = TestApp::new().await;
        app.ready_account().await;
        let mut body = checkout_body();
        body["amount"] = json!("0");

        let (status, body) = app.send(checkout_request(Some(TOKEN), body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "validation_error");
        assert_eq!(body["reason"], "invalid_amount");
        assert!(body.get("checkout_url").is_none());
    }

    #[tokio::test]
    async fn checkout_without_account_is_bad_request_with_guidance() {
        let app = TestApp::new().await;

        let (status, body) = app
            .send(checkout_request(Some(TOKEN), checkout_body()))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "account_not_found");
        assert!(body["guidance"].is_string());
    }

    #[tokio::test]
    async fn checkout_persistence_failure_is_server_error() {
        let app = TestApp::new().await;
        app.ready_account().await;
        app.sessions.set_failing(true);

        let (status, body) = app
            .send(checkout_request(Some(TOKEN), checkout_body()))
            .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "persistence_error");
        assert_eq!(body["error"], "Failed to create checkout session");
    }

    #[tokio::test]
    async fn manage_links_verify_against_booking() {
        let app = TestApp::new().await;
        let request = Request::builder()
            .method("POST")
            .uri("/bookings/bk_42/manage-links")
            .header("authorization", format!("Bearer {TOKEN}"))
            .body(Body::empty())
            .unwrap();

        let (status, body) = app.send(request).await;

        assert_eq!(status, StatusCode::OK);
        let cancel_url = body["cancel_url"].as_str().unwrap();
        let (path, sig) = cancel_url.split_once("?sig=").unwrap();
        assert_eq!(path, format!("{BASE_URL}/cancellations/bk_42"));
        assert!(
            app.signer
                .verify(sig, "bk_42", "client@example.com", ManageAction::Cancel)
        );
        assert!(
            body["reschedule_url"]
                .as_str()
                .unwrap()
                .starts_with(&format!("{BASE_URL}/reschedulings/bk_42?sig="))
        );
    }

    #[tokio::test]
    async fn manage_links_hidden_from_other_practitioners() {
        let app = TestApp::new().await;
        app.bookings
            .insert(Booking {
                id: "bk_other".to_string(),
                practitioner_id: "pr_other".to_string(),
                client_email: "x@example.com".to_string(),
                client_name: "X".to_string(),
                starts_at: Utc::now(),
                status: BookingStatus::Confirmed,
            })
            .await;
        let request = Request::builder()
            .method("POST")
            .uri("/bookings/bk_other/manage-links")
            .header("authorization", format!("Bearer {TOKEN}"))
            .body(Body::empty())
            .unwrap();

        let (status, _) = app.send(request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_link_is_idempotent() {
        let app = TestApp::new().await;
        let uri = format!("/cancellations/bk_42?sig={}", app.sig(ManageAction::Cancel));
        let post = || {
            Request::builder()
                .method("POST")
                .uri(uri.clone())
                .body(Body::empty())
                .unwrap()
        };

        let (status, body) = app.send(post()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "canceled");
        assert_eq!(body["already_canceled"], false);

        let (status, body) = app.send(post()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["already_canceled"], true);

        let events = app.events.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DomainEventKind::BookingCanceled);
    }

    #[tokio::test]
    async fn reschedule_signature_cannot_cancel() {
        let app = TestApp::new().await;
        let request = Request::builder()
            .method("POST")
            .uri(format!(
                "/cancellations/bk_42?sig={}",
                app.sig(ManageAction::Reschedule)
            ))
            .body(Body::empty())
            .unwrap();

        let (status, _) = app.send(request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let booking = app.bookings.find("bk_42").await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn garbage_or_missing_signature_is_unauthorized() {
        let app = TestApp::new().await;

        for uri in [
            "/cancellations/bk_42",
            "/cancellations/bk_42?sig=",
            "/cancellations/bk_42?sig=%2B%2F%3D%3D",
            "/cancellations/unknown?sig=abc",
        ] {
            let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let (status, _) = app.send(request).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn reschedule_link_moves_booking() {
        let app = TestApp::new().await;
        let new_start = Utc::now() + Duration::days(10);
        let request = Request::builder()
            .method("POST")
            .uri(format!(
                "/reschedulings/bk_42?sig={}",
                app.sig(ManageAction::Reschedule)
            ))
            .header("content-type", "application/json")
            .body(Body::from(json!({ "starts_at": new_start }).to_string()))
            .unwrap();

        let (status, _) = app.send(request).await;

        assert_eq!(status, StatusCode::OK);
        let booking = app.bookings.find("bk_42").await.unwrap().unwrap();
        assert_eq!(booking.starts_at, new_start);
        assert_eq!(
            app.events.events().await[0].kind,
            DomainEventKind::BookingRescheduled
        );
    }

    #[tokio::test]
    async fn canceled_booking_cannot_be_rescheduled() {
        let app = TestApp::new().await;
        app.bookings.cancel("bk_42").await.unwrap();
        let request = Request::builder()
            .uri(format!(
                "/reschedulings/bk_42?sig={}",
                app.sig(ManageAction::Reschedule)
            ))
            .body(Body::empty())
            .unwrap();

        let (status, _) = app.send(request).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn cancel_racing_reschedule_is_conflict() {
        let app = TestApp::new().await;
        app.bookings.cancel("bk_42").await.unwrap();
        let mut state = app.state.clone();
        state.bookings = Arc::new(StaleStatusBookings(app.bookings.clone()));
        let router = build_router(state);
        let request = Request::builder()
            .method("POST")
            .uri(format!(
                "/reschedulings/bk_42?sig={}",
                app.sig(ManageAction::Reschedule)
            ))
            .header("content-type", "application/json")
            .body(Body::from(
                json!({ "starts_at": Utc::now() + Duration::days(10) }).to_string(),
            ))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(app.events.events().await.is_empty());
    }

    #[tokio::test]
    async fn manage_links_encode_booking_id_in_path() {
        let app = TestApp::new().await;
        app.bookings
            .insert(Booking {
                id: "bk/7?x".to_string(),
                practitioner_id: "pr_7".to_string(),
                client_email: "client@example.com".to_string(),
                client_name: "Robin Client".to_string(),
                starts_at: Utc::now() + Duration::days(3),
                status: BookingStatus::Confirmed,
            })
            .await;
        let request = Request::builder()
            .method("POST")
            .uri("/bookings/bk%2F7%3Fx/manage-links")
            .header("authorization", format!("Bearer {TOKEN}"))
            .body(Body::empty())
            .unwrap();

        let (status, body) = app.send(request).await;
        assert_eq!(status, StatusCode::OK);

        let cancel_url = body["cancel_url"].as_str().unwrap();
        let path_and_query = cancel_url.strip_prefix(BASE_URL).unwrap();
        assert!(path_and_query.starts_with("/cancellations/bk%2F7%3Fx?sig="));

        let request = Request::builder()
            .method("POST")
            .uri(path_and_query)
            .body(Body::empty())
            .unwrap();
        let (status, body) = app.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "canceled");
    }
}
