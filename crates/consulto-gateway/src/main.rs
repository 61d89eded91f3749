mod routes;

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result as AnyResult};
use consulto_checkout::{CheckoutOrchestrator, CheckoutSettings};
use consulto_links::LinkSigner;
use consulto_platform::{
    PgBookingStore, PgPaymentAccountStore, PgPaymentSessionStore, PgPractitionerDirectory,
    RedisBus, ServiceConfig, StripeClient, connect_database,
};
use tracing::info;

use crate::routes::{AppState, build_router};

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "consulto_gateway=info,consulto_checkout=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let signer =
        LinkSigner::new(&config.manage_link_secret).context("manage link signer unavailable")?;
    let pool = connect_database(&config.database_url).await?;
    let redis = Arc::new(RedisBus::connect(&config.redis_url)?);
    let stripe = Arc::new(StripeClient::new(&config.stripe)?);

    let checkout = CheckoutOrchestrator::new(
        Arc::new(PgPaymentAccountStore::new(pool.clone())),
        stripe,
        Arc::new(PgPaymentSessionStore::new(pool.clone())),
        redis.clone(),
        CheckoutSettings {
            idempotent_sessions: config.idempotent_checkout_sessions,
        },
    );

    let state = AppState {
        checkout: Arc::new(checkout),
        signer,
        public_base_url: config.public_base_url.clone(),
        bookings: Arc::new(PgBookingStore::new(pool.clone())),
        practitioners: Arc::new(PgPractitionerDirectory::new(pool)),
        events: redis,
    };

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, build_router(state)).await?;

    Ok(())
}
