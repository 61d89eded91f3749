use anyhow::{Context, Result};

pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
    pub public_base_url: String,
    pub manage_link_secret: String,
    pub stripe: StripeConfig,
    pub idempotent_checkout_sessions: bool,
}

/// Connection settings for background workers.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub database_url: String,
    pub redis_url: String,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        Self::from_lookup(default_http_addr, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(default_http_addr: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .with_context(|| format!("{key} is required"))
        };

        let database_url = required("DATABASE_URL")?;
        let redis_url = required("REDIS_URL")?;
        let http_addr = lookup("HTTP_ADDR").unwrap_or_else(|| default_http_addr.to_string());
        let public_base_url = required("PUBLIC_BASE_URL")?
            .trim_end_matches('/')
            .to_string();
        let manage_link_secret = required("MANAGE_LINK_SECRET")?;

        let stripe = StripeConfig {
            secret_key: required("STRIPE_SECRET_KEY")?,
            api_base: lookup("STRIPE_API_BASE")
                .unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            success_url: required("CHECKOUT_SUCCESS_URL")?,
            cancel_url: required("CHECKOUT_CANCEL_URL")?,
        };

        let idempotent_checkout_sessions = match lookup("CHECKOUT_IDEMPOTENT_SESSIONS") {
            Some(raw) => {
                parse_flag(&raw).context("CHECKOUT_IDEMPOTENT_SESSIONS must be true or false")?
            }
            None => false,
        };

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
            public_base_url,
            manage_link_secret,
            stripe,
            idempotent_checkout_sessions,
        })
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;

        Ok(Self {
            database_url,
            redis_url,
        })
    }
}

pub fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("unrecognized flag value {other:?}"),
    }
}
