//! Signed booking-management links.
//!
//! A manage link authorizes exactly one action on one booking for one
//! recipient. The signature is an HMAC-SHA256 over
//! `booking_id:email:action`, encoded as unpadded base64url, so validity is
//! decided by recomputation and nothing is stored.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub use consulto_core::ManageAction;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum LinkSignerError {
    #[error("manage link secret is not configured")]
    MissingSecret,
    #[error("manage link secret is unusable: {0}")]
    InvalidSecret(String),
}

#[derive(Clone)]
pub struct LinkSigner {
    keyed: HmacSha256,
}

impl fmt::Debug for LinkSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSigner").finish_non_exhaustive()
    }
}

impl LinkSigner {
    /// Builds a signer from the shared secret. A blank secret is rejected so
    /// the process fails at startup instead of on the first link.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, LinkSignerError> {
        let secret = secret.as_ref();
        if secret.iter().all(u8::is_ascii_whitespace) {
            return Err(LinkSignerError::MissingSecret);
        }

        let keyed = HmacSha256::new_from_slice(secret)
            .map_err(|err| LinkSignerError::InvalidSecret(err.to_string()))?;
        Ok(Self { keyed })
    }

    pub fn sign(&self, booking_id: &str, email: &str, action: ManageAction) -> String {
        let tag = self.mac(booking_id, email, action).finalize().into_bytes();
        URL_SAFE_NO_PAD.encode(tag)
    }

    /// Constant-time check of `signature`. Any malformed input is `false`.
    pub fn verify(
        &self,
        signature: &str,
        booking_id: &str,
        email: &str,
        action: ManageAction,
    ) -> bool {
        let Ok(provided) = URL_SAFE_NO_PAD.decode(signature.as_bytes()) else {
            return false;
        };

        self.mac(booking_id, email, action)
            .verify_slice(&provided)
            .is_ok()
    }

    /// `{base}/{segment}/{booking_id}?sig=...` with the booking id
    /// percent-encoded as one path segment. The signature covers the raw id.
    pub fn build_manage_url(
        &self,
        base_url: &str,
        action: ManageAction,
        booking_id: &str,
        email: &str,
    ) -> String {
        format!(
            "{}/{}/{}?sig={}",
            base_url.trim_end_matches('/'),
            action.path_segment(),
            urlencoding::encode(booking_id),
            self.sign(booking_id, email, action)
        )
    }

    fn mac(&self, booking_id: &str, email: &str, action: ManageAction) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(booking_id.as_bytes());
        mac.update(b":");
        mac.update(email.as_bytes());
        mac.update(b":");
        mac.update(action.as_str().as_bytes());
        mac
    }
}
