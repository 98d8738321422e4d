use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use eclosion_core::Subdomain;

type HmacSha256 = Hmac<Sha256>;

/// Base64url of `{"alg":"HS256","typ":"JWT"}`. The wire format fixes these
/// exact bytes, so the header is a constant rather than a serialized struct.
const HEADER: &str = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9";

/// Issuer claim stamped into every token.
const ISSUER: &str = "eclosion-ifttt";

/// Claims carried by a bearer token. Deliberately no `exp`: tokens live
/// until the tenant disconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the tenant's subdomain.
    pub sub: String,
    pub iss: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
}

/// Signs and verifies the non-expiring bearer tokens handed to IFTTT.
pub struct TokenService {
    secret: Vec<u8>,
}

impl TokenService {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Mint a token for a subdomain.
    #[must_use]
    pub fn issue(&self, subdomain: &Subdomain) -> String {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        #[allow(clippy::cast_possible_wrap)]
        self.issue_at(subdomain, now as i64)
    }

    fn issue_at(&self, subdomain: &Subdomain, iat: i64) -> String {
        let claims = Claims {
            sub: subdomain.to_string(),
            iss: ISSUER.to_owned(),
            iat,
        };
        // Claims serialization cannot fail: plain strings and an integer.
        let payload =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap_or_default());
        let signature = self.sign(&format!("{HEADER}.{payload}"));
        format!("{HEADER}.{payload}.{signature}")
    }

    /// Verify a token's header, signature and issuer; return the claims.
    ///
    /// Signature and header comparison are constant-time. This is a pure
    /// function of the token and the secret; the connection flag is checked
    /// separately by the caller.
    pub fn verify(&self, token: &str) -> Result<Claims, String> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err("malformed token".to_owned());
        };

        let header_ok: bool = header.as_bytes().ct_eq(HEADER.as_bytes()).into();

        let expected = self.sign(&format!("{header}.{payload}"));
        let signature_ok: bool = signature.as_bytes().ct_eq(expected.as_bytes()).into();

        if !(header_ok && signature_ok) {
            return Err("invalid token signature".to_owned());
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| "malformed token payload".to_owned())?;
        let claims: Claims = serde_json::from_slice(&payload_bytes)
            .map_err(|_| "malformed token payload".to_owned())?;

        if claims.iss != ISSUER {
            return Err("unknown token issuer".to_owned());
        }

        Ok(claims)
    }

    fn sign(&self, signing_input: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(signing_input.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

/// Constant-time string equality for credentials.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
