//! Admin bootstrap tokens.
//!
//! HS512 JSON Web Tokens valid for eight hours. The token id is the init
//! entry id, so a token can only be redeemed against the entry it was
//! issued with.

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

/// Lifetime of a bootstrap token.
pub const TOKEN_TTL_SECS: u64 = 8 * 60 * 60;

/// Environment variable holding the HMAC secret.
pub const SIGNING_SECRET_ENV: &str = "OPSGRID_SIGNING_SECRET";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapProfile {
    pub account: String,
    pub subscription: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapClaims {
    /// User id.
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    /// Init entry id.
    pub jti: String,
    pub profile: BootstrapProfile,
}

impl BootstrapClaims {
    pub fn new(user_id: &str, init_id: &str, issued_at: u64, profile: BootstrapProfile) -> Self {
        Self {
            sub: user_id.to_string(),
            iat: issued_at,
            exp: issued_at + TOKEN_TTL_SECS,
            jti: init_id.to_string(),
            profile,
        }
    }
}

#[derive(Clone)]
pub struct TokenSigner {
    key: EncodingKey,
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: EncodingKey::from_secret(secret),
        }
    }

    /// Signer over `OPSGRID_SIGNING_SECRET`, if set and not blank.
    pub fn from_env() -> Option<Self> {
        std::env::var(SIGNING_SECRET_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| Self::new(s.as_bytes()))
    }

    pub fn sign(&self, claims: &BootstrapClaims) -> Result<String, jsonwebtoken::errors::Error> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS512), claims, &self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation};

    fn profile() -> BootstrapProfile {
        BootstrapProfile {
            account: "acc-0123456789abcdef".to_string(),
            subscription: "sub-0123456789abcdef".to_string(),
            boundary: None,
            function: None,
            base_url: "https://d1.us-west-2.example.com".to_string(),
        }
    }

    fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[test]
    fn token_expires_eight_hours_after_issue() {
        let claims = BootstrapClaims::new("usr-1", "init-1", 1_000, profile());
        assert_eq!(claims.exp - claims.iat, 28_800);
    }

    #[test]
    fn signed_token_decodes_with_the_same_secret() {
        let signer = TokenSigner::new(b"secret");
        let claims = BootstrapClaims::new("usr-1", "init-1", now(), profile());
        let token = signer.sign(&claims).unwrap();

        let decoded = jsonwebtoken::decode::<BootstrapClaims>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &Validation::new(Algorithm::HS512),
        )
        .unwrap();
        assert_eq!(decoded.header.alg, Algorithm::HS512);
        assert_eq!(decoded.claims, claims);

        let wrong = jsonwebtoken::decode::<BootstrapClaims>(
            &token,
            &DecodingKey::from_secret(b"other"),
            &Validation::new(Algorithm::HS512),
        );
        assert!(wrong.is_err());
    }

    #[test]
    fn unset_scopes_are_omitted_from_the_profile() {
        let json = serde_json::to_value(profile()).unwrap();
        assert!(json.get("boundary").is_none());
        assert_eq!(json["baseUrl"], "https://d1.us-west-2.example.com");
    }
}
