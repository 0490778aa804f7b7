// ============================
// crates/relay-lib/src/auth/token.rs
// ============================
//! Bearer token encoding and decoding.

use chatrelay_common::Identity;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims embedded in a bearer token. The identity a connection acts
/// under comes from here and nowhere else.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Display name
    pub name: String,
    /// Issued-at, seconds since epoch
    pub iat: i64,
    /// Expiry, seconds since epoch
    pub exp: i64,
}

impl Claims {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.sub.clone(),
            username: self.name.clone(),
        }
    }
}

/// Issue an HS256 token for a verified identity. Used by the login
/// collaborator and by tests.
pub fn issue_token(secret: &str, identity: &Identity, ttl_secs: u64) -> anyhow::Result<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: identity.user_id.clone(),
        name: identity.username.clone(),
        iat: now,
        exp: now + ttl_secs as i64,
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Decode and validate a token: signature and expiry at minimum.
pub fn decode_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}
