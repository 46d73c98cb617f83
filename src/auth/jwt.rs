use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use rand::Rng;

use crate::auth::middleware::Claims;

/// Access token lifetime. There is no refresh flow; a session lasts a
/// working day.
const ACCESS_TOKEN_TTL_SECS: i64 = 8 * 60 * 60;

/// Load the signing key from data_dir/jwt_secret, minting a fresh 256-bit
/// random one on first boot. Stored as raw bytes; regenerating it simply
/// invalidates all outstanding tokens.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Issue an access token for a registered user.
/// Claims: sub=user_id, name=display_name, iat, exp
pub fn issue_access_token(
    secret: &[u8],
    user_id: &str,
    display_name: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        name: display_name.to_string(),
        iat: now,
        exp: now + ACCESS_TOKEN_TTL_SECS,
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(secret),
    )
}

/// Validate an access token and return its claims.
/// Used by the WebSocket upgrade path, where auth arrives as a query
/// parameter rather than an Authorization header.
pub fn validate_access_token(
    secret: &[u8],
    token: &str,
) -> Result<TokenData<Claims>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
}
