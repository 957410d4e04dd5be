use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::app::AppState;
use crate::error::ApiError;

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get("authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Tokens are stored only as their SHA-256 hex digest.
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Resolve the calling user id from the bearer token.
pub async fn auth_user_from_headers(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<String, ApiError> {
    let Some(token) = bearer_token(headers) else {
        debug!("missing bearer token");
        return Err(ApiError::unauthorized());
    };
    match state.store.user_for_token(&token_hash(&token)).await? {
        Some(user_id) => Ok(user_id),
        None => {
            debug!("unknown bearer token");
            Err(ApiError::unauthorized())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert("authorization", HeaderValue::from_static("Bearer  abc "));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn hashes_are_hex_sha256() {
        assert_eq!(
            token_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
