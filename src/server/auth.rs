//! HTTP Basic staff credentials.

use crate::core::auth::AuthContext;
use crate::errors::AppError;
use crate::server::AppState;
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, header, request::Parts};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::io;

/// Extract `(username, password)` from an `Authorization: Basic` header.
pub fn basic_credentials(headers: &HeaderMap) -> Result<(String, String), AppError> {
    let missing = || AppError::Unauthorized("staff credentials required".into());

    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(missing)?;
    let encoded = value.strip_prefix("Basic ").ok_or_else(missing)?;

    let decoded = BASE64
        .decode(encoded.trim())
        .map_err(|_| AppError::Unauthorized("malformed credentials".into()))?;
    let decoded =
        String::from_utf8(decoded).map_err(|_| AppError::Unauthorized("malformed credentials".into()))?;

    let (user, password) = decoded
        .split_once(':')
        .ok_or_else(|| AppError::Unauthorized("malformed credentials".into()))?;
    Ok((user.to_string(), password.to_string()))
}

/// Authenticated staff caller.
#[derive(Debug, Clone)]
pub struct Staff(pub AuthContext);

impl FromRequestParts<AppState> for Staff {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let (user, password) = basic_credentials(&parts.headers)?;
        // argon2 verification is CPU bound; keep it off the async workers
        let engine = state.engine.clone();
        let auth = tokio::task::spawn_blocking(move || engine.staff().authenticate(&user, &password))
            .await
            .map_err(|e| AppError::Io(io::Error::other(e)))??;
        Ok(Staff(auth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_basic_header() {
        let mut headers = HeaderMap::new();
        let value = format!("Basic {}", BASE64.encode("desk1:secret:with:colons"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
        let (user, pass) = basic_credentials(&headers).unwrap();
        assert_eq!(user, "desk1");
        assert_eq!(pass, "secret:with:colons");
    }

    #[test]
    fn rejects_missing_or_bearer_header() {
        assert!(basic_credentials(&HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(matches!(basic_credentials(&headers), Err(AppError::Unauthorized(_))));
    }
}
