//! API authentication via bearer tokens.
//!
//! Every user carries a random API token. The middleware resolves
//! `Authorization: Bearer <token>` to a user and hands it to handlers as an
//! [`AuthUser`] extension.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::Rng;

use chipwarm_core::types::User;

use crate::error::ApiError;
use crate::state::AppState;

/// The authenticated caller of a protected request.
#[derive(Clone, Debug)]
pub struct AuthUser(pub User);

/// Generate a random 32-character hex token.
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    hex::encode(bytes)
}

/// The bearer token of a request, if it carries a well-formed one.
fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value_str = value.to_str().map_err(|_| {
        ApiError::Unauthorized("Invalid Authorization header encoding".to_string())
    })?;
    match value_str.strip_prefix("Bearer ") {
        Some(token) => Ok(Some(token.trim())),
        None => Err(ApiError::Unauthorized("Invalid bearer token".to_string())),
    }
}

/// Resolve the caller when a token is present. A present but unknown token
/// is rejected; a missing one yields `None`.
pub fn optional_user(state: &AppState, headers: &HeaderMap) -> Result<Option<User>, ApiError> {
    let Some(token) = bearer_token(headers)? else {
        return Ok(None);
    };
    match state.users.find_by_token(token)? {
        Some(user) => Ok(Some(user)),
        None => Err(ApiError::Unauthorized("Invalid bearer token".to_string())),
    }
}

/// Middleware that validates Bearer token authentication.
///
/// Returns 401 if the header is missing, malformed, or names no user.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    match optional_user(&state, req.headers()) {
        Ok(Some(user)) => {
            req.extensions_mut().insert(AuthUser(user));
            next.run(req).await
        }
        Ok(None) => {
            ApiError::Unauthorized("Missing Authorization header".to_string()).into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_generate_token_is_32_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&HeaderMap::new()).unwrap(), None);
        assert_eq!(bearer_token(&headers("Bearer abc ")).unwrap(), Some("abc"));
        assert!(matches!(
            bearer_token(&headers("Basic abc")),
            Err(ApiError::Unauthorized(_))
        ));
    }
}
