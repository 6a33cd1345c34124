use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use guildhall_types::api::Claims;

use crate::state::AppState;

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = decode_token(&state.jwt_secret, bearer.token()).ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub fn decode_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

/// Mint a token the way the auth service does. Used by tooling and tests.
pub fn issue_token(
    secret: &str,
    user_id: Uuid,
    username: &str,
    ttl: chrono::Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let user_id = Uuid::new_v4();
        let token = issue_token("secret", user_id, "aria", chrono::Duration::hours(1)).unwrap();

        let claims = decode_token("secret", &token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "aria");

        assert!(decode_token("other-secret", &token).is_none());
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = issue_token("secret", Uuid::new_v4(), "aria", chrono::Duration::hours(-2)).unwrap();
        assert!(decode_token("secret", &token).is_none());
    }
}
