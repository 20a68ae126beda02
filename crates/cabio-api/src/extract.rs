//! Request extractors.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use cabio_storage::User;

use crate::auth::TokenKind;
use crate::models::ApiError;
use crate::server::ServerState;

/// The authenticated user, resolved from the `Authorization: Bearer`
/// header. Rejects missing/invalid/expired tokens and refresh tokens
/// used as access tokens.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<ServerState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Malformed authorization header"))?;

        let claims = state
            .tokens
            .verify(token)
            .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))?;
        if claims.kind != TokenKind::Access {
            return Err(ApiError::unauthorized("Not an access token"));
        }

        let user = state
            .stores
            .users
            .get(&claims.sub)?
            .ok_or_else(|| ApiError::unauthorized("Unknown user"))?;

        Ok(AuthUser(user))
    }
}
