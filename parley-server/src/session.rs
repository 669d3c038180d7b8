//! Session cookie extractor for authenticated routes.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;
use parley_core::models::User;
use parley_core::ParleyError;

use crate::http::{ApiError, HttpState};

/// The user behind the request's session cookie.
///
/// Rejects with 401 when the cookie is missing, the token does not verify,
/// or the user it names no longer exists.
pub struct CurrentUser(pub User);

#[axum::async_trait]
impl FromRequestParts<Arc<HttpState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<HttpState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar
            .get(&state.config.auth.cookie_name)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::new(ParleyError::InvalidToken, "Unauthorized"))?;

        let user = state
            .auth
            .authenticate(&token)
            .await
            .map_err(|e| ApiError::new(e, "Failed to verify session"))?;

        Ok(CurrentUser(user))
    }
}
