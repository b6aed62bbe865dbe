//! Middlewares for routes.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use axum::Extension;

use crate::AppState;
use crate::ServerError;
use crate::error::Result;
use crate::token::TokenType;
use crate::user::User;

const BEARER: &str = "Bearer ";

/// Resolve the caller from its `Authorization: Bearer` access token and
/// expose it as a [`User`] extension.
pub async fn auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix(BEARER))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(ServerError::Unauthorized)?;

    let user_id = state.token.subject(token, TokenType::Access)?;
    let Some(user) = state.users.find_active(user_id).await? else {
        tracing::debug!(user_id, "token subject is gone or inactive");
        return Err(ServerError::InvalidToken);
    };

    req.extensions_mut().insert::<User>(user);
    Ok(next.run(req).await)
}

/// Only let active staff members through. Must run after [`auth`].
pub async fn require_staff(
    Extension(user): Extension<User>,
    req: Request,
    next: Next,
) -> Result<Response> {
    if !user.is_staff {
        tracing::warn!(user_id = user.id, "non-staff user refused on admin API");
        return Err(ServerError::Forbidden);
    }

    Ok(next.run(req).await)
}
