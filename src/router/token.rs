//! Obtain and refresh JSON web tokens.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::router::Valid;
use crate::token::{TokenPair, TokenType};
use crate::{AppState, ServerError};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct Body {
    #[validate(length(min = 1, message = "This field may not be blank."))]
    pub email: String,
    #[validate(length(min = 1, message = "This field may not be blank."))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct RefreshBody {
    #[validate(length(min = 1, message = "This field may not be blank."))]
    pub refresh: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AccessToken {
    pub access: String,
}

/// Exchange credentials for an access and refresh token.
#[utoipa::path(
    post,
    path = "/users/token/",
    tag = "authentication",
    request_body = Body,
    responses(
        (status = 200, description = "Token pair issued.", body = TokenPair),
        (status = 401, description = "No active account found with the given credentials."),
    ),
)]
pub async fn obtain(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<TokenPair>, ServerError> {
    let user = state.users.authenticate(&body.email, &body.password).await?;
    tracing::info!(user_id = user.id, "token pair issued");

    Ok(Json(state.token.pair(user.id)?))
}

/// Exchange a refresh token for a new access token.
#[utoipa::path(
    post,
    path = "/users/token/refresh/",
    tag = "authentication",
    request_body = RefreshBody,
    responses(
        (status = 200, description = "Access token issued.", body = AccessToken),
        (status = 401, description = "Token is invalid or expired."),
    ),
)]
pub async fn refresh(
    State(state): State<AppState>,
    Valid(body): Valid<RefreshBody>,
) -> Result<Json<AccessToken>, ServerError> {
    let user_id = state.token.subject(&body.refresh, TokenType::Refresh)?;

    // Deleted or disabled since issuance.
    let Some(user) = state.users.find_active(user_id).await? else {
        return Err(ServerError::InvalidToken);
    };

    Ok(Json(AccessToken {
        access: state.token.create(user.id, TokenType::Access)?,
    }))
}
