use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::Valid;
use crate::user::{Profile, Sex, Status, UserBuilder, UserResponse};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct Body {
    #[validate(email(message = "Enter a valid email address."))]
    pub email: String,
    #[validate(length(
        min = 8,
        max = 128,
        message = "Password must be 8 to 128 characters long."
    ))]
    pub password: String,
    #[validate(length(min = 1, max = 150, message = "First name must be 1 to 150 characters long."))]
    pub first_name: String,
    #[validate(length(min = 1, max = 150, message = "Last name must be 1 to 150 characters long."))]
    pub last_name: String,
    #[validate(length(min = 1, max = 150, message = "Middle name must be 1 to 150 characters long."))]
    pub middle_name: String,
    #[validate(custom(function = "crate::router::validate_iin"))]
    pub iin: String,
    #[validate(custom(function = "crate::router::validate_birth_date"))]
    pub date_of_birth: NaiveDate,
    pub sex: Sex,
    pub status: Status,
    #[validate(custom(function = "crate::router::validate_phone"))]
    pub phone_number: String,
    #[validate(length(
        min = 1,
        max = 20,
        message = "Identity document number must be 1 to 20 characters long."
    ))]
    pub identity_document_number: String,
}

/// Handler to create user.
#[utoipa::path(
    post,
    path = "/users/register/",
    tag = "users",
    request_body = Body,
    responses(
        (status = 201, description = "Account created.", body = UserResponse),
        (status = 400, description = "Invalid body or already registered email, IIN or document number."),
    ),
)]
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<(StatusCode, Json<UserResponse>)> {
    let profile = Profile {
        first_name: body.first_name,
        last_name: body.last_name,
        middle_name: Some(body.middle_name),
        iin: Some(body.iin),
        date_of_birth: Some(body.date_of_birth),
        sex: Some(body.sex),
        status: Some(body.status),
        phone_number: Some(body.phone_number),
        identity_document_number: Some(body.identity_document_number),
        ..Default::default()
    };

    let user = state
        .users
        .create_user(
            UserBuilder::new()
                .email(&body.email)
                .password(&body.password)
                .profile(profile),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UserResponse::new(user, &[], state.media.url())),
    ))
}
