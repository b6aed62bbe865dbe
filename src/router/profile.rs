//! Get and update the caller's own profile.

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::router::{Valid, representation};
use crate::user::{Profile, Sex, Status, User, UserResponse};
use crate::{AppState, ServerError};

/// Profile fields a user may change on its own record. Any other key is
/// ignored and `null` leaves the field unchanged.
#[derive(Debug, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct ProfilePatch {
    #[validate(length(max = 150, message = "First name must be at most 150 characters long."))]
    pub first_name: Option<String>,
    #[validate(length(max = 150, message = "Last name must be at most 150 characters long."))]
    pub last_name: Option<String>,
    #[validate(length(max = 150, message = "Middle name must be at most 150 characters long."))]
    pub middle_name: Option<String>,
    pub sex: Option<Sex>,
    pub status: Option<Status>,
    #[validate(custom(function = "crate::router::validate_phone"))]
    pub phone_number: Option<String>,
    #[validate(custom(function = "crate::router::validate_phones"))]
    pub additional_phone_numbers: Option<Vec<String>>,
    pub physical_address: Option<String>,
    #[validate(range(min = 0, message = "Height must not be negative."))]
    pub height: Option<i32>,
    #[validate(range(min = 0, message = "Weight must not be negative."))]
    pub weight: Option<i32>,
    #[validate(length(max = 50, message = "Race must be at most 50 characters long."))]
    pub race: Option<String>,
    #[validate(length(
        min = 1,
        max = 20,
        message = "Identity document number must be 1 to 20 characters long."
    ))]
    pub identity_document_number: Option<String>,
    #[validate(length(max = 20, message = "Driver license number must be at most 20 characters long."))]
    pub driver_license_number: Option<String>,
    #[validate(custom(function = "crate::router::validate_marriage"))]
    #[schema(value_type = Option<Object>)]
    pub marriage_status_info: Option<serde_json::Value>,
    #[validate(custom(function = "crate::router::validate_children"))]
    #[schema(value_type = Option<Vec<Object>>)]
    pub children_info: Option<serde_json::Value>,
}

impl ProfilePatch {
    /// Copy every present field onto `profile`.
    pub fn apply(self, profile: &mut Profile) {
        if let Some(first_name) = self.first_name {
            profile.first_name = first_name;
        }
        if let Some(last_name) = self.last_name {
            profile.last_name = last_name;
        }
        if let Some(middle_name) = self.middle_name {
            profile.middle_name = Some(middle_name);
        }
        if let Some(sex) = self.sex {
            profile.sex = Some(sex);
        }
        if let Some(status) = self.status {
            profile.status = Some(status);
        }
        if let Some(phone_number) = self.phone_number {
            profile.phone_number = Some(phone_number);
        }
        if let Some(phones) = self.additional_phone_numbers {
            profile.additional_phone_numbers = phones;
        }
        if let Some(address) = self.physical_address {
            profile.physical_address = address;
        }
        if let Some(height) = self.height {
            profile.height = Some(height);
        }
        if let Some(weight) = self.weight {
            profile.weight = Some(weight);
        }
        if let Some(race) = self.race {
            profile.race = race;
        }
        if let Some(number) = self.identity_document_number {
            profile.identity_document_number = Some(number);
        }
        if let Some(number) = self.driver_license_number {
            profile.driver_license_number = number;
        }
        if let Some(info) = self.marriage_status_info {
            profile.marriage_status_info = info;
        }
        if let Some(info) = self.children_info {
            profile.children_info = info;
        }
    }
}

/// Caller's own profile.
#[utoipa::path(
    get,
    path = "/users/profile/",
    tag = "users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Profile of the authenticated user.", body = UserResponse),
        (status = 401, description = "Missing, invalid or expired access token."),
    ),
)]
pub async fn retrieve(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<UserResponse>, ServerError> {
    Ok(Json(representation(&state, user).await?))
}

/// Partially update the caller's own profile.
#[utoipa::path(
    patch,
    path = "/users/profile/",
    tag = "users",
    security(("bearer" = [])),
    request_body = ProfilePatch,
    responses(
        (status = 200, description = "Updated profile.", body = UserResponse),
        (status = 400, description = "Invalid field or identity document number already used."),
        (status = 401, description = "Missing, invalid or expired access token."),
    ),
)]
pub async fn update(
    State(state): State<AppState>,
    Extension(mut user): Extension<User>,
    Valid(body): Valid<ProfilePatch>,
) -> Result<Json<UserResponse>, ServerError> {
    body.apply(&mut user.profile);
    let user = state.users.save(&user).await?;

    tracing::debug!(user_id = user.id, "profile updated");

    Ok(Json(representation(&state, user).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::register::tests::register;
    use crate::router::token::tests::login;
    use crate::token::TokenType;
    use crate::*;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use serde_json::json;

    async fn access(state: &AppState) -> (i64, String) {
        let user = register(state, "a@x.com", "990101300123").await;
        let (_, pair) = login(state, "a@x.com", "P@ss1234").await;
        (user.id, pair.unwrap().access)
    }

    #[tokio::test]
    async fn test_get_profile_handler() {
        let state = router::state();
        let (id, token) = access(&state).await;

        let response = make_request(
            Some(token.as_str()),
            app(state.clone()),
            Method::GET,
            "/users/profile/",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: UserResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.id, id);
        assert_eq!(body.email, "a@x.com");
        assert!(body.last_login.is_some());
    }

    #[tokio::test]
    async fn test_profile_path_keeps_trailing_slash() {
        let state = router::state();
        let (_, token) = access(&state).await;

        for method in [Method::GET, Method::PATCH, Method::PUT] {
            let response = make_request(
                Some(token.as_str()),
                app(state.clone()),
                method,
                "/users/profile/",
                json!({}).to_string(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = make_request(
            None,
            app(state.clone()),
            Method::GET,
            "/users/profile/",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_profile_requires_access_token() {
        let state = router::state();
        let (id, _) = access(&state).await;
        let refresh = state.token.create(id, TokenType::Refresh).unwrap();

        for token in [None, Some("garbage"), Some(refresh.as_str())] {
            let response = make_request(
                token,
                app(state.clone()),
                Method::GET,
                "/users/profile/",
                String::default(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_patch_ignores_protected_fields() {
        let state = router::state();
        let (id, token) = access(&state).await;

        let response = make_request(
            Some(token.as_str()),
            app(state.clone()),
            Method::PATCH,
            "/users/profile/",
            json!({
                "is_staff": true,
                "is_superuser": true,
                "email": "evil@x.com",
                "iin": "000000000000",
                "password": "hijacked-pass",
                "first_name": "Aliya",
                "height": 170,
                "additional_phone_numbers": ["87011234567"],
                "children_info": [{ "name": "Dana" }],
            })
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: UserResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.id, id);
        assert!(!body.is_staff);
        assert!(!body.is_superuser);
        assert_eq!(body.email, "a@x.com");
        assert_eq!(body.profile.iin.as_deref(), Some("990101300123"));
        assert_eq!(body.profile.first_name, "Aliya");
        assert_eq!(body.profile.last_name, "Bekova");
        assert_eq!(body.profile.height, Some(170));
        assert_eq!(body.profile.additional_phone_numbers, ["87011234567"]);

        let (status, _) = login(&state, "a@x.com", "P@ss1234").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_put_and_invalid_fields() {
        let state = router::state();
        let (_, token) = access(&state).await;
        register(&state, "b@x.com", "990101300124").await;

        let invalid = [
            json!({ "additional_phone_numbers": ["1", "2", "3"] }),
            json!({ "height": -1 }),
            json!({ "weight": -70 }),
            json!({ "marriage_status_info": [1, 2] }),
            json!({ "identity_document_number": "N990101300124" }),
        ];
        for body in invalid {
            let response = make_request(
                Some(token.as_str()),
                app(state.clone()),
                Method::PUT,
                "/users/profile/",
                body.to_string(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        let response = make_request(
            Some(token.as_str()),
            app(state.clone()),
            Method::PUT,
            "/users/profile/",
            json!({ "race": "Kazakh", "driver_license_number": "DL-42", "weight": 0 }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: UserResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.profile.weight, Some(0));
    }

    #[tokio::test]
    async fn test_deleted_user_token_rejected() {
        let state = router::state();
        let (id, token) = access(&state).await;
        state.users.delete(id).await.unwrap();

        let response = make_request(
            Some(token.as_str()),
            app(state.clone()),
            Method::GET,
            "/users/profile/",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
