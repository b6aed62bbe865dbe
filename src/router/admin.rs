//! Operator API over every account. Staff only.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::router::profile::ProfilePatch;
use crate::router::{Valid, representation};
use crate::user::{Deleted, Profile, User, UserBuilder, UserFilter, UserResponse, normalize_email};
use crate::{AppState, ServerError};

/// Row of the user listing.
#[derive(Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    pub deleted: Option<DateTime<Utc>>,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.profile.first_name,
            last_name: user.profile.last_name,
            is_staff: user.is_staff,
            deleted: user.deleted,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserList {
    pub data: Vec<UserSummary>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct AdminCreate {
    #[validate(email(message = "Enter a valid email address."))]
    pub email: String,
    #[validate(length(
        min = 8,
        max = 128,
        message = "Password must be 8 to 128 characters long."
    ))]
    pub password: String,
    #[validate(custom(function = "crate::router::validate_iin"))]
    pub iin: Option<String>,
    #[validate(custom(function = "crate::router::validate_birth_date"))]
    pub date_of_birth: Option<NaiveDate>,
    pub is_staff: Option<bool>,
    pub is_superuser: Option<bool>,
    pub is_active: Option<bool>,
    pub groups: Option<Vec<String>>,
    #[serde(flatten)]
    #[validate(nested)]
    pub profile: ProfilePatch,
}

/// Any field of a user, protected ones included.
#[derive(Debug, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct AdminPatch {
    #[validate(email(message = "Enter a valid email address."))]
    pub email: Option<String>,
    #[validate(length(
        min = 8,
        max = 128,
        message = "Password must be 8 to 128 characters long."
    ))]
    pub password: Option<String>,
    #[validate(custom(function = "crate::router::validate_iin"))]
    pub iin: Option<String>,
    #[validate(custom(function = "crate::router::validate_birth_date"))]
    pub date_of_birth: Option<NaiveDate>,
    pub is_staff: Option<bool>,
    pub is_superuser: Option<bool>,
    pub is_active: Option<bool>,
    pub groups: Option<Vec<String>>,
    #[serde(flatten)]
    #[validate(nested)]
    pub profile: ProfilePatch,
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // `GET /admin/users` goes to `list`, `POST` to `create`.
        .route("/users", get(list).post(create))
        .route("/users/{id}", get(retrieve).patch(update).delete(destroy))
        .route("/users/{id}/restore", post(restore))
        .route_layer(middleware::from_fn(crate::middleware::require_staff))
        .route_layer(middleware::from_fn_with_state(state, crate::middleware::auth))
}

/// Filtered page of users, ordered by email.
#[utoipa::path(
    get,
    path = "/admin/users",
    tag = "admin",
    security(("bearer" = [])),
    params(UserFilter),
    responses(
        (status = 200, description = "Page of users.", body = UserList),
        (status = 401, description = "Missing, invalid or expired access token."),
        (status = 403, description = "Caller is not a staff member."),
    ),
)]
pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<UserFilter>, QueryRejection>,
) -> Result<Json<UserList>, ServerError> {
    let Query(filter) = query?;
    let (users, total) = state.users.list(&filter).await?;

    Ok(Json(UserList {
        data: users.into_iter().map(UserSummary::from).collect(),
        total,
        limit: filter.limit(),
        offset: filter.offset(),
    }))
}

/// Create an account with any field set.
#[utoipa::path(
    post,
    path = "/admin/users",
    tag = "admin",
    security(("bearer" = [])),
    request_body = AdminCreate,
    responses(
        (status = 201, description = "Account created.", body = UserResponse),
        (status = 400, description = "Invalid body or uniqueness conflict."),
        (status = 401, description = "Missing, invalid or expired access token."),
        (status = 403, description = "Caller is not a staff member."),
    ),
)]
pub async fn create(
    State(state): State<AppState>,
    Valid(body): Valid<AdminCreate>,
) -> Result<(StatusCode, Json<UserResponse>), ServerError> {
    let mut profile = Profile {
        iin: body.iin,
        date_of_birth: body.date_of_birth,
        ..Default::default()
    };
    body.profile.apply(&mut profile);

    let builder = UserBuilder::new()
        .email(&body.email)
        .password(&body.password)
        .profile(profile)
        .staff(body.is_staff)
        .superuser(body.is_superuser)
        .active(body.is_active)
        .groups(body.groups.unwrap_or_default());

    let user = if body.is_superuser == Some(true) {
        state.users.create_superuser(builder).await?
    } else {
        state.users.create_user(builder).await?
    };

    Ok((
        StatusCode::CREATED,
        Json(UserResponse::new(user, &[], state.media.url())),
    ))
}

/// Full representation of a user, deleted or not.
#[utoipa::path(
    get,
    path = "/admin/users/{id}",
    tag = "admin",
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "User ID.")),
    responses(
        (status = 200, description = "User.", body = UserResponse),
        (status = 404, description = "Unknown user."),
    ),
)]
pub async fn retrieve(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>, ServerError> {
    let user = state.users.get(id, Deleted::Include).await?;
    Ok(Json(representation(&state, user).await?))
}

/// Update any field. A new password is hashed.
#[utoipa::path(
    patch,
    path = "/admin/users/{id}",
    tag = "admin",
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "User ID.")),
    request_body = AdminPatch,
    responses(
        (status = 200, description = "Updated user.", body = UserResponse),
        (status = 400, description = "Invalid body or uniqueness conflict."),
        (status = 404, description = "Unknown user."),
    ),
)]
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Valid(body): Valid<AdminPatch>,
) -> Result<Json<UserResponse>, ServerError> {
    let mut user = state.users.get(id, Deleted::Include).await?;

    if let Some(email) = body.email {
        user.email = normalize_email(&email);
    }
    if let Some(password) = body.password {
        state.users.set_password(&mut user, &password)?;
    }
    if let Some(iin) = body.iin {
        user.profile.iin = Some(iin);
    }
    if let Some(date_of_birth) = body.date_of_birth {
        user.profile.date_of_birth = Some(date_of_birth);
    }
    if let Some(is_staff) = body.is_staff {
        user.is_staff = is_staff;
    }
    if let Some(is_superuser) = body.is_superuser {
        user.is_superuser = is_superuser;
    }
    if let Some(is_active) = body.is_active {
        user.is_active = is_active;
    }
    if let Some(groups) = body.groups {
        user.groups = groups;
    }
    body.profile.apply(&mut user.profile);

    let user = state.users.save(&user).await?;
    tracing::info!(user_id = user.id, "user updated by staff");

    Ok(Json(representation(&state, user).await?))
}

/// Soft delete a user and its documents.
#[utoipa::path(
    delete,
    path = "/admin/users/{id}",
    tag = "admin",
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "User ID.")),
    responses(
        (status = 204, description = "User deleted."),
        (status = 404, description = "Unknown or already deleted user."),
    ),
)]
pub async fn destroy(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ServerError> {
    state.users.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Undo a soft delete.
#[utoipa::path(
    post,
    path = "/admin/users/{id}/restore",
    tag = "admin",
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "User ID.")),
    responses(
        (status = 200, description = "Restored user.", body = UserResponse),
        (status = 404, description = "Unknown or not deleted user."),
    ),
)]
pub async fn restore(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>, ServerError> {
    let user = state.users.restore(id).await?;
    Ok(Json(representation(&state, user).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::register::tests::register;
    use crate::token::TokenType;
    use crate::*;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use serde_json::json;

    async fn staff_token(state: &AppState) -> String {
        let admin = state
            .users
            .create_superuser(UserBuilder::new().email("root@x.com").password("P@ss1234"))
            .await
            .unwrap();
        state.token.create(admin.id, TokenType::Access).unwrap()
    }

    async fn call(
        state: &AppState,
        token: Option<&str>,
        method: Method,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let body = if body.is_null() { String::default() } else { body.to_string() };
        let response = make_request(token, app(state.clone()), method, path, body).await;

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[tokio::test]
    async fn test_admin_requires_staff() {
        let state = router::state();
        let user = register(&state, "a@x.com", "990101300123").await;
        let token = state.token.create(user.id, TokenType::Access).unwrap();

        let (status, _) = call(&state, None, Method::GET, "/admin/users", json!(null)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) =
            call(&state, Some(token.as_str()), Method::GET, "/admin/users", json!(null)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let path = format!("/admin/users/{}", user.id);
        let (status, _) = call(&state, Some(token.as_str()), Method::DELETE, &path, json!(null)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_list_handler() {
        let state = router::state();
        let token = staff_token(&state).await;
        register(&state, "b@x.com", "990101300123").await;
        let deleted = register(&state, "a@x.com", "990101300124").await;
        state.users.delete(deleted.id).await.unwrap();

        let (status, body) =
            call(&state, Some(token.as_str()), Method::GET, "/admin/users", json!(null)).await;
        assert_eq!(status, StatusCode::OK);
        let list: UserList = serde_json::from_value(body).unwrap();
        assert_eq!(list.total, 2);
        assert_eq!(list.limit, 50);
        assert_eq!(list.data[0].email, "b@x.com");
        assert_eq!(list.data[1].email, "root@x.com");

        let (_, body) = call(
            &state,
            Some(token.as_str()),
            Method::GET,
            "/admin/users?deleted=only&limit=10",
            json!(null),
        )
        .await;
        let list: UserList = serde_json::from_value(body).unwrap();
        assert_eq!(list.total, 1);
        assert_eq!(list.data[0].id, deleted.id);
        assert!(list.data[0].deleted.is_some());

        let (_, body) = call(
            &state,
            Some(token.as_str()),
            Method::GET,
            "/admin/users?is_staff=true&search=ROOT",
            json!(null),
        )
        .await;
        let list: UserList = serde_json::from_value(body).unwrap();
        assert_eq!(list.total, 1);
        assert!(list.data[0].is_staff);

        let (status, _) = call(
            &state,
            Some(token.as_str()),
            Method::GET,
            "/admin/users?deleted=sometimes",
            json!(null),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_handler() {
        let state = router::state();
        let token = staff_token(&state).await;

        let (status, body) = call(
            &state,
            Some(token.as_str()),
            Method::POST,
            "/admin/users",
            json!({
                "email": "operator@x.com",
                "password": "P@ss1234",
                "first_name": "Nurlan",
                "is_staff": true,
                "groups": ["operators"],
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let user: UserResponse = serde_json::from_value(body).unwrap();
        assert!(user.is_staff && !user.is_superuser);
        assert_eq!(user.groups, ["operators"]);
        assert_eq!(user.profile.first_name, "Nurlan");

        let (status, body) = call(
            &state,
            Some(token.as_str()),
            Method::POST,
            "/admin/users",
            json!({
                "email": "root2@x.com",
                "password": "P@ss1234",
                "is_superuser": true,
                "is_staff": false,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["field"], "is_staff");

        let (status, body) = call(
            &state,
            Some(token.as_str()),
            Method::POST,
            "/admin/users",
            json!({
                "email": "bad@x.com",
                "password": "P@ss1234",
                "height": -3,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["field"], "height");
    }

    #[tokio::test]
    async fn test_update_handler() {
        let state = router::state();
        let token = staff_token(&state).await;
        let user = register(&state, "a@x.com", "990101300123").await;
        let path = format!("/admin/users/{}", user.id);

        let (status, body) = call(
            &state,
            Some(token.as_str()),
            Method::PATCH,
            &path,
            json!({
                "is_staff": true,
                "iin": "990101300999",
                "password": "N3w-secret",
                "last_name": "Serikova",
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: UserResponse = serde_json::from_value(body).unwrap();
        assert!(body.is_staff);
        assert_eq!(body.profile.iin.as_deref(), Some("990101300999"));
        assert_eq!(body.profile.last_name, "Serikova");
        assert_eq!(body.profile.first_name, "Aigerim");

        assert!(state.users.authenticate("a@x.com", "P@ss1234").await.is_err());
        assert!(state.users.authenticate("a@x.com", "N3w-secret").await.is_ok());

        let (status, _) = call(
            &state,
            Some(token.as_str()),
            Method::PATCH,
            "/admin/users/999",
            json!({ "is_staff": true }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_and_restore_handlers() {
        let state = router::state();
        let token = staff_token(&state).await;
        let user = register(&state, "a@x.com", "990101300123").await;
        let path = format!("/admin/users/{}", user.id);

        let (status, _) = call(&state, Some(token.as_str()), Method::DELETE, &path, json!(null)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&state, Some(token.as_str()), Method::DELETE, &path, json!(null)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Still visible to staff.
        let (status, body) = call(&state, Some(token.as_str()), Method::GET, &path, json!(null)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body["deleted"].is_null());

        let restore = format!("{path}/restore");
        let (status, body) = call(&state, Some(token.as_str()), Method::POST, &restore, json!(null)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["deleted"].is_null());
        let (status, _) = call(&state, Some(token.as_str()), Method::POST, &restore, json!(null)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) =
            call(&state, Some(token.as_str()), Method::GET, "/admin/users/999", json!(null)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
