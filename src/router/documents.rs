//! Upload and remove identity document images of the caller.

use axum::extract::{Multipart, Path, State};
use axum::{Extension, Json};

use crate::router::representation;
use crate::user::{DocumentKind, NewDocument, User, UserResponse};
use crate::{AppState, ServerError};

const FILE_FIELD: &str = "file";

/// Replace the image stored for `kind`.
#[utoipa::path(
    put,
    path = "/users/profile/documents/{kind}",
    tag = "users",
    security(("bearer" = [])),
    params(("kind" = DocumentKind, Path, description = "Image slot.")),
    request_body(content_type = "multipart/form-data", description = "Image sent in the `file` part."),
    responses(
        (status = 200, description = "Updated profile.", body = UserResponse),
        (status = 400, description = "Missing, oversized or non-image file."),
        (status = 401, description = "Missing, invalid or expired access token."),
        (status = 404, description = "Unknown image slot."),
    ),
)]
pub async fn upload(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(kind): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UserResponse>, ServerError> {
    let kind: DocumentKind = kind.parse()?;

    let mut file = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FILE_FIELD) {
            file = Some(field.bytes().await?);
            break;
        }
    }
    let Some(file) = file else {
        return Err(ServerError::field(
            FILE_FIELD,
            "required",
            "No file was submitted.",
        ));
    };

    store_document(&state, user.id, kind, &file).await?;

    tracing::info!(user_id = user.id, ?kind, "document uploaded");

    Ok(Json(representation(&state, user).await?))
}

/// Write the file then record it. The file is removed again when the
/// record cannot be saved.
async fn store_document(
    state: &AppState,
    user_id: i64,
    kind: DocumentKind,
    file: &[u8],
) -> Result<(), ServerError> {
    let stored = state.media.store(kind, file).await?;
    let attached = state
        .users
        .attach_document(NewDocument {
            user_id,
            kind,
            path: stored.path.clone(),
            content_type: stored.content_type.to_owned(),
        })
        .await;

    if let Err(err) = attached {
        state.media.remove(&stored.path).await;
        return Err(err);
    }

    Ok(())
}

/// Remove the image stored for `kind`.
#[utoipa::path(
    delete,
    path = "/users/profile/documents/{kind}",
    tag = "users",
    security(("bearer" = [])),
    params(("kind" = DocumentKind, Path, description = "Image slot.")),
    responses(
        (status = 200, description = "Updated profile.", body = UserResponse),
        (status = 401, description = "Missing, invalid or expired access token."),
        (status = 404, description = "Unknown image slot or nothing stored."),
    ),
)]
pub async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(kind): Path<String>,
) -> Result<Json<UserResponse>, ServerError> {
    let kind: DocumentKind = kind.parse()?;

    if !state.users.detach_document(user.id, kind).await? {
        return Err(ServerError::NotFound);
    }

    Ok(Json(representation(&state, user).await?))
}
