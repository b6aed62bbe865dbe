//! Error handler for the portal.

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use sqlx::Error as SQLxError;
use thiserror::Error;
use validator::{ValidationError, ValidationErrors, ValidationErrorsKind};

pub type Result<T> = std::result::Result<T, ServerError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error(transparent)]
    Query(#[from] QueryRejection),

    #[error("error parsing form data")]
    Multipart(#[from] MultipartError),

    #[error("SQL request failed: {0}")]
    Sql(#[from] SQLxError),

    #[error("{label} already exists.")]
    Conflict {
        field: &'static str,
        label: &'static str,
    },

    #[error("No active account found with the given credentials")]
    InvalidCredentials,

    #[error("Token is invalid or expired")]
    InvalidToken,

    #[error("invalid 'Authorization' header")]
    Unauthorized,

    #[error("you do not have permission to perform this action")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<BoxError>,
    },
}

impl ServerError {
    /// Wrap any error as an internal one.
    pub fn internal(
        details: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Internal {
            details: details.into(),
            source: Some(source.into()),
        }
    }

    /// Single field validation failure.
    pub fn field(field: &'static str, code: &'static str, message: &str) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(
            field,
            ValidationError::new(code).with_message(message.to_owned().into()),
        );
        Self::Validation(errors)
    }
}

impl From<crate::crypto::CryptoError> for ServerError {
    fn from(err: crate::crypto::CryptoError) -> Self {
        Self::internal("password hashing failed", err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::internal("media storage failed", err)
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseError {
    pub r#type: Option<String>,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub instance: Option<String>,
    pub errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `type` field.
    pub fn kind(mut self, kind: &str) -> Self {
        self.r#type = Some(kind.into());
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields = Vec::new();
    collect_errors(errors, &mut fields);
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    fields
}

// Flattened bodies report their fields as nested structs.
fn collect_errors(errors: &ValidationErrors, fields: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        match kind {
            ValidationErrorsKind::Field(issues) => {
                fields.extend(issues.iter().map(|issue| FieldError {
                    field: field.to_string(),
                    message: issue
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| issue.code.to_string()),
                }))
            },
            ValidationErrorsKind::Struct(nested) => collect_errors(nested, fields),
            ValidationErrorsKind::List(items) => {
                items.values().for_each(|nested| collect_errors(nested, fields))
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => response.errors(validation_errors),

            ServerError::Axum(rejection) => response
                .title("Request body could not be parsed.")
                .details(&rejection.body_text()),

            ServerError::Query(rejection) => response
                .title("Query string could not be parsed.")
                .details(&rejection.body_text()),

            ServerError::Multipart(err) => response
                .title("Server error during data parsing.")
                .details(&err.body_text()),

            ServerError::Conflict { field, .. } => {
                let mut errors = ValidationErrors::new();
                errors.add(
                    *field,
                    ValidationError::new("unique").with_message(self.to_string().into()),
                );
                response.errors(&errors)
            },

            ServerError::InvalidCredentials => response
                .title("Authentication failed.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::InvalidToken => response
                .title("Given token not valid for any token type.")
                .kind("token_not_valid")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::Unauthorized => response
                .title("Missing or invalid 'Authorization' header.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::Forbidden => response
                .title("Permission denied.")
                .status(StatusCode::FORBIDDEN),

            ServerError::NotFound => response
                .title("Resource not found.")
                .status(StatusCode::NOT_FOUND),

            ServerError::Sql(err) => {
                tracing::error!(error = %err, "database request failed");

                ResponseError::default()
            },

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");

                ResponseError::default()
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ServerError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (ServerError::InvalidToken, StatusCode::UNAUTHORIZED),
            (ServerError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ServerError::Forbidden, StatusCode::FORBIDDEN),
            (ServerError::NotFound, StatusCode::NOT_FOUND),
            (
                ServerError::Conflict {
                    field: "email",
                    label: "user with this email address",
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                ServerError::internal("boom", std::io::Error::other("disk")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_conflict_message() {
        let err = ServerError::Conflict {
            field: "email",
            label: "user with this email address",
        };
        assert_eq!(err.to_string(), "user with this email address already exists.");
    }
}
