//! HTTP API of the portal.
pub mod admin;
pub mod documents;
pub mod profile;
pub mod register;
pub mod status;
pub mod token;

use std::sync::LazyLock;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use chrono::{NaiveDate, Utc};
use regex_lite::Regex;
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationError};

use crate::user::{User, UserResponse};
use crate::{AppState, ServerError};

pub const MAX_ADDITIONAL_PHONES: usize = 2;

static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9 +()-]{1,20}$").unwrap());

/// JSON body that passed [`Validate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Individual Identification Number: exactly twelve digits.
pub fn validate_iin(iin: &str) -> Result<(), ValidationError> {
    if iin.len() != 12 || !iin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::new("iin")
            .with_message("IIN must be exactly 12 digits.".into()));
    }

    Ok(())
}

/// Up to twenty digits, spaces, `+`, `-` and parentheses.
pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    if !PHONE.is_match(phone) {
        return Err(ValidationError::new("phone")
            .with_message("Enter a valid phone number.".into()));
    }

    Ok(())
}

pub fn validate_phones(phones: &[String]) -> Result<(), ValidationError> {
    if phones.len() > MAX_ADDITIONAL_PHONES {
        return Err(ValidationError::new("phones").with_message(
            format!("At most {MAX_ADDITIONAL_PHONES} additional phone numbers are allowed.").into(),
        ));
    }

    phones.iter().try_for_each(|phone| validate_phone(phone))
}

pub fn validate_birth_date(date: &NaiveDate) -> Result<(), ValidationError> {
    if *date > Utc::now().date_naive() {
        return Err(ValidationError::new("date_of_birth")
            .with_message("Date of birth cannot be in the future.".into()));
    }

    Ok(())
}

pub fn validate_marriage(info: &serde_json::Value) -> Result<(), ValidationError> {
    if !info.is_object() {
        return Err(ValidationError::new("object")
            .with_message("Expected a JSON object.".into()));
    }

    Ok(())
}

pub fn validate_children(info: &serde_json::Value) -> Result<(), ValidationError> {
    if !info.is_array() {
        return Err(ValidationError::new("array")
            .with_message("Expected a JSON array.".into()));
    }

    Ok(())
}

/// Public representation of `user`, with its document URLs.
pub(crate) async fn representation(
    state: &AppState,
    user: User,
) -> Result<UserResponse, ServerError> {
    let documents = state.users.documents(user.id).await?;
    Ok(UserResponse::new(user, &documents, state.media.url()))
}

/// MUST NEVER be used in production.
#[cfg(test)]
pub(crate) fn state() -> crate::AppState {
    use std::sync::Arc;

    let db = crate::database::Database::memory();
    let pwd = Arc::new(
        crate::crypto::PasswordManager::new(Some(crate::crypto::tests::config()))
            .unwrap(),
    );

    crate::AppState {
        config: Arc::new(crate::config::Configuration::default()),
        users: crate::user::UserService::new(Arc::clone(&db.users), pwd),
        db,
        token: crate::token::tests::manager(),
        media: crate::media::tests::storage(),
        metrics: None,
    }
}
