//! Storage contract for users and their documents.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::error::{Result, ServerError};
use crate::user::{Document, DocumentKind, NewDocument, NewUser, User};

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 500;

/// Which records a query sees regarding the soft-delete marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Deleted {
    /// Live records only.
    #[default]
    Exclude,
    /// Live and deleted records.
    Include,
    /// Deleted records only.
    Only,
}

impl Deleted {
    pub fn matches(&self, deleted: Option<DateTime<Utc>>) -> bool {
        match self {
            Deleted::Exclude => deleted.is_none(),
            Deleted::Include => true,
            Deleted::Only => deleted.is_some(),
        }
    }
}

/// Admin listing filters.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserFilter {
    pub is_staff: Option<bool>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
    /// Group name the user must belong to.
    pub group: Option<String>,
    #[serde(default)]
    #[param(inline)]
    pub deleted: Deleted,
    /// Case-insensitive match on email, first name, last name and IIN.
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl UserFilter {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    /// Trimmed, non-empty search term.
    pub fn search(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Evaluate the filter on a single user.
    pub fn matches(&self, user: &User) -> bool {
        self.is_staff.is_none_or(|v| user.is_staff == v)
            && self.is_active.is_none_or(|v| user.is_active == v)
            && self.is_superuser.is_none_or(|v| user.is_superuser == v)
            && self
                .group
                .as_ref()
                .is_none_or(|g| user.groups.iter().any(|ug| ug == g))
            && self.deleted.matches(user.deleted)
            && self.search().is_none_or(|term| {
                let term = term.to_lowercase();
                [
                    Some(user.email.as_str()),
                    Some(user.profile.first_name.as_str()),
                    Some(user.profile.last_name.as_str()),
                    user.profile.iin.as_deref(),
                ]
                .into_iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(&term))
            })
    }
}

/// Map a unique constraint name onto the offending field.
pub(crate) fn conflict(constraint: &str) -> ServerError {
    match constraint {
        "users_iin_key" => ServerError::Conflict {
            field: "iin",
            label: "user with this IIN",
        },
        "users_identity_document_number_key" => ServerError::Conflict {
            field: "identity_document_number",
            label: "user with this identity document number",
        },
        "documents_live_kind_idx" => ServerError::Conflict {
            field: "file",
            label: "document of this kind",
        },
        _ => ServerError::Conflict {
            field: "email",
            label: "user with this email address",
        },
    }
}

/// Persistence of [`User`] and [`Document`] records.
///
/// Nothing is ever removed: deletion stamps the `deleted` column on the
/// user and on its live documents.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user. Unique fields answer [`ServerError::Conflict`].
    async fn insert(&self, user: NewUser) -> Result<User>;

    /// Find a user by primary key.
    async fn find_by_id(&self, id: i64, deleted: Deleted) -> Result<Option<User>>;

    /// Find a live user by exact email.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Persist every column of `user` but `id`, `date_joined` and `deleted`.
    async fn update(&self, user: &User) -> Result<User>;

    /// Record a successful authentication.
    async fn touch_last_login(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Filtered page ordered by email, plus the total match count.
    async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, i64)>;

    /// Mark the user and its live documents deleted. Returns `false` when
    /// there is no live user with this id.
    async fn soft_delete(&self, id: i64) -> Result<bool>;

    /// Undo [`UserRepository::soft_delete`]. Returns `false` when there
    /// is no deleted user with this id.
    async fn restore(&self, id: i64) -> Result<bool>;

    /// Documents of a user, deleted ones included.
    async fn documents(&self, user_id: i64) -> Result<Vec<Document>>;

    /// Store a document, replacing (soft-deleting) the live one of the
    /// same kind.
    async fn insert_document(&self, document: NewDocument) -> Result<Document>;

    /// Soft-delete the live document of this kind.
    async fn delete_document(&self, user_id: i64, kind: DocumentKind) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::Profile;

    fn user(email: &str) -> User {
        User {
            email: email.into(),
            profile: Profile {
                first_name: "Aigerim".into(),
                last_name: "Bekova".into(),
                iin: Some("990101300123".into()),
                ..Default::default()
            },
            is_active: true,
            groups: vec!["operators".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_conflict_fields() {
        for (constraint, field) in [
            ("users_email_key", "email"),
            ("users_iin_key", "iin"),
            ("users_identity_document_number_key", "identity_document_number"),
            ("documents_live_kind_idx", "file"),
        ] {
            assert!(matches!(
                conflict(constraint),
                ServerError::Conflict { field: f, .. } if f == field
            ));
        }
        assert_eq!(
            conflict("users_iin_key").to_string(),
            "user with this IIN already exists."
        );
    }

    #[test]
    fn test_limits() {
        let filter = UserFilter {
            limit: Some(10_000),
            offset: Some(-5),
            ..Default::default()
        };
        assert_eq!(filter.limit(), MAX_LIMIT);
        assert_eq!(filter.offset(), 0);
        assert_eq!(UserFilter::default().limit(), DEFAULT_LIMIT);
    }

    #[test]
    fn test_search() {
        let user = user("a.bekova@mail.kz");
        let search = |term: &str| UserFilter {
            search: Some(term.into()),
            ..Default::default()
        };

        assert!(search("BEKOVA").matches(&user));
        assert!(search("aiger").matches(&user));
        assert!(search("9901013").matches(&user));
        assert!(search("   ").matches(&user));
        assert!(!search("nurlan").matches(&user));
    }

    #[test]
    fn test_flags_and_deleted() {
        let mut user = user("a@x.com");
        assert!(UserFilter::default().matches(&user));
        assert!(
            UserFilter {
                group: Some("operators".into()),
                is_active: Some(true),
                ..Default::default()
            }
            .matches(&user)
        );
        assert!(
            !UserFilter {
                is_staff: Some(true),
                ..Default::default()
            }
            .matches(&user)
        );

        user.deleted = Some(Utc::now());
        assert!(!UserFilter::default().matches(&user));
        assert!(
            UserFilter {
                deleted: Deleted::Only,
                ..Default::default()
            }
            .matches(&user)
        );
    }
}
