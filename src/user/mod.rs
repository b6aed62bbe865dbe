mod builder;
mod memory;
mod postgres;
mod repository;
mod service;

pub use builder::*;
pub use memory::*;
pub use postgres::*;
pub use repository::*;
pub use service::*;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Sex as written on identity documents.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "sex", rename_all = "UPPERCASE")]
pub enum Sex {
    Male,
    Female,
}

/// Residency status.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "residency_status", rename_all = "UPPERCASE")]
pub enum Status {
    Local,
    Migrant,
}

/// Personal attributes of a [`User`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    /// Individual Identification Number.
    pub iin: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: Option<Sex>,
    pub status: Option<Status>,
    pub phone_number: Option<String>,
    #[sqlx(json)]
    pub additional_phone_numbers: Vec<String>,
    pub physical_address: String,
    /// In centimeters.
    pub height: Option<i32>,
    /// In kilograms.
    pub weight: Option<i32>,
    pub race: String,
    pub identity_document_number: Option<String>,
    pub driver_license_number: String,
    #[schema(value_type = Object)]
    pub marriage_status_info: serde_json::Value,
    #[schema(value_type = Vec<Object>)]
    pub children_info: serde_json::Value,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            first_name: String::default(),
            last_name: String::default(),
            middle_name: None,
            iin: None,
            date_of_birth: None,
            sex: None,
            status: None,
            phone_number: None,
            additional_phone_numbers: Vec::new(),
            physical_address: String::default(),
            height: None,
            weight: None,
            race: String::default(),
            identity_document_number: None,
            driver_license_number: String::default(),
            marriage_status_info: serde_json::json!({}),
            children_info: serde_json::json!([]),
        }
    }
}

/// User as saved on database.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip)]
    pub password: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub profile: Profile,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    pub groups: Vec<String>,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub deleted: Option<DateTime<Utc>>,
}

impl User {
    /// `last first middle`, trimmed.
    pub fn full_name(&self) -> String {
        format!(
            "{} {} {}",
            self.profile.last_name,
            self.profile.first_name,
            self.profile.middle_name.as_deref().unwrap_or_default()
        )
        .trim()
        .to_owned()
    }

    /// Whether the soft-delete marker is set.
    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.profile.first_name.is_empty() && !self.profile.last_name.is_empty() {
            write!(f, "{}", self.full_name())
        } else {
            write!(f, "{}", self.email)
        }
    }
}

/// User about to be inserted. Password is already hashed.
#[derive(Clone, Debug, PartialEq)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub profile: Profile,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    pub groups: Vec<String>,
}

/// Image slots attached to a user.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "document_kind", rename_all = "snake_case")]
pub enum DocumentKind {
    ProfilePicture,
    IdentityDocumentFront,
    IdentityDocumentBack,
    DriverLicenseFront,
    DriverLicenseBack,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 5] = [
        DocumentKind::ProfilePicture,
        DocumentKind::IdentityDocumentFront,
        DocumentKind::IdentityDocumentBack,
        DocumentKind::DriverLicenseFront,
        DocumentKind::DriverLicenseBack,
    ];

    /// Directory, relative to the media root.
    pub fn upload_to(&self) -> &'static str {
        match self {
            DocumentKind::ProfilePicture => "profile_pictures",
            DocumentKind::IdentityDocumentFront | DocumentKind::IdentityDocumentBack => {
                "documents/identity"
            },
            DocumentKind::DriverLicenseFront | DocumentKind::DriverLicenseBack => {
                "documents/drivers_license"
            },
        }
    }
}

impl std::str::FromStr for DocumentKind {
    type Err = crate::ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "profile_picture" => Ok(DocumentKind::ProfilePicture),
            "identity_document_front" => Ok(DocumentKind::IdentityDocumentFront),
            "identity_document_back" => Ok(DocumentKind::IdentityDocumentBack),
            "driver_license_front" => Ok(DocumentKind::DriverLicenseFront),
            "driver_license_back" => Ok(DocumentKind::DriverLicenseBack),
            _ => Err(crate::ServerError::NotFound),
        }
    }
}

/// Uploaded image, dependent on a [`User`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: i64,
    pub user_id: i64,
    pub kind: DocumentKind,
    /// Relative to the media root.
    pub path: String,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub deleted: Option<DateTime<Utc>>,
}

/// Document about to be inserted.
#[derive(Clone, Debug, PartialEq)]
pub struct NewDocument {
    pub user_id: i64,
    pub kind: DocumentKind,
    pub path: String,
    pub content_type: String,
}

/// Public representation of a [`User`]. Never carries the password.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    #[serde(flatten)]
    pub profile: Profile,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    pub groups: Vec<String>,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub deleted: Option<DateTime<Utc>>,
    pub profile_picture: Option<String>,
    pub identity_document_front: Option<String>,
    pub identity_document_back: Option<String>,
    pub driver_license_front: Option<String>,
    pub driver_license_back: Option<String>,
}

impl UserResponse {
    /// Build the representation, turning live documents into URLs.
    pub fn new(user: User, documents: &[Document], media_url: &str) -> Self {
        let url = |kind: DocumentKind| {
            documents
                .iter()
                .find(|d| d.kind == kind && d.deleted.is_none())
                .map(|d| format!("{media_url}{}", d.path))
        };

        Self {
            full_name: user.full_name(),
            profile_picture: url(DocumentKind::ProfilePicture),
            identity_document_front: url(DocumentKind::IdentityDocumentFront),
            identity_document_back: url(DocumentKind::IdentityDocumentBack),
            driver_license_front: url(DocumentKind::DriverLicenseFront),
            driver_license_back: url(DocumentKind::DriverLicenseBack),
            id: user.id,
            email: user.email,
            profile: user.profile,
            is_staff: user.is_staff,
            is_superuser: user.is_superuser,
            is_active: user.is_active,
            groups: user.groups,
            date_joined: user.date_joined,
            last_login: user.last_login,
            deleted: user.deleted,
        }
    }
}
