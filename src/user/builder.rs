//! Typed builder for User.

use crate::crypto::PasswordManager;
use crate::error::{Result, ServerError};
use crate::user::{NewUser, Profile};

/// [`User`](crate::user::User) builder.
#[derive(Debug, Clone)]
pub struct UserBuilder<Email, Password> {
    email: Email,
    password: Password,
    profile: Profile,
    is_staff: Option<bool>,
    is_superuser: Option<bool>,
    is_active: Option<bool>,
    groups: Vec<String>,
}

/// Value is missing on [`UserBuilder`].
#[derive(Debug, Clone)]
pub struct Missing;

/// Value is present on [`UserBuilder`].
#[derive(Debug, Clone)]
pub struct Present<T>(pub T);

impl Default for UserBuilder<Missing, Missing> {
    fn default() -> Self {
        Self::new()
    }
}

impl UserBuilder<Missing, Missing> {
    /// Create a new [`UserBuilder`].
    pub fn new() -> Self {
        Self {
            email: Missing,
            password: Missing,
            profile: Profile::default(),
            is_staff: None,
            is_superuser: None,
            is_active: None,
            groups: Vec::new(),
        }
    }
}

impl<Password> UserBuilder<Missing, Password> {
    /// Update `email` field on [`UserBuilder`]. The domain part is
    /// lowercased.
    pub fn email(
        self,
        email: impl AsRef<str>,
    ) -> UserBuilder<Present<String>, Password> {
        UserBuilder {
            email: Present(normalize_email(email.as_ref())),
            password: self.password,
            profile: self.profile,
            is_staff: self.is_staff,
            is_superuser: self.is_superuser,
            is_active: self.is_active,
            groups: self.groups,
        }
    }
}

impl<Email> UserBuilder<Email, Missing> {
    /// Update `password` field on [`UserBuilder`]. Kept in clear until
    /// [`UserBuilder::build`].
    pub fn password(
        self,
        password: impl ToString,
    ) -> UserBuilder<Email, Present<String>> {
        UserBuilder {
            email: self.email,
            password: Present(password.to_string()),
            profile: self.profile,
            is_staff: self.is_staff,
            is_superuser: self.is_superuser,
            is_active: self.is_active,
            groups: self.groups,
        }
    }
}

impl<Email, Password> UserBuilder<Email, Password> {
    /// Update `profile` field on [`UserBuilder`].
    pub fn profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    /// Update `is_staff` field on [`UserBuilder`].
    pub fn staff(mut self, is_staff: Option<bool>) -> Self {
        self.is_staff = is_staff;
        self
    }

    /// Update `is_superuser` field on [`UserBuilder`].
    pub fn superuser(mut self, is_superuser: Option<bool>) -> Self {
        self.is_superuser = is_superuser;
        self
    }

    /// Update `is_active` field on [`UserBuilder`].
    pub fn active(mut self, is_active: Option<bool>) -> Self {
        self.is_active = is_active;
        self
    }

    /// Update `groups` field on [`UserBuilder`].
    pub fn groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }
}

impl UserBuilder<Present<String>, Present<String>> {
    /// Build a regular account, hashing the password.
    pub fn build(self, pwd: &PasswordManager) -> Result<NewUser> {
        if self.email.0.is_empty() {
            return Err(ServerError::field(
                "email",
                "required",
                "The Email must be set.",
            ));
        }

        Ok(NewUser {
            password: pwd.hash_password(&self.password.0)?,
            email: self.email.0,
            profile: self.profile,
            is_staff: self.is_staff.unwrap_or(false),
            is_superuser: self.is_superuser.unwrap_or(false),
            is_active: self.is_active.unwrap_or(true),
            groups: self.groups,
        })
    }

    /// Build a superuser. Staff and superuser flags default to `true` and
    /// must not be explicitly disabled.
    pub fn build_superuser(mut self, pwd: &PasswordManager) -> Result<NewUser> {
        let is_staff = *self.is_staff.get_or_insert(true);
        let is_superuser = *self.is_superuser.get_or_insert(true);
        self.is_active.get_or_insert(true);

        if !is_staff {
            return Err(ServerError::field(
                "is_staff",
                "superuser",
                "Superuser must have is_staff=True.",
            ));
        }
        if !is_superuser {
            return Err(ServerError::field(
                "is_superuser",
                "superuser",
                "Superuser must have is_superuser=True.",
            ));
        }

        self.build(pwd)
    }
}

/// Lowercase the domain part of an email address.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{local}@{}", domain.to_lowercase()),
        None => email.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pwd() -> PasswordManager {
        PasswordManager::new(Some(crate::crypto::tests::config())).unwrap()
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("John.Doe@EXAMPLE.KZ"), "John.Doe@example.kz");
        assert_eq!(normalize_email("  a@X.com "), "a@x.com");
        assert_eq!(normalize_email("no-at-sign"), "no-at-sign");
    }

    #[test]
    fn test_build_hashes_password() {
        let user = UserBuilder::new()
            .email("a@X.com")
            .password("P@ss1234")
            .build(&pwd())
            .unwrap();

        assert_eq!(user.email, "a@x.com");
        assert_ne!(user.password, "P@ss1234");
        assert!(pwd().verify_password("P@ss1234", &user.password).is_ok());
        assert!(!user.is_staff);
        assert!(!user.is_superuser);
        assert!(user.is_active);
    }

    #[test]
    fn test_empty_email() {
        let result = UserBuilder::new().email("").password("x").build(&pwd());
        assert!(matches!(result, Err(ServerError::Validation(_))));
    }

    #[test]
    fn test_superuser() {
        let admin = UserBuilder::new()
            .password("P@ss1234")
            .email("root@x.com")
            .build_superuser(&pwd())
            .unwrap();
        assert!(admin.is_staff && admin.is_superuser && admin.is_active);

        let result = UserBuilder::new()
            .email("root@x.com")
            .password("P@ss1234")
            .staff(Some(false))
            .build_superuser(&pwd());
        assert!(matches!(result, Err(ServerError::Validation(_))));

        let result = UserBuilder::new()
            .email("root@x.com")
            .password("P@ss1234")
            .superuser(Some(false))
            .build_superuser(&pwd());
        assert!(matches!(result, Err(ServerError::Validation(_))));
    }
}
