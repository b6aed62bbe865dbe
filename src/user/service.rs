use std::sync::Arc;

use chrono::Utc;

use crate::crypto::PasswordManager;
use crate::error::{Result, ServerError};
use crate::telemetry::{LOGINS, REGISTRATIONS};
use crate::user::{
    Deleted, Document, DocumentKind, NewDocument, Present, User, UserBuilder, UserFilter,
    UserRepository, normalize_email,
};

type ReadyBuilder = UserBuilder<Present<String>, Present<String>>;

/// User manager.
#[derive(Clone)]
pub struct UserService {
    repo: Arc<dyn UserRepository>,
    pwd: Arc<PasswordManager>,
}

impl UserService {
    /// Create a new [`UserService`].
    pub fn new(repo: Arc<dyn UserRepository>, pwd: Arc<PasswordManager>) -> Self {
        Self { repo, pwd }
    }

    /// Hash the password and insert a regular account.
    pub async fn create_user(&self, builder: ReadyBuilder) -> Result<User> {
        let user = self.repo.insert(builder.build(&self.pwd)?).await?;
        metrics::counter!(REGISTRATIONS, "kind" => "user").increment(1);
        tracing::info!(user_id = user.id, "user created");
        Ok(user)
    }

    /// Hash the password and insert a staff superuser.
    pub async fn create_superuser(&self, builder: ReadyBuilder) -> Result<User> {
        let user = self.repo.insert(builder.build_superuser(&self.pwd)?).await?;
        metrics::counter!(REGISTRATIONS, "kind" => "superuser").increment(1);
        tracing::info!(user_id = user.id, "superuser created");
        Ok(user)
    }

    /// Check credentials. Every failure looks the same to the caller.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User> {
        let email = normalize_email(email);
        let Some(mut user) = self.repo.find_by_email(&email).await? else {
            let _ = self.pwd.verify_dummy(password);
            metrics::counter!(LOGINS, "outcome" => "failure").increment(1);
            return Err(ServerError::InvalidCredentials);
        };

        if self.pwd.verify_password(password, &user.password).is_err() || !user.is_active {
            metrics::counter!(LOGINS, "outcome" => "failure").increment(1);
            tracing::debug!(user_id = user.id, "authentication refused");
            return Err(ServerError::InvalidCredentials);
        }

        let now = Utc::now();
        self.repo.touch_last_login(user.id, now).await?;
        user.last_login = Some(now);
        metrics::counter!(LOGINS, "outcome" => "success").increment(1);

        Ok(user)
    }

    /// Live and active user, as required for any token use.
    pub async fn find_active(&self, id: i64) -> Result<Option<User>> {
        Ok(self
            .repo
            .find_by_id(id, Deleted::Exclude)
            .await?
            .filter(|user| user.is_active))
    }

    /// Any user by id, deleted ones included on request.
    pub async fn get(&self, id: i64, deleted: Deleted) -> Result<User> {
        self.repo
            .find_by_id(id, deleted)
            .await?
            .ok_or(ServerError::NotFound)
    }

    /// Replace the stored password hash.
    pub fn set_password(&self, user: &mut User, password: &str) -> Result<()> {
        user.password = self.pwd.hash_password(password)?;
        Ok(())
    }

    /// Persist changes made on `user`.
    pub async fn save(&self, user: &User) -> Result<User> {
        self.repo.update(user).await
    }

    pub async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, i64)> {
        self.repo.list(filter).await
    }

    /// Soft delete, cascading to documents.
    pub async fn delete(&self, id: i64) -> Result<()> {
        if !self.repo.soft_delete(id).await? {
            return Err(ServerError::NotFound);
        }
        tracing::info!(user_id = id, "user soft-deleted");
        Ok(())
    }

    /// Undo a soft delete.
    pub async fn restore(&self, id: i64) -> Result<User> {
        if !self.repo.restore(id).await? {
            return Err(ServerError::NotFound);
        }
        tracing::info!(user_id = id, "user restored");
        self.get(id, Deleted::Exclude).await
    }

    pub async fn documents(&self, user_id: i64) -> Result<Vec<Document>> {
        self.repo.documents(user_id).await
    }

    pub async fn attach_document(&self, document: NewDocument) -> Result<Document> {
        self.repo.insert_document(document).await
    }

    pub async fn detach_document(&self, user_id: i64, kind: DocumentKind) -> Result<bool> {
        self.repo.delete_document(user_id, kind).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::MemoryUserRepository;

    fn service() -> UserService {
        UserService::new(
            Arc::new(MemoryUserRepository::new()),
            Arc::new(PasswordManager::new(Some(crate::crypto::tests::config())).unwrap()),
        )
    }

    async fn register(service: &UserService, email: &str) -> User {
        service
            .create_user(UserBuilder::new().email(email).password("P@ss1234"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_authenticate() {
        let service = service();
        let user = register(&service, "a@x.com").await;
        assert!(user.last_login.is_none());

        let logged = service.authenticate("a@X.COM", "P@ss1234").await.unwrap();
        assert_eq!(logged.id, user.id);
        assert!(logged.last_login.is_some());
        let stored = service.get(user.id, Deleted::Exclude).await.unwrap();
        assert_eq!(stored.last_login, logged.last_login);

        for (email, password) in [("a@x.com", "wrong"), ("nobody@x.com", "P@ss1234")] {
            assert!(matches!(
                service.authenticate(email, password).await,
                Err(ServerError::InvalidCredentials)
            ));
        }
    }

    #[tokio::test]
    async fn test_unknown_email_still_verifies_a_hash() {
        let pwd = Arc::new(PasswordManager::new(Some(crate::crypto::tests::config())).unwrap());
        let service = UserService::new(Arc::new(MemoryUserRepository::new()), Arc::clone(&pwd));
        register(&service, "a@x.com").await;

        let before = pwd.verifications();
        assert!(matches!(
            service.authenticate("a@x.com", "wrong").await,
            Err(ServerError::InvalidCredentials)
        ));
        assert_eq!(pwd.verifications(), before + 1);

        assert!(matches!(
            service.authenticate("nobody@x.com", "wrong").await,
            Err(ServerError::InvalidCredentials)
        ));
        assert_eq!(pwd.verifications(), before + 2);
    }

    #[tokio::test]
    async fn test_inactive_and_deleted_cannot_authenticate() {
        let service = service();
        let mut user = register(&service, "a@x.com").await;
        user.is_active = false;
        service.save(&user).await.unwrap();
        assert!(matches!(
            service.authenticate("a@x.com", "P@ss1234").await,
            Err(ServerError::InvalidCredentials)
        ));
        assert!(service.find_active(user.id).await.unwrap().is_none());

        let other = register(&service, "b@x.com").await;
        service.delete(other.id).await.unwrap();
        assert!(matches!(
            service.authenticate("b@x.com", "P@ss1234").await,
            Err(ServerError::InvalidCredentials)
        ));
        assert!(matches!(service.delete(other.id).await, Err(ServerError::NotFound)));

        let restored = service.restore(other.id).await.unwrap();
        assert!(restored.deleted.is_none());
        assert!(service.authenticate("b@x.com", "P@ss1234").await.is_ok());
    }

    #[tokio::test]
    async fn test_set_password() {
        let service = service();
        let mut user = register(&service, "a@x.com").await;
        service.set_password(&mut user, "N3w-secret").unwrap();
        service.save(&user).await.unwrap();

        assert!(service.authenticate("a@x.com", "P@ss1234").await.is_err());
        assert!(service.authenticate("a@x.com", "N3w-secret").await.is_ok());
    }
}
