//! In-memory storage, for development and tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{Result, ServerError};
use crate::user::{
    Deleted, Document, DocumentKind, NewDocument, NewUser, User, UserFilter, UserRepository,
    conflict,
};

#[derive(Debug, Default)]
struct Store {
    users: BTreeMap<i64, User>,
    documents: Vec<Document>,
    last_user_id: i64,
    last_document_id: i64,
}

impl Store {
    /// Same unique constraints as the `users` table; deleted rows count.
    fn check_unique(&self, user_id: i64, email: &str, iin: Option<&str>, doc: Option<&str>) -> Result<()> {
        for other in self.users.values().filter(|u| u.id != user_id) {
            if other.email == email {
                return Err(conflict("users_email_key"));
            }
            if iin.is_some() && other.profile.iin.as_deref() == iin {
                return Err(conflict("users_iin_key"));
            }
            if doc.is_some() && other.profile.identity_document_number.as_deref() == doc {
                return Err(conflict("users_identity_document_number_key"));
            }
        }
        Ok(())
    }
}

/// [`UserRepository`] kept in process memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryUserRepository {
    store: Arc<RwLock<Store>>,
}

impl MemoryUserRepository {
    /// Create a new, empty [`MemoryUserRepository`].
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn insert(&self, user: NewUser) -> Result<User> {
        let mut store = self.store.write().await;
        store.check_unique(
            0,
            &user.email,
            user.profile.iin.as_deref(),
            user.profile.identity_document_number.as_deref(),
        )?;

        store.last_user_id += 1;
        let user = User {
            id: store.last_user_id,
            email: user.email,
            password: user.password,
            profile: user.profile,
            is_staff: user.is_staff,
            is_superuser: user.is_superuser,
            is_active: user.is_active,
            groups: user.groups,
            date_joined: Utc::now(),
            last_login: None,
            deleted: None,
        };
        store.users.insert(user.id, user.clone());

        Ok(user)
    }

    async fn find_by_id(&self, id: i64, deleted: Deleted) -> Result<Option<User>> {
        let store = self.store.read().await;
        Ok(store
            .users
            .get(&id)
            .filter(|u| deleted.matches(u.deleted))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let store = self.store.read().await;
        Ok(store
            .users
            .values()
            .find(|u| u.email == email && u.deleted.is_none())
            .cloned())
    }

    async fn update(&self, user: &User) -> Result<User> {
        let mut store = self.store.write().await;
        store.check_unique(
            user.id,
            &user.email,
            user.profile.iin.as_deref(),
            user.profile.identity_document_number.as_deref(),
        )?;

        let stored = store.users.get_mut(&user.id).ok_or(ServerError::NotFound)?;
        *stored = User {
            id: stored.id,
            date_joined: stored.date_joined,
            deleted: stored.deleted,
            ..user.clone()
        };

        Ok(stored.clone())
    }

    async fn touch_last_login(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut store = self.store.write().await;
        if let Some(user) = store.users.get_mut(&id) {
            user.last_login = Some(at);
        }
        Ok(())
    }

    async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, i64)> {
        let store = self.store.read().await;
        let mut users: Vec<&User> = store.users.values().filter(|u| filter.matches(u)).collect();
        users.sort_by(|a, b| a.email.cmp(&b.email).then(a.id.cmp(&b.id)));

        let total = users.len() as i64;
        let page = users
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .cloned()
            .collect();

        Ok((page, total))
    }

    async fn soft_delete(&self, id: i64) -> Result<bool> {
        let mut store = self.store.write().await;
        let now = Utc::now();

        match store.users.get_mut(&id) {
            Some(user) if user.deleted.is_none() => user.deleted = Some(now),
            _ => return Ok(false),
        }

        store
            .documents
            .iter_mut()
            .filter(|d| d.user_id == id && d.deleted.is_none())
            .for_each(|d| d.deleted = Some(now));

        Ok(true)
    }

    async fn restore(&self, id: i64) -> Result<bool> {
        let mut store = self.store.write().await;

        let stamp = match store.users.get_mut(&id) {
            Some(user) if user.deleted.is_some() => user.deleted.take(),
            _ => return Ok(false),
        };

        store
            .documents
            .iter_mut()
            .filter(|d| d.user_id == id && d.deleted == stamp)
            .for_each(|d| d.deleted = None);

        Ok(true)
    }

    async fn documents(&self, user_id: i64) -> Result<Vec<Document>> {
        let store = self.store.read().await;
        Ok(store
            .documents
            .iter()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_document(&self, document: NewDocument) -> Result<Document> {
        let mut store = self.store.write().await;
        let now = Utc::now();

        if !store
            .users
            .get(&document.user_id)
            .is_some_and(|user| user.deleted.is_none())
        {
            return Err(ServerError::NotFound);
        }

        store
            .documents
            .iter_mut()
            .filter(|d| d.user_id == document.user_id && d.kind == document.kind && d.deleted.is_none())
            .for_each(|d| d.deleted = Some(now));

        store.last_document_id += 1;
        let document = Document {
            id: store.last_document_id,
            user_id: document.user_id,
            kind: document.kind,
            path: document.path,
            content_type: document.content_type,
            uploaded_at: now,
            deleted: None,
        };
        store.documents.push(document.clone());

        Ok(document)
    }

    async fn delete_document(&self, user_id: i64, kind: DocumentKind) -> Result<bool> {
        let mut store = self.store.write().await;
        let now = Utc::now();

        let mut found = false;
        for document in store
            .documents
            .iter_mut()
            .filter(|d| d.user_id == user_id && d.kind == kind && d.deleted.is_none())
        {
            document.deleted = Some(now);
            found = true;
        }

        Ok(found)
    }
}
