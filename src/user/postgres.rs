//! Handle database requests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Pool, Postgres, QueryBuilder};

use crate::error::{Result, ServerError};
use crate::user::{
    Deleted, Document, DocumentKind, NewDocument, NewUser, User, UserFilter, UserRepository,
    conflict,
};

const USER_COLUMNS: &str = r#"id, email, password, first_name, last_name, middle_name, iin,
    date_of_birth, sex, status, phone_number, additional_phone_numbers, physical_address,
    height, weight, race, identity_document_number, driver_license_number,
    marriage_status_info, children_info, is_staff, is_superuser, is_active, groups,
    date_joined, last_login, deleted"#;

const DOCUMENT_COLUMNS: &str = "id, user_id, kind, path, content_type, uploaded_at, deleted";

/// [`UserRepository`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PostgresUserRepository {
    pool: Pool<Postgres>,
}

impl PostgresUserRepository {
    /// Create a new [`PostgresUserRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

/// Turn unique violations into a field conflict.
fn map_unique(err: sqlx::Error) -> ServerError {
    if let Some(db) = err.as_database_error() {
        if db.is_unique_violation() {
            return conflict(db.constraint().unwrap_or_default());
        }
    }
    ServerError::Sql(err)
}

fn push_deleted(builder: &mut QueryBuilder<'_, Postgres>, deleted: Deleted) {
    match deleted {
        Deleted::Exclude => builder.push(" AND deleted IS NULL"),
        Deleted::Include => builder.push(""),
        Deleted::Only => builder.push(" AND deleted IS NOT NULL"),
    };
}

fn push_filter<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a UserFilter) {
    builder.push(" WHERE TRUE");
    if let Some(is_staff) = filter.is_staff {
        builder.push(" AND is_staff = ").push_bind(is_staff);
    }
    if let Some(is_active) = filter.is_active {
        builder.push(" AND is_active = ").push_bind(is_active);
    }
    if let Some(is_superuser) = filter.is_superuser {
        builder.push(" AND is_superuser = ").push_bind(is_superuser);
    }
    if let Some(group) = &filter.group {
        builder.push(" AND ").push_bind(group).push(" = ANY(groups)");
    }
    push_deleted(builder, filter.deleted);
    if let Some(term) = filter.search() {
        let pattern = format!(
            "%{}%",
            term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        builder
            .push(" AND (email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR last_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR iin ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn insert(&self, user: NewUser) -> Result<User> {
        let query = format!(
            r#"INSERT INTO users (email, password, first_name, last_name, middle_name, iin,
                date_of_birth, sex, status, phone_number, additional_phone_numbers,
                physical_address, height, weight, race, identity_document_number,
                driver_license_number, marriage_status_info, children_info, is_staff,
                is_superuser, is_active, groups)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22, $23)
            RETURNING {USER_COLUMNS}"#
        );

        let profile = &user.profile;
        let user = sqlx::query_as::<_, User>(&query)
            .bind(&user.email)
            .bind(&user.password)
            .bind(&profile.first_name)
            .bind(&profile.last_name)
            .bind(&profile.middle_name)
            .bind(&profile.iin)
            .bind(profile.date_of_birth)
            .bind(profile.sex)
            .bind(profile.status)
            .bind(&profile.phone_number)
            .bind(Json(&profile.additional_phone_numbers))
            .bind(&profile.physical_address)
            .bind(profile.height)
            .bind(profile.weight)
            .bind(&profile.race)
            .bind(&profile.identity_document_number)
            .bind(&profile.driver_license_number)
            .bind(&profile.marriage_status_info)
            .bind(&profile.children_info)
            .bind(user.is_staff)
            .bind(user.is_superuser)
            .bind(user.is_active)
            .bind(&user.groups)
            .fetch_one(&self.pool)
            .await
            .map_err(map_unique)?;

        Ok(user)
    }

    async fn find_by_id(&self, id: i64, deleted: Deleted) -> Result<Option<User>> {
        let mut builder = QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users WHERE id = "));
        builder.push_bind(id);
        push_deleted(&mut builder, deleted);

        Ok(builder
            .build_query_as::<User>()
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted IS NULL");

        Ok(sqlx::query_as::<_, User>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn update(&self, user: &User) -> Result<User> {
        let query = format!(
            r#"UPDATE users
                SET email = $1, password = $2, first_name = $3, last_name = $4,
                    middle_name = $5, iin = $6, date_of_birth = $7, sex = $8, status = $9,
                    phone_number = $10, additional_phone_numbers = $11,
                    physical_address = $12, height = $13, weight = $14, race = $15,
                    identity_document_number = $16, driver_license_number = $17,
                    marriage_status_info = $18, children_info = $19, is_staff = $20,
                    is_superuser = $21, is_active = $22, groups = $23, last_login = $24
                WHERE id = $25
                RETURNING {USER_COLUMNS}"#
        );

        let profile = &user.profile;
        sqlx::query_as::<_, User>(&query)
            .bind(&user.email)
            .bind(&user.password)
            .bind(&profile.first_name)
            .bind(&profile.last_name)
            .bind(&profile.middle_name)
            .bind(&profile.iin)
            .bind(profile.date_of_birth)
            .bind(profile.sex)
            .bind(profile.status)
            .bind(&profile.phone_number)
            .bind(Json(&profile.additional_phone_numbers))
            .bind(&profile.physical_address)
            .bind(profile.height)
            .bind(profile.weight)
            .bind(&profile.race)
            .bind(&profile.identity_document_number)
            .bind(&profile.driver_license_number)
            .bind(&profile.marriage_status_info)
            .bind(&profile.children_info)
            .bind(user.is_staff)
            .bind(user.is_superuser)
            .bind(user.is_active)
            .bind(&user.groups)
            .bind(user.last_login)
            .bind(user.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_unique)?
            .ok_or(ServerError::NotFound)
    }

    async fn touch_last_login(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, i64)> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM users");
        push_filter(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut page = QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_filter(&mut page, filter);
        page.push(" ORDER BY email, id LIMIT ")
            .push_bind(filter.limit())
            .push(" OFFSET ")
            .push_bind(filter.offset());
        let users = page.build_query_as::<User>().fetch_all(&self.pool).await?;

        Ok((users, total))
    }

    async fn soft_delete(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let result = sqlx::query("UPDATE users SET deleted = $1 WHERE id = $2 AND deleted IS NULL")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE documents SET deleted = $1 WHERE user_id = $2 AND deleted IS NULL")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn restore(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let stamp: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
            "SELECT deleted FROM users WHERE id = $1 AND deleted IS NOT NULL FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(Some(stamp)) = stamp else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query("UPDATE users SET deleted = NULL WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE documents SET deleted = NULL WHERE user_id = $1 AND deleted = $2")
            .bind(id)
            .bind(stamp)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn documents(&self, user_id: i64) -> Result<Vec<Document>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE user_id = $1 ORDER BY id");

        Ok(sqlx::query_as::<_, Document>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn insert_document(&self, document: NewDocument) -> Result<Document> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent uploads of the same user.
        sqlx::query("SELECT id FROM users WHERE id = $1 AND deleted IS NULL FOR UPDATE")
            .bind(document.user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(ServerError::NotFound)?;

        sqlx::query(
            "UPDATE documents SET deleted = NOW() WHERE user_id = $1 AND kind = $2 AND deleted IS NULL",
        )
        .bind(document.user_id)
        .bind(document.kind)
        .execute(&mut *tx)
        .await?;

        let query = format!(
            r#"INSERT INTO documents (user_id, kind, path, content_type)
                VALUES ($1, $2, $3, $4)
                RETURNING {DOCUMENT_COLUMNS}"#
        );
        let document = sqlx::query_as::<_, Document>(&query)
            .bind(document.user_id)
            .bind(document.kind)
            .bind(&document.path)
            .bind(&document.content_type)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_unique)?;

        tx.commit().await?;
        Ok(document)
    }

    async fn delete_document(&self, user_id: i64, kind: DocumentKind) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET deleted = NOW() WHERE user_id = $1 AND kind = $2 AND deleted IS NULL",
        )
        .bind(user_id)
        .bind(kind)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
