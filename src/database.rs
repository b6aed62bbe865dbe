//! database (db) union structure.
use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::AppState;
use crate::user::{MemoryUserRepository, PostgresUserRepository, UserRepository};

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "portal";
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Custom db structure to pass to Axum.
#[derive(Clone)]
pub struct Database {
    pub postgres: Option<PgPool>,
    pub users: Arc<dyn UserRepository>,
}

impl Database {
    /// Init database connections and run pending migrations.
    pub async fn new(
        hostname: &str,
        username: &str,
        password: &str,
        db: &str,
        pool: u32,
    ) -> Result<Self, sqlx::Error> {
        let addr = format!("postgres://{username}:{password}@{hostname}/{db}");
        let pool = PgPoolOptions::new().max_connections(pool);
        let postgres = pool.connect(&addr).await?;

        tracing::info!(%hostname, %db, "postgres connected");

        sqlx::migrate!()
            .run(&postgres)
            .await
            .map_err(|err| sqlx::Error::Migrate(Box::new(err)))?;

        Ok(Self {
            users: Arc::new(PostgresUserRepository::new(postgres.clone())),
            postgres: Some(postgres),
        })
    }

    /// Process-local storage. Everything is lost on exit.
    pub fn memory() -> Self {
        Self {
            postgres: None,
            users: Arc::new(MemoryUserRepository::new()),
        }
    }
}

impl FromRef<AppState> for Database {
    fn from_ref(app_state: &AppState) -> Database {
        app_state.db.clone()
    }
}
