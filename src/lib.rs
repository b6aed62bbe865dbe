//! Citizen portal account service: registration, JWT authentication,
//! self-service profile and staff administration.

#![forbid(unsafe_code)]
pub mod config;
pub mod crypto;
pub mod database;
pub mod docs;
pub mod error;
pub mod media;
mod middleware;
pub mod router;
pub mod telemetry;
pub mod token;
pub mod user;

pub use error::ServerError;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post, put};
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Room for multipart framing around the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    token: Option<&str>,
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub db: database::Database,
    pub users: user::UserService,
    pub token: token::TokenManager,
    pub media: media::MediaStorage,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    let upload_limit = state.media.max_upload_size() + MULTIPART_OVERHEAD;
    let profile_router = Router::new()
        // `GET /users/profile/` goes to `retrieve`, `PATCH` and `PUT` to `update`.
        .route(
            "/profile/",
            get(router::profile::retrieve)
                .patch(router::profile::update)
                .put(router::profile::update),
        )
        .route(
            "/profile/documents/{kind}",
            put(router::documents::upload)
                .delete(router::documents::remove)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            middleware::auth,
        ));

    let users_router = Router::new()
        // `POST /users/register/` goes to `register`.
        .route("/register/", post(router::register::handler))
        // `POST /users/token/` goes to `obtain`.
        .route("/token/", post(router::token::obtain))
        .route("/token/refresh/", post(router::token::refresh))
        .merge(profile_router);

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        .route("/metrics", get(telemetry::metrics))
        .nest("/users", users_router)
        .nest("/admin", router::admin::router(state.clone()))
        .merge(docs::router())
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let path = std::env::var("PORTAL_CONFIG").unwrap_or_default();
    let config = config::Configuration::default()
        .path(path.into())
        .read()?;

    let db = match config.postgres {
        Some(ref config) => {
            database::Database::new(
                &config.address,
                &config
                    .username
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .password
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .database
                    .clone()
                    .unwrap_or(database::DEFAULT_DATABASE_NAME.into()),
                config.pool_size.unwrap_or(database::DEFAULT_POOL_SIZE),
            )
            .await?
        },
        None => {
            tracing::warn!(
                "missing `postgres` entry on `config.yaml` file, data is kept in memory"
            );
            database::Database::memory()
        },
    };

    let pwd = Arc::new(crypto::PasswordManager::new(config.argon2.clone())?);
    let users = user::UserService::new(Arc::clone(&db.users), pwd);

    // handle jwt.
    let token_config = config.token.clone().unwrap_or_default();
    let mut token = match (
        &token_config.public_key_pem,
        &token_config.private_key_pem,
    ) {
        (Some(public_key), Some(private_key)) => {
            token::TokenManager::from_ec_pem(&config.url, public_key, private_key)?
        },
        _ => {
            let Some(secret) = std::env::var("JWT_SECRET")
                .ok()
                .or(token_config.secret.clone())
                .filter(|secret| !secret.is_empty())
            else {
                return Err("missing `token.secret` entry on `config.yaml` file or `JWT_SECRET` environnement variable".into());
            };
            token::TokenManager::from_secret(&config.url, &secret)
        },
    };
    if let Some(audience) = &token_config.audience {
        token.audience(audience);
    }
    token.lifetimes(token_config.access_lifetime, token_config.refresh_lifetime);

    let media = media::MediaStorage::new(&config.media);

    Ok(AppState {
        config,
        db,
        users,
        token,
        media,
        metrics: None,
    })
}
