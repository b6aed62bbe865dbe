//! Public configuration page for front-end identification and customization.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::Configuration;

/// Structured configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Status {
    pub name: String,
    pub url: String,
    pub version: String,
    pub support: Option<String>,
    pub favicon: Option<String>,
}

/// Public server status (configuration).
#[utoipa::path(
    get,
    path = "/status.json",
    tag = "status",
    responses((status = 200, description = "Public instance status.", body = Status)),
)]
pub async fn status(State(config): State<Arc<Configuration>>) -> Json<Status> {
    Json(Status {
        name: config.name.clone(),
        url: config.url.clone(),
        version: config.version().to_owned(),
        support: config.support().map(str::to_owned),
        favicon: config.favicon().map(str::to_owned),
    })
}
