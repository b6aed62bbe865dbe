//! OpenAPI document and its viewers.

use axum::Router;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_redoc::{Redoc, Servable};
use utoipa_swagger_ui::SwaggerUi;

use crate::AppState;
use crate::router;

pub const SCHEMA_PATH: &str = "/api/schema/";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Citizen portal API",
        description = "Registration, authentication and profile management."
    ),
    paths(
        router::register::handler,
        router::token::obtain,
        router::token::refresh,
        router::profile::retrieve,
        router::profile::update,
        router::documents::upload,
        router::documents::remove,
        router::admin::list,
        router::admin::create,
        router::admin::retrieve,
        router::admin::update,
        router::admin::destroy,
        router::admin::restore,
        router::status::status,
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "users", description = "Registration and self-service profile."),
        (name = "authentication", description = "JSON web tokens."),
        (name = "admin", description = "Staff only account management."),
        (name = "status", description = "Instance information."),
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// `/api/schema/` routes.
pub fn router() -> Router<AppState> {
    Router::new()
        // Also serves the JSON document on `SCHEMA_PATH`.
        .merge(SwaggerUi::new("/api/schema/swagger-ui").url(SCHEMA_PATH, ApiDoc::openapi()))
        .merge(Redoc::with_url("/api/schema/redoc/", ApiDoc::openapi()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::*;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_schema() {
        let state = router::state();
        let response = make_request(
            None,
            app(state),
            Method::GET,
            SCHEMA_PATH,
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        for path in ["/users/register/", "/users/token/", "/users/profile/", "/admin/users/{id}"] {
            assert!(body["paths"].get(path).is_some(), "{path} is not documented");
        }
        assert!(body["components"]["securitySchemes"].get("bearer").is_some());
    }

    #[tokio::test]
    async fn test_viewers() {
        let state = router::state();
        for path in ["/api/schema/swagger-ui/", "/api/schema/redoc/"] {
            let response = make_request(
                None,
                app(state.clone()),
                Method::GET,
                path,
                String::default(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
