//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API and OpenAPI documentation.

use crate::{
    handlers,
    models::{ErrorResponse, ResponsesPayload, SearchFrameSchema, SearchPayload, TokenPayload},
    state::AppState,
};

use anyhow::Context;
use axum::{Router, routing::post};
use std::path::Path;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_token,
        handlers::web_search,
        handlers::document_search,
        handlers::openai_responses,
    ),
    components(
        schemas(TokenPayload, SearchPayload, ResponsesPayload, SearchFrameSchema, ErrorResponse)
    ),
    tags(
        (name = "voicedesk API", description = "Same-origin endpoints for the voicedesk voice assistant")
    )
)]
pub struct ApiDoc;

/// Where the `openapi` bin writes the document unless `OPENAPI_OUTPUT` is set.
pub const DEFAULT_OPENAPI_OUTPUT: &str = "openapi.json";

/// Writes the OpenAPI document served at `/api-docs/openapi.json` to `path`.
pub fn write_openapi_document(path: &Path) -> anyhow::Result<()> {
    let json = ApiDoc::openapi()
        .to_pretty_json()
        .context("Failed to serialize the OpenAPI document")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/api/token", post(handlers::create_token))
        .route("/api/web-search", post(handlers::web_search))
        .route("/api/document-search", post(handlers::document_search))
        .route("/api/openai-responses", post(handlers::openai_responses))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
