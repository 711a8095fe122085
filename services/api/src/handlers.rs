//! Axum Handlers for the REST API
//!
//! Same-origin endpoints the voice client calls: credential minting, the two
//! searches and plain Responses API prompts. `utoipa` doc comments generate
//! the OpenAPI documentation.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use futures_util::Stream;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    models::{ErrorResponse, ResponsesPayload, SearchFrameSchema, SearchPayload, TokenPayload},
    search,
    state::AppState,
    upstream::{SearchTool, UpstreamBody, UpstreamError},
};

pub enum ApiError {
    BadRequest(String),
    Upstream(UpstreamError),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Upstream(err) => {
                warn!("Upstream request failed: {}", err);
                (
                    StatusCode::BAD_GATEWAY,
                    Json(ErrorResponse {
                        message: err.to_string(),
                    }),
                )
                    .into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        match err.into().downcast::<UpstreamError>() {
            Ok(upstream) => Self::Upstream(upstream),
            Err(other) => Self::InternalServerError(other),
        }
    }
}

fn event_stream<S, E>(stream: S) -> Response
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Into<axum::BoxError>,
{
    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn require_query(query: &str) -> Result<(), ApiError> {
    if query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }
    Ok(())
}

/// Mint an ephemeral credential for a realtime voice session.
#[utoipa::path(
    post,
    path = "/api/token",
    request_body = TokenPayload,
    responses(
        (status = 200, description = "Realtime session created; `client_secret.value` holds the credential", body = serde_json::Value),
        (status = 502, description = "Upstream request failed", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_token(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TokenPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .openai
        .create_realtime_session(&payload.instructions)
        .await?;
    info!("Issued realtime credential");
    Ok(Json(session))
}

/// Search the web, streaming `data:` frames.
#[utoipa::path(
    post,
    path = "/api/web-search",
    request_body = SearchPayload,
    responses(
        (status = 200, description = "Stream of search frames", body = SearchFrameSchema, content_type = "text/event-stream"),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 502, description = "Upstream request failed", body = ErrorResponse)
    )
)]
pub async fn web_search(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SearchPayload>,
) -> Result<Response, ApiError> {
    require_query(&payload.query)?;
    let upstream = state.openai.search(&SearchTool::Web, &payload.query).await?;
    Ok(event_stream(search::relay(upstream, "Searching the web")))
}

/// Search the documents of a vector store, streaming `data:` frames.
#[utoipa::path(
    post,
    path = "/api/document-search",
    request_body = SearchPayload,
    responses(
        (status = 200, description = "Stream of search frames", body = SearchFrameSchema, content_type = "text/event-stream"),
        (status = 400, description = "Missing query or vector store id", body = ErrorResponse),
        (status = 502, description = "Upstream request failed", body = ErrorResponse)
    )
)]
pub async fn document_search(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SearchPayload>,
) -> Result<Response, ApiError> {
    require_query(&payload.query)?;
    let vector_store_id = payload
        .vector_store_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("vector_store_id is required".to_string()))?;
    let tool = SearchTool::Files { vector_store_id };
    let upstream = state.openai.search(&tool, &payload.query).await?;
    Ok(event_stream(search::relay(upstream, "Searching documents")))
}

/// Send a prompt to the Responses API.
///
/// With `stream` set, the upstream event stream is passed through unchanged.
/// Otherwise the upstream JSON envelope is returned.
#[utoipa::path(
    post,
    path = "/api/openai-responses",
    request_body = ResponsesPayload,
    responses(
        (status = 200, description = "Response envelope, or an event stream when streaming", body = serde_json::Value),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 502, description = "Upstream request failed", body = ErrorResponse)
    )
)]
pub async fn openai_responses(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ResponsesPayload>,
) -> Result<Response, ApiError> {
    if payload.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".to_string()));
    }
    match state
        .openai
        .responses(&payload.prompt, payload.stream)
        .await?
    {
        UpstreamBody::Stream(stream) => Ok(event_stream(stream)),
        UpstreamBody::Json(value) => Ok(Json(value).into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::router::create_router;
    use secrecy::SecretString;
    use serde_json::{Value, json};
    use std::net::SocketAddr;
    use tracing::Level;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Serves the router on an ephemeral port and returns its base URL.
    async fn serve(upstream: &MockServer) -> String {
        let config = Config {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            openai_api_key: SecretString::from("sk-test".to_string()),
            openai_base_url: upstream.uri(),
            realtime_model: "rt-model".into(),
            realtime_voice: "verse".into(),
            responses_model: "resp-model".into(),
            log_level: Level::INFO,
        };
        let app = create_router(Arc::new(AppState::new(config)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_token_returns_upstream_session() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realtime/sessions"))
            .and(body_partial_json(json!({"instructions": "be brief"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"client_secret": {"value": "ek_9"}})),
            )
            .mount(&upstream)
            .await;

        let base = serve(&upstream).await;
        let reply: Value = reqwest::Client::new()
            .post(format!("{}/api/token", base))
            .json(&json!({"instructions": "be brief"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reply["client_secret"]["value"], "ek_9");
    }

    #[tokio::test]
    async fn test_token_upstream_failure_is_bad_gateway() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realtime/sessions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&upstream)
            .await;

        let base = serve(&upstream).await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/token", base))
            .json(&json!({"instructions": ""}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body: Value = response.json().await.unwrap();
        assert!(body["message"].as_str().unwrap().contains("401"));
    }

    #[tokio::test]
    async fn test_web_search_streams_frames() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .and(body_partial_json(json!({"tools": [{"type": "web_search_preview"}]})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"type\":\"response.output_text.delta\",\"delta\":\"Sunny\"}\n\n",
                "text/event-stream",
            ))
            .mount(&upstream)
            .await;

        let base = serve(&upstream).await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/web-search", base))
            .json(&json!({"query": "weather"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        let body = response.text().await.unwrap();
        assert_eq!(
            body,
            "data: {\"type\":\"status\",\"message\":\"Searching the web\"}\n\n\
             data: {\"type\":\"content\",\"content\":\"Sunny\"}\n\n\
             data: {\"type\":\"complete\",\"content\":\"Sunny\"}\n\n"
        );
    }

    #[tokio::test]
    async fn test_document_search_requires_vector_store() {
        let upstream = MockServer::start().await;
        let base = serve(&upstream).await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/document-search", base))
            .json(&json!({"query": "refunds"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["message"], "vector_store_id is required");
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let upstream = MockServer::start().await;
        let base = serve(&upstream).await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/web-search", base))
            .json(&json!({"query": "  "}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_responses_passes_stream_through() {
        let raw = "data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hi\"}\n\ndata: [DONE]\n\n";
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .and(body_partial_json(json!({"input": "hello", "stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(raw, "text/event-stream"))
            .mount(&upstream)
            .await;

        let base = serve(&upstream).await;
        let body = reqwest::Client::new()
            .post(format!("{}/api/openai-responses", base))
            .json(&json!({"prompt": "hello", "stream": true}))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, raw);
    }

    #[tokio::test]
    async fn test_responses_returns_envelope() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output_text": "Hi"})))
            .mount(&upstream)
            .await;

        let base = serve(&upstream).await;
        let reply: Value = reqwest::Client::new()
            .post(format!("{}/api/openai-responses", base))
            .json(&json!({"prompt": "hello"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reply, json!({"output_text": "Hi"}));
    }
}
