//! HTTP access to the same-origin API and the hosted negotiation endpoint.

use crate::config::ClientConfig;
use crate::error::{RelayError, Result};
use crate::protocol::{ResponsesRequest, SearchKind, SearchRequest, TokenRequest};
use crate::stream::ByteStream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, instrument};

/// The body of a `/api/openai-responses` reply.
pub enum ResponseBody {
    /// A `data:`-framed event stream.
    Stream(ByteStream),
    /// A single JSON envelope.
    Json(Value),
}

/// The HTTP calls the relay depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelayApi: Send + Sync {
    /// Mints an ephemeral credential for one realtime session.
    async fn fetch_token(&self, instructions: String) -> Result<SecretString>;

    /// Sends a local SDP offer and returns the remote SDP answer.
    async fn negotiate(&self, credential: &SecretString, offer_sdp: String) -> Result<String>;

    /// Runs a search and returns its framed result stream.
    async fn search(&self, kind: SearchKind, request: SearchRequest) -> Result<ByteStream>;

    /// Sends a text prompt to the responses endpoint.
    async fn responses(&self, request: ResponsesRequest) -> Result<ResponseBody>;
}

/// Reads the credential from a token endpoint reply.
///
/// Accepts the realtime sessions shape (`client_secret.value`) as well as a
/// bare `value` or `token` field.
pub fn credential_from(body: &Value) -> Option<SecretString> {
    body.pointer("/client_secret/value")
        .or_else(|| body.get("client_secret"))
        .or_else(|| body.get("value"))
        .or_else(|| body.get("token"))
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(|token| SecretString::from(token.to_string()))
}

/// `RelayApi` over `reqwest`.
#[derive(Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    realtime_url: String,
    realtime_model: String,
}

impl HttpApi {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            realtime_url: config.realtime_url.clone(),
            realtime_model: config.realtime_model.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn ensure_success(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RelayError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    fn byte_stream(response: reqwest::Response) -> ByteStream {
        Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(RelayError::from)),
        )
    }
}

#[async_trait]
impl RelayApi for HttpApi {
    #[instrument(skip_all)]
    async fn fetch_token(&self, instructions: String) -> Result<SecretString> {
        let response = self
            .client
            .post(self.url("/api/token"))
            .json(&TokenRequest { instructions })
            .send()
            .await?;
        let body: Value = Self::ensure_success("/api/token", response)
            .await?
            .json()
            .await?;
        credential_from(&body).ok_or(RelayError::Credential)
    }

    #[instrument(skip_all, fields(model = %self.realtime_model))]
    async fn negotiate(&self, credential: &SecretString, offer_sdp: String) -> Result<String> {
        let response = self
            .client
            .post(&self.realtime_url)
            .query(&[("model", self.realtime_model.as_str())])
            .bearer_auth(credential.expose_secret())
            .header(CONTENT_TYPE, "application/sdp")
            .body(offer_sdp)
            .send()
            .await?;
        let answer = Self::ensure_success(&self.realtime_url, response)
            .await?
            .text()
            .await?;
        debug!(answer_len = answer.len(), "Received SDP answer");
        Ok(answer)
    }

    #[instrument(skip(self, request), fields(endpoint = kind.endpoint()))]
    async fn search(&self, kind: SearchKind, request: SearchRequest) -> Result<ByteStream> {
        let response = self
            .client
            .post(self.url(kind.endpoint()))
            .json(&request)
            .send()
            .await?;
        let response = Self::ensure_success(kind.endpoint(), response).await?;
        Ok(Self::byte_stream(response))
    }

    #[instrument(skip_all, fields(stream = request.stream))]
    async fn responses(&self, request: ResponsesRequest) -> Result<ResponseBody> {
        let endpoint = "/api/openai-responses";
        let response = self
            .client
            .post(self.url(endpoint))
            .json(&request)
            .send()
            .await?;
        let response = Self::ensure_success(endpoint, response).await?;

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        if is_event_stream {
            Ok(ResponseBody::Stream(Self::byte_stream(response)))
        } else {
            Ok(ResponseBody::Json(response.json().await?))
        }
    }
}
