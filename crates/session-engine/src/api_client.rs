//! HTTP client for the pgAnalytics API.
//!
//! One shared `reqwest::Client` with a base address, JSON defaults, a request
//! timeout, and two interceptor slots:
//! - outgoing: decorates every request before dispatch (bearer token)
//! - incoming: consulted when an authenticated request comes back `401`
//!
//! A request that got `401` is replayed at most once. The replay is sent
//! straight to the wire, so it can never trigger another refresh.

use crate::{AuthError, AuthResult, FieldError};
use async_trait::async_trait;
use parking_lot::RwLock;
use pga_core::Config;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use token_store::TokenStore;
use tracing::{debug, warn};

/// Auth endpoint paths.
pub mod endpoints {
    pub const LOGIN: &str = "/api/v1/auth/login";
    pub const REGISTER: &str = "/api/v1/auth/register";
    pub const ME: &str = "/api/v1/auth/me";
    pub const REFRESH: &str = "/api/v1/auth/refresh";
    pub const LOGOUT: &str = "/api/v1/auth/logout";
    pub const CHANGE_PASSWORD: &str = "/api/v1/auth/change-password";
}

/// Fingerprint of a response body, for logs.
fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// How a request interacts with the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    /// Run the outgoing interceptor (attach the bearer token).
    pub attach_credentials: bool,
    /// Consult the incoming interceptor on `401` and replay once.
    pub refresh_on_unauthorized: bool,
}

impl RequestPolicy {
    /// Normal API call on behalf of the signed-in user.
    pub const AUTHENTICATED: Self = Self {
        attach_credentials: true,
        refresh_on_unauthorized: true,
    };

    /// Credential exchanges (login, register, refresh). A `401` here is an
    /// answer, not an expired session.
    pub const ANONYMOUS: Self = Self {
        attach_credentials: false,
        refresh_on_unauthorized: false,
    };
}

/// Outgoing-request hook.
pub trait RequestInterceptor: Send + Sync {
    /// Decorate the request before it is sent.
    fn intercept(&self, request: &mut Request) -> AuthResult<()>;
}

/// Incoming-response hook for `401` replies.
#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    /// Called with the bearer token the rejected request carried. Return
    /// `true` if credentials changed and the request should be replayed.
    async fn on_unauthorized(&self, rejected_token: Option<&str>) -> bool;
}

/// Attaches the stored access token as a bearer credential.
pub struct BearerTokenInterceptor {
    tokens: Arc<TokenStore>,
}

impl BearerTokenInterceptor {
    pub fn new(tokens: Arc<TokenStore>) -> Self {
        Self { tokens }
    }
}

impl RequestInterceptor for BearerTokenInterceptor {
    fn intercept(&self, request: &mut Request) -> AuthResult<()> {
        let headers = request.headers_mut();
        // A replayed request still carries the rejected token
        headers.remove(AUTHORIZATION);

        if let Some(token) = self.tokens.access_token()? {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                warn!("Stored access token is not a valid header value");
                AuthError::SessionExpired
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(())
    }
}

/// Extract the bearer token a request carries.
fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Non-success response, parsed from the FastAPI error envelope.
#[derive(Debug, Clone)]
pub struct ApiFailure {
    pub status: StatusCode,
    /// Human-readable summary.
    pub message: String,
    /// Per-field problems, when the server reported them.
    pub fields: Vec<FieldError>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    detail: Option<ErrorDetail>,
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Text(String),
    Items(Vec<ErrorItem>),
    Other(serde_json::Value),
}

#[derive(Deserialize)]
struct ErrorItem {
    #[serde(default)]
    loc: Vec<serde_json::Value>,
    msg: String,
}

impl ErrorItem {
    /// The last named location segment, skipping the `body`/`query` prefix.
    fn field(&self) -> Option<&str> {
        self.loc
            .iter()
            .filter_map(serde_json::Value::as_str)
            .filter(|segment| !matches!(*segment, "body" | "query" | "path"))
            .last()
    }
}

impl ApiFailure {
    /// Parse a response body. Unparseable bodies fall back to the status reason.
    pub fn from_body(status: StatusCode, body: &str) -> Self {
        let fallback = status
            .canonical_reason()
            .unwrap_or("Unexpected response")
            .to_string();

        let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
            return Self {
                status,
                message: fallback,
                fields: Vec::new(),
            };
        };

        match envelope.detail {
            Some(ErrorDetail::Text(text)) => Self {
                status,
                message: text,
                fields: Vec::new(),
            },
            Some(ErrorDetail::Items(items)) => {
                let fields: Vec<FieldError> = items
                    .iter()
                    .map(|item| FieldError::new(item.field(), item.msg.clone()))
                    .collect();
                let message = fields
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                Self {
                    status,
                    message: if message.is_empty() { fallback } else { message },
                    fields,
                }
            }
            Some(ErrorDetail::Other(value)) => Self {
                status,
                message: value.to_string(),
                fields: Vec::new(),
            },
            None => Self {
                status,
                message: envelope.message.unwrap_or(fallback),
                fields: Vec::new(),
            },
        }
    }

    /// Generic mapping into the error taxonomy.
    pub fn into_error(self) -> AuthError {
        match self.status {
            StatusCode::CONFLICT => AuthError::Conflict(self.message),
            StatusCode::UNPROCESSABLE_ENTITY => {
                if self.fields.is_empty() {
                    AuthError::Validation(vec![FieldError::new(None, self.message)])
                } else {
                    AuthError::Validation(self.fields)
                }
            }
            status => AuthError::Api {
                status: status.as_u16(),
                message: self.message,
            },
        }
    }
}

impl From<ApiFailure> for AuthError {
    fn from(failure: ApiFailure) -> Self {
        failure.into_error()
    }
}

/// Shared API client.
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
    request_interceptor: RwLock<Option<Arc<dyn RequestInterceptor>>>,
    response_interceptor: RwLock<Option<Weak<dyn ResponseInterceptor>>>,
}

impl ApiClient {
    /// Build a client from configuration, with the bearer interceptor over
    /// `tokens` installed in the outgoing slot.
    pub fn new(config: &Config, tokens: Arc<TokenStore>) -> AuthResult<Self> {
        let base_url = config.api_url()?.to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_interceptor: RwLock::new(Some(Arc::new(BearerTokenInterceptor::new(tokens)))),
            response_interceptor: RwLock::new(None),
        })
    }

    /// Base address requests are resolved against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Replace the outgoing interceptor. `None` sends requests undecorated.
    pub fn set_request_interceptor(&self, interceptor: Option<Arc<dyn RequestInterceptor>>) {
        *self.request_interceptor.write() = interceptor;
    }

    /// Install the `401` handler. Held weakly so the owner can hold the client.
    pub fn set_response_interceptor(&self, interceptor: Weak<dyn ResponseInterceptor>) {
        *self.response_interceptor.write() = Some(interceptor);
    }

    /// Remove the `401` handler.
    pub fn clear_response_interceptor(&self) {
        *self.response_interceptor.write() = None;
    }

    fn response_interceptor(&self) -> Option<Arc<dyn ResponseInterceptor>> {
        self.response_interceptor
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Start a request against an API path. Run it with [`ApiClient::execute`].
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client.request(method, self.url(path))
    }

    /// Send a request and return the raw response, whatever its status.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        policy: RequestPolicy,
    ) -> AuthResult<Response> {
        let mut builder = self.request(method, path);
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let request = builder.build()?;
        self.execute(request, policy).await
    }

    /// Run a built request through the interceptors.
    pub async fn execute(&self, request: Request, policy: RequestPolicy) -> AuthResult<Response> {
        let replay = request.try_clone();
        let (response, sent_token) = self.dispatch(request, policy).await?;

        if response.status() != StatusCode::UNAUTHORIZED || !policy.refresh_on_unauthorized {
            return Ok(response);
        }
        let (Some(replay), Some(interceptor)) = (replay, self.response_interceptor()) else {
            return Ok(response);
        };

        if !interceptor.on_unauthorized(sent_token.as_deref()).await {
            return Ok(response);
        }

        debug!(url = %replay.url(), "Replaying request with refreshed credentials");
        let (replayed, _) = self.dispatch(replay, policy).await?;
        Ok(replayed)
    }

    async fn dispatch(
        &self,
        mut request: Request,
        policy: RequestPolicy,
    ) -> AuthResult<(Response, Option<String>)> {
        if policy.attach_credentials {
            let interceptor = self.request_interceptor.read().clone();
            if let Some(interceptor) = interceptor {
                interceptor.intercept(&mut request)?;
            }
        }

        let sent_token = bearer_token(&request);
        let method = request.method().clone();
        let url = request.url().clone();

        let response = self.http_client.execute(request).await.map_err(|e| {
            warn!(method = %method, url = %url, error = %e, "API request failed");
            AuthError::from(e)
        })?;

        debug!(
            method = %method,
            url = %url,
            status = %response.status(),
            "API request"
        );

        Ok((response, sent_token))
    }

    /// Read a non-success response into an [`ApiFailure`].
    pub async fn read_failure(response: Response) -> ApiFailure {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!(
            status = %status,
            body_summary = %summarize_response_body(&body),
            "API error response"
        );
        ApiFailure::from_body(status, &body)
    }

    /// Map a non-success response into an [`AuthError`].
    pub async fn error_from_response(response: Response) -> AuthError {
        Self::read_failure(response).await.into_error()
    }

    /// Decode a success body, or turn a failure into an error.
    pub async fn decode<T: DeserializeOwned>(response: Response) -> AuthResult<T> {
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        let bytes = response.bytes().await?;
        let body = if bytes.is_empty() { &b"null"[..] } else { &bytes[..] };
        Ok(serde_json::from_slice(body)?)
    }

    /// Send with a JSON body and decode the JSON reply.
    pub async fn send_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        policy: RequestPolicy,
    ) -> AuthResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = body.map(serde_json::to_value).transpose()?;
        let response = self.send(method, path, body, policy).await?;
        Self::decode(response).await
    }

    /// Authenticated `GET`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AuthResult<T> {
        self.send_json::<(), T>(Method::GET, path, None, RequestPolicy::AUTHENTICATED)
            .await
    }

    /// Authenticated `POST`.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> AuthResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::POST, path, Some(body), RequestPolicy::AUTHENTICATED)
            .await
    }

    /// Authenticated `PUT`.
    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> AuthResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::PUT, path, Some(body), RequestPolicy::AUTHENTICATED)
            .await
    }
}
