use crate::infrastructure::error::{InfraError, GENERIC_FAILURE_MESSAGE};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

pub const CSRF_HEADER: &str = "X-CSRF-Token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    fn to_reqwest(self) -> Method {
        match self {
            Self::Get => Method::GET,
            Self::Post => Method::POST,
            Self::Patch => Method::PATCH,
            Self::Delete => Method::DELETE,
        }
    }
}

/// One call against the REST API. `segments` are relative to `<base>/api`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub bearer: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new<I, S>(method: HttpMethod, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            body: None,
            bearer: None,
            headers: Vec::new(),
        }
    }

    pub fn with_json<T: serde::Serialize>(mut self, body: &T) -> Result<Self, InfraError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn with_query(mut self, pairs: Vec<(&'static str, String)>) -> Self {
        self.query
            .extend(pairs.into_iter().map(|(key, value)| (key.to_string(), value)));
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    pub set_cookies: Vec<String>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            set_cookies: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, InfraError> {
        serde_json::from_str(&self.body).map_err(|error| InfraError::Api {
            status: self.status,
            message: format!("invalid response payload: {error}; body={}", self.body),
        })
    }

    /// Turns a non-2xx answer into [`InfraError::Api`] carrying the server's message.
    pub fn error_for_status(self) -> Result<Self, InfraError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(InfraError::Api {
            status: self.status,
            message: self.error_message(),
        })
    }

    pub fn error_message(&self) -> String {
        let Ok(payload) = serde_json::from_str::<serde_json::Value>(&self.body) else {
            return GENERIC_FAILURE_MESSAGE.to_string();
        };
        let candidates = [
            payload.pointer("/errors/message"),
            payload.pointer("/errors/detail"),
            payload.pointer("/detail/message"),
            payload.get("detail"),
            payload.get("message"),
        ];
        candidates
            .into_iter()
            .flatten()
            .find_map(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string())
    }
}

/// Sends a request and reports whatever status came back. Only failures to get
/// an answer at all (connect errors, timeouts) are errors.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestApiTransport {
    client: Client,
    api_root: Url,
}

impl ReqwestApiTransport {
    pub fn new(api_root: Url, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::InvalidConfig(format!("failed building http client: {error}")))?;
        Ok(Self { client, api_root })
    }

    fn endpoint(&self, segments: &[String]) -> Result<Url, InfraError> {
        let mut url = self.api_root.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| InfraError::InvalidConfig("api root URL cannot be a base".to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }
}

fn collect_set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
        .collect()
}

#[async_trait]
impl ApiTransport for ReqwestApiTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, InfraError> {
        let endpoint = self.endpoint(&request.segments)?;
        let path = request.path();
        let mut builder = self.client.request(request.method.to_reqwest(), endpoint);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = request.bearer.as_deref() {
            builder = builder.bearer_auth(token);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|error| {
            tracing::debug!(method = request.method.as_str(), %path, %error, "request failed");
            InfraError::Network(format!("{} {path}: {error}", request.method.as_str()))
        })?;

        let status = response.status().as_u16();
        let set_cookies = collect_set_cookies(response.headers());
        let body = response.text().await.map_err(|error| {
            InfraError::Network(format!("failed reading response for {path}: {error}"))
        })?;
        tracing::debug!(method = request.method.as_str(), %path, status, "request settled");

        Ok(ApiResponse {
            status,
            body,
            set_cookies,
        })
    }
}
