//! Client proxies handed out by the factory
//!
//! An `ApiClient` is cheap: a pool reference plus its own `ClientConfig`.
//! Every operation borrows whatever generation is current at that moment and
//! gives the borrow back when the operation ends, so a client created before
//! a rotation uses the new handler on its next call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use codec::{Codec, CodecError, JsonCodec};
use reqwest::cookie::CookieStore;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::entry::Handler;
use crate::error::{Error, Result};
use crate::pool::{GenerationPool, HandlerRef};
use crate::services::Services;

/// Per-client settings, built fresh for each client and passed to the
/// configure callback before the client is handed out.
pub struct ClientConfig {
    base_url: Option<Url>,
    headers: HeaderMap,
    cookies: Vec<(String, String)>,
    timeout: Option<Duration>,
    codec: Arc<dyn Codec>,
    services: Option<Arc<Services>>,
}

impl ClientConfig {
    pub(crate) fn new(services: Option<Arc<Services>>) -> Self {
        Self {
            base_url: None,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            timeout: None,
            codec: Arc::new(JsonCodec::new()),
            services,
        }
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn set_base_url(&mut self, url: Url) {
        self.base_url = Some(url);
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Add or replace a header from string parts. Invalid names or values
    /// are logged and skipped.
    pub fn insert_header(&mut self, name: &str, value: &str) {
        let name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %name, error = %e, "skipping invalid header name");
                return;
            }
        };
        let value = match HeaderValue::from_str(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %name, error = %e, "skipping invalid header value");
                return;
            }
        };
        self.headers.insert(name, value);
    }

    /// Cookie sent with every request of this client, merged with whatever
    /// the generation's cookie store holds for the request URL.
    pub fn add_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.push((name.into(), value.into()));
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    pub fn set_codec(&mut self, codec: Arc<dyn Codec>) {
        self.codec = codec;
    }

    pub fn services(&self) -> Option<&Services> {
        self.services.as_deref()
    }

    /// Absolute URLs pass through; anything else is joined onto the base URL.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        if let Ok(url) = Url::parse(path) {
            return Ok(url);
        }
        let base = self.base_url.as_ref().ok_or_else(|| {
            Error::InvalidUrl(format!("relative path {path:?} without a base url"))
        })?;
        base.join(path)
            .map_err(|e| Error::InvalidUrl(format!("{path:?}: {e}")))
    }

    /// Single `Cookie` value combining cookies already on the request, the
    /// jar's cookies and this client's own pairs. `None` when the client has
    /// no cookies of its own, leaving the jar to the transport.
    fn cookie_header(
        &self,
        existing: &HeaderMap,
        jar: Option<HeaderValue>,
    ) -> Option<HeaderValue> {
        if self.cookies.is_empty() {
            return None;
        }
        let mut parts: Vec<String> = existing
            .get_all(COOKIE)
            .iter()
            .chain(jar.as_ref())
            .filter_map(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect();
        parts.extend(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}")),
        );
        match HeaderValue::from_str(&parts.join("; ")) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "skipping invalid cookie header");
                None
            }
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("headers", &self.headers.len())
            .field("cookies", &self.cookies.len())
            .field("timeout", &self.timeout)
            .field("codec", &self.codec.id())
            .finish_non_exhaustive()
    }
}

/// Outbound request description produced by the dispatch layer.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Fully read response plus the generation that served it.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub generation: u64,
}

/// Transient client proxy bound to the factory's pool.
pub struct ApiClient<H: Handler> {
    pool: Arc<GenerationPool<H>>,
    config: ClientConfig,
}

impl<H: Handler> ApiClient<H> {
    pub(crate) fn new(pool: Arc<GenerationPool<H>>, config: ClientConfig) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run one operation against the current handler.
    ///
    /// The borrow is held here for the whole of `op`'s future and released
    /// when it completes, fails, or is dropped. `op` only gets a view of the
    /// handler, so it cannot end the borrow early.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(HandlerRef<H>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lease = self.pool.get_or_create_handler().await?;
        let result = op(lease.handle()).await;
        drop(lease);
        result
    }
}

impl ApiClient<reqwest::Client> {
    /// Send a request through the current generation's `reqwest::Client`.
    ///
    /// Request headers are sent as given, then the client's configured
    /// headers are applied on top. The body is read inside the borrow.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = self.config.resolve(&request.path)?;
        let config = &self.config;

        self.call(|handler| async move {
            let mut headers = request.headers;
            for (name, value) in config.headers() {
                headers.insert(name.clone(), value.clone());
            }
            // reqwest only consults the jar when no Cookie header is set.
            let jar = handler.cookie_store().cookies(&url);
            if let Some(cookie) = config.cookie_header(&headers, jar) {
                headers.insert(COOKIE, cookie);
            }

            let mut builder = handler.request(request.method, url).headers(headers);
            if let Some(timeout) = config.timeout() {
                builder = builder.timeout(timeout);
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;

            Ok(ApiResponse {
                status,
                headers,
                body,
                generation: handler.generation(),
            })
        })
        .await
    }

    /// Encode `body` with the client's codec, send it, and decode a
    /// successful response into `R`. Non-2xx responses become `Error::Status`.
    pub async fn invoke<B, R>(&self, method: Method, path: &str, body: Option<&B>) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let codec = self.config.codec();
        let content_type = HeaderValue::from_str(codec.content_type()).map_err(|e| {
            Error::Configuration(format!("codec {} content type: {e}", codec.id()))
        })?;

        let mut request = ApiRequest::new(method, path).header(ACCEPT, content_type.clone());
        if let Some(body) = body {
            let value = serde_json::to_value(body).map_err(|e| CodecError::Encode {
                codec: codec.id().to_string(),
                reason: e.to_string(),
            })?;
            request = request
                .header(CONTENT_TYPE, content_type)
                .body(codec.encode(&value)?);
        }

        let response = self.send(request).await?;
        if !response.status.is_success() {
            return Err(Error::Status {
                status: response.status.as_u16(),
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        let value = codec.decode(&response.body)?;
        serde_json::from_value(value).map_err(|e| {
            Error::Codec(CodecError::Decode {
                codec: codec.id().to_string(),
                reason: e.to_string(),
            })
        })
    }
}
