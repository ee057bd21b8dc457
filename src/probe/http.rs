//! HTTP probe client.
//!
//! [`RequestConfig`] is the option bag HTTP-based collectors flatten into
//! their own config. [`HttpClient`] is built from it once at init and then
//! reused every tick. The timeout covers the whole request, body included.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use data_encoding::BASE64;
use futures::{Stream, StreamExt};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use url::Url;

use super::tls::TlsConfig;
use super::unix::{self, UnixTarget};
use super::{ProbeError, ProbeResult, de_seconds};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: f64 = 1.0;

/// Maximum number of redirects followed.
pub const MAX_REDIRECTS: usize = 10;

/// Default `User-Agent` value.
pub const USER_AGENT: &str = concat!("chartd/", env!("CARGO_PKG_VERSION"));

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

/// HTTP method for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Head,
    Put,
    Delete,
    Options,
    Patch,
}

impl HttpMethod {
    pub fn as_method(&self) -> Method {
        match self {
            Self::Get => Method::GET,
            Self::Post => Method::POST,
            Self::Head => Method::HEAD,
            Self::Put => Method::PUT,
            Self::Delete => Method::DELETE,
            Self::Options => Method::OPTIONS,
            Self::Patch => Method::PATCH,
        }
    }
}

/// A header given as one value or a list of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValues {
    One(String),
    Many(Vec<String>),
}

impl HeaderValues {
    fn iter(&self) -> impl Iterator<Item = &str> {
        let values: Vec<&str> = match self {
            Self::One(v) => vec![v.as_str()],
            Self::Many(vs) => vs.iter().map(String::as_str).collect(),
        };
        values.into_iter()
    }
}

/// Request authentication derived from the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    None,
    Basic { username: String, password: String },
    Bearer(String),
}

impl Auth {
    /// `Authorization` header value, if any.
    pub fn header_value(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Basic { username, password } => Some(format!(
                "Basic {}",
                BASE64.encode(format!("{username}:{password}").as_bytes())
            )),
            Self::Bearer(token) => Some(format!("Bearer {token}")),
        }
    }
}

/// Options for one HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Target URL: `http`, `https`, `unix` or `http+unix`.
    #[serde(default)]
    pub url: String,
    /// Whole-request timeout in seconds. Accepts a number or a duration string.
    #[serde(default = "default_timeout", deserialize_with = "de_seconds")]
    pub timeout: f64,
    /// Extra request headers. Names are case-insensitive.
    #[serde(default)]
    pub headers: BTreeMap<String, HeaderValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_password: Option<String>,
    #[serde(flatten)]
    pub tls: TlsConfig,
    /// Accept gzip-compressed responses.
    #[serde(default = "default_true")]
    pub compression: bool,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Follow up to [`MAX_REDIRECTS`] redirects.
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
            headers: BTreeMap::new(),
            username: None,
            password: None,
            bearer_token: None,
            proxy_url: None,
            proxy_username: None,
            proxy_password: None,
            tls: TlsConfig::default(),
            compression: true,
            method: HttpMethod::Get,
            body: None,
            follow_redirects: true,
        }
    }
}

impl RequestConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.as_secs_f64();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into(), HeaderValues::One(value.into()));
        self
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Validate the config.
    ///
    /// # Errors
    /// Config errors for a blank URL (`"url not set"`), a non-positive
    /// timeout, and inconsistent TLS settings.
    pub fn validate(&self) -> ProbeResult<()> {
        if self.url.trim().is_empty() {
            return Err(ProbeError::config("url not set"));
        }
        self.timeout_duration()?;
        self.tls.validate()
    }

    /// Timeout as a [`Duration`], rejecting values `<= 0`.
    pub fn timeout_duration(&self) -> ProbeResult<Duration> {
        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err(ProbeError::config(format!(
                "timeout must be positive, got {}",
                self.timeout
            )));
        }
        Ok(Duration::from_secs_f64(self.timeout))
    }

    /// Authentication scheme. A bearer token wins over basic credentials.
    pub fn auth(&self) -> Auth {
        if let Some(token) = self.bearer_token.as_ref().filter(|t| !t.is_empty()) {
            return Auth::Bearer(token.clone());
        }
        match &self.username {
            Some(username) if !username.is_empty() => Auth::Basic {
                username: username.clone(),
                password: self.password.clone().unwrap_or_default(),
            },
            _ => Auth::None,
        }
    }

    fn header_map(&self) -> ProbeResult<HeaderMap> {
        let mut map = HeaderMap::new();
        map.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        if let Some(value) = self.auth().header_value() {
            map.insert(header::AUTHORIZATION, header_value(&value)?);
        }

        let mut user = HeaderMap::new();
        for (name, values) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProbeError::config(format!("invalid header name '{name}'")).with_source(e))?;
            for value in values.iter() {
                user.append(name.clone(), header_value(value)?);
            }
        }
        // user headers replace defaults of the same name
        for name in user.keys() {
            map.remove(name);
        }
        map.extend(user);
        Ok(map)
    }
}

fn header_value(value: &str) -> ProbeResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ProbeError::config("invalid header value").with_source(e))
}

/// API flavour selected by the URL path suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `/json/v1`
    JsonV1,
    /// `/xml/v3`
    XmlV3,
}

impl Dialect {
    /// Pick the dialect from the URL path suffix.
    ///
    /// # Errors
    /// A config error naming the URL when the suffix is unknown.
    pub fn from_url(url: &str) -> ProbeResult<Self> {
        let path = match Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => url.to_string(),
        };
        let path = path.trim_end_matches('/');
        if path.ends_with("/json/v1") {
            Ok(Self::JsonV1)
        } else if path.ends_with("/xml/v3") {
            Ok(Self::XmlV3)
        } else {
            Err(ProbeError::config(format!(
                "URL {url} is wrong, supported endpoints: [/xml/v3, /json/v1]"
            )))
        }
    }
}

/// Fully buffered response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub elapsed: Duration,
}

impl HttpResponse {
    /// Fail with a protocol error unless the status is 2xx.
    pub fn ensure_success(self) -> ProbeResult<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ProbeError::protocol(format!(
                "'{}' returned HTTP status code {}",
                self.url,
                self.status.as_u16()
            )))
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> ProbeResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ProbeError::protocol(format!("failed to decode json from '{}'", self.url)).with_source(e)
        })
    }

    pub fn text(&self) -> ProbeResult<&str> {
        std::str::from_utf8(&self.body).map_err(|e| {
            ProbeError::protocol(format!("non-utf8 body from '{}'", self.url)).with_source(e)
        })
    }
}

/// Streamed response body. Items past the request deadline yield a timeout.
pub type BodyStream = Pin<Box<dyn Stream<Item = ProbeResult<Bytes>> + Send>>;

/// Response whose body has not been read yet.
pub struct StreamingResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
enum Transport {
    Tcp(reqwest::Client),
    Unix,
}

/// HTTP client bound to one [`RequestConfig`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    transport: Transport,
    url: String,
    method: Method,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Duration,
}

impl HttpClient {
    /// Validate the config and build the client.
    pub fn new(config: &RequestConfig) -> ProbeResult<Self> {
        config.validate()?;
        let timeout = config.timeout_duration()?;
        let url = parse_url(&config.url)?;

        let transport = match url.scheme() {
            "http" | "https" => Transport::Tcp(build_reqwest(config, timeout)?),
            _ if unix::is_unix_scheme(&url) => {
                unix::parse_target(&url)?;
                Transport::Unix
            }
            other => {
                return Err(ProbeError::config(format!(
                    "unsupported url scheme '{other}' in '{}'",
                    config.url
                )));
            }
        };

        Ok(Self {
            transport,
            url: config.url.clone(),
            method: config.method.as_method(),
            headers: config.header_map()?,
            body: config.body.clone().map(Bytes::from),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Request the configured URL and buffer the body.
    pub async fn fetch(&self) -> ProbeResult<HttpResponse> {
        self.fetch_url(&self.url).await
    }

    /// Like [`fetch`](Self::fetch), but the request must finish within
    /// `budget` when that is shorter than the configured timeout.
    pub async fn fetch_within(&self, budget: Duration) -> ProbeResult<HttpResponse> {
        self.fetch_url_within(&self.url, budget).await
    }

    /// Request another URL with the same settings and buffer the body.
    pub async fn fetch_url(&self, url: &str) -> ProbeResult<HttpResponse> {
        self.fetch_url_within(url, self.timeout).await
    }

    async fn fetch_url_within(&self, url: &str, budget: Duration) -> ProbeResult<HttpResponse> {
        let start = Instant::now();
        let deadline = start + budget.min(self.timeout);
        let resp = self.send(url, deadline).await?;
        let status = resp.status;
        let headers = resp.headers;
        let mut body = resp.body;

        let mut buf = Vec::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }

        Ok(HttpResponse {
            url: url.to_string(),
            status,
            headers,
            body: Bytes::from(buf),
            elapsed: start.elapsed(),
        })
    }

    /// Request the configured URL and hand back the body as a stream.
    pub async fn stream(&self) -> ProbeResult<StreamingResponse> {
        let deadline = Instant::now() + self.timeout;
        self.send(&self.url, deadline).await
    }

    async fn send(&self, url: &str, deadline: Instant) -> ProbeResult<StreamingResponse> {
        let fut = async {
            match &self.transport {
                Transport::Tcp(client) => self.send_tcp(client, url).await,
                Transport::Unix => self.send_unix(url).await,
            }
        };
        let resp = tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| ProbeError::timeout(format!("request to '{url}' timed out")))??;

        Ok(StreamingResponse {
            status: resp.status,
            headers: resp.headers,
            body: with_deadline(resp.body, deadline, url.to_string()),
        })
    }

    async fn send_tcp(&self, client: &reqwest::Client, url: &str) -> ProbeResult<StreamingResponse> {
        let mut request = client
            .request(self.method.clone(), url)
            .headers(self.headers.clone());
        if let Some(body) = &self.body {
            request = request.body(body.clone());
        }

        let resp = request.send().await.map_err(|e| classify(e, url))?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let owned_url = url.to_string();
        let body = resp
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| classify(e, &owned_url)));

        Ok(StreamingResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }

    async fn send_unix(&self, url: &str) -> ProbeResult<StreamingResponse> {
        let target: UnixTarget = unix::parse_target(&parse_url(url)?)?;
        let resp = unix::send(&target, self.method.clone(), &self.headers, self.body.clone()).await?;
        let (parts, incoming) = resp.into_parts();
        let body = incoming.into_data_stream().map(|chunk| {
            chunk.map_err(|e| ProbeError::network("failed to read response body").with_source(e))
        });

        Ok(StreamingResponse {
            status: parts.status,
            headers: parts.headers,
            body: Box::pin(body),
        })
    }
}

fn parse_url(raw: &str) -> ProbeResult<Url> {
    Url::parse(raw.trim())
        .map_err(|e| ProbeError::config(format!("invalid url '{raw}'")).with_source(e))
}

fn build_reqwest(config: &RequestConfig, timeout: Duration) -> ProbeResult<reqwest::Client> {
    let redirect = if config.follow_redirects {
        reqwest::redirect::Policy::limited(MAX_REDIRECTS)
    } else {
        reqwest::redirect::Policy::none()
    };

    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(redirect)
        .gzip(config.compression);

    if let Some(proxy_url) = config.proxy_url.as_deref().filter(|u| !u.is_empty()) {
        let mut proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
            ProbeError::config(format!("invalid proxy_url '{proxy_url}'")).with_source(e)
        })?;
        if let Some(user) = config.proxy_username.as_deref().filter(|u| !u.is_empty()) {
            proxy = proxy.basic_auth(user, config.proxy_password.as_deref().unwrap_or_default());
        }
        builder = builder.proxy(proxy);
    }

    builder = config.tls.apply(builder)?;
    builder
        .build()
        .map_err(|e| ProbeError::config("failed to build http client").with_source(e))
}

fn classify(e: reqwest::Error, url: &str) -> ProbeError {
    let err = if e.is_timeout() {
        ProbeError::timeout(format!("request to '{url}' timed out"))
    } else if e.is_redirect() {
        ProbeError::network(format!("too many redirects requesting '{url}'"))
    } else if e.is_connect() {
        ProbeError::network(format!("failed to connect to '{url}'"))
    } else if e.is_decode() || e.is_body() {
        ProbeError::protocol(format!("failed to read response from '{url}'"))
    } else if e.is_builder() {
        ProbeError::config(format!("invalid request for '{url}'"))
    } else {
        ProbeError::network(format!("request to '{url}' failed"))
    };
    err.with_source(e)
}

fn with_deadline(inner: BodyStream, deadline: Instant, url: String) -> BodyStream {
    Box::pin(futures::stream::unfold(Some(inner), move |state| {
        let url = url.clone();
        async move {
            let mut inner = state?;
            match tokio::time::timeout_at(deadline, inner.next()).await {
                Ok(Some(item)) => Some((item, Some(inner))),
                Ok(None) => None,
                Err(_) => Some((
                    Err(ProbeError::timeout(format!("reading body from '{url}' timed out"))),
                    None,
                )),
            }
        }
    }))
}
