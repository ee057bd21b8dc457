//! HTTP endpoint probe collector.
//!
//! Measures HTTP/HTTPS endpoint response time and validates the response
//! status and, optionally, the body.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chart::{Chart, ChartSet, ChartType, Dim};
use crate::collector::registry::DEFAULT_PRIORITY;
use crate::collector::{Collector, CollectorError, Context, Samples, decode_config};
use crate::probe::ProbeErrorKind;
use crate::probe::http::{HttpClient, HttpResponse, RequestConfig};

/// Default expected HTTP status code.
const DEFAULT_EXPECTED_STATUS: u16 = 200;

fn default_status_accepted() -> Vec<u16> {
    vec![DEFAULT_EXPECTED_STATUS]
}

/// Configuration for HTTP endpoint probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpCheckConfig {
    #[serde(flatten)]
    pub request: RequestConfig,
    /// Accepted HTTP status codes (default: 200).
    #[serde(default = "default_status_accepted")]
    pub status_accepted: Vec<u16>,
    /// Regex the body must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_match: Option<String>,
}

impl Default for HttpCheckConfig {
    fn default() -> Self {
        Self {
            request: RequestConfig::default(),
            status_accepted: default_status_accepted(),
            response_match: None,
        }
    }
}

impl HttpCheckConfig {
    /// Create a new HTTP probe configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            request: RequestConfig::new(url),
            ..Default::default()
        }
    }

    /// Set the accepted status codes.
    pub fn with_status_accepted(mut self, statuses: Vec<u16>) -> Self {
        self.status_accepted = statuses;
        self
    }

    /// Set the body regex.
    pub fn with_response_match(mut self, pattern: impl Into<String>) -> Self {
        self.response_match = Some(pattern.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request = self.request.with_timeout(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckStatus {
    Success,
    NoConnection,
    Timeout,
    BadContent,
    BadStatus,
}

impl CheckStatus {
    const ALL: [CheckStatus; 5] = [
        Self::Success,
        Self::NoConnection,
        Self::Timeout,
        Self::BadContent,
        Self::BadStatus,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoConnection => "no_connection",
            Self::Timeout => "timeout",
            Self::BadContent => "bad_content",
            Self::BadStatus => "bad_status",
        }
    }
}

fn build_charts(url: &str) -> Result<ChartSet, CollectorError> {
    let mut status = Chart::new(
        "request_status",
        "HTTP Check Status",
        "boolean",
        "status",
        "httpcheck.status",
    )
    .with_priority(DEFAULT_PRIORITY + 2)
    .with_label("url", url);
    for s in CheckStatus::ALL {
        status = status.with_dim(Dim::new(s.as_str()));
    }

    let mut charts = ChartSet::new();
    charts.add_all([
        Chart::new(
            "response_time",
            "HTTP Response Time",
            "ms",
            "response",
            "httpcheck.response_time",
        )
        .with_priority(DEFAULT_PRIORITY)
        .with_label("url", url)
        .with_dim(Dim::new("time").with_div(1000)),
        Chart::new(
            "response_length",
            "HTTP Response Body Length",
            "characters",
            "response",
            "httpcheck.response_length",
        )
        .with_priority(DEFAULT_PRIORITY + 1)
        .with_type(ChartType::Line)
        .with_label("url", url)
        .with_dim(Dim::new("length")),
        status,
    ])?;
    Ok(charts)
}

/// HTTP endpoint probe collector.
#[derive(Debug, Default)]
pub struct HttpCheckCollector {
    config: HttpCheckConfig,
    charts: ChartSet,
    client: Option<HttpClient>,
    response_match: Option<Regex>,
}

impl HttpCheckCollector {
    /// Create a new HTTP collector with the given configuration.
    pub fn new(config: HttpCheckConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Evaluate a response against the accepted statuses and body regex.
    fn evaluate(&self, resp: &HttpResponse) -> CheckStatus {
        if !self.config.status_accepted.contains(&resp.status.as_u16()) {
            return CheckStatus::BadStatus;
        }
        match &self.response_match {
            Some(re) => match resp.text() {
                Ok(body) if re.is_match(body) => CheckStatus::Success,
                _ => CheckStatus::BadContent,
            },
            None => CheckStatus::Success,
        }
    }
}

#[async_trait::async_trait]
impl Collector for HttpCheckCollector {
    fn name(&self) -> &str {
        "httpcheck"
    }

    fn configure(&mut self, config: &serde_json::Value) -> Result<(), CollectorError> {
        self.config = decode_config(config)?;
        Ok(())
    }

    async fn init(&mut self, _ctx: &Context) -> Result<(), CollectorError> {
        if self.config.status_accepted.is_empty() {
            return Err(CollectorError::Config(
                "'status_accepted' must not be empty".to_string(),
            ));
        }
        let response_match = match self.config.response_match.as_deref() {
            Some(pattern) if !pattern.is_empty() => Some(Regex::new(pattern).map_err(|e| {
                CollectorError::Config(format!("invalid response_match '{pattern}': {e}"))
            })?),
            _ => None,
        };
        let client = HttpClient::new(&self.config.request)?;

        self.charts = build_charts(client.url())?;
        self.response_match = response_match;
        self.client = Some(client);
        Ok(())
    }

    async fn collect(&mut self, ctx: &Context) -> Result<Samples, CollectorError> {
        ctx.check()?;
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| CollectorError::Internal("collect called before init".to_string()))?;

        let mut mx = Samples::new();
        let budget = ctx.budget(client.timeout());
        let status = match ctx.run(client.fetch_within(budget)).await? {
            Ok(resp) => {
                let micros = i64::try_from(resp.elapsed.as_micros()).unwrap_or(i64::MAX);
                mx.insert("time".to_string(), micros);
                mx.insert("length".to_string(), resp.body.len() as i64);
                let status = self.evaluate(&resp);
                if status != CheckStatus::Success {
                    tracing::debug!(
                        job = %ctx.job(),
                        url = %client.url(),
                        status = resp.status.as_u16(),
                        check = status.as_str(),
                        "HTTP probe failed conditions"
                    );
                }
                status
            }
            Err(e) => {
                tracing::debug!(job = %ctx.job(), url = %client.url(), error = %e, "HTTP probe failed");
                match e.kind() {
                    ProbeErrorKind::Timeout => CheckStatus::Timeout,
                    ProbeErrorKind::Config => return Err(e.into()),
                    _ => CheckStatus::NoConnection,
                }
            }
        };

        for s in CheckStatus::ALL {
            mx.insert(s.as_str().to_string(), i64::from(status == s));
        }
        Ok(mx)
    }

    fn charts(&self) -> &ChartSet {
        &self.charts
    }

    fn timeout(&self) -> Option<Duration> {
        self.config.request.timeout_duration().ok()
    }

    fn cleanup(&mut self) {
        self.client = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::get;
    use std::io::ErrorKind;
    use tokio::net::TcpListener;

    async fn serve(app: Router) -> Option<String> {
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => return None,
            Err(e) => panic!("Failed to bind test listener: {e}"),
        };
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Some(format!("http://{addr}"))
    }

    fn app() -> Router {
        Router::new()
            .route("/health", get(|| async { "status: ok" }))
            .route(
                "/missing",
                get(|| async { (axum::http::StatusCode::NOT_FOUND, "nope") }),
            )
    }

    #[test]
    fn test_httpcheck_config_defaults() {
        let config: HttpCheckConfig =
            serde_json::from_value(serde_json::json!({"url": "https://api.example.com/health"}))
                .unwrap();

        assert_eq!(config.request.url, "https://api.example.com/health");
        assert_eq!(config.status_accepted, vec![DEFAULT_EXPECTED_STATUS]);
        assert!(config.response_match.is_none());
    }

    #[tokio::test]
    async fn test_init_rejects_empty_url() {
        let mut c = HttpCheckCollector::new(HttpCheckConfig::new(""));
        let err = c.init(&Context::new("httpcheck")).await.unwrap_err();
        assert_eq!(err.to_string(), "url not set");
    }

    #[tokio::test]
    async fn test_init_rejects_bad_regex() {
        let mut c = HttpCheckCollector::new(
            HttpCheckConfig::new("http://127.0.0.1/").with_response_match("(unclosed"),
        );
        assert!(c.init(&Context::new("httpcheck")).await.is_err());
    }

    #[tokio::test]
    async fn test_collect_success() {
        let Some(base) = serve(app()).await else { return };
        let mut c = HttpCheckCollector::new(
            HttpCheckConfig::new(format!("{base}/health")).with_response_match("ok$"),
        );
        let ctx = Context::new("httpcheck");
        c.init(&ctx).await.unwrap();
        assert_eq!(c.charts().len(), 3);

        let mx = c.collect(&ctx).await.unwrap();
        assert_eq!(mx["success"], 1);
        assert_eq!(mx["bad_content"], 0);
        assert_eq!(mx["length"], "status: ok".len() as i64);
        assert!(mx.contains_key("time"));
    }

    #[tokio::test]
    async fn test_collect_bad_content_and_status() {
        let Some(base) = serve(app()).await else { return };
        let ctx = Context::new("httpcheck");

        let mut c = HttpCheckCollector::new(
            HttpCheckConfig::new(format!("{base}/health")).with_response_match("^down"),
        );
        c.init(&ctx).await.unwrap();
        assert_eq!(c.collect(&ctx).await.unwrap()["bad_content"], 1);

        let mut c = HttpCheckCollector::new(HttpCheckConfig::new(format!("{base}/missing")));
        c.init(&ctx).await.unwrap();
        assert_eq!(c.collect(&ctx).await.unwrap()["bad_status"], 1);

        let mut c = HttpCheckCollector::new(
            HttpCheckConfig::new(format!("{base}/missing")).with_status_accepted(vec![200, 404]),
        );
        c.init(&ctx).await.unwrap();
        assert_eq!(c.collect(&ctx).await.unwrap()["success"], 1);
    }

    #[tokio::test]
    async fn test_collect_no_connection() {
        let port = match TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l.local_addr().unwrap().port(),
            Err(_) => return,
        };
        let mut c = HttpCheckCollector::new(
            HttpCheckConfig::new(format!("http://127.0.0.1:{port}/")).with_timeout(Duration::from_secs(1)),
        );
        let ctx = Context::new("httpcheck");
        c.init(&ctx).await.unwrap();

        let mx = c.collect(&ctx).await.unwrap();
        assert_eq!(mx["no_connection"] + mx["timeout"], 1);
        assert!(!mx.contains_key("time"));
    }
}
