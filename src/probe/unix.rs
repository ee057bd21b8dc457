//! HTTP/1.1 over a local unix socket.
//!
//! Two URL forms are accepted:
//!
//! - `http+unix://%2Fvar%2Frun%2Fapp.sock/status`: the host is the
//!   percent-encoded socket path
//! - `unix:///var/run/app.sock/status`: the socket path ends at the first
//!   segment ending in `.sock`, the rest is the HTTP path

use std::path::PathBuf;

use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response, header};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use tokio::net::UnixStream;
use url::Url;

use super::{ProbeError, ProbeResult};

/// Socket path plus the HTTP request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UnixTarget {
    pub socket: PathBuf,
    pub path_and_query: String,
}

/// Whether the URL scheme selects the unix transport.
pub(crate) fn is_unix_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "unix" | "http+unix")
}

pub(crate) fn parse_target(url: &Url) -> ProbeResult<UnixTarget> {
    let query = url.query().map(|q| format!("?{q}")).unwrap_or_default();

    match url.scheme() {
        "http+unix" => {
            let host = url
                .host_str()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| ProbeError::config(format!("no socket path in '{url}'")))?;
            let path = if url.path().is_empty() { "/" } else { url.path() };
            Ok(UnixTarget {
                socket: PathBuf::from(percent_decode_str(host).decode_utf8_lossy().into_owned()),
                path_and_query: format!("{path}{query}"),
            })
        }
        "unix" => {
            let full = url.path();
            if full.is_empty() || full == "/" {
                return Err(ProbeError::config(format!("no socket path in '{url}'")));
            }
            let (socket, rest) = split_socket_path(full);
            Ok(UnixTarget {
                socket: PathBuf::from(socket),
                path_and_query: format!("{rest}{query}"),
            })
        }
        other => Err(ProbeError::config(format!(
            "scheme '{other}' is not a unix socket scheme"
        ))),
    }
}

fn split_socket_path(full: &str) -> (&str, &str) {
    let mut offset = 0;
    for segment in full.split('/') {
        offset += segment.len();
        if segment.ends_with(".sock") {
            let rest = &full[offset..];
            return (&full[..offset], if rest.is_empty() { "/" } else { rest });
        }
        offset += 1;
    }
    (full, "/")
}

/// Send one request over a fresh connection.
pub(crate) async fn send(
    target: &UnixTarget,
    method: Method,
    headers: &HeaderMap,
    body: Option<Bytes>,
) -> ProbeResult<Response<Incoming>> {
    let stream = UnixStream::connect(&target.socket).await.map_err(|e| {
        ProbeError::network(format!(
            "failed to connect to '{}'",
            target.socket.display()
        ))
        .with_source(e)
    })?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| ProbeError::network("http handshake failed").with_source(e))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(error = %e, "unix socket connection closed with error");
        }
    });

    let mut request = Request::builder()
        .method(method)
        .uri(target.path_and_query.as_str())
        .body(Full::new(body.unwrap_or_default()))
        .map_err(|e| ProbeError::config("invalid request").with_source(e))?;

    *request.headers_mut() = headers.clone();
    request
        .headers_mut()
        .entry(header::HOST)
        .or_insert(header::HeaderValue::from_static("localhost"));

    sender
        .send_request(request)
        .await
        .map_err(|e| ProbeError::network("request failed").with_source(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_unix_target() {
        let url = Url::parse("http+unix://%2Fvar%2Frun%2Fdocker.sock/v1/info?all=1").unwrap();
        let target = parse_target(&url).unwrap();
        assert_eq!(target.socket, PathBuf::from("/var/run/docker.sock"));
        assert_eq!(target.path_and_query, "/v1/info?all=1");
    }

    #[test]
    fn test_unix_target_splits_after_sock() {
        let url = Url::parse("unix:///run/php/php-fpm.sock/status").unwrap();
        let target = parse_target(&url).unwrap();
        assert_eq!(target.socket, PathBuf::from("/run/php/php-fpm.sock"));
        assert_eq!(target.path_and_query, "/status");
    }

    #[test]
    fn test_unix_target_without_http_path() {
        let url = Url::parse("unix:///tmp/app.sock").unwrap();
        let target = parse_target(&url).unwrap();
        assert_eq!(target.socket, PathBuf::from("/tmp/app.sock"));
        assert_eq!(target.path_and_query, "/");
    }

    #[test]
    fn test_unix_target_missing_socket() {
        let url = Url::parse("unix:///").unwrap();
        assert!(parse_target(&url).is_err());
    }

    #[test]
    fn test_http_unix_target_fully_escaped_host() {
        let url = Url::parse("http+unix://%2Frun%2Fapp%2Esock/").unwrap();
        let target = parse_target(&url).unwrap();
        assert_eq!(target.socket, PathBuf::from("/run/app.sock"));
        assert_eq!(target.path_and_query, "/");
    }
}
