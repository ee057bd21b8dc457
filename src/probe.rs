//! Probe Clients
//!
//! Shared transports collectors use to reach their data sources. Every
//! operation returns a [`ProbeResult`]; failures carry a [`ProbeErrorKind`]
//! so the calling collector can decide whether a failure becomes a metric
//! increment or a collection error.
//!
//! # Components
//!
//! - [`http`]: HTTP client over TCP/TLS or a local unix socket
//! - [`tls`]: TLS settings shared by HTTP-based collectors
//! - [`dns`]: single-query DNS client over UDP or TCP
//! - [`procfs`]: line-oriented readers for `/proc`-style files

mod error;
pub mod dns;
pub mod http;
pub mod procfs;
pub mod tls;
mod unix;

pub use error::{ProbeError, ProbeErrorKind, ProbeResult};

use serde::{Deserialize, Deserializer};

/// Deserialize seconds from a number or a humantime string.
pub(crate) fn de_seconds<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<f64>() {
                return Ok(n);
            }
            humantime::parse_duration(s)
                .map(|d| d.as_secs_f64())
                .map_err(serde::de::Error::custom)
        }
    }
}
