//! TLS client settings.

use std::path::PathBuf;

use reqwest::tls::Version;
use serde::{Deserialize, Serialize};

use super::{ProbeError, ProbeResult};

/// TLS options shared by HTTP-based collectors.
///
/// An empty `tls_ca` means the built-in root store. `tls_cert` and
/// `tls_key` must be supplied together or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM file with additional trusted roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca: Option<PathBuf>,
    /// PEM client certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_cert: Option<PathBuf>,
    /// PEM client private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_key: Option<PathBuf>,
    /// Skip server certificate verification.
    #[serde(default)]
    pub tls_skip_verify: bool,
    /// Lowest accepted protocol version ("1.2" or "1.3").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_min_version: Option<String>,
    /// Highest accepted protocol version ("1.2" or "1.3").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_max_version: Option<String>,
}

impl TlsConfig {
    /// Check option consistency without touching the filesystem.
    pub fn validate(&self) -> ProbeResult<()> {
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ProbeError::config(
                "tls_cert and tls_key must be set together",
            ));
        }

        let min = self.min_version()?;
        let max = self.max_version()?;
        if let (Some(min), Some(max)) = (min, max) {
            if rank(min) > rank(max) {
                return Err(ProbeError::config(format!(
                    "tls_min_version '{}' is higher than tls_max_version '{}'",
                    self.tls_min_version.as_deref().unwrap_or_default(),
                    self.tls_max_version.as_deref().unwrap_or_default(),
                )));
            }
        }
        Ok(())
    }

    fn min_version(&self) -> ProbeResult<Option<Version>> {
        self.tls_min_version.as_deref().map(parse_version).transpose()
    }

    fn max_version(&self) -> ProbeResult<Option<Version>> {
        self.tls_max_version.as_deref().map(parse_version).transpose()
    }

    /// Apply these settings to a reqwest client builder.
    ///
    /// Reads the CA, certificate and key files.
    pub fn apply(&self, mut builder: reqwest::ClientBuilder) -> ProbeResult<reqwest::ClientBuilder> {
        self.validate()?;

        if let Some(ca) = &self.tls_ca {
            let pem = read_pem(ca)?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                ProbeError::config(format!("invalid tls_ca '{}': {e}", ca.display()))
            })?;
            builder = builder.add_root_certificate(cert);
        }

        if let (Some(cert), Some(key)) = (&self.tls_cert, &self.tls_key) {
            let mut pem = read_pem(cert)?;
            pem.push(b'\n');
            pem.extend(read_pem(key)?);
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                ProbeError::config(format!(
                    "invalid client certificate '{}': {e}",
                    cert.display()
                ))
            })?;
            builder = builder.identity(identity);
        }

        if self.tls_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(min) = self.min_version()? {
            builder = builder.min_tls_version(min);
        }
        if let Some(max) = self.max_version()? {
            builder = builder.max_tls_version(max);
        }
        Ok(builder)
    }
}

fn parse_version(s: &str) -> ProbeResult<Version> {
    match s.trim() {
        "1.2" | "TLS1.2" | "tls1.2" => Ok(Version::TLS_1_2),
        "1.3" | "TLS1.3" | "tls1.3" => Ok(Version::TLS_1_3),
        other => Err(ProbeError::config(format!(
            "unsupported tls version '{other}' (expected 1.2 or 1.3)"
        ))),
    }
}

fn rank(v: Version) -> u8 {
    if v == Version::TLS_1_3 { 3 } else { 2 }
}

fn read_pem(path: &PathBuf) -> ProbeResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        ProbeError::config(format!("failed to read '{}'", path.display())).with_source(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(TlsConfig::default().validate().is_ok());
    }

    #[test]
    fn test_cert_without_key() {
        let cfg = TlsConfig {
            tls_cert: Some(PathBuf::from("/tmp/client.pem")),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.kind(), crate::probe::ProbeErrorKind::Config);
        assert!(err.to_string().contains("together"));
    }

    #[test]
    fn test_version_bounds() {
        let cfg = TlsConfig {
            tls_min_version: Some("1.3".to_string()),
            tls_max_version: Some("1.2".to_string()),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = TlsConfig {
            tls_min_version: Some("1.2".to_string()),
            tls_max_version: Some("1.3".to_string()),
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_unknown_version() {
        let cfg = TlsConfig {
            tls_min_version: Some("1.0".to_string()),
            ..Default::default()
        };
        assert!(cfg.validate().unwrap_err().to_string().contains("1.0"));
    }

    #[test]
    fn test_missing_ca_file() {
        let cfg = TlsConfig {
            tls_ca: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..Default::default()
        };
        let err = cfg.apply(reqwest::Client::builder()).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ca.pem"));
    }
}
