//! Single-query DNS client.
//!
//! Each call sends one question over UDP or TCP and classifies the
//! answer as `success`, `network_error` or `dns_error`.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RecordType};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::Instant;

use super::{ProbeError, ProbeResult};

/// Default DNS port.
pub const DNS_PORT: u16 = 53;

const MAX_UDP_PAYLOAD: usize = 4096;

/// Transport used for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsNetwork {
    #[default]
    Udp,
    Tcp,
}

impl DnsNetwork {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        }
    }
}

impl FromStr for DnsNetwork {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" | "" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            other => Err(ProbeError::config(format!(
                "unsupported dns network '{other}' (expected udp or tcp)"
            ))),
        }
    }
}

/// Outcome class of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnsOutcome {
    Success,
    NetworkError,
    DnsError,
}

impl DnsOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NetworkError => "network_error",
            Self::DnsError => "dns_error",
        }
    }

    pub const ALL: [DnsOutcome; 3] = [Self::Success, Self::NetworkError, Self::DnsError];
}

/// Result of one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQueryResult {
    pub outcome: DnsOutcome,
    /// Round-trip time; only meaningful on success.
    pub rtt: Duration,
    /// Failure description for logging.
    pub error: Option<String>,
}

impl DnsQueryResult {
    pub fn rtt_nanos(&self) -> i64 {
        i64::try_from(self.rtt.as_nanos()).unwrap_or(i64::MAX)
    }
}

/// Parse a record type such as `A`, `AAAA` or `MX`.
pub fn parse_record_type(s: &str) -> ProbeResult<RecordType> {
    let upper = s.trim().to_ascii_uppercase();
    match RecordType::from_str(&upper) {
        Ok(RecordType::Unknown(_)) | Err(_) => Err(ProbeError::config(format!(
            "unsupported record type '{s}'"
        ))),
        Ok(rtype) => Ok(rtype),
    }
}

/// Parse a domain into a fully qualified name.
pub fn parse_domain(s: &str) -> ProbeResult<Name> {
    let mut name = Name::from_ascii(s.trim())
        .map_err(|e| ProbeError::config(format!("invalid domain '{s}'")).with_source(e))?;
    name.set_fqdn(true);
    Ok(name)
}

/// Resolve `server` to a socket address, defaulting the port to 53.
///
/// Accepts `1.1.1.1`, `1.1.1.1:5353`, `2001:db8::1`, `[2001:db8::1]:53`
/// and host names.
pub async fn resolve_server(server: &str) -> ProbeResult<SocketAddr> {
    let server = server.trim();
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = server.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DNS_PORT));
    }

    let target = if server.contains(':') {
        server.to_string()
    } else {
        format!("{server}:{DNS_PORT}")
    };
    tokio::net::lookup_host(&target)
        .await
        .map_err(|e| ProbeError::network(format!("failed to resolve '{server}'")).with_source(e))?
        .next()
        .ok_or_else(|| ProbeError::network(format!("no address for '{server}'")))
}

static NEXT_ID: AtomicU16 = AtomicU16::new(0);

fn next_id() -> u16 {
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u16)
        .unwrap_or_default();
    NEXT_ID.fetch_add(1, Ordering::Relaxed).wrapping_add(seed)
}

/// DNS client with a fixed transport and per-query timeout.
#[derive(Debug, Clone)]
pub struct DnsClient {
    network: DnsNetwork,
    timeout: Duration,
}

impl DnsClient {
    pub fn new(network: DnsNetwork, timeout: Duration) -> Self {
        Self { network, timeout }
    }

    pub fn network(&self) -> DnsNetwork {
        self.network
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one question to `server` and classify the answer.
    pub async fn query(&self, server: &str, name: &Name, rtype: RecordType) -> DnsQueryResult {
        self.query_within(server, name, rtype, self.timeout).await
    }

    /// Like [`query`](Self::query), bounded by `budget` when that is
    /// shorter than the client timeout.
    pub async fn query_within(
        &self,
        server: &str,
        name: &Name,
        rtype: RecordType,
        budget: Duration,
    ) -> DnsQueryResult {
        let start = Instant::now();
        let deadline = start + budget.min(self.timeout);

        let result = tokio::time::timeout_at(deadline, self.exchange(server, name, rtype)).await;
        let rtt = start.elapsed();

        match result {
            Ok(Ok(code)) if code == ResponseCode::NoError => DnsQueryResult {
                outcome: DnsOutcome::Success,
                rtt,
                error: None,
            },
            Ok(Ok(code)) => DnsQueryResult {
                outcome: DnsOutcome::DnsError,
                rtt,
                error: Some(format!("server answered {code}")),
            },
            Ok(Err(e)) => DnsQueryResult {
                outcome: DnsOutcome::NetworkError,
                rtt,
                error: Some(e.to_string()),
            },
            Err(_) => DnsQueryResult {
                outcome: DnsOutcome::NetworkError,
                rtt,
                error: Some(format!("query to '{server}' timed out")),
            },
        }
    }

    async fn exchange(&self, server: &str, name: &Name, rtype: RecordType) -> ProbeResult<ResponseCode> {
        let addr = resolve_server(server).await?;
        let id = next_id();
        let request = build_query(id, name, rtype)?;

        let response = match self.network {
            DnsNetwork::Udp => exchange_udp(addr, id, &request).await?,
            DnsNetwork::Tcp => exchange_tcp(addr, &request).await?,
        };

        let message = Message::from_vec(&response)
            .map_err(|e| ProbeError::protocol("malformed dns response").with_source(e))?;
        if message.id() != id {
            return Err(ProbeError::protocol("dns response id mismatch"));
        }
        Ok(message.response_code())
    }
}

fn build_query(id: u16, name: &Name, rtype: RecordType) -> ProbeResult<Vec<u8>> {
    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    message.add_query(Query::query(name.clone(), rtype));
    message
        .to_vec()
        .map_err(|e| ProbeError::config("failed to encode dns query").with_source(e))
}

async fn exchange_udp(addr: SocketAddr, id: u16, request: &[u8]) -> ProbeResult<Vec<u8>> {
    let bind: SocketAddr = if addr.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(bind).await.map_err(network("bind udp socket"))?;
    socket.connect(addr).await.map_err(network("connect"))?;
    socket.send(request).await.map_err(network("send query"))?;

    let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
    loop {
        let n = socket.recv(&mut buf).await.map_err(network("receive answer"))?;
        // stray datagrams for other ids are skipped until the deadline
        if n >= 2 && u16::from_be_bytes([buf[0], buf[1]]) == id {
            buf.truncate(n);
            return Ok(buf);
        }
    }
}

async fn exchange_tcp(addr: SocketAddr, request: &[u8]) -> ProbeResult<Vec<u8>> {
    let mut stream = TcpStream::connect(addr).await.map_err(network("connect"))?;
    let len = u16::try_from(request.len())
        .map_err(|_| ProbeError::config("dns query too large"))?;

    let mut framed = Vec::with_capacity(request.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(request);
    stream.write_all(&framed).await.map_err(network("send query"))?;

    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await.map_err(network("read answer length"))?;
    let mut buf = vec![0u8; u16::from_be_bytes(len_buf) as usize];
    stream.read_exact(&mut buf).await.map_err(network("read answer"))?;
    Ok(buf)
}

fn network(action: &'static str) -> impl Fn(std::io::Error) -> ProbeError {
    move |e| ProbeError::network(format!("failed to {action}")).with_source(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    async fn spawn_server(rcode: ResponseCode) -> Option<String> {
        let socket = match UdpSocket::bind("127.0.0.1:0").await {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => return None,
            Err(e) => panic!("Failed to bind test socket: {e}"),
        };
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            loop {
                let Ok((n, peer)) = socket.recv_from(&mut buf).await else { return };
                let request = Message::from_vec(&buf[..n]).unwrap();
                let mut response = Message::new();
                response
                    .set_id(request.id())
                    .set_message_type(MessageType::Response)
                    .set_op_code(OpCode::Query)
                    .set_response_code(rcode);
                for q in request.queries() {
                    response.add_query(q.clone());
                }
                let _ = socket.send_to(&response.to_vec().unwrap(), peer).await;
            }
        });
        Some(addr.to_string())
    }

    #[test]
    fn test_parse_record_type() {
        assert_eq!(parse_record_type("a").unwrap(), RecordType::A);
        assert_eq!(parse_record_type("AAAA").unwrap(), RecordType::AAAA);
        assert!(parse_record_type("BOGUS").is_err());
    }

    #[test]
    fn test_parse_network() {
        assert_eq!("TCP".parse::<DnsNetwork>().unwrap(), DnsNetwork::Tcp);
        assert_eq!("udp".parse::<DnsNetwork>().unwrap(), DnsNetwork::Udp);
        assert!("sctp".parse::<DnsNetwork>().is_err());
    }

    #[tokio::test]
    async fn test_resolve_server_forms() {
        assert_eq!(
            resolve_server("8.8.8.8").await.unwrap(),
            "8.8.8.8:53".parse().unwrap()
        );
        assert_eq!(
            resolve_server("1.1.1.1:5353").await.unwrap(),
            "1.1.1.1:5353".parse().unwrap()
        );
        assert_eq!(
            resolve_server("2001:db8::1").await.unwrap(),
            "[2001:db8::1]:53".parse().unwrap()
        );
    }

    #[tokio::test]
    async fn test_query_success() {
        let Some(server) = spawn_server(ResponseCode::NoError).await else { return };
        let client = DnsClient::new(DnsNetwork::Udp, Duration::from_secs(2));
        let name = parse_domain("example.com").unwrap();

        let result = client.query(&server, &name, RecordType::A).await;
        assert_eq!(result.outcome, DnsOutcome::Success, "{:?}", result.error);
        assert!(result.rtt_nanos() > 0);
    }

    #[tokio::test]
    async fn test_query_dns_error() {
        let Some(server) = spawn_server(ResponseCode::NXDomain).await else { return };
        let client = DnsClient::new(DnsNetwork::Udp, Duration::from_secs(2));
        let name = parse_domain("missing.example.com").unwrap();

        let result = client.query(&server, &name, RecordType::A).await;
        assert_eq!(result.outcome, DnsOutcome::DnsError);
    }

    #[tokio::test]
    async fn test_query_timeout_is_network_error() {
        // bound but silent
        let socket = match UdpSocket::bind("127.0.0.1:0").await {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => return,
            Err(e) => panic!("Failed to bind test socket: {e}"),
        };
        let server = socket.local_addr().unwrap().to_string();
        let client = DnsClient::new(DnsNetwork::Udp, Duration::from_millis(200));
        let name = parse_domain("example.com").unwrap();

        let result = client.query(&server, &name, RecordType::A).await;
        assert_eq!(result.outcome, DnsOutcome::NetworkError);
        assert!(result.error.unwrap().contains("timed out"));
        drop(socket);
    }
}
