//! Network probes against a single blockchain node
//!
//! Two checks are performed against every target:
//!
//! - **Port probe**: a plain TCP connect to `address:port`, no handshake
//! - **Chain status**: `GET /status` on the node's RPC port, reading
//!   `result.sync_info.latest_block_height`
//!
//! Both are bounded by the same per-probe timeout so a hung target cannot
//! stall the pass.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{ProbeError, Result};

/// `/status` response of a Tendermint/CometBFT node
#[derive(Debug, Deserialize)]
struct NodeStatusResponse {
    result: NodeStatusResult,
}

#[derive(Debug, Deserialize)]
struct NodeStatusResult {
    sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
struct SyncInfo {
    /// Decimal string, e.g. `"1002"`
    latest_block_height: String,
}

/// Chain progress reported by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStatus {
    pub latest_block_height: u64,
}

/// Probes a single target
///
/// The evaluator only talks to this trait, which keeps it testable without
/// real nodes.
#[async_trait]
pub trait TargetProber: Send + Sync {
    /// Succeeds if a TCP connection to `address:port` can be opened
    async fn probe_port(&self, address: &str, port: i32) -> Result<(), ProbeError>;

    /// Fetch and parse the node's sync status
    async fn probe_chain_status(&self, address: &str) -> Result<ChainStatus, ProbeError>;
}

/// [`TargetProber`] doing real TCP and HTTP calls
pub struct NetProber {
    client: reqwest::Client,
    timeout: Duration,
    status_port: u16,
}

impl NetProber {
    pub fn new(timeout: Duration, status_port: u16) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("endpoint-controller/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            timeout,
            status_port,
        })
    }

    fn status_url(&self, address: &str) -> String {
        format!("http://{}/status", join_host_port(address, self.status_port))
    }
}

#[async_trait]
impl TargetProber for NetProber {
    async fn probe_port(&self, address: &str, port: i32) -> Result<(), ProbeError> {
        let unreachable = |reason: String| ProbeError::Unreachable {
            address: address.to_string(),
            port,
            reason,
        };

        let port_u16 =
            u16::try_from(port).map_err(|_| unreachable(format!("invalid port {}", port)))?;

        debug!("Checking node {} port {}", address, port);

        match tokio::time::timeout(self.timeout, TcpStream::connect((address, port_u16))).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(unreachable(e.to_string())),
            Err(_) => Err(ProbeError::Timeout(join_host_port(address, port_u16))),
        }
    }

    async fn probe_chain_status(&self, address: &str) -> Result<ChainStatus, ProbeError> {
        let url = self.status_url(address);
        debug!("Querying node status endpoint: {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(url.clone())
            } else {
                ProbeError::Http(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(ProbeError::BadStatus(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        let height = parse_block_height(&body)?;

        debug!("Node {} is at block {}", address, height);
        Ok(ChainStatus {
            latest_block_height: height,
        })
    }
}

/// Extract the latest block height from a `/status` body
pub fn parse_block_height(body: &[u8]) -> Result<u64, ProbeError> {
    let status: NodeStatusResponse =
        serde_json::from_slice(body).map_err(|e| ProbeError::Malformed(e.to_string()))?;

    let raw = status.result.sync_info.latest_block_height;
    let parsed = raw.trim().parse::<u64>();
    parsed.map_err(|_| ProbeError::InvalidHeight(raw))
}

/// `host:port`, with IPv6 literals in brackets
fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_STATUS_PORT;
    use tokio::net::{TcpListener, TcpSocket};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn status_body(height: &str) -> serde_json::Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": -1,
            "result": {
                "node_info": { "network": "constantine-3" },
                "sync_info": {
                    "latest_block_height": height,
                    "catching_up": false
                }
            }
        })
    }

    async fn prober_for(server: &MockServer) -> (NetProber, String) {
        let addr = server.address();
        let prober = NetProber::new(Duration::from_secs(2), addr.port()).unwrap();
        (prober, addr.ip().to_string())
    }

    #[test]
    fn test_parse_block_height() {
        let body = serde_json::to_vec(&status_body("1002")).unwrap();
        assert_eq!(parse_block_height(&body).unwrap(), 1002);

        let body = serde_json::to_vec(&status_body("12a")).unwrap();
        assert!(matches!(
            parse_block_height(&body),
            Err(ProbeError::InvalidHeight(h)) if h == "12a"
        ));

        assert!(matches!(
            parse_block_height(b"{\"result\":{}}"),
            Err(ProbeError::Malformed(_))
        ));
        assert!(matches!(
            parse_block_height(b"<html>bad gateway</html>"),
            Err(ProbeError::Malformed(_))
        ));
    }

    #[test]
    fn test_join_host_port() {
        assert_eq!(join_host_port("10.0.0.1", 26657), "10.0.0.1:26657");
        assert_eq!(join_host_port("node.example.com", 80), "node.example.com:80");
        assert_eq!(join_host_port("fd00::1", 26657), "[fd00::1]:26657");
        assert_eq!(join_host_port("[fd00::1]", 26657), "[fd00::1]:26657");
    }

    #[tokio::test]
    async fn test_probe_port_open_and_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();

        // Grab a free port and release it so nothing listens there.
        let closed = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };

        let prober = NetProber::new(Duration::from_secs(2), DEFAULT_STATUS_PORT).unwrap();
        assert!(prober.probe_port("127.0.0.1", open as i32).await.is_ok());
        assert!(prober.probe_port("127.0.0.1", closed as i32).await.is_err());

        let err = prober.probe_port("127.0.0.1", 70000).await.unwrap_err();
        assert_eq!(err.kind(), "unreachable");
    }

    #[tokio::test]
    async fn test_probe_port_connect_timeout() {
        // Never accepting: once the accept queue is full, new SYNs go unanswered
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let port = listener.local_addr().unwrap().port() as i32;

        let prober = NetProber::new(Duration::from_millis(200), DEFAULT_STATUS_PORT).unwrap();

        let mut failure = None;
        for _ in 0..16 {
            if let Err(e) = prober.probe_port("127.0.0.1", port).await {
                failure = Some(e);
                break;
            }
        }

        let err = failure.unwrap();
        assert_eq!(err.kind(), "timeout");
        assert_eq!(err.to_string(), format!("127.0.0.1:{} timed out", port));
    }

    #[tokio::test]
    async fn test_probe_chain_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body("1000")))
            .mount(&server)
            .await;

        let (prober, host) = prober_for(&server).await;
        let status = prober.probe_chain_status(&host).await.unwrap();
        assert_eq!(status.latest_block_height, 1000);
    }

    #[tokio::test]
    async fn test_probe_chain_status_non_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (prober, host) = prober_for(&server).await;
        let err = prober.probe_chain_status(&host).await.unwrap_err();
        assert!(matches!(err, ProbeError::BadStatus(503)));
    }

    #[tokio::test]
    async fn test_probe_chain_status_garbled_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let (prober, host) = prober_for(&server).await;
        let err = prober.probe_chain_status(&host).await.unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[tokio::test]
    async fn test_probe_chain_status_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(status_body("1000"))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let addr = server.address();
        let prober = NetProber::new(Duration::from_millis(200), addr.port()).unwrap();
        let err = prober
            .probe_chain_status(&addr.ip().to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }
}
