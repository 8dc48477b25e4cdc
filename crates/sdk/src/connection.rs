//! Transport dialing and channel lifecycle.
//!
//! Builds tonic gRPC channels with the client's transport settings applied:
//! connect/request timeouts, TCP and HTTP/2 keepalive, and optional TLS.
//! Two dial strategies exist:
//! - [`dial`]: a direct channel to a single endpoint, connected eagerly
//! - [`dial_load_balanced`]: a channel balancing round-robin over several
//!   member endpoints, connecting lazily so calls wait for a ready backend
//!   instead of failing fast
//!
//! [`Connection`] owns the resulting channel and enforces close-exactly-once
//! semantics for the facade.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use snafu::ResultExt;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tracing::debug;

use crate::config::{ClientConfig, TlsConfig};
use crate::error::{ClientError, InvalidEndpointSnafu, Result, TransportSnafu};

/// Maximum size of a received message (100 MiB). Applied when service
/// stubs are constructed over the channel.
pub(crate) const MAX_RECV_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// HTTP/2 keep-alive interval for idle connections.
const HTTP2_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// HTTP/2 keep-alive timeout.
const HTTP2_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP keepalive interval.
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Splits a comma-separated endpoint list, trimming whitespace and
/// dropping empty entries.
pub(crate) fn split_endpoints(csv: &str) -> Vec<String> {
    csv.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect()
}

/// Normalizes an endpoint address into a URL tonic can dial.
///
/// Addresses already carrying an `http://` or `https://` scheme pass
/// through; bare `host:port` addresses get a scheme matching the TLS
/// setting.
pub(crate) fn normalize_endpoint(addr: &str, tls: bool) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        return addr.to_owned();
    }
    if tls { format!("https://{addr}") } else { format!("http://{addr}") }
}

/// Logical target name for a balanced channel, listing all members.
pub(crate) fn multi_target(addrs: &[String]) -> String {
    format!("multi:///{}", addrs.join(","))
}

/// Builds a configured tonic [`Endpoint`] for an address.
fn build_endpoint(addr: &str, config: &ClientConfig) -> Result<Endpoint> {
    let url = normalize_endpoint(addr, config.tls().is_some());

    let endpoint = Endpoint::try_from(url.clone()).map_err(|e| {
        InvalidEndpointSnafu { endpoint: url.clone(), message: e.to_string() }.build()
    })?;

    let endpoint = endpoint
        .connect_timeout(config.connect_timeout())
        .timeout(config.timeout())
        .tcp_nodelay(true)
        .tcp_keepalive(Some(TCP_KEEPALIVE_INTERVAL))
        .http2_keep_alive_interval(HTTP2_KEEPALIVE_INTERVAL)
        .keep_alive_timeout(HTTP2_KEEPALIVE_TIMEOUT)
        .keep_alive_while_idle(true);

    match config.tls() {
        Some(tls) => {
            let tls_config = client_tls_config(tls);
            endpoint.tls_config(tls_config).context(TransportSnafu)
        },
        None => Ok(endpoint),
    }
}

/// Translates the client [`TlsConfig`] into tonic's TLS settings.
fn client_tls_config(tls: &TlsConfig) -> ClientTlsConfig {
    let mut config = ClientTlsConfig::new();

    if tls.use_native_roots() {
        config = config.with_native_roots();
    }

    if let Some(ca) = tls.ca_cert() {
        config = config.ca_certificate(Certificate::from_pem(ca.to_pem()));
    }

    if let (Some(cert), Some(key)) = (tls.client_cert(), tls.client_key()) {
        config = config.identity(Identity::from_pem(cert.to_pem(), key));
    }

    if let Some(domain) = tls.domain_name() {
        config = config.domain_name(domain);
    }

    config
}

/// Dials a single endpoint, establishing the connection eagerly.
///
/// # Errors
///
/// Returns `InvalidEndpoint` if the address cannot be parsed, or
/// `Transport` if connection establishment fails.
pub async fn dial(addr: &str, config: &ClientConfig) -> Result<Channel> {
    let endpoint = build_endpoint(addr, config)?;
    debug!(endpoint = %endpoint.uri(), "dialing");
    endpoint.connect().await.context(TransportSnafu)
}

/// Builds a load-balanced channel over several member endpoints.
///
/// Requests are distributed round-robin. The channel connects lazily:
/// a call issued before any backend is reachable waits for one to become
/// ready rather than failing fast.
///
/// # Errors
///
/// Returns `InvalidEndpoint` if any member address cannot be parsed.
pub fn dial_load_balanced(addrs: &[String], config: &ClientConfig) -> Result<Channel> {
    let endpoints = addrs
        .iter()
        .map(|addr| build_endpoint(addr, config))
        .collect::<Result<Vec<_>>>()?;

    debug!(target = %multi_target(addrs), members = addrs.len(), "dialing load-balanced");
    Ok(Channel::balance_list(endpoints.into_iter()))
}

/// Owns a live channel and enforces close-exactly-once semantics.
///
/// Cloning is cheap; all clones share the same channel slot. Once any
/// clone closes the connection, [`channel`](Self::channel) fails with
/// [`ClientError::Closed`] on every clone.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Channel slot; `None` once closed.
    channel: Arc<RwLock<Option<Channel>>>,

    /// Logical target name, for logging.
    target: String,
}

impl Connection {
    /// Wraps an established channel.
    #[must_use]
    pub fn new(channel: Channel, target: impl Into<String>) -> Self {
        Self { channel: Arc::new(RwLock::new(Some(channel))), target: target.into() }
    }

    /// Returns a clone of the live channel.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Closed` once the connection has been closed.
    pub fn channel(&self) -> Result<Channel> {
        self.channel.read().clone().ok_or(ClientError::Closed)
    }

    /// Returns the logical target this connection was dialed against.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns true once the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.channel.read().is_none()
    }

    /// Closes the connection, dropping the channel.
    ///
    /// Returns `true` for the call that actually performed the close;
    /// every subsequent (or concurrently losing) call returns `false`.
    pub fn close(&self) -> bool {
        let closed = self.channel.write().take().is_some();
        if closed {
            debug!(target = %self.target, "connection closed");
        }
        closed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn test_config() -> ClientConfig {
        ClientConfig::builder().with_endpoint("127.0.0.1:8500").build().unwrap()
    }

    #[test]
    fn split_endpoints_trims_and_drops_empties() {
        assert_eq!(
            split_endpoints(" a:1, b:2 ,,c:3 "),
            vec!["a:1".to_owned(), "b:2".to_owned(), "c:3".to_owned()]
        );
        assert!(split_endpoints("").is_empty());
        assert!(split_endpoints(" , ,").is_empty());
    }

    #[test]
    fn normalize_adds_scheme_for_bare_addresses() {
        assert_eq!(normalize_endpoint("127.0.0.1:8500", false), "http://127.0.0.1:8500");
        assert_eq!(normalize_endpoint("127.0.0.1:8500", true), "https://127.0.0.1:8500");
    }

    #[test]
    fn normalize_keeps_existing_scheme() {
        assert_eq!(normalize_endpoint("http://n1:8500", true), "http://n1:8500");
        assert_eq!(normalize_endpoint("https://n1:8500", false), "https://n1:8500");
    }

    #[test]
    fn multi_target_joins_members() {
        let addrs = vec!["a:1".to_owned(), "b:2".to_owned()];
        assert_eq!(multi_target(&addrs), "multi:///a:1,b:2");
    }

    #[test]
    fn build_endpoint_rejects_garbage() {
        let config = test_config();
        let result = build_endpoint("http://", &config);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn dial_fails_for_unreachable_endpoint() {
        let config = ClientConfig::builder()
            .with_endpoint("127.0.0.1:1")
            .with_connect_timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        let result = dial("127.0.0.1:1", &config).await;
        assert!(result.is_err(), "expected connection to fail");
    }

    #[tokio::test]
    async fn balanced_channel_builds_lazily() {
        let config = test_config();
        let addrs = vec!["127.0.0.1:1".to_owned(), "127.0.0.1:2".to_owned()];

        // balance_list does not connect; construction must succeed even
        // though no backend is reachable.
        let channel = dial_load_balanced(&addrs, &config);
        assert!(channel.is_ok());
    }

    #[tokio::test]
    async fn connection_close_reports_exactly_once() {
        let config = test_config();
        let addrs = vec!["127.0.0.1:1".to_owned()];
        let channel = dial_load_balanced(&addrs, &config).unwrap();
        let conn = Connection::new(channel, multi_target(&addrs));

        assert!(!conn.is_closed());
        assert!(conn.channel().is_ok());

        assert!(conn.close(), "first close performs the teardown");
        assert!(!conn.close(), "second close is a no-op");
        assert!(conn.is_closed());
        assert!(matches!(conn.channel(), Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn connection_clones_share_state() {
        let config = test_config();
        let channel =
            dial_load_balanced(&["127.0.0.1:1".to_owned()], &config).unwrap();
        let conn = Connection::new(channel, "multi:///127.0.0.1:1");
        let clone = conn.clone();

        assert!(conn.close());
        assert!(clone.is_closed());
        assert!(matches!(clone.channel(), Err(ClientError::Closed)));
    }
}
