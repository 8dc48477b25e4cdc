//! Cluster topology discovery.
//!
//! Before any record traffic flows, the client resolves the authoritative
//! cluster membership: it walks the bootstrap endpoints in order, dials a
//! short-lived channel to each, and asks `ClusterService/GetConfiguration`
//! for the member list. The first endpoint that answers with a non-empty
//! configuration wins; the probe channel is dropped immediately either way.
//! If every bootstrap endpoint fails — or answers with zero members — the
//! whole resolution fails with [`ClientError::NoClusterFound`] carrying the
//! final attempt's error.

use recordbase_proto::proto::{self, cluster_service_client::ClusterServiceClient};
use tracing::{debug, warn};

use crate::{
    auth::BearerAuth,
    config::ClientConfig,
    connection,
    error::{ClientError, Result},
};

/// A single member of the resolved cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMember {
    /// Node identifier assigned by the cluster.
    pub node_id: u64,

    /// Address the member serves record traffic on.
    pub api_addr: String,
}

impl ClusterMember {
    pub(crate) fn from_proto(proto: proto::ServerInfo) -> Self {
        Self { node_id: proto.node_id, api_addr: proto.api_addr }
    }
}

/// The authoritative cluster membership, as reported by a bootstrap node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfiguration {
    /// Cluster members.
    pub members: Vec<ClusterMember>,
}

impl ClusterConfiguration {
    pub(crate) fn from_proto(proto: proto::ClusterConfiguration) -> Self {
        Self { members: proto.servers.into_iter().map(ClusterMember::from_proto).collect() }
    }

    /// Returns the member addresses, in reported order.
    #[must_use]
    pub fn member_addrs(&self) -> Vec<String> {
        self.members.iter().map(|m| m.api_addr.clone()).collect()
    }
}

/// Resolves the cluster membership from the configured bootstrap endpoints.
///
/// # Errors
///
/// Returns `NoClusterFound` when no bootstrap endpoint yields a usable,
/// non-empty configuration.
pub async fn resolve_cluster(config: &ClientConfig) -> Result<ClusterConfiguration> {
    let auth = BearerAuth::new(config.auth_token())?;
    let mut last_error = String::from("no endpoints configured");

    for endpoint in config.endpoints() {
        match probe_endpoint(endpoint, config, auth.clone()).await {
            Ok(cluster) if !cluster.members.is_empty() => {
                debug!(
                    endpoint = %endpoint,
                    members = cluster.members.len(),
                    "cluster configuration resolved"
                );
                return Ok(cluster);
            },
            Ok(_) => {
                warn!(endpoint = %endpoint, "bootstrap endpoint reported empty cluster");
                last_error = format!("{endpoint}: empty cluster configuration");
            },
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "bootstrap endpoint unreachable");
                last_error = format!("{endpoint}: {err}");
            },
        }
    }

    Err(ClientError::NoClusterFound { attempts: config.endpoints().len(), last_error })
}

/// Dials one bootstrap endpoint and fetches its view of the cluster.
///
/// The channel lives only for this single RPC.
async fn probe_endpoint(
    endpoint: &str,
    config: &ClientConfig,
    auth: BearerAuth,
) -> Result<ClusterConfiguration> {
    let channel = connection::dial(endpoint, config).await?;
    let mut client = ClusterServiceClient::with_interceptor(channel, auth);

    let response = client.get_configuration(proto::Empty::default()).await?;
    Ok(ClusterConfiguration::from_proto(response.into_inner()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::disallowed_methods)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn member_converts_from_proto() {
        let member = ClusterMember::from_proto(proto::ServerInfo {
            node_id: 7,
            api_addr: "10.0.0.7:8500".to_owned(),
        });
        assert_eq!(member.node_id, 7);
        assert_eq!(member.api_addr, "10.0.0.7:8500");
    }

    #[test]
    fn configuration_collects_member_addrs() {
        let config = ClusterConfiguration::from_proto(proto::ClusterConfiguration {
            servers: vec![
                proto::ServerInfo { node_id: 1, api_addr: "a:1".to_owned() },
                proto::ServerInfo { node_id: 2, api_addr: "b:2".to_owned() },
            ],
        });
        assert_eq!(config.member_addrs(), vec!["a:1".to_owned(), "b:2".to_owned()]);
    }

    #[test]
    fn empty_configuration_has_no_members() {
        let config =
            ClusterConfiguration::from_proto(proto::ClusterConfiguration { servers: vec![] });
        assert!(config.members.is_empty());
    }

    #[tokio::test]
    async fn resolve_fails_when_all_endpoints_unreachable() {
        let config = ClientConfig::builder()
            .with_endpoints(["127.0.0.1:1", "127.0.0.1:2"])
            .with_connect_timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        let err = resolve_cluster(&config).await.unwrap_err();
        match err {
            ClientError::NoClusterFound { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("127.0.0.1:2"), "last attempt is reported");
            },
            other => panic!("expected NoClusterFound, got {other}"),
        }
    }
}
