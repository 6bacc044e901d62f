//! Leased presence entries on etcd.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, GetOptions, PutOptions};
use tokio::time::timeout;

use lattice_core::{ClusterError, ClusterResult, LeaseId, Presence};

/// Bound on the initial dial to the registry.
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on a presence lookup. A lookup past this is treated as a transport
/// failure and the message being routed is abandoned.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Presence registry backed by etcd v3 leases.
///
/// Key = client id, value = owning instance address. Entries die with their
/// lease, so a crashed instance's clients become unroutable within the TTL
/// without any cleanup pass.
pub struct EtcdPresence {
    client: Client,
}

impl EtcdPresence {
    /// Dials the registry. Fatal at startup when it fails.
    pub async fn connect(endpoints: &[String]) -> ClusterResult<Self> {
        let options = ConnectOptions::new().with_connect_timeout(DIAL_TIMEOUT);
        let client = Client::connect(endpoints, Some(options))
            .await
            .map_err(ClusterError::registry)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Presence for EtcdPresence {
    async fn bind(
        &self,
        ttl_secs: i64,
        client_id: &str,
        instance_addr: &str,
    ) -> ClusterResult<LeaseId> {
        let mut client = self.client.clone();
        let lease = client
            .lease_grant(ttl_secs, None)
            .await
            .map_err(ClusterError::registry)?;
        client
            .put(
                client_id,
                instance_addr,
                Some(PutOptions::new().with_lease(lease.id())),
            )
            .await
            .map_err(ClusterError::registry)?;
        Ok(lease.id())
    }

    async fn release(&self, lease: LeaseId) -> ClusterResult<()> {
        let mut client = self.client.clone();
        client
            .lease_revoke(lease)
            .await
            .map_err(ClusterError::registry)?;
        Ok(())
    }

    async fn refresh(&self, lease: LeaseId) -> ClusterResult<()> {
        let mut client = self.client.clone();
        let (mut keeper, _responses) = client
            .lease_keep_alive(lease)
            .await
            .map_err(ClusterError::registry)?;
        keeper.keep_alive().await.map_err(ClusterError::registry)?;
        Ok(())
    }

    async fn locate(&self, client_id: &str) -> ClusterResult<Option<String>> {
        let mut client = self.client.clone();
        let lookup = client.get(client_id, Some(GetOptions::new().with_prefix()));
        let response = timeout(LOOKUP_TIMEOUT, lookup)
            .await
            .map_err(|_| ClusterError::Timeout {
                operation: "presence lookup",
                seconds: LOOKUP_TIMEOUT.as_secs(),
            })?
            .map_err(ClusterError::registry)?;

        match response.kvs().first() {
            None => Ok(None),
            Some(kv) => kv
                .value_str()
                .map(|addr| Some(addr.to_string()))
                .map_err(ClusterError::registry),
        }
    }
}
