// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Discovery-server client mode: instead of multicasting DATA(p), the
//! participant announces to a configured list of server locators. Servers
//! relay the graph through their own SEDP. The client keeps re-announcing
//! on its resync timer until every server has answered with its own
//! DATA(p).

use std::time::Duration;

use parking_lot::Mutex;

use crate::config::DiscoveryConfig;
use crate::core::guid::GuidPrefix;
use crate::core::locator::Locator;
use crate::rtps::SendOperation;

/// Client-side state towards one discovery server.
struct ServerEntry {
    locator: Locator,
    /// Prefix learned from the server's DATA(p); `None` until it answered.
    prefix: Option<GuidPrefix>,
}

/// Tracks which configured servers have been reached.
pub struct DiscoveryServerClient {
    servers: Mutex<Vec<ServerEntry>>,
    resync_period: Duration,
}

impl DiscoveryServerClient {
    #[must_use]
    pub fn new(config: &DiscoveryConfig) -> Self {
        DiscoveryServerClient {
            servers: Mutex::new(
                config
                    .servers
                    .iter()
                    .map(|locator| ServerEntry {
                        locator: *locator,
                        prefix: None,
                    })
                    .collect(),
            ),
            resync_period: config.client_resync_period,
        }
    }

    /// Destinations for the next announcement round: servers that have not
    /// answered get announcements on every resync tick; acknowledged ones
    /// keep receiving the regular lease-period announcements.
    #[must_use]
    pub fn pending_servers(&self) -> Vec<Locator> {
        self.servers
            .lock()
            .iter()
            .filter(|s| s.prefix.is_none())
            .map(|s| s.locator)
            .collect()
    }

    #[must_use]
    pub fn all_servers(&self) -> Vec<Locator> {
        self.servers.lock().iter().map(|s| s.locator).collect()
    }

    /// True while any server has yet to answer; drives the resync timer.
    #[must_use]
    pub fn needs_resync(&self) -> bool {
        self.servers.lock().iter().any(|s| s.prefix.is_none())
    }

    #[must_use]
    pub fn resync_period(&self) -> Duration {
        self.resync_period
    }

    /// A DATA(p) arrived from `source`; when it is one of our servers,
    /// record the acknowledgement. Returns true when this completed the
    /// server set.
    pub fn server_answered(&self, source: Locator, prefix: GuidPrefix) -> bool {
        let mut servers = self.servers.lock();
        let mut changed = false;
        for server in servers.iter_mut() {
            if server.locator == source && server.prefix.is_none() {
                log::info!("[DS-CLIENT] server {source:?} answered as {prefix:?}");
                server.prefix = Some(prefix);
                changed = true;
            }
        }
        changed && servers.iter().all(|s| s.prefix.is_some())
    }

    /// A server's lease expired; resume resync announcements towards it.
    pub fn server_lost(&self, prefix: GuidPrefix) {
        for server in self.servers.lock().iter_mut() {
            if server.prefix == Some(prefix) {
                log::warn!("[DS-CLIENT] server {prefix:?} lost, resuming resync");
                server.prefix = None;
            }
        }
    }

    /// Retarget announcement operations at the server list (client mode
    /// never multicasts discovery).
    #[must_use]
    pub fn redirect_announcements(&self, ops: Vec<SendOperation>) -> Vec<SendOperation> {
        let destinations = self.all_servers();
        ops.into_iter()
            .map(|op| SendOperation::new(op.message, destinations.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryProtocol;
    use std::net::Ipv4Addr;

    fn server(n: u8) -> Locator {
        Locator::udpv4(Ipv4Addr::new(10, 0, 1, n), 11811)
    }

    fn client() -> DiscoveryServerClient {
        let config = DiscoveryConfig {
            protocol: DiscoveryProtocol::Client,
            servers: vec![server(1), server(2)],
            ..DiscoveryConfig::default()
        };
        DiscoveryServerClient::new(&config)
    }

    #[test]
    fn test_resync_until_all_servers_answer() {
        let c = client();
        assert!(c.needs_resync());
        assert_eq!(c.pending_servers().len(), 2);

        assert!(!c.server_answered(server(1), GuidPrefix([1; 12])));
        assert_eq!(c.pending_servers(), vec![server(2)]);
        assert!(c.needs_resync());

        assert!(c.server_answered(server(2), GuidPrefix([2; 12])));
        assert!(!c.needs_resync());
        assert!(c.pending_servers().is_empty());
    }

    #[test]
    fn test_unknown_source_not_a_server() {
        let c = client();
        assert!(!c.server_answered(server(9), GuidPrefix([9; 12])));
        assert_eq!(c.pending_servers().len(), 2);
    }

    #[test]
    fn test_server_loss_resumes_resync() {
        let c = client();
        c.server_answered(server(1), GuidPrefix([1; 12]));
        c.server_answered(server(2), GuidPrefix([2; 12]));
        assert!(!c.needs_resync());

        c.server_lost(GuidPrefix([1; 12]));
        assert!(c.needs_resync());
        assert_eq!(c.pending_servers(), vec![server(1)]);
    }

    #[test]
    fn test_redirect_points_at_servers() {
        let c = client();
        let ops = vec![SendOperation::new(vec![1, 2, 3], vec![server(9)])];
        let redirected = c.redirect_announcements(ops);
        assert_eq!(redirected[0].destinations, vec![server(1), server(2)]);
    }
}
