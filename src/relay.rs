/// The set of configured upstream relays: resolved once at startup, held
/// read-only for the process lifetime, and consulted by the acceptor to
/// pick one uniformly at random per accepted connection.
use std::net::SocketAddr;

use rand::Rng;
use tokio::net::lookup_host;

use crate::config::ServerConfig;
use crate::errors::Error;

/// One configured upstream, resolved and ready to dial.
#[derive(Debug, Clone)]
pub struct RelayDescriptor {
    pub addr: SocketAddr,
    pub key: Vec<u8>,
}

/// The read-only, process-lifetime set of relays.
pub struct RelayRegistry {
    relays: Vec<RelayDescriptor>,
}

impl RelayRegistry {
    /// Resolve every configured server's address. A resolution failure here
    /// is fatal to the process (exit code 2, see `main`).
    pub async fn resolve(servers: &[ServerConfig]) -> Result<RelayRegistry, Error> {
        let mut relays = Vec::with_capacity(servers.len());

        for server in servers {
            let host_port = format!("{}:{}", server.address, server.port);
            let mut addrs = lookup_host(&host_port)
                .await
                .map_err(|e| Error::AddressResolutionFailed(format!("{}: {}", host_port, e)))?;
            let addr = addrs.next().ok_or_else(|| {
                Error::AddressResolutionFailed(format!("{}: no addresses", host_port))
            })?;

            relays.push(RelayDescriptor {
                addr,
                key: server.key.as_bytes().to_vec(),
            });
        }

        Ok(RelayRegistry { relays })
    }

    /// Pick one relay uniformly at random. Panics if the registry is empty;
    /// `Config::parse` already rejects an empty server list, so this can
    /// only happen if a registry is built by hand incorrectly.
    pub fn pick(&self) -> &RelayDescriptor {
        let idx = rand::thread_rng().gen_range(0..self.relays.len());
        &self.relays[idx]
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }
}
