/// Listens on the redirect endpoint and spins up one forwarding task per
/// accepted connection (§4.1).
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::forwarder;
use crate::pool::ConnectionPool;
use crate::redirect;
use crate::relay::RelayRegistry;

pub async fn run(listener: TcpListener, relays: Arc<RelayRegistry>, pool: ConnectionPool) {
    loop {
        let (client, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                log::warn!("accept failed: {}", e);
                continue;
            }
        };

        let permit = match pool.try_acquire() {
            Some(permit) => permit,
            None => {
                log::warn!("connection pool exhausted, rejecting {}", peer_addr);
                drop(client);
                continue;
            }
        };

        let relays = relays.clone();
        tokio::spawn(async move {
            // The permit is held for the task's whole lifetime and released
            // via `Drop` on every exit path, including panics.
            let _permit = permit;
            if let Err(e) = handle(client, peer_addr, &relays).await {
                log::warn!("connection from {} failed: {}", peer_addr, e);
            }
        });
    }
}

async fn handle(
    client: TcpStream,
    peer_addr: std::net::SocketAddr,
    relays: &RelayRegistry,
) -> Result<(), crate::errors::Error> {
    let destination = redirect::original_destination(&client)?;
    log::info!("{} -> {} (redirected)", peer_addr, destination);

    let relay = relays.pick();
    forwarder::run(client, destination, relay).await
}
