/// The per-connection forwarding engine (§4): dial the chosen relay, send
/// the encrypted opening frame, then pump bytes bidirectionally until
/// either side closes or errors. This is the hardest part of the system --
/// the rest of the crate exists to feed it a client socket, a destination,
/// and a relay.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::buffer::HalfBuffer;
use crate::cipher::Cipher;
use crate::errors::Error;
use crate::handshake;
use crate::relay::RelayDescriptor;

/// Send/receive timeout applied to every socket operation (§3, §5). The
/// only liveness bound in the system -- there's no idle-connection reaper.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Open a non-blocking connection to `relay`, applying the same socket
/// options as the client side (§4.1: "apply the same socket options").
/// `connect`'s own async suspension stands in for arming the writable
/// intent and waiting on `connect` completion (§4.2); `TcpStream::connect`
/// resolving `Err` is exactly the `SO_ERROR != 0` branch.
pub async fn dial_relay(addr: SocketAddr) -> Result<TcpStream, Error> {
    let stream = timeout(SOCKET_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::RelayConnectFailed("connect timed out".into()))?
        .map_err(|e| Error::RelayConnectFailed(e.to_string()))?;

    apply_socket_options(&stream)?;
    Ok(stream)
}

/// Keepalive and `TCP_NODELAY`, matching the source's per-socket setup.
/// `setsockopt` failures are non-fatal here (§4.1) -- logged and ignored.
pub fn apply_socket_options(stream: &TcpStream) -> Result<(), Error> {
    let sock_ref = socket2::SockRef::from(stream);
    if let Err(e) = sock_ref.set_keepalive(true) {
        log::warn!("setsockopt(SO_KEEPALIVE) failed: {}", e);
    }
    if let Err(e) = sock_ref.set_nodelay(true) {
        log::warn!("setsockopt(TCP_NODELAY) failed: {}", e);
    }
    Ok(())
}

/// Send the opening frame, resuming across partial writes (§4.4). The
/// `HalfBuffer` here is the `tx_buf`/`tx_off`/`tx_len` of §3, dedicated
/// exclusively to the frame until it's fully drained.
async fn send_handshake(stream: &mut TcpStream, frame: &[u8; handshake::FRAME_LEN]) -> Result<(), Error> {
    let mut buf = HalfBuffer::new();
    buf.fill_target()[..frame.len()].copy_from_slice(frame);
    buf.fill(frame.len());

    while !buf.is_empty() {
        let n = timeout(SOCKET_TIMEOUT, stream.write(buf.pending()))
            .await
            .map_err(|_| Error::HandshakeFailed("write timed out".into()))?
            .map_err(|e| Error::HandshakeFailed(e.to_string()))?;

        if n == 0 {
            return Err(Error::HandshakeFailed("relay closed during handshake".into()));
        }
        buf.advance(n);
    }

    Ok(())
}

/// One direction's feeding/draining pump (§4.6). Reads from `reader`,
/// applies `transform` (encrypt for outbound, decrypt for inbound) to
/// exactly the bytes just read, then drains them into `writer`, resuming
/// across partial writes. Returns `Ok(())` on an orderly close (read
/// returns 0) and `Err` on any non-retryable failure.
async fn pump(
    mut reader: impl tokio::io::AsyncRead + Unpin,
    mut writer: impl tokio::io::AsyncWrite + Unpin,
    cipher: Arc<Mutex<Cipher>>,
    transform: fn(&mut Cipher, &mut [u8]),
) -> Result<(), Error> {
    let mut buf = HalfBuffer::new();

    loop {
        if buf.is_empty() {
            let n = timeout(SOCKET_TIMEOUT, reader.read(buf.fill_target()))
                .await
                .map_err(|_| Error::PeerReset("read timed out".into()))?
                .map_err(|e| Error::PeerReset(e.to_string()))?;

            if n == 0 {
                return Ok(());
            }
            buf.fill(n);
            transform(&mut cipher.lock(), buf.pending_mut());
        }

        let n = timeout(SOCKET_TIMEOUT, writer.write(buf.pending()))
            .await
            .map_err(|_| Error::PeerReset("write timed out".into()))?
            .map_err(|e| Error::PeerReset(e.to_string()))?;

        if n == 0 {
            return Err(Error::PeerReset("write returned 0".into()));
        }
        buf.advance(n);
    }
}

/// Drive one accepted connection end to end: dial the relay, hand off the
/// encrypted opening frame, then forward bytes until either side closes.
/// Both directions are torn down together the moment either one ends --
/// there is no half-close optimization (§4.6).
pub async fn run(
    client: TcpStream,
    destination: SocketAddr,
    relay: &RelayDescriptor,
) -> Result<(), Error> {
    apply_socket_options(&client)?;

    let mut relay_stream = dial_relay(relay.addr).await?;

    let (host, port) = crate::redirect::render(&destination);
    let handshake = handshake::build(&host, &port, &relay.key);
    send_handshake(&mut relay_stream, &handshake.frame).await?;

    let cipher = Arc::new(Mutex::new(handshake.cipher));

    let (client_reader, client_writer): (tokio::net::tcp::OwnedReadHalf, OwnedWriteHalf) =
        client.into_split();
    let (relay_reader, relay_writer): (OwnedReadHalf, OwnedWriteHalf) = relay_stream.into_split();

    let outbound = pump(client_reader, relay_writer, cipher.clone(), Cipher::encrypt);
    let inbound = pump(relay_reader, client_writer, cipher, Cipher::decrypt);

    tokio::select! {
        result = outbound => result,
        result = inbound => result,
    }
}
