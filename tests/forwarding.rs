//! End-to-end scenarios against `forwarder::run`, played with a stub relay
//! on loopback instead of `redirect::original_destination` (which needs a
//! real netfilter-redirected socket and so can't run in a plain test
//! environment). Each test plays both the client and the relay side of the
//! wire protocol from §6/§4.3 of the spec directly over loopback sockets.

use std::net::SocketAddr;
use std::time::Duration;

use rona_redir::cipher::{derive_key_schedule, Cipher};
use rona_redir::forwarder;
use rona_redir::relay::RelayDescriptor;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const FRAME_LEN: usize = 512;
const MAGIC: [u8; 4] = *b"Rona";
const HOST_OFFSET: usize = 4;
const HOST_LEN: usize = 257;
const PORT_OFFSET: usize = 261;
const PORT_LEN: usize = 15;
const NONCE_OFFSET: usize = 276;
const NONCE_LEN: usize = 236;
const ENCRYPTED_LEN: usize = NONCE_OFFSET;

/// The relay's half of the handshake: derive the key schedule from the
/// frame's own trailing nonce and decrypt the leading MAGIC/HOST/PORT
/// fields in place, returning the cipher so the caller can continue
/// decrypting/encrypting the rest of this connection's traffic with it.
fn relay_open_frame(frame: &mut [u8; FRAME_LEN], key: &[u8]) -> Cipher {
    let nonce = frame[NONCE_OFFSET..NONCE_OFFSET + NONCE_LEN].to_vec();
    let schedule = derive_key_schedule(&nonce, key);
    let mut cipher = Cipher::new(&schedule);
    cipher.decrypt(&mut frame[0..ENCRYPTED_LEN]);
    cipher
}

fn nul_terminated_str(field: &[u8]) -> &str {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end]).unwrap()
}

async fn bind_loopback() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// S1 + S2: the opening frame is exactly 512 bytes and decrypts to the
/// redirected destination, and a request/reply pair flows through
/// correctly once the cipher continues past the handshake.
#[tokio::test]
async fn handshake_happy_path_and_bidirectional_payload() {
    let (relay_listener, relay_addr) = bind_loopback().await;
    let (client_listener, client_listen_addr) = bind_loopback().await;

    let relay_key = b"secret".to_vec();
    let relay = RelayDescriptor {
        addr: relay_addr,
        key: relay_key.clone(),
    };
    let destination: SocketAddr = "1.2.3.4:80".parse().unwrap();

    let mut downstream_client = TcpStream::connect(client_listen_addr).await.unwrap();
    let (accepted, _) = client_listener.accept().await.unwrap();

    let forward_task = tokio::spawn(async move { forwarder::run(accepted, destination, &relay).await });

    let (mut relay_side, _) = timeout(TEST_TIMEOUT, relay_listener.accept())
        .await
        .unwrap()
        .unwrap();

    let mut frame = [0u8; FRAME_LEN];
    timeout(TEST_TIMEOUT, relay_side.read_exact(&mut frame))
        .await
        .unwrap()
        .unwrap();

    let mut cipher = relay_open_frame(&mut frame, &relay_key);

    assert_eq!(&frame[0..4], &MAGIC);
    assert_eq!(
        nul_terminated_str(&frame[HOST_OFFSET..HOST_OFFSET + HOST_LEN]),
        "1.2.3.4"
    );
    assert_eq!(
        nul_terminated_str(&frame[PORT_OFFSET..PORT_OFFSET + PORT_LEN]),
        "80"
    );

    // S2: client sends a request; the relay observes it decrypted, then
    // replies, and the client observes the plaintext reply.
    let request = b"GET / HTTP/1.0\r\n\r\n";
    timeout(TEST_TIMEOUT, downstream_client.write_all(request))
        .await
        .unwrap()
        .unwrap();

    let mut received = vec![0u8; request.len()];
    timeout(TEST_TIMEOUT, relay_side.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    cipher.decrypt(&mut received);
    assert_eq!(received, request);

    let mut reply = b"HTTP/1.0 200 OK\r\n\r\n".to_vec();
    cipher.encrypt(&mut reply);
    timeout(TEST_TIMEOUT, relay_side.write_all(&reply))
        .await
        .unwrap()
        .unwrap();

    let mut plaintext_reply = vec![0u8; reply.len()];
    timeout(TEST_TIMEOUT, downstream_client.read_exact(&mut plaintext_reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(plaintext_reply, b"HTTP/1.0 200 OK\r\n\r\n");

    drop(downstream_client);
    let _ = timeout(TEST_TIMEOUT, forward_task).await;
}

/// S3's analogue for the full engine: a payload several times larger than
/// the 8192-byte pump buffer forces multiple fill/drain cycles; every byte
/// must still arrive, in order, correctly decrypted. (The buffer-level
/// partial-write bookkeeping itself is covered directly in
/// `buffer::tests::partial_drain_then_full_drain_resumes_feeding`.)
#[tokio::test]
async fn large_payload_survives_multiple_fill_drain_cycles() {
    let (relay_listener, relay_addr) = bind_loopback().await;
    let (client_listener, client_listen_addr) = bind_loopback().await;

    let relay_key = b"another-secret".to_vec();
    let relay = RelayDescriptor {
        addr: relay_addr,
        key: relay_key.clone(),
    };
    let destination: SocketAddr = "10.0.0.1:443".parse().unwrap();

    let mut downstream_client = TcpStream::connect(client_listen_addr).await.unwrap();
    let (accepted, _) = client_listener.accept().await.unwrap();

    let forward_task = tokio::spawn(async move { forwarder::run(accepted, destination, &relay).await });

    let (mut relay_side, _) = timeout(TEST_TIMEOUT, relay_listener.accept())
        .await
        .unwrap()
        .unwrap();

    let mut frame = [0u8; FRAME_LEN];
    timeout(TEST_TIMEOUT, relay_side.read_exact(&mut frame))
        .await
        .unwrap()
        .unwrap();
    let mut cipher = relay_open_frame(&mut frame, &relay_key);

    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let write_task = {
        let payload = payload.clone();
        tokio::spawn(async move {
            downstream_client.write_all(&payload).await.unwrap();
            downstream_client
        })
    };

    let mut received = vec![0u8; payload.len()];
    timeout(TEST_TIMEOUT, relay_side.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    cipher.decrypt(&mut received);
    assert_eq!(received, payload);

    let _downstream_client = write_task.await.unwrap();
    let _ = timeout(TEST_TIMEOUT, forward_task).await;
}

/// S4: once the client closes (having completed the handshake), the
/// forwarding engine observes EOF on that side and tears the connection
/// down without treating it as an error.
#[tokio::test]
async fn client_close_after_handshake_tears_down_cleanly() {
    let (relay_listener, relay_addr) = bind_loopback().await;
    let (client_listener, client_listen_addr) = bind_loopback().await;

    let relay_key = b"secret".to_vec();
    let relay = RelayDescriptor {
        addr: relay_addr,
        key: relay_key,
    };
    let destination: SocketAddr = "1.2.3.4:80".parse().unwrap();

    let downstream_client = TcpStream::connect(client_listen_addr).await.unwrap();
    let (accepted, _) = client_listener.accept().await.unwrap();

    let forward_task = tokio::spawn(async move { forwarder::run(accepted, destination, &relay).await });

    let (mut relay_side, _) = timeout(TEST_TIMEOUT, relay_listener.accept())
        .await
        .unwrap()
        .unwrap();
    let mut frame = [0u8; FRAME_LEN];
    timeout(TEST_TIMEOUT, relay_side.read_exact(&mut frame))
        .await
        .unwrap()
        .unwrap();

    drop(downstream_client);

    let result = timeout(TEST_TIMEOUT, forward_task).await.unwrap().unwrap();
    assert!(result.is_ok(), "orderly close must not surface as an error");
}

/// S6: the chosen relay refuses the connection; `forwarder::run` must
/// report the failure rather than hang or panic.
#[tokio::test]
async fn relay_unreachable_is_reported_as_an_error() {
    let (refusing_listener, refusing_addr) = bind_loopback().await;
    drop(refusing_listener); // nothing listens at this address now

    let (client_listener, client_listen_addr) = bind_loopback().await;
    let _downstream_client = TcpStream::connect(client_listen_addr).await.unwrap();
    let (accepted, _) = client_listener.accept().await.unwrap();

    let relay = RelayDescriptor {
        addr: refusing_addr,
        key: b"secret".to_vec(),
    };
    let destination: SocketAddr = "1.2.3.4:80".parse().unwrap();

    let result = timeout(TEST_TIMEOUT, forwarder::run(accepted, destination, &relay))
        .await
        .unwrap();
    assert!(result.is_err());
}
