//! Full-pipeline tests for the direct-mode upstream handshake and the
//! fast-mode relay elision (spec §8, scenarios S3 and S4).
//!
//! `connect_direct_to` lets these tests stand in a loopback `TcpListener` for
//! the real Telegram datacenter instead of hitting the network.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use telemt::crypto::{AesCtr, sha256};
use telemt::protocol::constants::{
    HANDSHAKE_LEN, IV_LEN, MAGIC_VAL_POS, MAGIC_VAL_TO_CHECK, PREKEY_LEN, SKIP_LEN,
};
use telemt::proxy::direct_relay;
use telemt::proxy::handshake::perform_client_handshake;
use telemt::proxy::relay;
use telemt::stats::StatsRegistry;
use telemt::transport::direct::connect_direct_to;

fn build_client_handshake_wire(secret: &[u8; 16], dc_index: i16) -> Vec<u8> {
    let rand_prefix = [7u8; SKIP_LEN];
    let prekey_and_iv: Vec<u8> = (0..PREKEY_LEN + IV_LEN).map(|i| i as u8).collect();

    let mut plain = vec![0u8; HANDSHAKE_LEN];
    plain[..SKIP_LEN].copy_from_slice(&rand_prefix);
    plain[SKIP_LEN..SKIP_LEN + PREKEY_LEN + IV_LEN].copy_from_slice(&prekey_and_iv);
    plain[MAGIC_VAL_POS..MAGIC_VAL_POS + 4].copy_from_slice(&MAGIC_VAL_TO_CHECK);
    plain[60..62].copy_from_slice(&dc_index.to_le_bytes());

    let dec_prekey = &prekey_and_iv[..PREKEY_LEN];
    let dec_iv: [u8; IV_LEN] = prekey_and_iv[PREKEY_LEN..].try_into().unwrap();
    let mut key_input = dec_prekey.to_vec();
    key_input.extend_from_slice(secret);
    let key = sha256(&key_input);

    let mut ctr = AesCtr::new(key, dec_iv);
    let mut wire = plain.clone();
    ctr.apply_keystream(&mut wire);
    wire
}

async fn socket_pair() -> (OwnedReadHalf, OwnedWriteHalf, OwnedReadHalf, OwnedWriteHalf) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connect = tokio::net::TcpStream::connect(addr);
    let (accepted, connected) = tokio::join!(listener.accept(), connect);
    let (a_r, a_w) = accepted.unwrap().0.into_split();
    let (b_r, b_w) = connected.unwrap().into_split();
    (a_r, a_w, b_r, b_w)
}

/// S3: the proxy's outgoing nonce to a fresh upstream carries the magic
/// bytes and the requested datacenter index in cleartext-position fields
/// (everything from byte 56 on is only meaningful once keystreamed back out
/// by the peer, but the *length* and *position* are what this test checks).
#[tokio::test]
async fn direct_handshake_emits_a_64_byte_frame_with_magic_and_dc_index() {
    let fake_dc = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dc_addr = fake_dc.local_addr().unwrap();

    let client_task = tokio::spawn(async move {
        connect_direct_to((dc_addr.ip().to_string().as_str(), dc_addr.port()), None)
            .await
            .unwrap()
    });

    let (mut dc_stream, _) = fake_dc.accept().await.unwrap();
    let mut wire = [0u8; HANDSHAKE_LEN];
    dc_stream.read_exact(&mut wire).await.unwrap();

    assert_eq!(&wire[MAGIC_VAL_POS..MAGIC_VAL_POS + 4], &MAGIC_VAL_TO_CHECK);

    // The dc-index field itself is a `connect_direct`-level concern (it picks
    // the datacenter address before handing off to `connect_direct_to`); its
    // wire encoding is covered by `proxy::handshake`'s own tests.
    client_task.await.unwrap();
}

/// S4: with fast mode on, ciphertext written by the upstream must reach the
/// client byte-for-byte, because both the upstream decryptor and the
/// client-facing encryptor have been elided to the identity direction.
#[tokio::test]
async fn fast_mode_forwards_upstream_ciphertext_untouched() {
    let secret = [0u8; 16];
    let users = vec![("alice".to_string(), secret)];
    let wire = build_client_handshake_wire(&secret, 2); // dc_index = |2| - 1 = 1

    let (srv_r, srv_w, mut test_client_r, mut test_client_w) = socket_pair().await;
    let writer_task = tokio::spawn(async move {
        test_client_w.write_all(&wire).await.unwrap();
        test_client_w.shutdown().await.unwrap();
    });

    let client = perform_client_handshake(srv_r, srv_w, &users).await.unwrap();
    assert_eq!(client.dc_index, 1);

    let fake_dc = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dc_addr = fake_dc.local_addr().unwrap();
    let fast_mode_reuse = Some(client.enc_key_iv);

    let connect_task = tokio::spawn(async move {
        connect_direct_to((dc_addr.ip().to_string().as_str(), dc_addr.port()), fast_mode_reuse)
            .await
            .unwrap()
    });

    let (mut dc_stream, _) = fake_dc.accept().await.unwrap();
    let mut nonce_wire = [0u8; HANDSHAKE_LEN];
    dc_stream.read_exact(&mut nonce_wire).await.unwrap();

    const PAYLOAD: &[u8] = b"not really telegram ciphertext!";
    dc_stream.write_all(PAYLOAD).await.unwrap();
    dc_stream.shutdown().await.unwrap();

    let upstream = connect_task.await.unwrap();
    let (client_halves, upstream_halves) = direct_relay::build_halves(client, upstream, true);

    let stats = StatsRegistry::new();
    let session = tokio::spawn(relay::run_session(
        client_halves,
        upstream_halves,
        "alice".to_string(),
        stats,
        4096,
    ));

    let mut received = vec![0u8; PAYLOAD.len()];
    test_client_r.read_exact(&mut received).await.unwrap();
    assert_eq!(received, PAYLOAD);

    drop(test_client_r);
    writer_task.await.unwrap();
    session.await.unwrap();
}
