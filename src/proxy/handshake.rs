//! Client handshake (C3): match the 64-byte obfuscated handshake against a
//! configured user's secret and install the client-side CTR streams.

use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::crypto::{AesCtr, sha256};
use crate::error::{ProxyError, Result};
use crate::protocol::constants::{HANDSHAKE_LEN, IV_LEN, MAGIC_VAL_POS, MAGIC_VAL_TO_CHECK, PREKEY_LEN, SKIP_LEN};
use crate::protocol::obfuscation::{CryptoReader, CryptoWriter, CtrDirection};

pub struct ClientHandshake {
    pub user: String,
    pub dc_index: i32,
    pub reader: CryptoReader<OwnedReadHalf>,
    pub writer: CryptoWriter<OwnedWriteHalf>,
    /// `enc_key || enc_iv` of the proxy→client direction — reused verbatim
    /// as the upstream decryptor's key/IV in fast mode (spec §4.3 step 4).
    pub enc_key_iv: [u8; 48],
}

/// Performs the handshake described in spec §4.2. `users` must be iterated
/// in configuration declaration order — first match wins.
pub async fn perform_client_handshake(
    mut client_reader: OwnedReadHalf,
    client_writer: OwnedWriteHalf,
    users: &[(String, [u8; 16])],
) -> Result<ClientHandshake> {
    let mut handshake = vec![0u8; HANDSHAKE_LEN];
    client_reader
        .read_exact(&mut handshake)
        .await
        .map_err(|e| ProxyError::MalformedHandshake(format!("short handshake read: {e}")))?;

    for (name, secret) in users {
        let dec_prekey = &handshake[SKIP_LEN..SKIP_LEN + PREKEY_LEN];
        let dec_iv: [u8; IV_LEN] = handshake[SKIP_LEN + PREKEY_LEN..SKIP_LEN + PREKEY_LEN + IV_LEN]
            .try_into()
            .unwrap();
        let mut dec_key_input = Vec::with_capacity(PREKEY_LEN + secret.len());
        dec_key_input.extend_from_slice(dec_prekey);
        dec_key_input.extend_from_slice(secret);
        let dec_key = sha256(&dec_key_input);

        let mut reversed = handshake[SKIP_LEN..SKIP_LEN + PREKEY_LEN + IV_LEN].to_vec();
        reversed.reverse();
        let enc_prekey = &reversed[..PREKEY_LEN];
        let enc_iv: [u8; IV_LEN] = reversed[PREKEY_LEN..].try_into().unwrap();
        let mut enc_key_input = Vec::with_capacity(PREKEY_LEN + secret.len());
        enc_key_input.extend_from_slice(enc_prekey);
        enc_key_input.extend_from_slice(secret);
        let enc_key = sha256(&enc_key_input);

        // This decryptor's keystream state must carry forward into the
        // session's reader unchanged — it has already "spent" 64 bytes of
        // keystream decrypting the handshake itself, and the client's next
        // byte on the wire continues that same CTR counter.
        let mut decryptor = AesCtr::new(dec_key, dec_iv);
        let mut decrypted = handshake.clone();
        decryptor.apply_keystream(&mut decrypted);

        if decrypted[MAGIC_VAL_POS..MAGIC_VAL_POS + 4] != MAGIC_VAL_TO_CHECK {
            continue;
        }

        let raw_dc = i16::from_le_bytes([decrypted[60], decrypted[61]]);
        let dc_index = (raw_dc as i32).abs() - 1;
        if dc_index == 0 {
            continue;
        }

        let encryptor = AesCtr::new(enc_key, enc_iv);
        let mut enc_key_iv = [0u8; 48];
        enc_key_iv[..32].copy_from_slice(&enc_key);
        enc_key_iv[32..].copy_from_slice(&enc_iv);

        return Ok(ClientHandshake {
            user: name.clone(),
            dc_index,
            reader: CryptoReader::new(client_reader, Box::new(CtrDirection(decryptor)), 1),
            writer: CryptoWriter::new(client_writer, Box::new(CtrDirection(encryptor)), 1),
            enc_key_iv,
        });
    }

    Err(ProxyError::MalformedHandshake(
        "handshake matched no configured user".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn build_handshake(secret: &[u8; 16], dc_index: i16) -> Vec<u8> {
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

    #[tokio::test]
    async fn accepts_matching_user_and_returns_dc_index() {
        let secret = [0u8; 16];
        let users = vec![("alice".to_string(), secret)];
        let wire = build_handshake(&secret, 2); // dc_index = |2| - 1 = 1

        let (srv_r, srv_w, mut cli_r, mut cli_w) = socket_pair().await;
        let write_task = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            cli_w.write_all(&wire).await.unwrap();
            cli_w
        });

        let hs = perform_client_handshake(srv_r, srv_w, &users).await.unwrap();
        assert_eq!(hs.user, "alice");
        assert_eq!(hs.dc_index, 1);
        let _ = (write_task.await.unwrap(), &mut cli_r);
    }

    #[tokio::test]
    async fn rejects_reserved_dc_index_zero() {
        let secret = [0u8; 16];
        let users = vec![("alice".to_string(), secret)];
        let wire = build_handshake(&secret, 1); // dc_index = |1| - 1 = 0, reserved

        let (srv_r, srv_w, _cli_r, mut cli_w) = socket_pair().await;
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            cli_w.write_all(&wire).await.unwrap();
        });

        let err = perform_client_handshake(srv_r, srv_w, &users).await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedHandshake(_)));
    }

    #[tokio::test]
    async fn second_user_matches_their_own_handshake() {
        let secret_a = [1u8; 16];
        let secret_b = [2u8; 16];
        let users = vec![("alice".to_string(), secret_a), ("bob".to_string(), secret_b)];
        let wire = build_handshake(&secret_b, 3);

        let (srv_r, srv_w, _cli_r, mut cli_w) = socket_pair().await;
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            cli_w.write_all(&wire).await.unwrap();
        });

        let hs = perform_client_handshake(srv_r, srv_w, &users).await.unwrap();
        assert_eq!(hs.user, "bob");
        assert_eq!(hs.dc_index, 2);
    }
}
