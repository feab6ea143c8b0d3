//! Direct upstream handshake (C4): connect straight to a Telegram datacenter
//! and synthesize a valid obfuscated nonce the same way a real client would.

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::crypto::{AesCtr, SecureRandom};
use crate::error::{ProxyError, Result};
use crate::protocol::constants::{
    HANDSHAKE_LEN, IV_LEN, KEY_LEN, MAGIC_VAL_POS, MAGIC_VAL_TO_CHECK, SKIP_LEN, TG_DATACENTERS_V4,
    TG_DATACENTERS_V6, TG_DATACENTER_PORT, reserved_nonce,
};
use crate::protocol::obfuscation::{CryptoReader, CryptoWriter, CtrDirection};

pub struct DirectUpstream {
    pub reader: CryptoReader<OwnedReadHalf>,
    pub writer: CryptoWriter<OwnedWriteHalf>,
}

fn datacenter_address(dc_index: i32, prefer_ipv6: bool) -> Result<(String, u16)> {
    let table: &[&str] = if prefer_ipv6 {
        &TG_DATACENTERS_V6
    } else {
        &TG_DATACENTERS_V4
    };
    let idx = usize::try_from(dc_index).ok().filter(|&i| i < table.len());
    match idx {
        Some(i) => Ok((table[i].to_string(), TG_DATACENTER_PORT)),
        None => Err(ProxyError::UpstreamUnreachable(format!(
            "dc_index {dc_index} out of range for the configured address family"
        ))),
    }
}

fn is_reserved_nonce(rnd: &[u8]) -> bool {
    if rnd[0] == reserved_nonce::FIRST_BYTE {
        return true;
    }
    if reserved_nonce::BEGINNINGS.iter().any(|b| &rnd[0..4] == b) {
        return true;
    }
    if rnd[4..8] == reserved_nonce::CONTINUATION {
        return true;
    }
    false
}

fn generate_nonce(rng: &SecureRandom) -> [u8; HANDSHAKE_LEN] {
    loop {
        let candidate = rng.fill_array::<HANDSHAKE_LEN>();
        if !is_reserved_nonce(&candidate) {
            return candidate;
        }
    }
}

/// Opens a direct connection to `DC[dc_index]:443` and performs the
/// synthetic-client handshake of spec §4.3.
///
/// `fast_mode_reuse` is `Some(client_enc_key_iv)` (the client-facing
/// proxy→client `enc_key || enc_iv`, 48 bytes) when fast mode is enabled —
/// reusing it here is what lets the relay elide re-encryption later (§4.5).
pub async fn connect_direct(
    dc_index: i32,
    prefer_ipv6: bool,
    fast_mode_reuse: Option<[u8; 48]>,
) -> Result<DirectUpstream> {
    let (host, port) = datacenter_address(dc_index, prefer_ipv6)?;
    connect_direct_to((host.as_str(), port), fast_mode_reuse).await
}

/// Does the actual TCP connect plus handshake against an arbitrary
/// `(host, port)`. Split out from `connect_direct` so tests can point it at
/// a loopback listener standing in for a Telegram datacenter (spec §8, S3/S4)
/// without needing real network access or a fake DNS table.
pub async fn connect_direct_to(
    addr: (&str, u16),
    fast_mode_reuse: Option<[u8; 48]>,
) -> Result<DirectUpstream> {
    let (host, port) = addr;
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| ProxyError::UpstreamUnreachable(format!("connect to {host}:{port}: {e}")))?;
    stream.set_nodelay(true).ok();

    let rng = SecureRandom::new();
    let mut nonce = generate_nonce(&rng);
    nonce[MAGIC_VAL_POS..MAGIC_VAL_POS + 4].copy_from_slice(&MAGIC_VAL_TO_CHECK);

    if let Some(client_enc_key_iv) = fast_mode_reuse {
        let mut reversed = client_enc_key_iv;
        reversed.reverse();
        nonce[SKIP_LEN..SKIP_LEN + KEY_LEN + IV_LEN].copy_from_slice(&reversed);
    }

    let mut dec_key_and_iv = nonce[SKIP_LEN..SKIP_LEN + KEY_LEN + IV_LEN].to_vec();
    dec_key_and_iv.reverse();
    let dec_key: [u8; KEY_LEN] = dec_key_and_iv[..KEY_LEN].try_into().unwrap();
    let dec_iv: [u8; IV_LEN] = dec_key_and_iv[KEY_LEN..].try_into().unwrap();

    let enc_key_and_iv = &nonce[SKIP_LEN..SKIP_LEN + KEY_LEN + IV_LEN];
    let enc_key: [u8; KEY_LEN] = enc_key_and_iv[..KEY_LEN].try_into().unwrap();
    let enc_iv: [u8; IV_LEN] = enc_key_and_iv[KEY_LEN..].try_into().unwrap();

    let mut encryptor = AesCtr::new(enc_key, enc_iv);
    // Run the keystream over the whole nonce (even though only the tail is
    // sent encrypted) so the encryptor's counter ends up where the peer's
    // decryptor expects once real traffic starts at byte 64.
    let mut keystreamed = nonce;
    encryptor.apply_keystream(&mut keystreamed);

    let mut wire = [0u8; HANDSHAKE_LEN];
    wire[..MAGIC_VAL_POS].copy_from_slice(&nonce[..MAGIC_VAL_POS]);
    wire[MAGIC_VAL_POS..].copy_from_slice(&keystreamed[MAGIC_VAL_POS..]);

    let (read_half, write_half) = stream.into_split();
    let mut write_half = write_half;
    write_half
        .write_all(&wire)
        .await
        .map_err(ProxyError::Io)?;

    let writer = CryptoWriter::new(write_half, Box::new(CtrDirection(encryptor)), 1);
    let reader = CryptoReader::new(read_half, Box::new(CtrDirection(AesCtr::new(dec_key, dec_iv))), 1);

    Ok(DirectUpstream { reader, writer })
}
