//! Crypto primitives (C1): AES-CTR / AES-CBC stream ciphers, hashes, CRC32.
//!
//! Kept deliberately thin — everything here is a direct wrapper over RustCrypto
//! crates, with no MTProto-specific framing. Framing lives in `crate::protocol`.

use aes::Aes256;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use ctr::cipher::{KeyIvInit as CtrKeyIvInit, StreamCipher};
use rand::RngCore;
use sha2::Digest;

use crate::error::{ProxyError, Result};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// One AES-256-CTR keystream, bound to a single direction of a single session.
///
/// `apply_keystream` both encrypts and decrypts (CTR is an XOR cipher), and
/// mutates internal counter state — it must never be reused across directions
/// or sessions (spec invariant: `(key, iv)` used at most once per direction).
pub struct AesCtr {
    inner: Aes256Ctr,
}

impl AesCtr {
    pub fn new(key: [u8; 32], iv: [u8; 16]) -> Self {
        Self {
            inner: Aes256Ctr::new((&key).into(), (&iv).into()),
        }
    }

    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        self.inner.apply_keystream(data);
    }
}

/// AES-256-CBC, block size 16, no padding — the caller (the crypto-wrapped
/// stream in `crate::protocol::obfuscation`) guarantees block-aligned input.
///
/// Unlike `AesCtr` this type is stateless between calls by design: callers
/// reconstruct it with the next IV (the previous call's last ciphertext
/// block) for every write, mirroring the way the reference implementation
/// chains CBC across writes without holding a live cipher object.
pub struct AesCbc {
    key: [u8; 32],
    iv: [u8; 16],
}

impl AesCbc {
    pub fn new(key: [u8; 32], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    pub fn encrypt_in_place(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() % 16 != 0 {
            return Err(ProxyError::ProgrammerError(format!(
                "CBC encrypt of {} bytes not block-aligned",
                buf.len()
            )));
        }
        let enc = Aes256CbcEnc::new((&self.key).into(), (&self.iv).into());
        let len = buf.len();
        enc.encrypt_padded_mut::<NoPadding>(buf, len)
            .map_err(|e| ProxyError::Crypto(format!("cbc encrypt: {e}")))?;
        Ok(())
    }

    pub fn decrypt_in_place(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() % 16 != 0 {
            return Err(ProxyError::ProgrammerError(format!(
                "CBC decrypt of {} bytes not block-aligned",
                buf.len()
            )));
        }
        let dec = Aes256CbcDec::new((&self.key).into(), (&self.iv).into());
        dec.decrypt_padded_mut::<NoPadding>(buf)
            .map_err(|e| ProxyError::Crypto(format!("cbc decrypt: {e}")))?;
        Ok(())
    }
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    sha2::Sha256::digest(data).into()
}

pub fn sha1(data: &[u8]) -> [u8; 20] {
    use sha1::Digest as _;
    sha1::Sha1::digest(data).into()
}

pub fn md5(data: &[u8]) -> [u8; 16] {
    use md5::Digest as _;
    md5::Md5::digest(data).into()
}

pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// MTProto middle-proxy key mixer (spec §4.4): derives a 32-byte AES key and
/// 16-byte IV for one direction ("CLIENT" or "SERVER") from the nonce
/// exchange and the shared `PROXY_SECRET`.
///
/// `srv_ip`/`clt_ip` must already be big-endian-then-byte-reversed (i.e. what
/// `Ipv4Addr::octets()` gives you, reversed) — callers build that once and
/// pass it in rather than this function guessing endianness conventions.
#[allow(clippy::too_many_arguments)]
pub fn derive_middleproxy_keys(
    nonce_srv: &[u8; 16],
    nonce_clt: &[u8; 16],
    crypto_ts: &[u8; 4],
    srv_ip: &[u8; 4],
    clt_port: &[u8; 2],
    purpose: &[u8; 6],
    clt_ip: &[u8; 4],
    srv_port: &[u8; 2],
    secret: &[u8],
    clt_ipv6: Option<&[u8; 16]>,
    srv_ipv6: Option<&[u8; 16]>,
) -> ([u8; 32], [u8; 16]) {
    let mut s = Vec::with_capacity(16 + 16 + 4 + 4 + 2 + 6 + 4 + 2 + secret.len() + 16 + 32 + 16);
    s.extend_from_slice(nonce_srv);
    s.extend_from_slice(nonce_clt);
    s.extend_from_slice(crypto_ts);
    s.extend_from_slice(srv_ip);
    s.extend_from_slice(clt_port);
    s.extend_from_slice(purpose);
    s.extend_from_slice(clt_ip);
    s.extend_from_slice(srv_port);
    s.extend_from_slice(secret);
    s.extend_from_slice(nonce_srv);
    if let (Some(c6), Some(s6)) = (clt_ipv6, srv_ipv6) {
        s.extend_from_slice(c6);
        s.extend_from_slice(s6);
    }
    s.extend_from_slice(nonce_clt);

    let md5_head = md5(&s[1..]);
    let sha1_tail = sha1(&s);
    let mut key = [0u8; 32];
    key[..12].copy_from_slice(&md5_head[..12]);
    key[12..].copy_from_slice(&sha1_tail);

    let iv = md5(&s[2..]);
    (key, iv)
}

/// Thin wrapper over the thread-local CSPRNG so call sites read like the
/// teacher's `rng.bytes(n)` / fixed-size fill idiom instead of reaching for
/// `rand::rng()` directly everywhere.
#[derive(Default, Clone, Copy)]
pub struct SecureRandom;

impl SecureRandom {
    pub fn new() -> Self {
        Self
    }

    pub fn bytes(&self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        rand::rng().fill_bytes(&mut buf);
        buf
    }

    pub fn fill_array<const N: usize>(&self) -> [u8; N] {
        let mut buf = [0u8; N];
        rand::rng().fill_bytes(&mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctr_round_trips() {
        let key = [7u8; 32];
        let iv = [3u8; 16];
        let mut enc = AesCtr::new(key, iv);
        let mut dec = AesCtr::new(key, iv);

        let plaintext = b"hello mtproto obfuscation layer".to_vec();
        let mut buf = plaintext.clone();
        enc.apply_keystream(&mut buf);
        assert_ne!(buf, plaintext);
        dec.apply_keystream(&mut buf);
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn cbc_round_trips_block_aligned() {
        let key = [9u8; 32];
        let iv = [1u8; 16];
        let mut data = b"0123456789abcdef0123456789abcdef".to_vec(); // 32 bytes
        let original = data.clone();

        AesCbc::new(key, iv).encrypt_in_place(&mut data).unwrap();
        assert_ne!(data, original);
        AesCbc::new(key, iv).decrypt_in_place(&mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn cbc_rejects_unaligned_input() {
        let cbc = AesCbc::new([0u8; 32], [0u8; 16]);
        let mut buf = vec![0u8; 15];
        assert!(cbc.encrypt_in_place(&mut buf).is_err());
    }

    #[test]
    fn crc32_matches_known_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn middleproxy_key_mix_is_deterministic_and_direction_distinct() {
        let nonce_srv = [1u8; 16];
        let nonce_clt = [2u8; 16];
        let ts = [3u8; 4];
        let srv_ip = [4u8; 4];
        let clt_port = [5u8; 2];
        let clt_ip = [6u8; 4];
        let srv_port = [7u8; 2];
        let secret = [8u8; 256];

        let (k1, iv1) = derive_middleproxy_keys(
            &nonce_srv, &nonce_clt, &ts, &srv_ip, &clt_port, b"CLIENT", &clt_ip, &srv_port,
            &secret, None, None,
        );
        let (k2, iv2) = derive_middleproxy_keys(
            &nonce_srv, &nonce_clt, &ts, &srv_ip, &clt_port, b"SERVER", &clt_ip, &srv_port,
            &secret, None, None,
        );
        assert_ne!(k1, k2);
        assert_ne!(iv1, iv2);

        let (k1_again, iv1_again) = derive_middleproxy_keys(
            &nonce_srv, &nonce_clt, &ts, &srv_ip, &clt_port, b"CLIENT", &clt_ip, &srv_port,
            &secret, None, None,
        );
        assert_eq!(k1, k1_again);
        assert_eq!(iv1, iv1_again);
    }
}
