//! Middle-proxy handshake (C5): per-session `CONNECT → NONCE_SENT →
//! HANDSHAKE_SENT → RELAY` exchange with a Telegram middle proxy, carried
//! over AES-CBC-encrypted MTProto intermediate framing (spec §4.4).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::crypto::{SecureRandom, derive_middleproxy_keys};
use crate::error::{ProxyError, Result};
use crate::protocol::constants::{
    RPC_CRYPTO_AES_U32, RPC_HANDSHAKE_PEER_PID, RPC_HANDSHAKE_SENDER_PID, RPC_HANDSHAKE_U32,
    RPC_NONCE_U32, TG_MIDDLE_PROXIES_V4, proxy_secret,
};
use crate::protocol::frame::{IntermediateFrameReader, IntermediateFrameWriter, ProxyReqReader, ProxyReqWriter};
use crate::protocol::obfuscation::{CbcDecryptDirection, CbcEncryptDirection, CryptoReader, CryptoWriter, IdentityDirection};

const START_SEQ_NO: i32 = -2;
const RPC_NONCE_ANS_LEN: usize = 32;
const RPC_HANDSHAKE_ANS_LEN: usize = 32;

pub struct MiddleProxyUpstream {
    pub reader: ProxyReqReader<OwnedReadHalf>,
    pub writer: ProxyReqWriter<OwnedWriteHalf>,
}

fn middle_proxy_address(dc_index: i32) -> Result<(&'static str, u16)> {
    usize::try_from(dc_index)
        .ok()
        .filter(|&i| i < TG_MIDDLE_PROXIES_V4.len())
        .map(|i| TG_MIDDLE_PROXIES_V4[i])
        .ok_or_else(|| {
            ProxyError::UpstreamUnreachable(format!("dc_index {dc_index} has no middle proxy"))
        })
}

fn reversed_ipv4_octets(addr: IpAddr) -> Result<[u8; 4]> {
    match addr {
        IpAddr::V4(v4) => {
            let mut octets = v4.octets();
            octets.reverse();
            Ok(octets)
        }
        IpAddr::V6(_) => Err(ProxyError::ProtocolViolation(
            "middle-proxy mode requires an IPv4 peer (see DESIGN.md)".into(),
        )),
    }
}

/// Connects to `MIDDLE[dc_index]` and performs the full handshake up to and
/// including `RPC_HANDSHAKE`, returning a stream ready for proxy-req framing.
///
/// `my_ip` is the proxy's own publicly-reachable IPv4 address (spec §6),
/// required for the key-mixing formula's `clt_ip` term.
pub async fn connect_middle_proxy(
    dc_index: i32,
    ad_tag: [u8; 16],
    my_ip: Ipv4Addr,
) -> Result<MiddleProxyUpstream> {
    let (host, port) = middle_proxy_address(dc_index)?;
    connect_middle_proxy_to((host, port), ad_tag, my_ip).await
}

/// Does the actual TCP connect plus handshake against an arbitrary
/// `(host, port)`. Split out from `connect_middle_proxy` so tests can point
/// it at a loopback listener standing in for a middle proxy (spec §8, S6)
/// without needing real network access or a fake DNS table.
pub async fn connect_middle_proxy_to(
    addr: (&str, u16),
    ad_tag: [u8; 16],
    my_ip: Ipv4Addr,
) -> Result<MiddleProxyUpstream> {
    let (host, port) = addr;
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| ProxyError::UpstreamUnreachable(format!("connect to {host}:{port}: {e}")))?;
    stream.set_nodelay(true).ok();

    let peer_addr: SocketAddr = stream.peer_addr().map_err(ProxyError::Io)?;
    let local_addr: SocketAddr = stream.local_addr().map_err(ProxyError::Io)?;
    let (read_half, write_half) = stream.into_split();

    let secret = proxy_secret();
    let key_selector: [u8; 4] = secret[..4].try_into().unwrap();
    let crypto_ts_le = ((SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs())
        % (1u64 << 32)) as u32;
    let crypto_ts = crypto_ts_le.to_le_bytes();
    let nonce_clt: [u8; 16] = SecureRandom::new().fill_array();

    // CONNECT -> NONCE_SENT: plaintext intermediate framing (no cipher installed yet).
    let mut plain_writer = IntermediateFrameWriter::new(
        CryptoWriter::new(write_half, Box::new(IdentityDirection), 1),
        START_SEQ_NO,
    );
    let mut nonce_msg = Vec::with_capacity(RPC_NONCE_ANS_LEN);
    nonce_msg.extend_from_slice(&RPC_NONCE_U32.to_le_bytes());
    nonce_msg.extend_from_slice(&key_selector);
    nonce_msg.extend_from_slice(&RPC_CRYPTO_AES_U32.to_le_bytes());
    nonce_msg.extend_from_slice(&crypto_ts);
    nonce_msg.extend_from_slice(&nonce_clt);
    plain_writer.write_frame(&nonce_msg).await?;

    let mut plain_reader = IntermediateFrameReader::new(
        CryptoReader::new(read_half, Box::new(IdentityDirection), 1),
        START_SEQ_NO,
    );
    let ans = plain_reader.read_frame().await?;
    if ans.len() != RPC_NONCE_ANS_LEN {
        return Err(ProxyError::ProtocolViolation(
            "RPC_NONCE answer was not 32 bytes".into(),
        ));
    }
    let rpc_type = u32::from_le_bytes(ans[0..4].try_into().unwrap());
    let rpc_schema = u32::from_le_bytes(ans[8..12].try_into().unwrap());
    let nonce_srv: [u8; 16] = ans[16..32].try_into().unwrap();
    if rpc_type != RPC_NONCE_U32 || ans[4..8] != key_selector || rpc_schema != RPC_CRYPTO_AES_U32 {
        return Err(ProxyError::ProtocolViolation(
            "RPC_NONCE answer had an unexpected type, key selector, or schema".into(),
        ));
    }

    let srv_ip = reversed_ipv4_octets(peer_addr.ip())?;
    let clt_ip = reversed_ipv4_octets(IpAddr::V4(my_ip))?;
    let srv_port = peer_addr.port().to_le_bytes();
    let clt_port = local_addr.port().to_le_bytes();

    let (enc_key, enc_iv) = derive_middleproxy_keys(
        &nonce_srv, &nonce_clt, &crypto_ts, &srv_ip, &clt_port, b"CLIENT", &clt_ip, &srv_port,
        &secret, None, None,
    );
    let (dec_key, dec_iv) = derive_middleproxy_keys(
        &nonce_srv, &nonce_clt, &crypto_ts, &srv_ip, &clt_port, b"SERVER", &clt_ip, &srv_port,
        &secret, None, None,
    );

    // NONCE_SENT -> HANDSHAKE_SENT: re-wrap the same raw halves in CBC,
    // carrying the running sequence number forward unchanged.
    let (raw_write, write_seq) = plain_writer.into_parts();
    let (raw_read, read_seq) = plain_reader.into_parts();

    let mut cbc_writer = IntermediateFrameWriter::new(
        CryptoWriter::new(raw_write, Box::new(CbcEncryptDirection { key: enc_key, iv: enc_iv }), 16),
        write_seq,
    );
    let mut handshake_msg = Vec::with_capacity(RPC_HANDSHAKE_ANS_LEN);
    handshake_msg.extend_from_slice(&RPC_HANDSHAKE_U32.to_le_bytes());
    handshake_msg.extend_from_slice(&[0u8; 4]);
    handshake_msg.extend_from_slice(&RPC_HANDSHAKE_SENDER_PID);
    handshake_msg.extend_from_slice(&RPC_HANDSHAKE_PEER_PID);
    cbc_writer.write_frame(&handshake_msg).await?;

    let mut cbc_reader = IntermediateFrameReader::new(
        CryptoReader::new(raw_read, Box::new(CbcDecryptDirection { key: dec_key, iv: dec_iv }), 16),
        read_seq,
    );
    let hs_ans = cbc_reader.read_frame().await?;
    if hs_ans.len() != RPC_HANDSHAKE_ANS_LEN {
        return Err(ProxyError::ProtocolViolation(
            "RPC_HANDSHAKE answer was not 32 bytes".into(),
        ));
    }
    let hs_type = u32::from_le_bytes(hs_ans[0..4].try_into().unwrap());
    if hs_type != RPC_HANDSHAKE_U32 || hs_ans[20..32] != RPC_HANDSHAKE_SENDER_PID {
        return Err(ProxyError::ProtocolViolation(
            "RPC_HANDSHAKE answer had an unexpected type or peer_pid".into(),
        ));
    }

    // HANDSHAKE_SENT -> RELAY.
    Ok(MiddleProxyUpstream {
        reader: ProxyReqReader::new(cbc_reader),
        writer: ProxyReqWriter::new(cbc_writer, ad_tag),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_dc_index_out_of_range() {
        assert!(middle_proxy_address(99).is_err());
    }

    #[test]
    fn resolves_in_range_dc_index() {
        assert!(middle_proxy_address(1).is_ok());
    }
}
