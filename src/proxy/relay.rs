//! Relay & accounting (C6): one pair of cooperative forwarders per session.
//!
//! Direct mode forwards raw decrypted bytes; middle-proxy mode forwards one
//! discrete frame/answer per iteration. Both shapes mirror the same
//! read-or-close, write-and-flush loop described in spec §4.5 — expressed as
//! two concrete workers rather than one generic one, since the frame-oriented
//! and byte-oriented sides don't share a wire-level vocabulary worth
//! abstracting over.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use crate::protocol::frame::{AbridgedFrameReader, AbridgedFrameWriter, ProxyAnswer, ProxyReqReader, ProxyReqWriter};
use crate::protocol::obfuscation::{CryptoReader, CryptoWriter};
use crate::stats::StatsRegistry;

/// The client-facing half of an established session.
pub enum ClientHalves {
    Direct(CryptoReader<OwnedReadHalf>, CryptoWriter<OwnedWriteHalf>),
    MiddleProxy(AbridgedFrameReader<OwnedReadHalf>, AbridgedFrameWriter<OwnedWriteHalf>),
}

/// The upstream-facing half of an established session.
pub enum UpstreamHalves {
    Direct(CryptoReader<OwnedReadHalf>, CryptoWriter<OwnedWriteHalf>),
    MiddleProxy(ProxyReqReader<OwnedReadHalf>, ProxyReqWriter<OwnedWriteHalf>),
}

/// Runs both forwarders of one session to completion. Returns once both
/// directions have torn down — normal EOF, a protocol error, or a plain
/// socket error all end a worker the same way: close the destination and
/// stop (spec §4.5/§7, "no retries").
pub async fn run_session(client: ClientHalves, upstream: UpstreamHalves, user: String, stats: StatsRegistry, read_buf_size: usize) {
    match (client, upstream) {
        (ClientHalves::Direct(c_r, c_w), UpstreamHalves::Direct(u_r, u_w)) => {
            let (user_a, stats_a) = (user.clone(), stats.clone());
            tokio::join!(
                direct_worker(c_r, u_w, user_a, stats_a, read_buf_size),
                direct_worker(u_r, c_w, user, stats, read_buf_size),
            );
        }
        (ClientHalves::MiddleProxy(c_r, c_w), UpstreamHalves::MiddleProxy(u_r, u_w)) => {
            let (user_a, stats_a) = (user.clone(), stats.clone());
            tokio::join!(
                middle_worker_to_upstream(c_r, u_w, user_a, stats_a),
                middle_worker_to_client(u_r, c_w, user, stats),
            );
        }
        _ => unreachable!("client and upstream halves are always constructed for the same mode"),
    }
}

async fn direct_worker<R, W>(mut src: CryptoReader<R>, mut dst: CryptoWriter<W>, user: String, stats: StatsRegistry, read_buf_size: usize)
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    stats.worker_started(&user);
    loop {
        match src.read(read_buf_size).await {
            Ok(data) if data.is_empty() => {
                let _ = dst.shutdown().await;
                break;
            }
            Ok(data) => {
                stats.add_octets(&user, data.len() as u64);
                if dst.write_all(&data).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(user = %user, "relay worker read error: {e}");
                break;
            }
        }
    }
    stats.worker_stopped(&user);
}

async fn middle_worker_to_upstream(mut src: AbridgedFrameReader<OwnedReadHalf>, mut dst: ProxyReqWriter<OwnedWriteHalf>, user: String, stats: StatsRegistry) {
    stats.worker_started(&user);
    loop {
        match src.read_frame().await {
            Ok(payload) if payload.is_empty() => break,
            Ok(payload) => {
                stats.add_octets(&user, payload.len() as u64);
                if dst.write_request(&payload).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(user = %user, "client->middle-proxy worker error: {e}");
                break;
            }
        }
    }
    stats.worker_stopped(&user);
}

async fn middle_worker_to_client(mut src: ProxyReqReader<OwnedReadHalf>, mut dst: AbridgedFrameWriter<OwnedWriteHalf>, user: String, stats: StatsRegistry) {
    stats.worker_started(&user);
    loop {
        match src.read_answer().await {
            Ok(ProxyAnswer::Closed) => break,
            Ok(ProxyAnswer::Payload(payload)) => {
                stats.add_octets(&user, payload.len() as u64);
                if dst.write_frame(&payload).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(user = %user, "middle-proxy->client worker error: {e}");
                break;
            }
        }
    }
    stats.worker_stopped(&user);
}
