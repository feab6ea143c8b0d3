//! Session wiring for middle-proxy mode (C5 → C6): the client side gets
//! abridged framing layered over its existing CTR streams; the upstream
//! side is already framed by the proxy-req codec (spec §4.5).

use crate::protocol::frame::{AbridgedFrameReader, AbridgedFrameWriter};
use crate::proxy::handshake::ClientHandshake;
use crate::proxy::relay::{ClientHalves, UpstreamHalves};
use crate::transport::middle_proxy::MiddleProxyUpstream;

pub fn build_halves(client: ClientHandshake, upstream: MiddleProxyUpstream) -> (ClientHalves, UpstreamHalves) {
    let ClientHandshake { reader: c_r, writer: c_w, .. } = client;
    let client_halves = ClientHalves::MiddleProxy(AbridgedFrameReader::new(c_r), AbridgedFrameWriter::new(c_w));
    let upstream_halves = UpstreamHalves::MiddleProxy(upstream.reader, upstream.writer);
    (client_halves, upstream_halves)
}
