//! Session wiring for direct mode (C4 → C6): pairs the client handshake's
//! streams with the direct upstream's, applying fast-mode elision when
//! enabled (spec §4.5).

use crate::proxy::handshake::ClientHandshake;
use crate::proxy::masking::{elide_decryption, elide_encryption};
use crate::proxy::relay::{ClientHalves, UpstreamHalves};
use crate::transport::direct::DirectUpstream;

pub fn build_halves(client: ClientHandshake, upstream: DirectUpstream, fast_mode: bool) -> (ClientHalves, UpstreamHalves) {
    let ClientHandshake { reader: c_r, writer: c_w, .. } = client;
    let DirectUpstream { reader: u_r, writer: u_w } = upstream;

    let (u_r, c_w) = if fast_mode {
        (elide_decryption(u_r), elide_encryption(c_w))
    } else {
        (u_r, c_w)
    };

    (ClientHalves::Direct(c_r, c_w), UpstreamHalves::Direct(u_r, u_w))
}
