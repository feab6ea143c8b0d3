//! MTProto wire framings layered on top of the crypto-wrapped stream (C2):
//! abridged framing (client side, middle-proxy mode) and intermediate
//! framing (proxy↔middle-proxy).

use tokio::io::{AsyncRead, AsyncWrite};

use super::constants::{
    CBC_BLOCK, MAX_MSG_LEN, MIN_MSG_LEN, PADDING_FILLER, PROXY_REQ_EXTRA_SIZE, PROXY_REQ_FLAGS,
    PROXY_REQ_OUR_IP_PORT, PROXY_REQ_PROXY_TAG, PROXY_REQ_REMOTE_IP_PORT, RPC_CLOSE_EXT_U32,
    RPC_PROXY_ANS_U32, RPC_PROXY_REQ_U32,
};
use super::obfuscation::{CryptoReader, CryptoWriter};
use crate::crypto::{SecureRandom, crc32};
use crate::error::{ProxyError, Result};

const ABRIDGED_EXT_MARKER: u8 = 0x7f;
const ABRIDGED_EXT_BORDER: usize = 0x7f;
const ABRIDGED_MAX_LEN_DIV4: usize = 1 << 24;

pub struct AbridgedFrameReader<R> {
    inner: CryptoReader<R>,
}

impl<R: AsyncRead + Unpin + Send> AbridgedFrameReader<R> {
    pub fn new(inner: CryptoReader<R>) -> Self {
        Self { inner }
    }

    /// Reads one frame's payload. An empty result signals the peer closed.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let head = self.inner.read_exact(1).await?;
        let mut len = head[0] as usize;
        if len >= 0x80 {
            // High bit marks a quick-ack request; we don't act on it, just
            // strip it so the length stays in sync with the peer.
            len -= 0x80;
        }
        if len == ABRIDGED_EXT_MARKER as usize {
            let ext = self.inner.read_exact(3).await?;
            len = ext[0] as usize | (ext[1] as usize) << 8 | (ext[2] as usize) << 16;
        }
        self.inner.read_exact(len * 4).await
    }
}

pub struct AbridgedFrameWriter<W> {
    inner: CryptoWriter<W>,
}

impl<W: AsyncWrite + Unpin + Send> AbridgedFrameWriter<W> {
    pub fn new(inner: CryptoWriter<W>) -> Self {
        Self { inner }
    }

    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() % 4 != 0 {
            return Err(ProxyError::ProgrammerError(format!(
                "abridged payload length {} is not a multiple of 4",
                payload.len()
            )));
        }
        let len_div_four = payload.len() / 4;
        if len_div_four >= ABRIDGED_MAX_LEN_DIV4 {
            return Err(ProxyError::ProgrammerError(format!(
                "abridged payload too large: {} bytes",
                payload.len()
            )));
        }

        let mut out = Vec::with_capacity(4 + payload.len());
        if len_div_four < ABRIDGED_EXT_BORDER {
            out.push(len_div_four as u8);
        } else {
            out.push(ABRIDGED_EXT_MARKER);
            out.extend_from_slice(&(len_div_four as u32).to_le_bytes()[..3]);
        }
        out.extend_from_slice(payload);
        self.inner.write_all(&out).await
    }
}

pub struct IntermediateFrameReader<R> {
    inner: CryptoReader<R>,
    seq_no: i32,
}

impl<R: AsyncRead + Unpin + Send> IntermediateFrameReader<R> {
    pub fn new(inner: CryptoReader<R>, seq_no: i32) -> Self {
        Self { inner, seq_no }
    }

    /// Reads one frame's payload, validating length bounds, sequence number,
    /// and CRC32. An empty result signals the caller to close both sides
    /// (spec §4.1: "on any check failure, surface EOF to the caller").
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut len_bytes = self.inner.read_exact(4).await?;
        let mut msg_len = u32::from_le_bytes(len_bytes.clone().try_into().unwrap());
        while msg_len == 4 {
            len_bytes = self.inner.read_exact(4).await?;
            msg_len = u32::from_le_bytes(len_bytes.clone().try_into().unwrap());
        }

        if !(MIN_MSG_LEN..=MAX_MSG_LEN).contains(&msg_len) || msg_len % 4 != 0 {
            return Ok(Vec::new());
        }

        let seq_bytes = self.inner.read_exact(4).await?;
        let msg_seq = i32::from_le_bytes(seq_bytes.clone().try_into().unwrap());
        if msg_seq != self.seq_no {
            return Ok(Vec::new());
        }
        self.seq_no += 1;

        let payload = self.inner.read_exact(msg_len as usize - 12).await?;
        let checksum_bytes = self.inner.read_exact(4).await?;
        let checksum = u32::from_le_bytes(checksum_bytes.try_into().unwrap());

        let mut prefix = Vec::with_capacity(8 + payload.len());
        prefix.extend_from_slice(&len_bytes);
        prefix.extend_from_slice(&seq_bytes);
        prefix.extend_from_slice(&payload);
        if crc32(&prefix) != checksum {
            return Ok(Vec::new());
        }

        // Drain this frame's own block-alignment filler now, so a caller that
        // tears the reader down right after this call (`into_parts`, to
        // re-wrap the raw stream under a different cipher direction) hands
        // back a stream positioned exactly at the next frame's first byte.
        // Sized off the cipher's own block, matching the writer: 0 for
        // fast-mode/identity directions, which never produced any filler.
        let block_size = self.inner.block_size();
        let pad = (block_size - (msg_len as usize % block_size)) % block_size;
        if pad > 0 {
            self.inner.read_exact(pad).await?;
        }

        Ok(payload)
    }

    /// Tears down this reader, handing back its raw stream and the running
    /// sequence number so a new reader can be built over a re-wrapped
    /// (e.g. newly CBC-decrypted) version of the same stream without
    /// restarting the sequence count.
    pub fn into_parts(self) -> (R, i32) {
        (self.inner.into_inner(), self.seq_no)
    }
}

pub struct IntermediateFrameWriter<W> {
    inner: CryptoWriter<W>,
    seq_no: i32,
}

impl<W: AsyncWrite + Unpin + Send> IntermediateFrameWriter<W> {
    pub fn new(inner: CryptoWriter<W>, seq_no: i32) -> Self {
        Self { inner, seq_no }
    }

    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let len = (payload.len() + 12) as u32;
        let mut msg = Vec::with_capacity(len as usize + CBC_BLOCK);
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&self.seq_no.to_le_bytes());
        self.seq_no += 1;
        msg.extend_from_slice(payload);
        msg.extend_from_slice(&crc32(&msg).to_le_bytes());

        // Pad to the installed cipher's own block size, not a fixed CBC
        // width: under fast-mode/identity directions block_size is 1, so no
        // filler is ever needed (and none is sent — nothing for a later
        // `IntermediateFrameReader::read_frame` to drain).
        let block_size = self.inner.block_size();
        let pad = (block_size - (msg.len() % block_size)) % block_size;
        for _ in 0..(pad / PADDING_FILLER.len()) {
            msg.extend_from_slice(&PADDING_FILLER);
        }
        self.inner.write_all(&msg).await
    }

    /// See [`IntermediateFrameReader::into_parts`].
    pub fn into_parts(self) -> (W, i32) {
        (self.inner.into_inner(), self.seq_no)
    }
}

/// Outcome of [`ProxyReqReader::read_answer`].
pub enum ProxyAnswer {
    Payload(Vec<u8>),
    Closed,
}

/// Wraps an intermediate-framed, CBC-encrypted stream with the
/// `RPC_PROXY_REQ`/`RPC_PROXY_ANS` envelope (spec §4.1).
pub struct ProxyReqWriter<W> {
    inner: IntermediateFrameWriter<W>,
    ad_tag: [u8; 16],
    rng: SecureRandom,
}

impl<W: AsyncWrite + Unpin + Send> ProxyReqWriter<W> {
    pub fn new(inner: IntermediateFrameWriter<W>, ad_tag: [u8; 16]) -> Self {
        Self {
            inner,
            ad_tag,
            rng: SecureRandom::new(),
        }
    }

    pub async fn write_request(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() % 4 != 0 {
            return Err(ProxyError::ProgrammerError(format!(
                "proxy-req payload length {} is not a multiple of 4",
                payload.len()
            )));
        }

        let mut msg = Vec::with_capacity(84 + payload.len());
        msg.extend_from_slice(&RPC_PROXY_REQ_U32.to_le_bytes());
        msg.extend_from_slice(&PROXY_REQ_FLAGS);
        msg.extend_from_slice(&self.rng.fill_array::<8>());
        msg.extend_from_slice(&PROXY_REQ_REMOTE_IP_PORT);
        msg.extend_from_slice(&PROXY_REQ_OUR_IP_PORT);
        msg.extend_from_slice(&PROXY_REQ_EXTRA_SIZE);
        msg.extend_from_slice(&PROXY_REQ_PROXY_TAG);
        msg.push(self.ad_tag.len() as u8);
        msg.extend_from_slice(&self.ad_tag);
        msg.extend_from_slice(&[0u8; 3]);
        msg.extend_from_slice(payload);

        self.inner.write_frame(&msg).await
    }
}

pub struct ProxyReqReader<R> {
    inner: IntermediateFrameReader<R>,
}

impl<R: AsyncRead + Unpin + Send> ProxyReqReader<R> {
    pub fn new(inner: IntermediateFrameReader<R>) -> Self {
        Self { inner }
    }

    pub async fn read_answer(&mut self) -> Result<ProxyAnswer> {
        let frame = self.inner.read_frame().await?;
        if frame.len() < 16 {
            return Ok(ProxyAnswer::Closed);
        }
        let ans_type = u32::from_le_bytes(frame[0..4].try_into().unwrap());
        if ans_type == RPC_CLOSE_EXT_U32 {
            return Ok(ProxyAnswer::Closed);
        }
        if ans_type != RPC_PROXY_ANS_U32 {
            return Err(ProxyError::ProtocolViolation(format!(
                "expected RPC_PROXY_ANS, got {ans_type:#010x}"
            )));
        }
        Ok(ProxyAnswer::Payload(frame[16..].to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AesCtr;
    use crate::protocol::obfuscation::CtrDirection;
    use tokio::io::duplex;

    fn ctr_pair() -> ([u8; 32], [u8; 16]) {
        ([5u8; 32], [2u8; 16])
    }

    #[tokio::test]
    async fn abridged_small_frame_matches_known_wire_bytes() {
        let (client, server) = duplex(1024);
        let (_crd, mut cwr) = tokio::io::split(client);
        let (mut srd, _swr) = tokio::io::split(server);
        let (key, iv) = ctr_pair();

        let mut writer = AbridgedFrameWriter::new(CryptoWriter::new(
            &mut cwr,
            Box::new(CtrDirection(AesCtr::new(key, iv))),
            1,
        ));
        writer.write_frame(&[0xAA, 0xBB, 0xCC, 0xDD]).await.unwrap();

        // Decrypt directly to check the raw wire bytes (S5 in spec §8).
        let mut raw = [0u8; 5];
        tokio::io::AsyncReadExt::read_exact(&mut srd, &mut raw)
            .await
            .unwrap();
        let mut dec = AesCtr::new(key, iv);
        dec.apply_keystream(&mut raw);
        assert_eq!(raw, [0x01, 0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[tokio::test]
    async fn abridged_round_trip_through_reader() {
        let (client, server) = duplex(4096);
        let (_crd, mut cwr) = tokio::io::split(client);
        let (srd, _swr) = tokio::io::split(server);
        let (key, iv) = ctr_pair();

        let payload = vec![0x11u8; 512];
        let mut writer = AbridgedFrameWriter::new(CryptoWriter::new(
            &mut cwr,
            Box::new(CtrDirection(AesCtr::new(key, iv))),
            1,
        ));
        writer.write_frame(&payload).await.unwrap();

        let mut reader = AbridgedFrameReader::new(CryptoReader::new(
            srd,
            Box::new(CtrDirection(AesCtr::new(key, iv))),
            1,
        ));
        let got = reader.read_frame().await.unwrap();
        assert_eq!(got, payload);
    }

    #[tokio::test]
    async fn intermediate_round_trip_with_padding_frame_interleaved() {
        let (client, server) = duplex(8192);
        let (_crd, mut cwr) = tokio::io::split(client);
        let (srd, _swr) = tokio::io::split(server);
        let key = [9u8; 32];
        let iv = [1u8; 16];

        let mut writer = IntermediateFrameWriter::new(
            CryptoWriter::new(
                &mut cwr,
                Box::new(crate::protocol::obfuscation::CbcEncryptDirection { key, iv }),
                16,
            ),
            -2,
        );
        writer.write_frame(&[1, 2, 3, 4]).await.unwrap();

        let mut reader = IntermediateFrameReader::new(
            CryptoReader::new(
                srd,
                Box::new(crate::protocol::obfuscation::CbcDecryptDirection { key, iv }),
                16,
            ),
            -2,
        );
        let got = reader.read_frame().await.unwrap();
        assert_eq!(got, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn intermediate_reader_signals_close_on_sequence_mismatch() {
        let (client, server) = duplex(8192);
        let (_crd, mut cwr) = tokio::io::split(client);
        let (srd, _swr) = tokio::io::split(server);
        let key = [9u8; 32];
        let iv = [1u8; 16];

        // Write frame at seq 5 while reader expects seq 0.
        let mut writer = IntermediateFrameWriter::new(
            CryptoWriter::new(
                &mut cwr,
                Box::new(crate::protocol::obfuscation::CbcEncryptDirection { key, iv }),
                16,
            ),
            5,
        );
        writer.write_frame(&[9, 9, 9, 9]).await.unwrap();

        let mut reader = IntermediateFrameReader::new(
            CryptoReader::new(
                srd,
                Box::new(crate::protocol::obfuscation::CbcDecryptDirection { key, iv }),
                16,
            ),
            0,
        );
        let got = reader.read_frame().await.unwrap();
        assert!(got.is_empty());
    }
}
