//! Fast-mode elision (spec §4.5): once the upstream decryptor and the
//! client-facing encryptor are known to share keystream state (§4.3 step 4),
//! swap both for the identity direction so the relay copies DC ciphertext to
//! the client verbatim instead of paying two cancelling cipher passes.

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::protocol::obfuscation::{CryptoReader, CryptoWriter, IdentityDirection};

pub fn elide_decryption(reader: CryptoReader<OwnedReadHalf>) -> CryptoReader<OwnedReadHalf> {
    CryptoReader::new(reader.into_inner(), Box::new(IdentityDirection), 1)
}

pub fn elide_encryption(writer: CryptoWriter<OwnedWriteHalf>) -> CryptoWriter<OwnedWriteHalf> {
    CryptoWriter::new(writer.into_inner(), Box::new(IdentityDirection), 1)
}
