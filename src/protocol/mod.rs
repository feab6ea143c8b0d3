//! MTProto wire format: constants, crypto-wrapped streams, and frame codecs.

pub mod constants;
pub mod frame;
pub mod obfuscation;

pub use constants::*;
pub use frame::{
    AbridgedFrameReader, AbridgedFrameWriter, IntermediateFrameReader, IntermediateFrameWriter,
    ProxyAnswer, ProxyReqReader, ProxyReqWriter,
};
pub use obfuscation::{
    CbcDecryptDirection, CbcEncryptDirection, CryptoReader, CryptoWriter, CtrDirection, Direction,
    IdentityDirection,
};