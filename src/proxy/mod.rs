//! Session-level plumbing: handshakes, per-mode wiring, relay, and the
//! top-level connection orchestrator.

pub mod client;
pub mod direct_relay;
pub mod handshake;
pub mod masking;
pub mod middle_relay;
pub mod relay;

pub use client::ClientHandler;
pub use handshake::ClientHandshake;
