//! Upstream connections: direct-to-datacenter (C4) and via-middle-proxy (C5).

pub mod direct;
pub mod middle_proxy;

pub use direct::{DirectUpstream, connect_direct, connect_direct_to};
pub use middle_proxy::{MiddleProxyUpstream, connect_middle_proxy, connect_middle_proxy_to};
