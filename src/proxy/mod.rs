//! Proxy data model (§3) and the runtime selector built on top of it (§4.3).

pub mod pool;
pub mod types;

pub use pool::{PoolStats, ProxyPool, ProxyScore};
pub use types::{Anonymity, Proxy, ProxyCandidate, ProxyId, ProxyProtocol, same_slash_24};
