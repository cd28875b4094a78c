//! Upstream provider adapters.

mod gateway;

pub use gateway::{classify_upstream, GatewayAdapter};
