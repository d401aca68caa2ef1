//! HTTP surfaces: the broker API and the sticky session proxy.

pub mod broker;
pub mod proxy;

pub use broker::{AppState, broker_router};
pub use proxy::{ProxyState, backend_index, proxy_router};
