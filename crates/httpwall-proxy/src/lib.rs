//! httpwall Proxy
//!
//! Reverse proxy that runs httpwall policies in front of an HTTP application.
//!
//! Every proxied exchange goes through the inbound chain before it reaches
//! the application and through the outbound chain before the client sees the
//! response.

pub mod config;
pub mod proxy;
pub mod routes;

pub use config::{IdentityConfig, Overrides, ProxyConfig};
pub use proxy::{identify, inspect, AppState};
pub use routes::{create_router, protect};
