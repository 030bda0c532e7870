//! Intercepting proxy
//!
//! This module drives one exchange per client connection: parse the request,
//! run lifecycle hooks, forward or tunnel, then stream the response back.

pub mod dispatch;
pub mod hooks;
pub mod resolve;
pub mod server;
pub mod session;
mod tunnel;
pub mod upstream;

pub use dispatch::{Dispatcher, HttpDispatcher};
pub use hooks::{FailureAction, Hooks, SessionListener};
pub use resolve::{DnsResolver, Resolver};
pub use server::{ProxyServer, ProxyServerBuilder};
pub use session::{Destination, Session, SessionStatus};
pub use upstream::UpstreamProxy;
