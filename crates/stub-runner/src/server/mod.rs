//! Mock-server transport seam.
//!
//! The engine only needs two things from a transport: start a server for a
//! bundle on a port, and stop it again. [`StubServerTransport`] and
//! [`StubServerHandle`] are that contract. [`HttpStubTransport`] is the
//! built-in HTTP/HTTPS implementation.
//!
//! ## Module Structure
//!
//! - `http`: hyper based transport and its accept loop
//! - `handler`: per-request handling
//! - `matcher`: compiled request matching
//! - `tls`: rustls acceptor construction

mod handler;
mod http;
mod matcher;
mod tls;

use crate::config::TlsConfig;
use crate::coordinate::StubCoordinate;
use crate::error::TransportError;
use crate::mapping::MappingBundle;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use http::{HttpStubHandle, HttpStubTransport};
pub use matcher::{IncomingRequest, StubRoutes};
pub use tls::create_tls_acceptor;

/// Transport level setup for one stub server, decided before it binds.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerContext {
    pub host: String,
    pub port: u16,
    /// Serve HTTPS with this certificate when set
    pub tls: Option<TlsConfig>,
    /// Added to every response the server sends
    pub response_headers: HashMap<String, String>,
}

impl ServerContext {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: None,
            response_headers: HashMap::new(),
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() {
            "https"
        } else {
            "http"
        }
    }
}

/// Caller supplied hook that adjusts the server context before bind.
///
/// It receives the bundle that will be served (already consumer filtered).
/// The port it receives is the allocated one; changing it is ignored.
pub type StubConfigurer = Arc<dyn Fn(&MappingBundle, ServerContext) -> ServerContext + Send + Sync>;

/// Configurer that leaves the context untouched.
pub fn noop_configurer() -> StubConfigurer {
    Arc::new(|_bundle: &MappingBundle, context: ServerContext| context)
}

/// Starts mock servers.
#[async_trait]
pub trait StubServerTransport: Send + Sync {
    /// Start serving `bundle` on `context.port`.
    ///
    /// Must return [`TransportError::Bind`] when the port is taken so the
    /// caller can retry elsewhere.
    async fn start(
        &self,
        coordinate: &StubCoordinate,
        bundle: MappingBundle,
        context: ServerContext,
    ) -> Result<Arc<dyn StubServerHandle>, TransportError>;
}

/// A running mock server.
#[async_trait]
pub trait StubServerHandle: Send + Sync + fmt::Debug {
    fn port(&self) -> u16;

    fn is_running(&self) -> bool;

    /// Stop the server. Stopping a stopped server is a no-op.
    async fn stop(&self) -> Result<(), TransportError>;
}
