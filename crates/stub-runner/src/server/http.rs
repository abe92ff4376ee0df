//! HTTP/HTTPS stub server transport built on hyper.
//!
//! Each started server owns one listener and an accept loop task. Stopping
//! flips a `watch` flag seen by the loop and by every open connection, then
//! waits for the loop to exit so the port is free again. The flag is sticky,
//! so a stop issued before the loop first runs is not lost.

use super::handler::handle_stub_request;
use super::matcher::StubRoutes;
use super::tls::create_tls_acceptor;
use super::{ServerContext, StubServerHandle, StubServerTransport};
use crate::coordinate::StubCoordinate;
use crate::error::TransportError;
use crate::mapping::MappingBundle;
use async_trait::async_trait;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Serves mapping bundles over HTTP/1.1, or HTTPS when the context carries TLS.
#[derive(Debug, Clone)]
pub struct HttpStubTransport {
    stop_timeout: Duration,
}

impl HttpStubTransport {
    pub fn new() -> Self {
        Self {
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// How long `stop` waits for the accept loop to finish
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }
}

impl Default for HttpStubTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StubServerTransport for HttpStubTransport {
    async fn start(
        &self,
        coordinate: &StubCoordinate,
        bundle: MappingBundle,
        context: ServerContext,
    ) -> Result<Arc<dyn StubServerHandle>, TransportError> {
        let routes = Arc::new(StubRoutes::compile(&bundle, context.response_headers.clone())?);
        let tls_acceptor = context.tls.as_ref().map(create_tls_acceptor).transpose()?;

        let port = context.port;
        let listener = TcpListener::bind((context.host.as_str(), port))
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AddrInUse | ErrorKind::PermissionDenied => TransportError::Bind {
                    port,
                    reason: e.to_string(),
                },
                _ => TransportError::Start(format!(
                    "Failed to bind {}:{}: {e}",
                    context.host, port
                )),
            })?;

        info!(
            "Stub server for {} bound to {}://{}:{} serving {} mapping(s)",
            coordinate,
            context.scheme(),
            context.host,
            port,
            routes.len()
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stub_name: Arc<str> = Arc::from(coordinate.artifact_id.as_str());
        let task = tokio::spawn(accept_loop(
            listener,
            port,
            routes,
            tls_acceptor,
            stub_name,
            shutdown_rx,
        ));

        Ok(Arc::new(HttpStubHandle {
            port,
            shutdown_tx,
            task: Mutex::new(Some(task)),
            running: AtomicBool::new(true),
            stop_timeout: self.stop_timeout,
        }))
    }
}

async fn accept_loop(
    listener: TcpListener,
    port: u16,
    routes: Arc<StubRoutes>,
    tls_acceptor: Option<TlsAcceptor>,
    stub_name: Arc<str>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!("Accepted connection from {} on port {}", addr, port);
                        let routes = Arc::clone(&routes);
                        let stub_name = Arc::clone(&stub_name);
                        let connection_shutdown = shutdown_rx.clone();
                        match tls_acceptor.clone() {
                            Some(acceptor) => {
                                tokio::spawn(async move {
                                    match acceptor.accept(stream).await {
                                        Ok(tls_stream) => {
                                            serve_connection(tls_stream, port, routes, stub_name, connection_shutdown).await;
                                        }
                                        Err(e) => debug!("TLS handshake failed on port {}: {}", port, e),
                                    }
                                });
                            }
                            None => {
                                tokio::spawn(serve_connection(stream, port, routes, stub_name, connection_shutdown));
                            }
                        }
                    }
                    Err(e) => {
                        error!("Accept error on port {}: {}", port, e);
                    }
                }
            }
            _ = shutdown_requested(&mut shutdown_rx) => {
                info!("Stub server on port {} shutting down", port);
                break;
            }
        }
    }
}

async fn serve_connection<S>(
    stream: S,
    port: u16,
    routes: Arc<StubRoutes>,
    stub_name: Arc<str>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let routes = Arc::clone(&routes);
        let stub_name = Arc::clone(&stub_name);
        async move { handle_stub_request(req, routes, stub_name).await }
    });

    tokio::select! {
        result = http1::Builder::new().serve_connection(io, service) => {
            if let Err(e) = result {
                debug!("Connection error on port {}: {}", port, e);
            }
        }
        _ = shutdown_requested(&mut shutdown_rx) => {
            debug!("Closing connection on port {} for shutdown", port);
        }
    }
}

/// Resolves once shutdown was requested or the handle is gone.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

/// Handle to a running [`HttpStubTransport`] server.
#[derive(Debug)]
pub struct HttpStubHandle {
    port: u16,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    stop_timeout: Duration,
}

#[async_trait]
impl StubServerHandle for HttpStubHandle {
    fn port(&self) -> u16 {
        self.port
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn stop(&self) -> Result<(), TransportError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        // send_replace never fails, even when the loop already exited
        self.shutdown_tx.send_replace(true);

        let task = self.task.lock().take();
        let Some(task) = task else {
            return Ok(());
        };

        match tokio::time::timeout(self.stop_timeout, task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Stop(format!(
                "accept loop on port {} failed: {e}",
                self.port
            ))),
            Err(_) => {
                warn!(
                    "Stub server on port {} did not stop within {:?}",
                    self.port, self.stop_timeout
                );
                Err(TransportError::Stop(format!(
                    "server on port {} did not stop within {:?}",
                    self.port, self.stop_timeout
                )))
            }
        }
    }
}
