//! Server lifecycle management for stub groups.
//!
//! Starts one server per stub group on an allocated port, retrying on bind
//! conflicts with fresh ports, and stops servers again. The lifecycle manager
//! is the only component that stops a server or releases its port.

use crate::coordinate::StubCoordinate;
use crate::error::{StartError, TransportError};
use crate::mapping::MappingBundle;
use crate::metrics;
use crate::port::PortAllocator;
use crate::registry::RunningStub;
use crate::server::{noop_configurer, ServerContext, StubConfigurer, StubServerTransport};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_START_ATTEMPTS: u32 = 3;

/// Starts and stops stub servers through a transport.
pub struct ServerLifecycleManager {
    transport: Arc<dyn StubServerTransport>,
    allocator: Arc<PortAllocator>,
    configurer: StubConfigurer,
    host: String,
    max_start_attempts: u32,
    mappings_output_folder: Option<PathBuf>,
}

impl ServerLifecycleManager {
    pub fn new(transport: Arc<dyn StubServerTransport>, allocator: Arc<PortAllocator>) -> Self {
        Self {
            transport,
            allocator,
            configurer: noop_configurer(),
            host: "127.0.0.1".to_string(),
            max_start_attempts: DEFAULT_MAX_START_ATTEMPTS,
            mappings_output_folder: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_configurer(mut self, configurer: StubConfigurer) -> Self {
        self.set_configurer(configurer);
        self
    }

    pub fn set_configurer(&mut self, configurer: StubConfigurer) {
        self.configurer = configurer;
    }

    pub fn with_max_start_attempts(mut self, attempts: u32) -> Self {
        self.max_start_attempts = attempts.max(1);
        self
    }

    pub fn with_mappings_output_folder(mut self, folder: Option<PathBuf>) -> Self {
        self.mappings_output_folder = folder;
        self
    }

    pub fn allocator(&self) -> &Arc<PortAllocator> {
        &self.allocator
    }

    /// Start `bundle` for `coordinate` on `port`, which must already be
    /// allocated from this manager's allocator.
    pub async fn start(
        &self,
        coordinate: &StubCoordinate,
        bundle: MappingBundle,
        port: u16,
    ) -> Result<RunningStub, StartError> {
        self.start_until(coordinate, bundle, port, None).await
    }

    /// Like [`start`](Self::start), but abandons the start once `deadline`
    /// passes, including a transport start that is still in flight.
    ///
    /// On any error the port in use at that point has been released.
    pub async fn start_until(
        &self,
        coordinate: &StubCoordinate,
        bundle: MappingBundle,
        port: u16,
        deadline: Option<Instant>,
    ) -> Result<RunningStub, StartError> {
        let pinned = coordinate.port.is_some();
        let mut port = port;
        let mut tried = HashSet::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(self.abandon(coordinate, port));
            }
            tried.insert(port);

            let context = self.server_context(&bundle, port);
            let host = context.host.clone();
            let scheme = context.scheme();

            debug!(
                "Starting stub server for {} on port {} (attempt {}/{})",
                coordinate, port, attempt, self.max_start_attempts
            );
            let starting = self.transport.start(coordinate, bundle.clone(), context);
            let outcome = match deadline {
                None => starting.await,
                Some(deadline) => match tokio::time::timeout_at(deadline, starting).await {
                    Ok(outcome) => outcome,
                    // Dropping the transport future abandons the bind
                    Err(_) => return Err(self.abandon(coordinate, port)),
                },
            };
            match outcome {
                Ok(handle) => {
                    metrics::record_start_attempt("started");
                    metrics::record_server_started();
                    let stub =
                        RunningStub::new(coordinate.clone(), host, scheme, bundle.len(), handle);
                    info!(
                        "Started stub {} at {} with {} mapping(s)",
                        coordinate,
                        stub.url(),
                        bundle.len()
                    );
                    self.write_mappings(coordinate, port, &bundle);
                    return Ok(stub);
                }
                Err(TransportError::Bind { reason, .. }) => {
                    metrics::record_start_attempt("bind_error");
                    self.allocator.release(port);

                    if pinned || attempt >= self.max_start_attempts {
                        return Err(StartError::PortBind {
                            coordinate: coordinate.to_string(),
                            port,
                            attempts: attempt,
                            reason,
                        });
                    }

                    let next = self.allocator.allocate_excluding(&tried).map_err(|source| {
                        StartError::PortAllocation {
                            coordinate: coordinate.to_string(),
                            source,
                        }
                    })?;
                    warn!(
                        "Port {} for {} is taken ({}), retrying on port {}",
                        port, coordinate, reason, next
                    );
                    port = next;
                }
                Err(e) => {
                    metrics::record_start_attempt("start_error");
                    self.allocator.release(port);
                    return Err(StartError::Transport {
                        coordinate: coordinate.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn abandon(&self, coordinate: &StubCoordinate, port: u16) -> StartError {
        metrics::record_start_attempt("abandoned");
        self.allocator.release(port);
        warn!("Abandoned start of {} on port {}", coordinate, port);
        StartError::Abandoned {
            coordinate: coordinate.to_string(),
        }
    }

    fn server_context(&self, bundle: &MappingBundle, port: u16) -> ServerContext {
        let mut context = (self.configurer)(bundle, ServerContext::new(self.host.clone(), port));
        if context.port != port {
            warn!(
                "Stub configurer changed port {} to {}; keeping the allocated port",
                port, context.port
            );
            context.port = port;
        }
        context
    }

    /// Stop a running stub and release its port.
    ///
    /// Idempotent. The port is released even when the transport fails to
    /// shut down cleanly; that failure is still returned.
    pub async fn stop(&self, stub: &RunningStub) -> Result<(), TransportError> {
        if stub.released.swap(true, Ordering::SeqCst) {
            debug!("Stub {} is already stopped", stub.coordinate());
            return Ok(());
        }

        let result = stub.handle().stop().await;
        if let Err(ref e) = result {
            warn!("Error while stopping stub {}: {}", stub.coordinate(), e);
        }

        self.allocator.release(stub.port());
        metrics::record_server_stopped();
        info!("Stopped stub {} on port {}", stub.coordinate(), stub.port());
        result
    }

    /// Dump the served mappings for diagnostics. Never fails the start.
    fn write_mappings(&self, coordinate: &StubCoordinate, port: u16, bundle: &MappingBundle) {
        let Some(ref folder) = self.mappings_output_folder else {
            return;
        };
        let target = folder.join(format!("{}_{}", coordinate.artifact_id, port));
        match write_bundle(&target, bundle) {
            Ok(()) => debug!(
                "Wrote {} mapping(s) of {} to {:?}",
                bundle.len(),
                coordinate,
                target
            ),
            Err(e) => warn!(
                "Failed to write mappings of {} to {:?}: {}",
                coordinate, target, e
            ),
        }
    }
}

fn write_bundle(target: &Path, bundle: &MappingBundle) -> Result<(), std::io::Error> {
    std::fs::create_dir_all(target)?;
    for (index, mapping) in bundle.mappings().iter().enumerate() {
        let file_name = mapping
            .source
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "mapping.json".to_string());
        let json = serde_json::to_string_pretty(mapping)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(target.join(format!("{index:03}_{file_name}")), json)?;
    }
    Ok(())
}
