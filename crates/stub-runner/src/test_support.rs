//! In-memory transport for exercising the engine without sockets.

use crate::coordinate::StubCoordinate;
use crate::error::TransportError;
use crate::mapping::MappingBundle;
use crate::server::{ServerContext, StubServerHandle, StubServerTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Transport whose failures are scripted per port or per artifact id.
#[derive(Default)]
pub struct FakeTransport {
    occupied_ports: Mutex<HashSet<u16>>,
    always_busy: Mutex<HashSet<String>>,
    broken: Mutex<HashSet<String>>,
    failing_stop: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    attempts: Mutex<HashMap<String, u32>>,
    contexts: Mutex<Vec<ServerContext>>,
    live: Arc<Mutex<HashSet<u16>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binding `port` fails as if another process held it.
    pub fn occupy_port(&self, port: u16) {
        self.occupied_ports.lock().insert(port);
    }

    /// Every bind for `artifact` fails.
    pub fn always_fail_bind(&self, artifact: &str) {
        self.always_busy.lock().insert(artifact.to_string());
    }

    /// Starting `artifact` fails for a reason other than binding.
    pub fn fail_start(&self, artifact: &str) {
        self.broken.lock().insert(artifact.to_string());
    }

    /// Stopping `artifact` reports an error.
    pub fn fail_stop(&self, artifact: &str) {
        self.failing_stop.lock().insert(artifact.to_string());
    }

    /// Starting `artifact` never completes.
    pub fn hang_start(&self, artifact: &str) {
        self.hanging.lock().insert(artifact.to_string());
    }

    pub fn attempts(&self, artifact: &str) -> u32 {
        self.attempts.lock().get(artifact).copied().unwrap_or(0)
    }

    pub fn contexts(&self) -> Vec<ServerContext> {
        self.contexts.lock().clone()
    }

    pub fn is_live(&self, port: u16) -> bool {
        self.live.lock().contains(&port)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }
}

#[async_trait]
impl StubServerTransport for FakeTransport {
    async fn start(
        &self,
        coordinate: &StubCoordinate,
        _bundle: MappingBundle,
        context: ServerContext,
    ) -> Result<Arc<dyn StubServerHandle>, TransportError> {
        let artifact = coordinate.artifact_id.clone();
        *self.attempts.lock().entry(artifact.clone()).or_default() += 1;
        self.contexts.lock().push(context.clone());

        let hangs = self.hanging.lock().contains(&artifact);
        if hangs {
            std::future::pending::<()>().await;
        }

        if self.broken.lock().contains(&artifact) {
            return Err(TransportError::Start(format!("{artifact} is broken")));
        }
        let port = context.port;
        if self.always_busy.lock().contains(&artifact)
            || self.occupied_ports.lock().contains(&port)
            || !self.live.lock().insert(port)
        {
            return Err(TransportError::Bind {
                port,
                reason: "Address already in use".to_string(),
            });
        }

        Ok(Arc::new(FakeHandle {
            port,
            running: AtomicBool::new(true),
            fail_stop: self.failing_stop.lock().contains(&artifact),
            live: Arc::clone(&self.live),
        }))
    }
}

#[derive(Debug)]
struct FakeHandle {
    port: u16,
    running: AtomicBool,
    fail_stop: bool,
    live: Arc<Mutex<HashSet<u16>>>,
}

#[async_trait]
impl StubServerHandle for FakeHandle {
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
        self.live.lock().remove(&self.port);
        if self.fail_stop {
            return Err(TransportError::Stop(format!(
                "server on port {} refused to stop",
                self.port
            )));
        }
        Ok(())
    }
}
