//! Fleet orchestration.
//!
//! [`StubRunner`] drives one fleet of stub servers through its lifecycle:
//! it takes the resolved `(coordinate, bundle)` pairs, applies consumer
//! scoping, allocates a port per group, starts every group concurrently and
//! publishes them to the [`StubRegistry`] once all of them are up. Start is
//! all or nothing: if any group fails, every group that did start is stopped
//! again and the fleet ends `FAILED`. With `startTimeoutMs` set, starts still
//! in flight at the deadline are abandoned the same way.
//!
//! ## Module Structure
//!
//! - `types`: fleet state and the teardown report

mod types;


pub use types::{FleetState, TeardownReport};

use crate::config::{EmptyStubPolicy, StubRunnerOptions};
use crate::coordinate::StubKey;
use crate::error::{StartError, StubRunnerError, TeardownError};
use crate::filter::filter_for_consumer;
use crate::lifecycle::ServerLifecycleManager;
use crate::port::PortAllocator;
use crate::registry::{RunningStub, StubRegistry};
use crate::resolver::ResolvedStub;
use crate::server::{StubConfigurer, StubServerTransport};
use crate::storage::StubStorage;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Runs one fleet of stub servers.
pub struct StubRunner {
    options: StubRunnerOptions,
    lifecycle: ServerLifecycleManager,
    registry: Arc<StubRegistry>,
    state: Mutex<FleetState>,
    storage: Mutex<Option<Arc<dyn StubStorage>>>,
}

impl StubRunner {
    /// Create a runner with its own port allocator over the configured range.
    pub fn new(
        options: StubRunnerOptions,
        transport: Arc<dyn StubServerTransport>,
    ) -> Result<Self, StubRunnerError> {
        let allocator = PortAllocator::new(options.min_port, options.max_port)
            .map_err(|e| StubRunnerError::InvalidConfig(e.to_string()))?;
        Self::with_allocator(options, transport, Arc::new(allocator))
    }

    /// Create a runner that shares `allocator` with other fleets.
    pub fn with_allocator(
        options: StubRunnerOptions,
        transport: Arc<dyn StubServerTransport>,
        allocator: Arc<PortAllocator>,
    ) -> Result<Self, StubRunnerError> {
        options
            .validate()
            .map_err(|e| StubRunnerError::InvalidConfig(e.to_string()))?;

        let lifecycle = ServerLifecycleManager::new(transport, allocator)
            .with_host(options.host.clone())
            .with_max_start_attempts(options.max_start_attempts)
            .with_mappings_output_folder(options.mappings_output_folder.clone());

        Ok(Self {
            options,
            lifecycle,
            registry: Arc::new(StubRegistry::new()),
            state: Mutex::new(FleetState::NotStarted),
            storage: Mutex::new(None),
        })
    }

    pub fn with_configurer(mut self, configurer: StubConfigurer) -> Self {
        self.lifecycle.set_configurer(configurer);
        self
    }

    /// Storage to purge on teardown when `deleteStubsAfterTest` is set.
    pub fn with_storage(self, storage: Arc<dyn StubStorage>) -> Self {
        *self.storage.lock() = Some(storage);
        self
    }

    pub fn options(&self) -> &StubRunnerOptions {
        &self.options
    }

    pub fn state(&self) -> FleetState {
        *self.state.lock()
    }

    pub fn registry(&self) -> Arc<StubRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn allocator(&self) -> &Arc<PortAllocator> {
        self.lifecycle.allocator()
    }

    fn set_state(&self, next: FleetState) {
        let mut state = self.state.lock();
        debug!("Stub fleet {} -> {}", *state, next);
        *state = next;
    }

    fn transition(&self, expected: FleetState, next: FleetState) -> Result<(), StubRunnerError> {
        let mut state = self.state.lock();
        if *state != expected {
            return Err(StubRunnerError::InvalidState {
                expected,
                actual: *state,
            });
        }
        debug!("Stub fleet {} -> {}", *state, next);
        *state = next;
        Ok(())
    }

    /// Bring the fleet up.
    ///
    /// Returns the registry once every group is serving. An empty input is an
    /// error when `failOnNoStubs` is set and an empty running fleet otherwise.
    pub async fn start(
        &self,
        stubs: Vec<ResolvedStub>,
    ) -> Result<Arc<StubRegistry>, StubRunnerError> {
        self.transition(FleetState::NotStarted, FleetState::Resolving)?;

        let groups = self.prepare(stubs);
        if groups.is_empty() {
            if self.options.fail_on_no_stubs {
                error!("No stubs to run and failOnNoStubs is enabled");
                self.set_state(FleetState::Failed);
                return Err(StubRunnerError::NoStubsResolved);
            }
            warn!("No stubs to run, the stub fleet is empty");
            self.set_state(FleetState::Running);
            return Ok(self.registry());
        }

        self.set_state(FleetState::Starting);
        info!("Starting {} stub group(s)", groups.len());

        match self.start_groups(&groups).await {
            Ok(started) => {
                for stub in &started {
                    info!("Stub {} is available at {}", stub.coordinate(), stub.url());
                }
                self.registry.publish(started);
                self.set_state(FleetState::Running);
                Ok(self.registry())
            }
            Err(e) => {
                error!("Stub fleet failed to start: {}", e);
                self.set_state(FleetState::Failed);
                Err(e)
            }
        }
    }

    /// Deduplicate by identity, scope to the consumer and apply the empty
    /// bundle policy.
    fn prepare(&self, stubs: Vec<ResolvedStub>) -> Vec<ResolvedStub> {
        let consumer = self.options.consumer_name().unwrap_or_default();
        let per_consumer = self.options.stubs_per_consumer;
        let mut seen: HashSet<StubKey> = HashSet::new();
        let mut groups = Vec::with_capacity(stubs.len());

        for stub in stubs {
            if !seen.insert(stub.coordinate.key()) {
                warn!(
                    "Stub {} is listed more than once, keeping the first occurrence",
                    stub.coordinate
                );
                continue;
            }

            let bundle =
                filter_for_consumer(&stub.bundle, &stub.coordinate, consumer, per_consumer);
            if bundle.is_empty() {
                match self.options.empty_stub_policy {
                    EmptyStubPolicy::Serve => {
                        warn!("Stub {} has no mappings to serve", stub.coordinate)
                    }
                    EmptyStubPolicy::Skip => {
                        info!("Skipping stub {}, it has no mappings to serve", stub.coordinate);
                        continue;
                    }
                }
            }
            groups.push(ResolvedStub::new(stub.coordinate, bundle));
        }
        groups
    }

    async fn start_groups(
        &self,
        groups: &[ResolvedStub],
    ) -> Result<Vec<RunningStub>, StubRunnerError> {
        let ports = self.allocate_ports(groups)?;
        let timeout = self.options.start_timeout();
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        let results = join_all(groups.iter().zip(ports).map(|(group, port)| {
            self.lifecycle
                .start_until(&group.coordinate, group.bundle.clone(), port, deadline)
        }))
        .await;

        let mut started = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(stub) => started.push(stub),
                Err(e) => failures.push(e),
            }
        }

        if failures.is_empty() {
            return Ok(started);
        }

        let count = started.len();
        if count > 0 {
            warn!("Stopping {} stub group(s) that did start", count);
        }
        let rollback = self.stop_all(started).await.errors;
        for e in &rollback {
            warn!("Rollback problem: {}", e);
        }

        let abandoned = failures
            .iter()
            .any(|failure| matches!(failure, StartError::Abandoned { .. }));
        match timeout {
            Some(timeout) if abandoned => {
                warn!(
                    "Stub fleet did not start within {:?}, abandoned the remaining starts",
                    timeout
                );
                Err(StubRunnerError::StartTimeout {
                    timeout,
                    started: count,
                    rollback,
                })
            }
            _ => Err(StubRunnerError::FleetStart { failures, rollback }),
        }
    }

    /// One port per group, in group order. Pinned ports are reserved before
    /// any port is drawn from the range.
    fn allocate_ports(&self, groups: &[ResolvedStub]) -> Result<Vec<u16>, StubRunnerError> {
        let mut ports: Vec<Option<u16>> = vec![None; groups.len()];
        let mut failures = Vec::new();

        let pinned = groups.iter().enumerate().filter(|(_, g)| g.coordinate.port.is_some());
        let ranged = groups.iter().enumerate().filter(|(_, g)| g.coordinate.port.is_none());
        for (index, group) in pinned.chain(ranged) {
            match self.allocator().allocate(group.coordinate.port) {
                Ok(port) => {
                    debug!("Allocated port {} for {}", port, group.coordinate);
                    ports[index] = Some(port);
                }
                Err(source) => failures.push(StartError::PortAllocation {
                    coordinate: group.coordinate.to_string(),
                    source,
                }),
            }
        }

        if failures.is_empty() {
            return Ok(ports.into_iter().flatten().collect());
        }
        for port in ports.into_iter().flatten() {
            self.allocator().release(port);
        }
        Err(StubRunnerError::FleetStart {
            failures,
            rollback: Vec::new(),
        })
    }

    /// Stop every stub, never giving up early.
    async fn stop_all(&self, stubs: Vec<RunningStub>) -> TeardownReport {
        let results = join_all(stubs.iter().map(|stub| self.lifecycle.stop(stub))).await;

        let mut report = TeardownReport::default();
        for (stub, result) in stubs.iter().zip(results) {
            match result {
                Ok(()) => report.stopped += 1,
                Err(e) => report.errors.push(TeardownError::Stop {
                    coordinate: stub.coordinate().to_string(),
                    port: stub.port(),
                    reason: e.to_string(),
                }),
            }
        }
        report
    }

    /// Tear the fleet down.
    ///
    /// Only a `RUNNING` fleet is stopped; any other state makes this a no-op
    /// that returns an empty report, so calling it twice is harmless.
    pub async fn stop(&self) -> TeardownReport {
        {
            let mut state = self.state.lock();
            if *state != FleetState::Running {
                debug!("Stub fleet is {}, nothing to stop", *state);
                return TeardownReport::default();
            }
            *state = FleetState::Stopping;
        }

        // Unpublish first so nobody looks up a server that is going away
        let stubs = self.registry.drain();
        info!("Stopping {} stub group(s)", stubs.len());
        let mut report = self.stop_all(stubs).await;

        if self.options.delete_stubs_after_test {
            let storage = self.storage.lock().take();
            if let Some(storage) = storage {
                match storage.purge() {
                    Ok(()) => info!("Deleted materialized stubs"),
                    Err(e) => report.errors.push(TeardownError::Purge(e.to_string())),
                }
            }
        }

        for e in &report.errors {
            warn!("Teardown problem: {}", e);
        }
        self.set_state(FleetState::Stopped);
        info!(
            "Stub fleet stopped ({} stopped, {} error(s))",
            report.stopped,
            report.errors.len()
        );
        report
    }
}

impl Drop for StubRunner {
    fn drop(&mut self) {
        if *self.state.get_mut() == FleetState::Running && !self.registry.is_empty() {
            warn!(
                "Stub runner dropped while {} stub server(s) are running; call stop() to release them",
                self.registry.len()
            );
        }
    }
}
