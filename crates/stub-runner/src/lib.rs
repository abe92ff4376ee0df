// Library exports for the stub runner binary and for test code embedding the engine

// ===== Orchestration engine =====
pub mod filter;
pub mod lifecycle;
pub mod port;
pub mod registry;
pub mod runner;

// ===== Inputs and collaborators =====
pub mod config;
pub mod coordinate;
pub mod error;
pub mod mapping;
pub mod resolver;
pub mod server;
pub mod storage;

pub mod metrics;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{EmptyStubPolicy, StubRunnerOptions, TlsConfig};
pub use coordinate::{StubCoordinate, StubKey};
pub use error::{ResolveError, StartError, StubRunnerError, TeardownError, TransportError};
pub use mapping::{Mapping, MappingBundle};
pub use port::PortAllocator;
pub use registry::{LookupError, RunningStub, StubRegistry};
pub use resolver::{LocalRepositoryResolver, Resolution, ResolvedStub, StubResolver};
pub use runner::{FleetState, StubRunner, TeardownReport};
pub use server::{HttpStubTransport, ServerContext, StubConfigurer, StubServerTransport};
pub use storage::{MaterializedStubStorage, StubStorage};
