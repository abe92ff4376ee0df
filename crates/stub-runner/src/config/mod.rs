//! Configuration for the stub runner.

mod tls;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinate::{StubCoordinate, DEFAULT_CLASSIFIER};
use crate::port::{DEFAULT_MAX_PORT, DEFAULT_MIN_PORT};

pub use tls::TlsConfig;

/// What to do with a stub group that has no mappings left after consumer
/// filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyStubPolicy {
    /// Start it anyway; it answers every request with 404
    #[default]
    Serve,
    /// Treat it as if it had never been resolved
    Skip,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StubRunnerOptions {
    /// Lowest port handed out to stub servers
    pub min_port: u16,
    /// Highest port handed out to stub servers
    pub max_port: u16,
    /// Interface stub servers bind to
    pub host: String,

    /// Stubs to run in ivy notation:
    /// `[groupId:]artifactId[:version][:classifier][:port]`
    pub ids: Vec<String>,
    /// Local repository stubs are resolved from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_root: Option<PathBuf>,
    /// Classifier used when an id does not name one
    pub classifier: String,

    /// Only serve the mappings in the consumer's own folder (plus shared ones)
    pub stubs_per_consumer: bool,
    /// Consumer identity used for scoping; falls back to `application_name`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_name: Option<String>,
    /// Externally resolved name of the application running the stubs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,

    /// Each server dumps the mappings it serves into a subfolder here
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mappings_output_folder: Option<PathBuf>,

    pub fail_on_no_stubs: bool,
    pub delete_stubs_after_test: bool,
    pub empty_stub_policy: EmptyStubPolicy,

    /// Attempts per stub group before a bind failure is fatal
    pub max_start_attempts: u32,
    /// Overall deadline for bringing the fleet up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timeout_ms: Option<u64>,
    /// How long each server gets to shut down gracefully
    pub stop_timeout_ms: u64,

    /// Serve stubs over HTTPS with this certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

impl Default for StubRunnerOptions {
    fn default() -> Self {
        Self {
            min_port: DEFAULT_MIN_PORT,
            max_port: DEFAULT_MAX_PORT,
            host: "127.0.0.1".to_string(),
            ids: Vec::new(),
            repository_root: None,
            classifier: DEFAULT_CLASSIFIER.to_string(),
            stubs_per_consumer: false,
            consumer_name: None,
            application_name: None,
            mappings_output_folder: None,
            fail_on_no_stubs: true,
            delete_stubs_after_test: true,
            empty_stub_policy: EmptyStubPolicy::default(),
            max_start_attempts: 3,
            start_timeout_ms: None,
            stop_timeout_ms: 5000,
            tls: None,
        }
    }
}

impl StubRunnerOptions {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let options: StubRunnerOptions = serde_yaml::from_str(&contents)?;
        options.validate()?;
        Ok(options)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.min_port == 0 {
            anyhow::bail!("minPort must be greater than 0");
        }
        if self.min_port > self.max_port {
            anyhow::bail!(
                "minPort ({}) must not be greater than maxPort ({})",
                self.min_port,
                self.max_port
            );
        }
        if self.max_start_attempts == 0 {
            anyhow::bail!("maxStartAttempts must be at least 1");
        }
        if self.stubs_per_consumer && self.consumer_name().is_none() {
            anyhow::bail!(
                "stubsPerConsumer is enabled but neither consumerName nor applicationName is set"
            );
        }
        self.coordinates()?;
        Ok(())
    }

    /// Consumer identity: `consumer_name` unless empty, else `application_name`.
    pub fn consumer_name(&self) -> Option<&str> {
        [self.consumer_name.as_deref(), self.application_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|name| !name.is_empty())
    }

    /// Parse `ids` into coordinates using the configured default classifier.
    pub fn coordinates(&self) -> Result<Vec<StubCoordinate>, anyhow::Error> {
        self.ids
            .iter()
            .flat_map(|ids| ids.split(','))
            .filter(|id| !id.trim().is_empty())
            .map(|id| {
                StubCoordinate::parse(id, &self.classifier)
                    .map_err(|e| anyhow::anyhow!("Invalid stub id '{}': {}", id.trim(), e))
            })
            .collect()
    }

    pub fn start_timeout(&self) -> Option<Duration> {
        self.start_timeout_ms.map(Duration::from_millis)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
