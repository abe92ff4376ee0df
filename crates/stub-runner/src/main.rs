//! Stub Runner CLI
//!
//! Resolves stubs from a local repository, serves each stub group on its own
//! port and keeps them running until interrupted.
//!
//! Usage:
//!   stub-runner --repository-root ./repo --ids com.example:orders:+:stubs
//!   stub-runner --config stub-runner.yaml --consumer-name baz-service --stubs-per-consumer

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use stub_runner::{
    HttpStubTransport, LocalRepositoryResolver, MappingBundle, ServerContext, StubConfigurer,
    StubResolver, StubRunner, StubRunnerOptions, TlsConfig,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Run contract stubs as local mock servers
#[derive(Parser, Debug)]
#[command(name = "stub-runner")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file; flags override its values
    #[arg(short, long, env = "STUB_RUNNER_CONFIG")]
    config: Option<PathBuf>,

    /// Stubs to run: [groupId:]artifactId[:version][:classifier][:port]
    #[arg(short, long, value_delimiter = ',')]
    ids: Vec<String>,

    /// Directory laid out as <groupId>/<artifactId>/<version>/<classifier>
    #[arg(short, long)]
    repository_root: Option<PathBuf>,

    #[arg(long)]
    min_port: Option<u16>,

    #[arg(long)]
    max_port: Option<u16>,

    /// Consumer identity used to scope mappings
    #[arg(long)]
    consumer_name: Option<String>,

    /// Only serve mappings meant for this consumer
    #[arg(long)]
    stubs_per_consumer: bool,

    /// Write the mappings each server serves below this folder
    #[arg(long)]
    mappings_output_folder: Option<PathBuf>,

    /// Keep the materialized stubs after shutdown
    #[arg(long)]
    keep_stubs: bool,

    /// Start even if no stubs were found
    #[arg(long)]
    allow_no_stubs: bool,
}

impl Args {
    fn into_options(self) -> anyhow::Result<StubRunnerOptions> {
        let mut options = match self.config {
            Some(ref path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_yaml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => StubRunnerOptions::default(),
        };

        options.ids.extend(self.ids);
        if let Some(root) = self.repository_root {
            options.repository_root = Some(root);
        }
        if let Some(port) = self.min_port {
            options.min_port = port;
        }
        if let Some(port) = self.max_port {
            options.max_port = port;
        }
        if let Some(name) = self.consumer_name {
            options.consumer_name = Some(name);
        }
        if self.stubs_per_consumer {
            options.stubs_per_consumer = true;
        }
        if let Some(folder) = self.mappings_output_folder {
            options.mappings_output_folder = Some(folder);
        }
        if self.keep_stubs {
            options.delete_stubs_after_test = false;
        }
        if self.allow_no_stubs {
            options.fail_on_no_stubs = false;
        }

        options.validate()?;
        Ok(options)
    }
}

fn tls_configurer(tls: TlsConfig) -> StubConfigurer {
    Arc::new(move |_bundle: &MappingBundle, mut context: ServerContext| {
        context.tls = Some(tls.clone());
        context
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = Args::parse().into_options()?;
    let root = options
        .repository_root
        .clone()
        .context("No repository root given (--repository-root or repositoryRoot)")?;

    let coordinates = options.coordinates()?;
    let resolver = LocalRepositoryResolver::new(root).fail_on_missing(options.fail_on_no_stubs);
    let resolution = resolver.resolve(&coordinates)?;

    let transport = Arc::new(HttpStubTransport::new().with_stop_timeout(options.stop_timeout()));
    let mut runner = StubRunner::new(options.clone(), transport)?;
    if let Some(tls) = options.tls.clone() {
        runner = runner.with_configurer(tls_configurer(tls));
    }
    if let Some(ref storage) = resolution.storage {
        runner = runner.with_storage(Arc::clone(storage));
    }

    let registry = match runner.start(resolution.stubs).await {
        Ok(registry) => registry,
        Err(e) => {
            if options.delete_stubs_after_test {
                if let Some(storage) = resolution.storage {
                    if let Err(purge_error) = storage.purge() {
                        warn!("Failed to delete materialized stubs: {}", purge_error);
                    }
                }
            }
            return Err(e.into());
        }
    };

    for stub in registry.all() {
        println!("{}\t{}", stub.coordinate(), stub.url());
    }
    info!("{} stub server(s) running, press Ctrl+C to stop", registry.len());

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => error!("Failed to listen for Ctrl+C, shutting down: {}", e),
    }

    let report = runner.stop().await;
    if !report.is_clean() {
        for e in &report.errors {
            error!("{}", e);
        }
        anyhow::bail!("Teardown finished with {} error(s)", report.errors.len());
    }
    Ok(())
}
