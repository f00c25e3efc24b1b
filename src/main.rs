//! Registry Cache CLI
//!
//! Loads a cache configuration, wraps an in-memory registry with the
//! cache-backed façade, and runs a small workload against it.

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use registry_cache::auth::AllowAll;
use registry_cache::{
    CacheBackedRegistry, CacheConfig, CachePartitions, HitRateProbe, InMemoryRegistry, MountTable,
    Registry, RequestContext, Resource, TenantId,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Registry Cache - mount-aware read-through cache for resource registries
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache configuration file (YAML)
    #[arg(long, env = "REGISTRY_CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and print the mount table
    Validate,

    /// Run a demo workload and report cache statistics
    Demo {
        /// Concurrent readers per resource
        #[arg(long, default_value = "8")]
        readers: usize,

        /// Number of resources to write
        #[arg(long, default_value = "16")]
        resources: usize,
    },

    /// Run the demo workload and print partition metrics in Prometheus format
    Metrics,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = match &args.config {
        Some(path) => CacheConfig::from_yaml_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => CacheConfig::default(),
    };

    info!("Starting Registry Cache");
    info!("  Version: {}", registry_cache::VERSION);
    info!("  Partition: {}", config.partition);
    info!("  Mounts: {}", config.mounts.len());

    match args.command {
        Command::Validate => {
            config.validate().context("configuration is invalid")?;
            for entry in MountTable::from_config(&config).entries() {
                println!(
                    "{} -> {} ({})",
                    entry.local_prefix,
                    entry.target_prefix,
                    entry.target.identity()
                );
            }
            println!("configuration ok");
        }
        Command::Demo { readers, resources } => {
            let partitions = CachePartitions::new(config.store.clone());
            run_workload(&config, &partitions, readers, resources).await?;

            let probe = HitRateProbe::new(partitions);
            println!("hit rate: {:.3}", probe.hit_rate(&config.partition));
        }
        Command::Metrics => {
            let partitions = CachePartitions::new(config.store.clone());
            run_workload(&config, &partitions, 4, 8).await?;

            let probe = HitRateProbe::new(partitions);
            print!("{}", probe.render_prometheus()?);
        }
    }

    Ok(())
}

// =============================================================================
// Workload
// =============================================================================

async fn run_workload(
    config: &CacheConfig,
    partitions: &CachePartitions,
    readers: usize,
    resources: usize,
) -> anyhow::Result<()> {
    let backend = Arc::new(InMemoryRegistry::new());
    let registry = CacheBackedRegistry::in_partition(backend.clone(), Arc::new(AllowAll), partitions, config)?;
    let ctx = RequestContext::new("demo", TenantId::SUPER_TENANT);

    for i in 0..resources {
        let path = format!("/demo/r{i}");
        registry
            .put(&ctx, &path, Resource::new("", format!("content {i}")))
            .await?;
    }

    // Concurrent readers per path share one backing fetch
    for i in 0..resources {
        let path = format!("/demo/r{i}");
        let reads = (0..readers).map(|_| registry.get(&ctx, &path));
        for result in join_all(reads).await {
            result?;
        }
    }

    registry.get_paged(&ctx, "/demo", 0, 10).await?;
    registry
        .put(&ctx, "/demo/r0", Resource::new("", "updated"))
        .await?;
    let updated = registry.get(&ctx, "/demo/r0").await?;
    anyhow::ensure!(updated.content.as_ref() == b"updated", "stale read after write");

    registry.resource_exists(&ctx, "/demo/missing").await?;
    registry.delete(&ctx, "/demo").await?;

    let calls = backend.calls();
    info!(
        backend_gets = calls.get,
        backend_pages = calls.get_paged,
        backend_exists = calls.exists,
        backend_writes = calls.writes,
        cached_entries = registry.store().len(),
        "Workload complete"
    );
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
