//! misp-dispatcher - event-ingestion dispatcher
//!
#![doc = "misp-dispatcher - event-ingestion dispatcher"]
#![doc = "Main entry point: pops from the Redis buffer and routes each item to its handler."]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use misp_dispatcher::cli::Cli;
use misp_dispatcher::config::Config;
use misp_dispatcher::dispatcher::logging::init_logging;
use misp_dispatcher::dispatcher::{Allowlist, Consumer, DispatchSettings, Dispatcher};
use misp_dispatcher::misp::{RemoteTagResolver, ResolverConfig};
use misp_dispatcher::queue::RedisQueue;
use misp_dispatcher::sinks::{RedisSinks, Sinks};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration; its warnings wait until logging is up
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let (config, warnings) = Config::load_with_warnings(config_path, &cli)?;

    init_logging(&config.logging)?;
    for warning in &warnings {
        warn!("{}", warning);
    }
    config.validate()?;
    info!(config = %config_path, "Configuration loaded");

    let allowlist = Allowlist::load(&config.dispatcher.allowlist_path)?;

    let queue = Arc::new(
        RedisQueue::connect(
            &config.redis.url(config.redis.list_db),
            &config.redis.list_name,
        )
        .await?,
    );
    let store = Arc::new(
        RedisSinks::connect(
            &config.redis.url(config.redis.store_db),
            &config.redis.live_channel,
        )
        .await?,
    );

    let resolver = RemoteTagResolver::new(ResolverConfig {
        base_url: config.remote.base_url.clone(),
        auth_key: config.remote.auth_key.clone(),
        cascade_tag: config.dispatcher.import_all_tag.clone(),
        verify_tls: config.remote.verify_tls,
    })?;

    let dispatcher = Dispatcher::new(
        allowlist,
        Sinks::from_parts(store, queue.clone()),
        Arc::new(resolver),
        DispatchSettings::from_config(&config.dispatcher),
    );
    let consumer = Consumer::new(
        queue,
        dispatcher,
        Duration::from_secs(config.dispatcher.poll_interval_secs),
    );

    tokio::select! {
        result = consumer.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            consumer.stop();
        }
    }

    Ok(())
}
