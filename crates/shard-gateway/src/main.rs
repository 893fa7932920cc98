//! Shard gateway runner
//!
//! Run with:
//! ```bash
//! GATEWAY_URL=wss://gateway.example/?v=6 GATEWAY_TOKEN=... cargo run -p shard-gateway
//! ```
//!
//! Configuration is loaded from environment variables (and `.env`).

use anyhow::Context;
use shard_common::{try_init_tracing_with_config, GatewayConfig, TracingConfig};
use shard_gateway::{ConnectionPool, EventRouter, FleetEvent, WebSocketConnector};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env();

    let tracing_config = config.as_ref().map_or_else(
        |_| TracingConfig::default(),
        |c| TracingConfig::for_environment(c.app.env),
    );
    if let Err(e) = try_init_tracing_with_config(tracing_config) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    let config = config.context("Failed to load configuration")?;
    info!(
        env = ?config.app.env,
        shards = ?config.sharding.shard_ids(),
        shard_count = config.sharding.shard_count,
        "Configuration loaded"
    );

    let router = EventRouter::new()
        .on("READY", |event, shard_id| {
            info!(shard_id, seq = ?event.sequence, "READY dispatched");
        })
        .fallback(|event, shard_id| {
            debug!(shard_id, event = %event.name, seq = ?event.sequence, "Dispatch");
        });

    let (pool, mut events) = ConnectionPool::builder(config)
        .connector(WebSocketConnector)
        .dispatcher(router)
        .build()
        .context("Failed to build the connection pool")?;
    pool.connect_all()?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(FleetEvent::Shard { shard_id, event }) => {
                    info!(shard_id, event = event.name(), "Shard event");
                }
                Some(FleetEvent::Ready) => info!(shards = pool.len(), "Fleet ready"),
                Some(FleetEvent::NotReady) => warn!("Fleet not ready"),
                Some(FleetEvent::Disconnected) => warn!("Fleet disconnected"),
                None => break,
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Shutting down");
                break;
            }
        }
    }

    pool.shutdown().await;
    Ok(())
}
