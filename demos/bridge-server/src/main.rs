//! Agent bridge server.
//!
//! Run with: cargo run -p bridge-server
//!
//! Configuration is read from the TOML file named by `AGENT_BRIDGE_CONFIG`
//! (defaults otherwise), then `AGENT_BRIDGE_BASE_URL` and
//! `AGENT_BRIDGE_API_TOKEN` override the server section.
//!
//! ```text
//! curl localhost:3000/tools
//! curl -N -X POST localhost:3000/sessions/conv-1/tools/send_message -d '{"message":"hi"}'
//! curl -X POST localhost:3000/sessions/conv-1/command -d 'agent memory read human'
//! ```

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use agent_bridge_client::HttpAgentClient;
use agent_bridge_core::{AgentApi, BindingStore, BridgeConfig};
use agent_bridge_session::{
    CommandDispatcher, MemorySynchronizer, SessionRegistry, storage::MemoryBindingStore,
};
use agent_bridge_transport::http::create_router;
use anyhow::Context;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn load_config() -> anyhow::Result<BridgeConfig> {
    match std::env::var_os("AGENT_BRIDGE_CONFIG") {
        Some(path) => {
            let path = PathBuf::from(path);
            BridgeConfig::load(&path).with_context(|| format!("loading {}", path.display()))
        }
        None => {
            let mut config = BridgeConfig::default();
            config.apply_env();
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = load_config()?;
    tracing::info!(base_url = %config.server.base_url, "Using agent server");

    let api: Arc<dyn AgentApi> = Arc::new(HttpAgentClient::new(&config.server, &config.retry));
    let store: Arc<dyn BindingStore> = Arc::new(MemoryBindingStore::new());
    let registry = Arc::new(SessionRegistry::new(
        Arc::clone(&api),
        store,
        config.sessions.clone(),
    ));
    let memory = Arc::new(MemorySynchronizer::new(Arc::clone(&api), config.memory.clone()));

    if let Some(idle) = config.sessions.idle_timeout_secs {
        let sweep = Arc::clone(&registry).spawn_eviction_sweep(
            Duration::from_secs(config.sessions.sweep_interval_secs.max(1)),
            Duration::from_secs(idle),
        );
        drop(sweep);
    }

    let dispatcher = Arc::new(CommandDispatcher::new(api, registry, memory));
    let app = create_router(dispatcher).layer(CorsLayer::permissive());

    let addr: SocketAddr = std::env::var("AGENT_BRIDGE_LISTEN")
        .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
        .parse()
        .context("invalid AGENT_BRIDGE_LISTEN address")?;
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
