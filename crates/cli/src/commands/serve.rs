//! `replybot serve`: run the webhook gateway.

use crate::runtime::{self, Runtime};
use anyhow::{Context, bail};
use replybot_channels::LineMessenger;
use replybot_gateway::GatewayState;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub async fn run(config_path: Option<&Path>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = runtime::load_config(config_path)?;
    if let Some(port) = port {
        config.gateway.port = port;
    }
    let Some(channel_secret) = config
        .channel
        .channel_secret
        .clone()
        .filter(|s| !s.is_empty())
    else {
        bail!("channel.channel_secret is not set (or REPLYBOT_CHANNEL_SECRET)");
    };

    let messenger = Arc::new(
        LineMessenger::from_config(&config.channel, runtime::upstream_timeout(&config))
            .context("Failed to set up the messaging client")?,
    );
    let runtime = Runtime::build(config, messenger.clone())?;
    let cache = runtime.prompt_cache().await;
    let agent = Arc::new(runtime.agent(cache.clone()));

    let gateway = &runtime.config.gateway;
    let addr = format!("{}:{}", gateway.host, gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let state = Arc::new(GatewayState::new(
        agent,
        messenger,
        channel_secret,
        runtime.config.channel.relay_final_text,
    ));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("Shutting down");
    };
    let served =
        replybot_gateway::serve(listener, state.clone(), gateway.body_limit_bytes, shutdown).await;

    // Invocations already acknowledged to the platform still need the provider.
    let grace = Duration::from_secs(runtime.config.agent.deadline_secs);
    state.drain(grace).await;
    runtime.shutdown(cache).await;
    served.context("Gateway stopped with an error")
}
