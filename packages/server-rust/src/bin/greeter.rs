//! Demo server: answers `HelloRequest` with `HelloResponse` on every path.
//!
//! ```text
//! curl -H 'Content-Type: application/json' -d '{"name":"World"}' localhost:8080
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use protowire_core::hello::{HelloRequest, HelloResponse};
use protowire_core::JsonCodec;
use protowire_server::dispatch::{Endpoint, EndpointConfig};
use protowire_server::handler::{HandlerDescriptor, RequestContext, Status};
use protowire_server::network::{NetworkConfig, NetworkModule};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Serve the hello endpoint over protobuf and JSON.
#[derive(Debug, Parser)]
#[command(name = "greeter", version)]
struct Args {
    /// Address to bind.
    #[arg(long, env = "GREETER_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on. 0 picks a free port.
    #[arg(long, env = "GREETER_PORT", default_value_t = 8080)]
    port: u16,

    /// Per-request timeout in seconds.
    #[arg(long, env = "GREETER_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Accept only protobuf bodies.
    #[arg(long, env = "GREETER_NO_JSON")]
    no_json: bool,

    /// Indent JSON responses.
    #[arg(long, env = "GREETER_PRETTY")]
    pretty: bool,

    /// Emit logs as JSON lines.
    #[arg(long, env = "GREETER_JSON_LOGS")]
    json_logs: bool,

    /// Expose Prometheus metrics on this address.
    #[arg(long, env = "GREETER_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

fn init_logging(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.context("failed to initialize logging")
}

fn greet(ctx: &RequestContext, req: &HelloRequest) -> Result<HelloResponse, Status> {
    if req.name.is_empty() {
        return Err(Status::bad_request("name is required"));
    }
    tracing::debug!(request_id = ctx.request_id, name = %req.name, "greeting");
    Ok(HelloResponse {
        text: format!("Hello, {}!", req.name),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs)?;

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        tracing::info!(%addr, "metrics exporter listening");
    }

    let json = match (args.no_json, args.pretty) {
        (true, _) => None,
        (false, true) => Some(JsonCodec::pretty()),
        (false, false) => Some(JsonCodec::new()),
    };
    let config = EndpointConfig::default().with_json(json);
    let descriptor = HandlerDescriptor::<HelloRequest, HelloResponse>::with_context(greet);
    let endpoint = Endpoint::with_config(descriptor, config);

    let mut module = NetworkModule::new(
        NetworkConfig {
            host: args.host,
            port: args.port,
            request_timeout: Duration::from_secs(args.timeout_secs),
        },
        endpoint,
    );
    module.start().await?;

    module
        .serve(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown signal received");
        })
        .await
}
