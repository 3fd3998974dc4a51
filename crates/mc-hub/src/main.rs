use clap::Parser;
use mc_hub::hub::{BroadcastHub, HubConfig};
use mc_hub::server;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mc-hub")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value_t = 30)]
    heartbeat_interval: u64,
    #[arg(long, default_value_t = 100)]
    max_connections: usize,
    #[arg(long, default_value_t = 100)]
    history_size: usize,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug || env_true("MC_HUB_DEBUG"));

    let addr_str = resolve_addr(&args.addr);
    let addr: SocketAddr = match addr_str.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %addr_str);
            return;
        }
    };

    let hub = Arc::new(BroadcastHub::new(HubConfig {
        heartbeat_interval: Duration::from_secs(args.heartbeat_interval),
        max_connections: args.max_connections,
        history_capacity: args.history_size,
        write_timeout: Duration::from_secs(args.write_timeout),
    }));
    let heartbeat = hub.start_heartbeat();

    let app = server::router(hub.clone());
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err, addr = %addr_str);
            return;
        }
    };

    info!(event = "hub_start", addr = %addr_str);

    let shutdown = {
        let hub = hub.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            info!(event = "hub_shutdown");
            hub.shutdown().await;
        }
    };

    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    {
        error!(event = "hub_error", error = %err);
    }
    heartbeat.abort();
}

fn init_logging(debug: bool) {
    let level = if debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("MC_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn resolve_addr(addr_flag: &str) -> String {
    if !addr_flag.trim().is_empty() {
        return addr_flag.to_string();
    }
    if let Ok(value) = std::env::var("MC_HUB_ADDR") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    "127.0.0.1:3002".to_string()
}
