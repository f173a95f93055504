use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use racer_server::config::{generate_config_template, Config};
use racer_server::ws::Hub;
use racer_server::{routes, shutdown, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("racer_server=info"))
    };
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter()).init();
    }

    tracing::info!("Racer server v{} starting", env!("CARGO_PKG_VERSION"));

    let hub_config = config.hub.to_hub_config()?;
    let grace = hub_config.keepalive.write_wait * 2;
    tracing::info!(
        max_connections = hub_config.max_connections,
        queue_capacity = hub_config.queue_capacity,
        overflow_policy = ?hub_config.overflow_policy,
        "Starting broadcast hub"
    );
    let hub = Hub::new(hub_config.clone())?;

    let app_state = state::AppState {
        hub: hub.clone(),
        max_connections: hub_config.max_connections,
    };
    let app = routes::build_router(app_state, &config.prefix);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(prefix = %config.prefix, "Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::graceful(hub, grace))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
