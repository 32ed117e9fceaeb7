use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, warn};

use axum::middleware;
use clap::Parser;
use http::{
    Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use anyhow::anyhow;

use callbridge_gateway::{
    ServerConfig, middleware::connection_limit_middleware, routes, state::AppState,
};

/// CallBridge Gateway - conversational relay for live phone calls
#[derive(Parser, Debug)]
#[command(name = "callbridge-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before configuration so real env vars still override it
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!(path = %config_path.display(), "Loading configuration");
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let address = config.address();
    let cors_origins = config.cors_allowed_origins.clone();

    let app_state = AppState::new(config).map_err(|e| anyhow!(e.to_string()))?;

    // Media stream routes are the only ones subject to call limits
    let call_routes = routes::call::create_call_router().layer(middleware::from_fn_with_state(
        app_state.clone(),
        connection_limit_middleware,
    ));

    let cors_layer = match cors_origins.as_deref() {
        Some("*") => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE]),
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        }
        None => {
            info!("CORS not configured, defaulting to same-origin only");
            CorsLayer::new().allow_methods([Method::GET, Method::OPTIONS])
        }
    };

    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    let app = routes::api::create_api_router()
        .merge(call_routes)
        .with_state(app_state.clone())
        .layer(cors_layer)
        .layer(security_headers);

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    info!(address = %socket_addr, "Server listening");

    let listener = TcpListener::bind(&socket_addr).await?;
    let shutdown_state = app_state.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!(
            active_calls = shutdown_state.registry.len(),
            "Shutdown requested, closing active calls"
        );
        shutdown_state.shutdown.cancel();
        shutdown_state.registry.cancel_all();
    })
    .await?;

    Ok(())
}
