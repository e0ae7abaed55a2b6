use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use sysdb::config::SysDbConfig;
use sysdb::handlers;
use sysdb::store::Store;
use sysdb::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path = std::env::var("SYSDB_CONFIG").unwrap_or_else(|_| "sysdb.toml".to_string());
    // `SysDbConfig::load` already folds `SYSDB_LOG` into `config.log_filter`
    // (§10.1/§10.3); `RUST_LOG`, if set, still wins over both, matching
    // `tracing_subscriber`'s own convention.
    let config = SysDbConfig::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter.clone())),
        )
        .init();

    let bind_addr: std::net::SocketAddr = config.bind_addr.parse()?;

    let state = AppState {
        store: Arc::new(Store::new()),
        config: Arc::new(config),
    };

    let app = Router::new()
        .route("/v1/hosts", post(handlers::hosts::store_host).delete(handlers::hosts::clear_store))
        .route("/v1/hosts/{host}", get(handlers::hosts::get_host))
        .route("/v1/hosts/{host}/services", post(handlers::hosts::store_service))
        .route("/v1/hosts/{host}/metrics", post(handlers::hosts::store_metric))
        .route("/v1/hosts/{host}/attributes", post(handlers::hosts::store_host_attribute))
        .route(
            "/v1/hosts/{host}/services/{service}/attributes",
            post(handlers::hosts::store_service_attribute),
        )
        .route(
            "/v1/hosts/{host}/metrics/{metric}/attributes",
            post(handlers::hosts::store_metric_attribute),
        )
        .route("/v1/query", post(handlers::query::run_query))
        .route("/healthz", get(handlers::health::healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("sysdb listening on {bind_addr}");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
