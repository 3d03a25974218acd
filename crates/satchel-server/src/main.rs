use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use satchel_server::app::{self, AppState};
use satchel_server::config::Config;
use satchel_server::metrics;
use satchel_server::store::mongo::MongoStore;

#[derive(Parser)]
#[command(name = "satchel-server", version, about = "Multi-tenant HTTP message queue")]
struct Args {
    /// Path to the YAML config file.
    #[arg(long, default_value = "config.yml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    metrics::init_metrics();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "satchel_server=info,satchel_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config);
    tracing::info!(
        port = config.port,
        environment = %config.environment,
        mongo_host = %config.mongo_host,
        "startup settings"
    );

    let store = MongoStore::connect(&config)
        .await
        .expect("failed to connect to MongoDB");

    let state = AppState {
        store: Arc::new(store),
    };
    let app = app::build_app(state);

    let bind = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {bind}");

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .expect("failed to bind");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server failed");
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
