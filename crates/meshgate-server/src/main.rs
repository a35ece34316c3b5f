mod node;
mod routes;

use std::net::SocketAddr;

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshgate_core::{BootSpec, TrustedOrigins};
use node::RemoteNode;
use routes::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let recorder = PrometheusBuilder::new().build_recorder();
    let prometheus = recorder.handle();
    metrics::set_global_recorder(recorder).ok();

    let port: u16 = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);
    let boot_file = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BOOTFILE").ok())
        .unwrap_or_else(|| "boot.json".to_string());
    let node_url =
        std::env::var("NODE_URL").unwrap_or_else(|_| "http://127.0.0.1:9500".to_string());
    let services_dir = std::env::var("SERVICES_DIR").unwrap_or_else(|_| "services".to_string());
    let origins = std::env::var("TRUSTED_ORIGINS")
        .map(|list| TrustedOrigins::from_list(&list))
        .unwrap_or_default();

    let net = RemoteNode::connect(node_url);
    let state = AppState::new(net, &services_dir, origins);

    boot(&state, &boot_file).await;

    let app = routes::app(state)
        .route(
            "/metrics",
            get(move || {
                let rendered = prometheus.render();
                async move { rendered }
            }),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    let server = axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        tracing::error!("server error: {}", e);
    }
}

/// Initial boot from the boot file. A broken or missing file is logged and
/// tolerated: the gateway still serves, and a fixed spec can be pushed to
/// the re-boot endpoint from localhost.
async fn boot(state: &AppState, boot_file: &str) {
    let spec = match tokio::fs::read_to_string(boot_file).await {
        Ok(raw) => match serde_json::from_str::<BootSpec>(&raw) {
            Ok(spec) => spec,
            Err(e) => {
                tracing::error!(file = boot_file, error = %e, "boot file does not parse");
                return;
            }
        },
        Err(e) => {
            tracing::error!(file = boot_file, error = %e, "cannot read boot file");
            return;
        }
    };

    match state.orchestrator.boot(&spec).await {
        Ok(report) => tracing::info!(
            started = report.started.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "initial boot finished"
        ),
        Err(e) => tracing::error!(error = %e, "bootstrap failed"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
