//! Entry point: wires config, auth storage, the orchestrator, and the HTTP
//! API together, then runs the tick loop and server side by side.

use anyhow::Context;
use axum::middleware as axum_mw;
use betterbot_backend::auth::{AuthState, JwtHandler, UserStore};
use betterbot_backend::config::Config;
use betterbot_backend::exchange::MockExchangeAdapter;
use betterbot_backend::middleware::{logging::request_logging, RateLimitConfig, RateLimitLayer};
use betterbot_backend::notifier::{CsvAuditNotifier, NullNotifier, Notifier};
use betterbot_backend::orchestrator::Orchestrator;
use betterbot_backend::signals::{NullSignalSource, SignalSource};
use betterbot_backend::{api::api_router, AppState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("failed to load configuration")?;

    info!("starting trading bot");

    let user_store = Arc::new(
        UserStore::new(&config.database_path).context("failed to initialize user store")?,
    );
    let jwt_handler = Arc::new(JwtHandler::new(config.jwt_secret.clone()));
    let auth_state = AuthState::new(user_store, jwt_handler);

    let exchange = Arc::new(MockExchangeAdapter::new());
    let signal_sources: Vec<Arc<dyn SignalSource>> = vec![Arc::new(NullSignalSource)];
    let notifier: Arc<dyn Notifier> = if let Ok(dir) = std::env::var("AUDIT_LOG_DIR") {
        Arc::new(CsvAuditNotifier::new(dir))
    } else {
        Arc::new(NullNotifier)
    };

    let starting_capital = std::env::var("STARTING_CAPITAL_USD")
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(10_000.0);

    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        exchange,
        signal_sources,
        notifier.clone(),
        starting_capital,
    ));

    notifier.on_system_start("orchestrator online").await;

    tokio::spawn(tick_loop(orchestrator.clone(), config.batch_tick_interval_secs));
    tokio::spawn(paper_resolution_loop(
        orchestrator.clone(),
        config.paper_resolution_check_interval_secs,
    ));

    let app_state = AppState {
        orchestrator,
        auth: auth_state.clone(),
    };

    let rate_limiter = RateLimitLayer::new(RateLimitConfig::default());

    let app = api_router(&auth_state)
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(axum_mw::from_fn(request_logging))
        .layer(axum_mw::from_fn_with_state(rate_limiter, betterbot_backend::middleware::rate_limit::rate_limit_middleware));

    let addr = config.bind_addr.clone();
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "API server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}

async fn tick_loop(orchestrator: Arc<Orchestrator>, interval_secs: u64) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        let summary = orchestrator.tick().await;
        if summary.errors > 0 {
            tracing::warn!(errors = summary.errors, "tick completed with errors");
        }
    }
}

async fn paper_resolution_loop(orchestrator: Arc<Orchestrator>, interval_secs: u64) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        orchestrator.poll_paper_resolutions().await;
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "betterbot_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
