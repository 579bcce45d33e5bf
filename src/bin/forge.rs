use anyhow::{Context, Result};
use reportforge::api::ModelClient;
use reportforge::config::Config;
use reportforge::orchestrator::Orchestrator;
use reportforge::server::{build_router, AppState};
use reportforge::store::{MemoryReportStore, ReportStore};
use reportforge::usage::UsageMeter;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("starting reportforge v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    config.validate()?;

    let client = ModelClient::new(&config)?;
    let store: Arc<dyn ReportStore> = Arc::new(MemoryReportStore::new());
    let meter = Arc::new(UsageMeter::new());
    let orchestrator = Arc::new(Orchestrator::new(
        client,
        Arc::clone(&store),
        Arc::clone(&meter),
    ));

    let state = AppState {
        orchestrator,
        store,
        meter,
        default_model: config.model.clone(),
        default_provider: config.provider.clone(),
    };
    let app = build_router(state, config.permissive_cors);

    info!(
        bind = %config.bind_addr,
        model = %config.model,
        provider = %config.provider,
        "listening"
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
