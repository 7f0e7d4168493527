use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hf_hub::api::tokio::Api;
use tokio::{self, net::TcpListener};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tranh_core::{load_model, DeviceMap, MyMemoryTranslator, Pipeline};
use tranh_server::output::OutputStore;
use tranh_server::{app, AppState, Args};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tranh_server=info,tranh_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // --- Load the model once, before serving ---
    let model = load_model(
        &args.model,
        args.sd_version,
        args.load_options(),
        Api::new().context("failed to create hf hub API")?,
        DeviceMap::from_cpu_flag(args.cpu),
    )
    .await
    .with_context(|| format!("failed to load model {}", args.model))?;
    tracing::info!(model = %args.model, "model ready");

    let translator = MyMemoryTranslator::new(args.translator_config())?;

    // Build application state.
    let state = AppState {
        translator: Arc::new(translator),
        pipeline: Pipeline::new(model).with_timeout(args.generation_timeout()),
        outputs: OutputStore::new(&args.output_dir, &args.output_name, args.unique_outputs),
    };
    tracing::info!(
        output_dir = %state.outputs.dir().display(),
        timeout_secs = state.pipeline.timeout().as_secs(),
        "serving generated images"
    );

    // --- Start the server ---
    let listener = TcpListener::bind(args.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", args.bind_address()))?;
    tracing::info!("Started server on {}", listener.local_addr()?);
    axum::serve(listener, app(state, &args))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
