use std::sync::Arc;

use activa::notifier::LogNotifier;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // No transport adapter wired in this binary: deliveries go to the log
    // and the inbound queue stays open until shutdown.
    let notifier = Arc::new(LogNotifier);
    let state = match activa::initialize_state(Arc::clone(&notifier)) {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "cannot initialize state");
            std::process::exit(1);
        },
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        apps = state.config.apps.len(),
        "starting activa"
    );

    tokio::spawn(state.reporter.clone().run_scheduler());

    let (events, inbound) = mpsc::channel(1024);
    let dispatcher = activa::dispatcher(&state);
    let running = tokio::spawn(dispatcher.run(inbound));

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
    }
    tracing::info!("shutdown requested, draining sessions");

    // Closing the inbound queue lets every session worker drain and stop.
    drop(events);
    if let Err(err) = running.await {
        tracing::error!(error = %err, "dispatcher task failed");
    }
}
