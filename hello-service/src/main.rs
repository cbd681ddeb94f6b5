use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use hello_service::config::Config;
use hello_service::lifecycle::{Coordinator, StartupError};
use hello_service::prometheus::setup_metrics_recorder;
use hello_service::signals::ShutdownSignals;
use registry_client::ConsulClient;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env().wrap_err("failed to load configuration from env")?;

    // stdout with a level configured by the RUST_LOG envvar (default=INFO)
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();

    let registry = ConsulClient::new(&config.registry()).map_err(StartupError::RegistryClient)?;
    tracing::info!("using registry at {}", registry.base_url());

    let mut coordinator = Coordinator::new(config.clone(), registry);
    if config.export_prometheus {
        let recorder_handle =
            setup_metrics_recorder().wrap_err("failed to install prometheus recorder")?;
        coordinator = coordinator.with_metrics(recorder_handle);
    }

    let mut signals = ShutdownSignals::install().wrap_err("failed to install signal handlers")?;
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        signals.recv().await;
        tracing::info!("Shutting down gracefully...");
        trigger.cancel();
    });

    let report = match coordinator.run(shutdown).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("{}", e);
            return Err(e.into());
        }
    };

    if !report.is_clean_exit() {
        eyre::bail!("http listener for {} exited while serving", report.instance_id);
    }

    Ok(())
}
