use anyhow::Result;
use gitgud_server::{
    api::server::{prepare_storage, run_api},
    config::{AppEnv, loader},
    metrics_exporter,
    supervisor::Supervisor,
    telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing(AppEnv::from_process_env());

    let config = loader::load_with_discovery()?;
    tracing::info!(
        environment = ?config.environment,
        repositories_root = %config.repositories_root.display(),
        "starting gitgud"
    );

    metrics_exporter::init_metrics()?;
    prepare_storage(&config).await?;

    let mut supervisor = Supervisor::new();
    supervisor.spawn("http", move |shutdown| run_api(config, shutdown));
    supervisor.run().await
}
