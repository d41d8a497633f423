//! Ballast Operator - cluster autoscaler lifecycle for managed clusters

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use ballast_autoscaler::{Context, TokenRotationService};
use ballast_common::kube_utils::create_client;
use ballast_common::telemetry::init_logging;
use ballast_operator::config::{Cli, Commands, RunArgs};
use ballast_operator::controller_runner::build_autoscaler_controllers;
use ballast_operator::crds::{crd_yaml, ensure_crds_installed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Crd => {
            println!("{}", crd_yaml()?);
            Ok(())
        }
        Commands::Run => {
            init_logging(cli.log_format)?;
            run_controller(cli.run).await
        }
    }
}

/// Install CRDs, then run the autoscaler controllers and token rotation until shutdown
async fn run_controller(args: RunArgs) -> anyhow::Result<()> {
    tracing::info!("ballast operator starting");

    let client = create_client(args.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let Some(settings) = args.autoscaler_settings()? else {
        tracing::info!(
            "cluster autoscaling disabled (feature off or no chart repository configured), \
             controllers not started"
        );
        tokio::signal::ctrl_c().await?;
        return Ok(());
    };
    tracing::info!(
        chart_repo = %settings.chart_repo,
        chart_version = %settings.chart_version,
        token_hashing = settings.token_hashing,
        "cluster autoscaling enabled"
    );

    let ctx = Arc::new(Context::builder(client.clone(), settings).build());

    let cancel = CancellationToken::new();
    let rotation =
        TokenRotationService::new(ctx.client.clone(), ctx.settings.clone()).spawn(cancel.clone());

    tracing::info!("starting controllers");
    let controllers = build_autoscaler_controllers(client, ctx);
    futures::future::join_all(controllers).await;

    tracing::info!("controllers stopped, stopping token rotation");
    cancel.cancel();
    if let Err(e) = rotation.await {
        tracing::warn!(error = %e, "token rotation task ended abnormally");
    }
    Ok(())
}
