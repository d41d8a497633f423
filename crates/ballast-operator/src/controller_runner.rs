//! Controller runner - builds the autoscaler controller futures
//!
//! Returns boxed futures the caller drives to completion, so construction
//! stays separate from the runtime.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use ballast_autoscaler::{
    cluster_for_object, error_policy, md_error_policy, reconcile, reconcile_machine_deployment,
    Context,
};
use ballast_common::crd::{Bundle, Machine, MachineDeployment, ManagedCluster};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Build the ManagedCluster autoscaler controller and the replica sync controller
///
/// The cluster controller is re-triggered by changes to its bundle and to
/// any MachineDeployment or Machine labelled with the cluster's name.
pub fn build_autoscaler_controllers(client: Client, ctx: Arc<Context>) -> Vec<ControllerFuture> {
    let clusters: Api<ManagedCluster> = Api::all(client.clone());
    let bundles: Api<Bundle> = Api::all(client.clone());
    let deployments: Api<MachineDeployment> = Api::all(client.clone());
    let machines: Api<Machine> = Api::all(client);

    tracing::info!("- ManagedCluster autoscaler controller");
    let cluster_ctrl = Controller::new(clusters, watcher_config())
        .owns(bundles, watcher_config())
        .watches(deployments.clone(), watcher_config(), |md| {
            cluster_for_object(&md)
        })
        .watches(machines, watcher_config(), |machine| {
            cluster_for_object(&machine)
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx.clone())
        .for_each(log_reconcile_result("Autoscaler"));

    tracing::info!("- MachineDeployment replica sync controller");
    let md_ctrl = Controller::new(deployments, watcher_config())
        .shutdown_on_signal()
        .run(reconcile_machine_deployment, md_error_policy, ctx)
        .for_each(log_reconcile_result("ReplicaSync"));

    vec![Box::pin(cluster_ctrl), Box::pin(md_ctrl)]
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
