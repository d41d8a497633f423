//! Autoscaler reconcilers
//!
//! [`reconcile`] drives a ManagedCluster through validation, credentials,
//! kubeconfig and release, then mirrors the release state into the
//! `ClusterAutoscalerDeploymentReady` condition. [`reconcile_machine_deployment`]
//! relays the agent's replica changes back into the cluster's machine pools.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use ballast_common::crd::{
    remove_condition, upsert_condition, Condition, ConditionStatus, MachineDeployment,
    ManagedCluster,
};
use ballast_common::retry::RetryConfig;
use ballast_common::settings::AutoscalerSettings;
use ballast_common::{Error, AUTOSCALER_CONDITION, CAPI_CLUSTER_NAME_LABEL};

use crate::client::{AutoscalerClient, AutoscalerClientImpl};
use crate::deployment::release_condition;
use crate::replicas::{sync_machine_deployment, SyncOutcome};
use crate::validation::{has_scale_managed, validate_machine_deployments};
use crate::{credentials, deployment, kubeconfig};

/// Requeue delay while the cluster is not ready
pub const NOT_READY_REQUEUE: Duration = Duration::from_secs(30);
/// Requeue delay while the release has not reported ready
pub const RELEASE_PENDING_REQUEUE: Duration = Duration::from_secs(300);
/// Requeue delay after a retryable failure
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5);
/// Requeue delay after a failure that needs a spec or permission change
pub const VALIDATION_ERROR_REQUEUE: Duration = Duration::from_secs(60);

const REASON_LOOKUP_FAILED: &str = "LookupFailed";
const REASON_CLEANUP_FAILED: &str = "CleanupFailed";
const REASON_VALIDATION_FAILED: &str = "ValidationFailed";
const REASON_PROVISIONING_FAILED: &str = "ProvisioningFailed";

/// Controller context shared by the autoscaler reconcilers
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub client: Arc<dyn AutoscalerClient>,
    /// Settings every reconcile runs with
    pub settings: Arc<AutoscalerSettings>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, settings: AutoscalerSettings) -> ContextBuilder {
        ContextBuilder::new(client, settings)
    }

    /// Create a context for testing with a mock client
    #[cfg(test)]
    pub fn for_testing(client: Arc<dyn AutoscalerClient>, settings: AutoscalerSettings) -> Self {
        Self {
            client,
            settings: Arc::new(settings),
        }
    }
}

/// Builder for constructing [`Context`] instances
///
/// ```text
/// let ctx = Context::builder(client, settings).build();
/// ```
pub struct ContextBuilder {
    client: Client,
    settings: AutoscalerSettings,
    autoscaler_client: Option<Arc<dyn AutoscalerClient>>,
}

impl ContextBuilder {
    fn new(client: Client, settings: AutoscalerSettings) -> Self {
        Self {
            client,
            settings,
            autoscaler_client: None,
        }
    }

    /// Override the API client (primarily for testing)
    pub fn autoscaler_client(mut self, client: Arc<dyn AutoscalerClient>) -> Self {
        self.autoscaler_client = Some(client);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            client: self
                .autoscaler_client
                .unwrap_or_else(|| Arc::new(AutoscalerClientImpl::new(self.client.clone()))),
            settings: Arc::new(self.settings),
        }
    }
}

/// Map a CAPI object to the ManagedCluster named by its cluster label
pub fn cluster_for_object<K: ResourceExt>(obj: &K) -> Option<ObjectRef<ManagedCluster>> {
    let name = obj.labels().get(CAPI_CLUSTER_NAME_LABEL)?;
    let namespace = obj.namespace()?;
    Some(ObjectRef::new(name).within(&namespace))
}

/// Reconcile the autoscaler for one ManagedCluster
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<ManagedCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    if cluster.metadata.deletion_timestamp.is_some() {
        debug!("cluster is being deleted, owner references clean up");
        return Ok(Action::await_change());
    }

    let client = ctx.client.as_ref();
    let ns = cluster.namespace().unwrap_or_default();
    let deployments = match client
        .list_machine_deployments(&ns, &cluster.name_any())
        .await
    {
        Ok(deployments) => deployments,
        Err(e) => return Err(record_failure(client, &cluster, REASON_LOOKUP_FAILED, e).await),
    };

    if !cluster.spec.autoscaling.enabled || !has_scale_managed(&deployments) {
        debug!("autoscaling not requested, removing autoscaler resources");
        if let Err(e) = cleanup(client, &cluster).await {
            return Err(record_failure(client, &cluster, REASON_CLEANUP_FAILED, e).await);
        }
        clear_condition(client, &cluster).await?;
        return Ok(Action::await_change());
    }

    if !cluster.is_ready() {
        debug!("cluster not ready, waiting");
        return Ok(Action::requeue(NOT_READY_REQUEUE));
    }

    let bundle = match provision(client, &ctx.settings, &cluster, &deployments).await {
        Ok(bundle) => bundle,
        Err(e) => {
            let reason = match &e {
                Error::Validation { .. } => REASON_VALIDATION_FAILED,
                _ => REASON_PROVISIONING_FAILED,
            };
            return Err(record_failure(client, &cluster, reason, e).await);
        }
    };

    let condition = release_condition(&bundle);
    let ready = condition.status == ConditionStatus::True;
    set_condition(client, &cluster, condition).await?;

    if ready {
        info!("cluster autoscaler deployed");
        Ok(Action::await_change())
    } else {
        debug!("cluster autoscaler not ready yet");
        Ok(Action::requeue(RELEASE_PENDING_REQUEUE))
    }
}

/// Release first, then kubeconfig, then credentials; the agent is gone
/// before the identity it authenticates as.
async fn cleanup(client: &dyn AutoscalerClient, cluster: &ManagedCluster) -> Result<(), Error> {
    deployment::cleanup_release(client, cluster).await?;
    kubeconfig::delete_kubeconfig(client, cluster).await?;
    credentials::cleanup_credentials(client, cluster).await
}

/// Set the condition False with the error's message and hand the error back
async fn record_failure(
    client: &dyn AutoscalerClient,
    cluster: &ManagedCluster,
    reason: &str,
    error: Error,
) -> Error {
    let condition = Condition::new(
        AUTOSCALER_CONDITION,
        ConditionStatus::False,
        reason,
        error.to_string(),
    );
    if let Err(status_err) = set_condition(client, cluster, condition).await {
        warn!(error = %status_err, "failed to record autoscaler failure on status");
    }
    error
}

/// Validation, then credentials, kubeconfig and release, in that order
async fn provision(
    client: &dyn AutoscalerClient,
    settings: &AutoscalerSettings,
    cluster: &ManagedCluster,
    deployments: &[MachineDeployment],
) -> Result<ballast_common::crd::Bundle, Error> {
    validate_machine_deployments(cluster, deployments)?;

    let ns = cluster.namespace().unwrap_or_default();
    let identity = credentials::ensure_identity(client, cluster).await?;
    let identity_name = identity.name_any();
    let machines = client.list_machines(&ns, &cluster.name_any()).await?;
    let role = credentials::ensure_role(client, cluster, deployments, &machines).await?;
    credentials::ensure_role_binding(client, cluster, &identity_name, &role.name_any()).await?;

    let secret = match credentials::ensure_token(client, settings, cluster, &identity_name).await? {
        Some(bearer) => kubeconfig::ensure_kubeconfig(client, settings, cluster, &bearer).await?,
        None => match kubeconfig::get_kubeconfig(client, cluster).await? {
            Some(secret) => secret,
            None => {
                info!("stored token is hashed and no kubeconfig exists, reissuing");
                let bearer =
                    credentials::reissue_token(client, settings, cluster, &identity_name).await?;
                kubeconfig::create_kubeconfig(client, settings, cluster, &bearer).await?
            }
        },
    };
    let kubeconfig_version = secret.resource_version().unwrap_or_default();

    deployment::converge(client, settings, cluster, &kubeconfig_version).await
}

async fn set_condition(
    client: &dyn AutoscalerClient,
    cluster: &ManagedCluster,
    condition: Condition,
) -> Result<(), Error> {
    let mut conditions = current_conditions(cluster);
    if !upsert_condition(&mut conditions, condition) {
        return Ok(());
    }
    client.patch_conditions(cluster, conditions).await
}

async fn clear_condition(
    client: &dyn AutoscalerClient,
    cluster: &ManagedCluster,
) -> Result<(), Error> {
    let mut conditions = current_conditions(cluster);
    if !remove_condition(&mut conditions, AUTOSCALER_CONDITION) {
        return Ok(());
    }
    client.patch_conditions(cluster, conditions).await
}

fn current_conditions(cluster: &ManagedCluster) -> Vec<Condition> {
    cluster
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default()
}

/// Error policy for the cluster controller
pub fn error_policy(cluster: Arc<ManagedCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        cluster = %cluster.name_any(),
        "autoscaler reconciliation failed"
    );
    requeue_for(error)
}

/// Relay one MachineDeployment's replica count into its machine pool
#[instrument(skip(md, ctx), fields(machine_deployment = %md.name_any()))]
pub async fn reconcile_machine_deployment(
    md: Arc<MachineDeployment>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let outcome =
        sync_machine_deployment(ctx.client.as_ref(), &RetryConfig::conflict(), &md).await?;
    if let SyncOutcome::Updated { pool, from, to } = outcome {
        debug!(%pool, from, to, "machine pool updated");
    }
    Ok(Action::await_change())
}

/// Error policy for the machine deployment controller
pub fn md_error_policy(md: Arc<MachineDeployment>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        machine_deployment = %md.name_any(),
        "replica sync failed"
    );
    requeue_for(error)
}

fn requeue_for(error: &Error) -> Action {
    if error.is_retryable() {
        Action::requeue(ERROR_REQUEUE)
    } else {
        Action::requeue(VALIDATION_ERROR_REQUEUE)
    }
}
