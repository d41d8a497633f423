//! Relay the agent's scaling decisions into the declarative machine pools
//!
//! The autoscaler agent writes `spec.replicas` on MachineDeployments. The
//! provisioning subsystem owns `ManagedCluster.spec.machinePools[].quantity`
//! and would otherwise scale the deployment straight back. Each live change
//! is copied into the matching pool, touching only that one pool.

use kube::ResourceExt;
use tracing::{debug, info, warn};

use ballast_common::crd::{MachineDeployment, ManagedCluster};
use ballast_common::retry::{retry_on_conflict, RetryConfig};
use ballast_common::Error;

use crate::client::AutoscalerClient;

/// What a sync pass did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing to do (not correlated, unmanaged, or already equal)
    Unchanged,
    /// Pool quantity written
    Updated {
        /// Pool that changed
        pool: String,
        /// Previous desired quantity
        from: i32,
        /// New desired quantity
        to: i32,
    },
    /// Write refused: the pool must keep at least one node
    Refused,
}

enum Decision {
    Skip,
    Refuse,
    Write { from: i32, to: i32 },
}

fn decide(cluster: &ManagedCluster, pool_name: &str, live: Option<i32>) -> Decision {
    let Some(pool) = cluster.machine_pool(pool_name) else {
        return Decision::Skip;
    };
    let (Some(desired), Some(live)) = (pool.quantity, live) else {
        return Decision::Skip;
    };
    if desired == live {
        return Decision::Skip;
    }
    if live == 0 && pool.requires_minimum_node() {
        return Decision::Refuse;
    }
    Decision::Write {
        from: desired,
        to: live,
    }
}

/// Copy the deployment's live replica count into its declarative pool
pub async fn sync_machine_deployment(
    client: &dyn AutoscalerClient,
    retry: &RetryConfig,
    md: &MachineDeployment,
) -> Result<SyncOutcome, Error> {
    if md.is_deleting() {
        return Ok(SyncOutcome::Unchanged);
    }
    let (Some(cluster_name), Some(pool_name)) = (md.cluster_name_label(), md.pool_name_label())
    else {
        return Ok(SyncOutcome::Unchanged);
    };
    let ns = md.namespace().unwrap_or_default();
    let ns = ns.as_str();
    let live = md.spec.replicas;

    retry_on_conflict(retry, "sync_pool_quantity", || async move {
        let Some(mut cluster) = client.get_cluster(ns, cluster_name).await? else {
            debug!(cluster = %cluster_name, "no managed cluster for machine deployment");
            return Ok(SyncOutcome::Unchanged);
        };

        let (from, to) = match decide(&cluster, pool_name, live) {
            Decision::Skip => return Ok(SyncOutcome::Unchanged),
            Decision::Refuse => {
                warn!(
                    cluster = %cluster.key(),
                    pool = %pool_name,
                    "refusing to scale a control-plane or etcd pool to zero"
                );
                return Ok(SyncOutcome::Refused);
            }
            Decision::Write { from, to } => (from, to),
        };

        if let Some(pool) = cluster
            .spec
            .machine_pools
            .iter_mut()
            .find(|p| p.name == pool_name)
        {
            pool.quantity = Some(to);
        }
        client.replace_cluster(&cluster).await?;

        info!(
            cluster = %cluster.key(),
            pool = %pool_name,
            from,
            to,
            "synced machine pool quantity from autoscaler"
        );
        Ok(SyncOutcome::Updated {
            pool: pool_name.to_string(),
            from,
            to,
        })
    })
    .await
}
