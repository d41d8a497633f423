//! Cluster autoscaler lifecycle for ballast
//!
//! This crate provides the reconcilers that keep a cluster-autoscaler agent
//! deployed for every ManagedCluster with scale-managed machine pools:
//! credentials on the management cluster, the kubeconfig the agent uses to
//! reach it, the Fleet bundle installing the chart, replica sync back into the
//! declarative pools, and periodic token rotation.
//!
//! Related crates:
//! - `ballast-common`: CRDs, errors, naming and settings
//! - `ballast-operator`: the binary wiring these reconcilers into controllers

#![deny(missing_docs)]

pub mod client;
pub mod control_plane;
pub mod controller;
pub mod credentials;
pub mod deployment;
pub mod kubeconfig;
pub mod replicas;
pub mod rotation;
pub mod token;
pub mod validation;

pub use client::{AutoscalerClient, AutoscalerClientImpl};
pub use controller::{
    cluster_for_object, error_policy, md_error_policy, reconcile, reconcile_machine_deployment,
    Context, ContextBuilder,
};
pub use rotation::{SweepReport, TokenRotationService};

pub use ballast_common::{Error, Result};

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use ballast_common::crd::{
        MachineDeployment, MachineDeploymentSpec, MachinePool, ManagedCluster,
        ManagedClusterSpec, ManagedClusterStatus,
    };
    use ballast_common::{
        Error, AUTOSCALER_MAX_SIZE_ANNOTATION, AUTOSCALER_MIN_SIZE_ANNOTATION,
        CAPI_CLUSTER_NAME_LABEL, MACHINE_POOL_NAME_LABEL,
    };

    /// Ready cluster `ns1/c1` with a single three-node worker pool
    pub fn sample_cluster() -> ManagedCluster {
        let mut cluster = ManagedCluster::new(
            "c1",
            ManagedClusterSpec {
                kubernetes_version: Some("v1.31.4+rke2r1".to_string()),
                machine_pools: vec![MachinePool {
                    name: "worker".to_string(),
                    quantity: Some(3),
                    worker_role: true,
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        cluster.metadata.namespace = Some("ns1".to_string());
        cluster.metadata.uid = Some("uid-c1".to_string());
        cluster.status = Some(ManagedClusterStatus {
            ready: true,
            ..Default::default()
        });
        cluster
    }

    /// MachineDeployment `ns1/c1-<pool>` annotated for autoscaling between 1 and 5
    pub fn sample_md(pool: &str, replicas: Option<i32>) -> MachineDeployment {
        let mut md = MachineDeployment::new(
            &format!("c1-{}", pool),
            MachineDeploymentSpec {
                cluster_name: "c1".to_string(),
                replicas,
            },
        );
        md.metadata.namespace = Some("ns1".to_string());
        md.metadata.labels = Some(BTreeMap::from([
            (CAPI_CLUSTER_NAME_LABEL.to_string(), "c1".to_string()),
            (MACHINE_POOL_NAME_LABEL.to_string(), pool.to_string()),
        ]));
        md.metadata.annotations = Some(BTreeMap::from([
            (AUTOSCALER_MIN_SIZE_ANNOTATION.to_string(), "1".to_string()),
            (AUTOSCALER_MAX_SIZE_ANNOTATION.to_string(), "5".to_string()),
        ]));
        md
    }

    /// API error with the given HTTP status
    pub fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }
}
