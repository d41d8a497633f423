//! Common types for ballast: CRDs, errors, naming and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod naming;
pub mod retry;
pub mod settings;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Condition type reported on `ManagedCluster.status.conditions`
pub const AUTOSCALER_CONDITION: &str = "ClusterAutoscalerDeploymentReady";

/// Annotation pausing the autoscaler agent (scales it to zero)
pub const PAUSED_ANNOTATION: &str = "autoscaler.ballast.dev/paused";

/// CAPI label naming the cluster an object belongs to
pub const CAPI_CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label correlating a MachineDeployment to its declarative machine pool
pub const MACHINE_POOL_NAME_LABEL: &str = "ballast.dev/machine-pool-name";

/// Role label for control-plane machines
pub const CONTROL_PLANE_ROLE_LABEL: &str = "ballast.dev/control-plane-role";

/// Role label for etcd machines
pub const ETCD_ROLE_LABEL: &str = "ballast.dev/etcd-role";

/// Autoscaler node-group minimum size annotation
pub const AUTOSCALER_MIN_SIZE_ANNOTATION: &str =
    "cluster.x-k8s.io/cluster-api-autoscaler-node-group-min-size";

/// Autoscaler node-group maximum size annotation
pub const AUTOSCALER_MAX_SIZE_ANNOTATION: &str =
    "cluster.x-k8s.io/cluster-api-autoscaler-node-group-max-size";

/// Label naming the managed cluster a derived object serves
pub const CLUSTER_NAME_LABEL: &str = "ballast.dev/cluster-name";

/// Label naming the namespace of the managed cluster a derived object serves
pub const CLUSTER_NAMESPACE_LABEL: &str = "ballast.dev/cluster-namespace";

/// Label marking the purpose of an issued token
pub const TOKEN_KIND_LABEL: &str = "ballast.dev/token-kind";

/// Value of [`TOKEN_KIND_LABEL`] for autoscaler tokens
pub const TOKEN_KIND_AUTOSCALER: &str = "autoscaler";

/// Label selector for autoscaler tokens
pub const AUTOSCALER_TOKEN_SELECTOR: &str = "ballast.dev/token-kind=autoscaler";

/// Annotation telling the secret syncer which downstream namespace to copy into
pub const SYNC_TARGET_NAMESPACE_ANNOTATION: &str = "ballast.dev/sync-target-namespace";

/// Annotation telling the secret syncer the downstream object name
pub const SYNC_TARGET_NAME_ANNOTATION: &str = "ballast.dev/sync-target-name";

/// Annotation listing downstream clusters allowed to receive the object
pub const AUTHORIZED_FOR_CLUSTERS_ANNOTATION: &str = "ballast.dev/object-authorized-for-clusters";

/// Annotation on the agent's pods carrying the kubeconfig secret's resourceVersion
pub const KUBECONFIG_VERSION_ANNOTATION: &str = "ballast.dev/kubeconfig-version";

/// Downstream namespace the agent and its kubeconfig live in
pub const DOWNSTREAM_NAMESPACE: &str = "kube-system";

/// Downstream name of the synced kubeconfig secret
pub const DOWNSTREAM_KUBECONFIG_SECRET: &str = "mgmt-kubeconfig";
