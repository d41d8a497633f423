//! Cluster API and control-plane kinds the autoscaler subsystem reads
//!
//! Only the fields the reconcilers touch are modelled; unknown fields are
//! ignored on deserialization. These CRDs are installed by their owning
//! providers, never by this operator.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::kube_utils::is_true;
use crate::{
    AUTOSCALER_MAX_SIZE_ANNOTATION, AUTOSCALER_MIN_SIZE_ANNOTATION, CAPI_CLUSTER_NAME_LABEL,
    CONTROL_PLANE_ROLE_LABEL, ETCD_ROLE_LABEL, MACHINE_POOL_NAME_LABEL,
};

/// Live scalable group of machines
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "MachineDeployment",
    plural = "machinedeployments",
    status = "MachineDeploymentStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentSpec {
    /// CAPI cluster this deployment belongs to
    #[serde(default)]
    pub cluster_name: String,

    /// Live replica count, written by the autoscaler agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

/// Observed state of a MachineDeployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentStatus {
    /// Total machines targeted by this deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Machines that are ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,
    /// Rollout phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// Min/max node-group bounds parsed from autoscaler annotations
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScaleBounds {
    /// Minimum node count
    pub min: u32,
    /// Maximum node count
    pub max: u32,
}

impl MachineDeployment {
    fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(key))
            .map(String::as_str)
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Value of the `cluster.x-k8s.io/cluster-name` label
    pub fn cluster_name_label(&self) -> Option<&str> {
        self.label(CAPI_CLUSTER_NAME_LABEL)
    }

    /// Value of the machine-pool-name label
    pub fn pool_name_label(&self) -> Option<&str> {
        self.label(MACHINE_POOL_NAME_LABEL)
    }

    /// True when either autoscaler bound annotation is present
    pub fn is_scale_managed(&self) -> bool {
        self.annotation(AUTOSCALER_MIN_SIZE_ANNOTATION).is_some()
            || self.annotation(AUTOSCALER_MAX_SIZE_ANNOTATION).is_some()
    }

    /// Parsed bounds, or `None` when the deployment is not scale-managed.
    ///
    /// Absent or unparsable values read as 0.
    pub fn scale_bounds(&self) -> Option<ScaleBounds> {
        if !self.is_scale_managed() {
            return None;
        }
        let parse = |key| {
            self.annotation(key)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(0)
        };
        Some(ScaleBounds {
            min: parse(AUTOSCALER_MIN_SIZE_ANNOTATION),
            max: parse(AUTOSCALER_MAX_SIZE_ANNOTATION),
        })
    }

    /// Whether the deployment's nodes carry the control-plane or etcd role
    pub fn has_quorum_role(&self) -> bool {
        let labels = self.metadata.labels.as_ref();
        is_true(labels, CONTROL_PLANE_ROLE_LABEL) || is_true(labels, ETCD_ROLE_LABEL)
    }

    /// Whether the deployment is being deleted
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Display name for messages: the pool name when labelled, else the object name
    pub fn display_name(&self) -> String {
        self.pool_name_label()
            .map(str::to_string)
            .unwrap_or_else(|| self.name_any())
    }
}

/// A single machine, correlated to its cluster by label
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    plural = "machines",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// CAPI cluster this machine belongs to
    #[serde(default)]
    pub cluster_name: String,
}

/// CAPI `Cluster`, renamed to avoid clashing with the many other "Cluster" types
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    root = "CapiCluster",
    plural = "clusters",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CapiClusterSpec {
    /// Reference to the object implementing the control plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_ref: Option<ObjectReference>,
}

/// RKE2/K3s control plane
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rke.cattle.io",
    version = "v1",
    kind = "RKEControlPlane",
    root = "RkeControlPlane",
    plural = "rkecontrolplanes",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RkeControlPlaneSpec {
    /// Kubernetes version the control plane runs
    #[serde(default)]
    pub kubernetes_version: String,
}

/// Kind discriminator for [`RkeControlPlane`] references
pub const RKE_CONTROL_PLANE_KIND: &str = "RKEControlPlane";
