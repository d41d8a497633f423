//! ManagedCluster Custom Resource Definition
//!
//! The ManagedCluster is the declarative record the provisioning subsystem
//! owns for a workload cluster. The autoscaler subsystem reads it, reports a
//! single condition on its status, and writes back exactly one field: the
//! desired `quantity` of a machine pool the autoscaler has resized.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;
use crate::kube_utils::is_true;
use crate::PAUSED_ANNOTATION;

/// Specification for a ManagedCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ballast.dev",
    version = "v1alpha1",
    kind = "ManagedCluster",
    plural = "managedclusters",
    shortname = "mc",
    status = "ManagedClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"K8s","type":"string","jsonPath":".spec.kubernetesVersion"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// Kubernetes version the cluster is pinned to (e.g. "v1.31.4+rke2r1")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,

    /// Machine pools making up the cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub machine_pools: Vec<MachinePool>,

    /// Cluster autoscaler integration settings
    #[serde(default)]
    pub autoscaling: AutoscalingSpec,
}

/// Per-cluster autoscaling switch
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingSpec {
    /// Deploy and maintain the cluster autoscaler for this cluster
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AutoscalingSpec {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

/// A declarative machine pool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachinePool {
    /// Pool name, matched against the MachineDeployment pool-name label
    pub name: String,

    /// Desired node count; unset means the pool is not count-managed here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i32>,

    /// Nodes run the control plane
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub control_plane_role: bool,

    /// Nodes run etcd
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub etcd_role: bool,

    /// Nodes run workloads
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub worker_role: bool,
}

impl MachinePool {
    /// Control-plane and etcd pools must always keep at least one node
    pub fn requires_minimum_node(&self) -> bool {
        self.control_plane_role || self.etcd_role
    }
}

/// Status for a ManagedCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    /// Whether the cluster's API server is up and agents are connected
    #[serde(default)]
    pub ready: bool,

    /// The generation of the spec last processed by the provisioning controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions representing the cluster state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ManagedCluster {
    /// `namespace/name`, used in logs and error context
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace().unwrap_or_default(), self.name_any())
    }

    /// Whether the provisioning controller reports the cluster ready
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    /// Whether an operator paused the autoscaler (scales the agent to zero)
    pub fn is_autoscaler_paused(&self) -> bool {
        is_true(self.metadata.annotations.as_ref(), PAUSED_ANNOTATION)
    }

    /// Find a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.type_ == type_))
    }

    /// Find a machine pool by name
    pub fn machine_pool(&self, name: &str) -> Option<&MachinePool> {
        self.spec.machine_pools.iter().find(|p| p.name == name)
    }
}
