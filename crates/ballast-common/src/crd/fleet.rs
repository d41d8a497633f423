//! Fleet `Bundle`: the release record the package installer turns into workloads
//!
//! Modelled on the subset of `fleet.cattle.io/v1alpha1` the autoscaler
//! subsystem writes (a single Helm chart targeted at one cluster) and reads
//! back (the deployment summary).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of a Fleet bundle
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "Bundle",
    plural = "bundles",
    status = "BundleStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    /// Namespace workloads are installed into on the target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,

    /// Helm chart to deploy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmOptions>,

    /// Clusters the bundle is deployed to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<BundleTarget>,
}

/// Helm chart reference and values
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HelmOptions {
    /// Chart name within the repository
    #[serde(default)]
    pub chart: String,
    /// Chart repository URL
    #[serde(default)]
    pub repo: String,
    /// Chart version
    #[serde(default)]
    pub version: String,
    /// Helm release name on the target
    #[serde(default)]
    pub release_name: String,
    /// Chart values
    #[serde(default)]
    pub values: serde_json::Value,
}

/// A deployment target
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleTarget {
    /// Fleet cluster name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
}

/// Observed deployment progress
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatus {
    /// Aggregated counters across targets
    #[serde(default)]
    pub summary: BundleSummary,
}

/// Per-state deployment counters
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleSummary {
    /// Deployments expected to become ready
    #[serde(default)]
    pub desired_ready: i32,
    /// Deployments that are ready
    #[serde(default)]
    pub ready: i32,
    /// Deployments applied and waiting to become ready
    #[serde(default)]
    pub wait_applied: i32,
    /// Deployments that failed to apply
    #[serde(default)]
    pub err_applied: i32,
    /// Resources that are not ready, with their state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_ready_resources: Vec<NonReadyResource>,
}

/// A deployment that is not ready
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NonReadyResource {
    /// Deployment name
    #[serde(default)]
    pub name: String,
    /// Fleet bundle state (e.g. ErrApplied, WaitApplied)
    #[serde(default)]
    pub bundle_state: String,
    /// Human-readable detail
    #[serde(default)]
    pub message: String,
}
