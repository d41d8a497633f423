//! Fleet bundle that deploys the cluster-autoscaler chart to a cluster
//!
//! One bundle per cluster, named from the cluster's namespace and name. The
//! chart runs the agent in `clusterapi` mode against the management cluster
//! through the synced kubeconfig secret. Pausing scales the agent to zero;
//! disabling deletes the bundle.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde_json::{json, Value};
use tracing::{debug, info};

use ballast_common::crd::{
    Bundle, BundleSpec, BundleTarget, Condition, ConditionStatus, HelmOptions, ManagedCluster,
};
use ballast_common::kube_utils::is_not_found;
use ballast_common::naming;
use ballast_common::settings::{
    AutoscalerSettings, ImageRef, DEFAULT_CHART_NAME, DEFAULT_IMAGE_REPOSITORY,
};
use ballast_common::{
    Error, AUTOSCALER_CONDITION, DOWNSTREAM_KUBECONFIG_SECRET, DOWNSTREAM_NAMESPACE,
    KUBECONFIG_VERSION_ANNOTATION,
};

use crate::client::AutoscalerClient;
use crate::control_plane::{minor_version, resolve_kubernetes_version};
use crate::credentials::{cluster_labels, cluster_owner_ref};

/// Helm release name on the downstream cluster
pub const HELM_RELEASE_NAME: &str = "cluster-autoscaler";

/// Autoscaler image tag for each supported Kubernetes minor version
const IMAGE_TAGS: &[(u32, &str)] = &[
    (29, "v1.29.4"),
    (30, "v1.30.3"),
    (31, "v1.31.1"),
    (32, "v1.32.1"),
    (33, "v1.33.0"),
];

/// Pinned autoscaler tag for a Kubernetes minor version
pub fn image_tag_for_minor(minor: u32) -> Option<&'static str> {
    IMAGE_TAGS
        .iter()
        .find(|(m, _)| *m == minor)
        .map(|(_, tag)| *tag)
}

/// Image to set in chart values, or `None` to keep the chart default.
///
/// The override's repository always wins; its tag wins when present,
/// otherwise the table's tag for `minor` is used.
pub fn resolve_image(override_image: Option<&ImageRef>, minor: Option<u32>) -> Option<ImageRef> {
    let table_tag = minor.and_then(image_tag_for_minor).map(str::to_string);
    match override_image {
        Some(image) => Some(ImageRef {
            repository: image.repository.clone(),
            tag: image.tag.clone().or(table_tag),
        }),
        None => table_tag.map(|tag| ImageRef {
            repository: DEFAULT_IMAGE_REPOSITORY.to_string(),
            tag: Some(tag),
        }),
    }
}

/// Chart values for the agent
pub fn desired_values(
    cluster: &ManagedCluster,
    image: Option<&ImageRef>,
    kubeconfig_version: &str,
) -> Value {
    let replicas = if cluster.is_autoscaler_paused() { 0 } else { 1 };
    let mut values = json!({
        "replicaCount": replicas,
        "autoDiscovery": {
            "clusterName": cluster.name_any(),
            "namespace": cluster.namespace().unwrap_or_default(),
        },
        "cloudProvider": "clusterapi",
        "clusterAPIMode": "kubeconfig-incluster",
        "clusterAPIKubeconfigSecret": DOWNSTREAM_KUBECONFIG_SECRET,
        "extraArgs": { "v": 2 },
        "podAnnotations": { KUBECONFIG_VERSION_ANNOTATION: kubeconfig_version },
    });
    if let Some(image) = image {
        let mut image_values = json!({ "repository": image.repository });
        if let Some(tag) = &image.tag {
            image_values["tag"] = json!(tag);
        }
        values["image"] = image_values;
    }
    values
}

/// Full bundle spec for the cluster
pub fn desired_bundle_spec(
    cluster: &ManagedCluster,
    settings: &AutoscalerSettings,
    image: Option<&ImageRef>,
    kubeconfig_version: &str,
) -> BundleSpec {
    BundleSpec {
        default_namespace: Some(DOWNSTREAM_NAMESPACE.to_string()),
        helm: Some(HelmOptions {
            chart: DEFAULT_CHART_NAME.to_string(),
            repo: settings.chart_repo.clone(),
            version: settings.chart_version.clone(),
            release_name: HELM_RELEASE_NAME.to_string(),
            values: desired_values(cluster, image, kubeconfig_version),
        }),
        targets: vec![BundleTarget {
            cluster_name: Some(cluster.name_any()),
        }],
    }
}

/// Create or update the cluster's bundle so it matches the desired spec.
///
/// `kubeconfig_version` is the resourceVersion of the kubeconfig secret; it
/// lands in a pod annotation so a rotated token rolls the agent. No write is
/// issued when the stored spec already matches.
pub async fn converge(
    client: &dyn AutoscalerClient,
    settings: &AutoscalerSettings,
    cluster: &ManagedCluster,
    kubeconfig_version: &str,
) -> Result<Bundle, Error> {
    let ns = cluster.namespace().unwrap_or_default();
    let name = naming::release_name(&ns, &cluster.name_any());

    let version = resolve_kubernetes_version(client, cluster).await?;
    let minor = version.as_deref().and_then(minor_version);
    let image = resolve_image(settings.image_override.as_ref(), minor);
    if image.is_none() {
        debug!(version = ?version, "no pinned autoscaler image, using chart default");
    }
    let desired = desired_bundle_spec(cluster, settings, image.as_ref(), kubeconfig_version);

    match client.get_bundle(&ns, &name).await? {
        Some(bundle) if bundle.spec == desired => {
            debug!(bundle = %name, "autoscaler bundle up to date");
            Ok(bundle)
        }
        Some(mut bundle) => {
            bundle.spec = desired;
            let updated = client.update_bundle(&ns, &bundle).await?;
            info!(bundle = %name, "updated autoscaler bundle");
            Ok(updated)
        }
        None => {
            let bundle = Bundle {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(ns.clone()),
                    labels: Some(cluster_labels(cluster)),
                    owner_references: Some(vec![cluster_owner_ref(cluster)?]),
                    ..Default::default()
                },
                spec: desired,
                status: None,
            };
            let created = client.create_bundle(&ns, &bundle).await?;
            info!(bundle = %name, "created autoscaler bundle");
            Ok(created)
        }
    }
}

/// Delete the cluster's bundle. A missing bundle is success.
pub async fn cleanup_release(
    client: &dyn AutoscalerClient,
    cluster: &ManagedCluster,
) -> Result<(), Error> {
    let ns = cluster.namespace().unwrap_or_default();
    let name = naming::release_name(&ns, &cluster.name_any());
    let mut errors = Vec::new();

    match client.get_bundle(&ns, &name).await {
        Ok(None) => {}
        Ok(Some(_)) => match client.delete_bundle(&ns, &name).await {
            Ok(()) => info!(bundle = %name, "deleted autoscaler bundle"),
            Err(e) if is_not_found(&e) => {}
            Err(e) => errors.push(format!("bundle {}/{}: {}", ns, name, e)),
        },
        Err(e) => errors.push(format!("bundle {}/{}: {}", ns, name, e)),
    }

    Error::aggregate(errors)
}

/// Translate the bundle's deployment summary into the cluster condition
pub fn release_condition(bundle: &Bundle) -> Condition {
    let summary = bundle
        .status
        .as_ref()
        .map(|s| s.summary.clone())
        .unwrap_or_default();

    if summary.desired_ready > 0 && summary.ready == summary.desired_ready {
        return Condition::new(
            AUTOSCALER_CONDITION,
            ConditionStatus::True,
            "Deployed",
            "",
        );
    }
    if summary.err_applied > 0 {
        let message = summary
            .non_ready_resources
            .first()
            .map(|r| r.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "error applying cluster autoscaler".to_string());
        return Condition::new(
            AUTOSCALER_CONDITION,
            ConditionStatus::Unknown,
            "ErrApplied",
            message,
        );
    }
    Condition::new(
        AUTOSCALER_CONDITION,
        ConditionStatus::False,
        "Waiting",
        "waiting",
    )
}

/// Annotations set on the agent's pods by the current bundle
pub fn pod_annotations(bundle: &Bundle) -> BTreeMap<String, String> {
    bundle
        .spec
        .helm
        .as_ref()
        .and_then(|h| h.values.get("podAnnotations"))
        .and_then(|a| serde_json::from_value(a.clone()).ok())
        .unwrap_or_default()
}
