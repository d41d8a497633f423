//! Kubernetes version resolution through the cluster's control plane
//!
//! The CAPI Cluster's `controlPlaneRef` names the object implementing the
//! control plane. RKE control planes carry `spec.kubernetesVersion`; every
//! other provider is read generically through `spec.version`.

use kube::api::DynamicObject;
use kube::ResourceExt;
use tracing::debug;

use ballast_common::crd::{ManagedCluster, RkeControlPlane, RKE_CONTROL_PLANE_KIND};
use ballast_common::Error;

use crate::client::AutoscalerClient;

/// A resolved control-plane object, one variant per shape we know how to read
#[derive(Clone, Debug)]
pub enum ControlPlane {
    /// RKE2/K3s control plane with a typed version field
    Rke(RkeControlPlane),
    /// Any other provider, read through `spec.version`
    Generic(DynamicObject),
}

impl ControlPlane {
    /// The Kubernetes version the control plane reports
    pub fn kubernetes_version(&self) -> Option<&str> {
        match self {
            ControlPlane::Rke(cp) => {
                Some(cp.spec.kubernetes_version.as_str()).filter(|v| !v.is_empty())
            }
            ControlPlane::Generic(obj) => obj
                .data
                .get("spec")
                .and_then(|spec| spec.get("version"))
                .and_then(|v| v.as_str()),
        }
    }
}

/// Parse the minor version from strings like `v1.31.4+rke2r1` or `1.30`
pub fn minor_version(version: &str) -> Option<u32> {
    let version = version.trim().trim_start_matches('v');
    let mut parts = version.split('.');
    let major = parts.next()?;
    if major != "1" {
        return None;
    }
    let minor: String = parts
        .next()?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    minor.parse().ok()
}

/// Look up the control plane referenced by the cluster's CAPI Cluster
pub async fn resolve_control_plane(
    client: &dyn AutoscalerClient,
    cluster: &ManagedCluster,
) -> Result<Option<ControlPlane>, Error> {
    let ns = cluster.namespace().unwrap_or_default();
    let Some(capi) = client.get_capi_cluster(&ns, &cluster.name_any()).await? else {
        return Ok(None);
    };
    let Some(mut reference) = capi.spec.control_plane_ref else {
        return Ok(None);
    };
    if reference.namespace.is_none() {
        reference.namespace = Some(ns.clone());
    }

    if reference.kind.as_deref() == Some(RKE_CONTROL_PLANE_KIND) {
        let name = reference.name.unwrap_or_default();
        let cp_ns = reference.namespace.unwrap_or(ns);
        return Ok(client
            .get_rke_control_plane(&cp_ns, &name)
            .await?
            .map(ControlPlane::Rke));
    }

    Ok(client
        .get_control_plane(&reference)
        .await?
        .map(ControlPlane::Generic))
}

/// The Kubernetes version running on the cluster.
///
/// Prefers the control plane's own report and falls back to the version
/// pinned on the ManagedCluster.
pub async fn resolve_kubernetes_version(
    client: &dyn AutoscalerClient,
    cluster: &ManagedCluster,
) -> Result<Option<String>, Error> {
    let from_control_plane = resolve_control_plane(client, cluster)
        .await?
        .and_then(|cp| cp.kubernetes_version().map(str::to_string));

    if let Some(version) = from_control_plane {
        return Ok(Some(version));
    }
    debug!(
        cluster = %cluster.key(),
        "no control plane version found, using the pinned cluster version"
    );
    Ok(cluster.spec.kubernetes_version.clone())
}
