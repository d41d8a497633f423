//! CRD installation utilities
//!
//! Only kinds this operator owns are installed. Fleet bundles and the CAPI
//! and RKE kinds it reads belong to their own providers.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use ballast_common::crd::{AuthToken, GlobalRole, GlobalRoleBinding, ManagedCluster, ServiceIdentity};
use ballast_common::kube_utils::FIELD_MANAGER;

/// CRD definition with name and resource
struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

fn def<K: CustomResourceExt>() -> CrdDef {
    CrdDef {
        name: K::crd_name(),
        crd: K::crd(),
    }
}

fn owned_crds() -> Vec<CrdDef> {
    vec![
        def::<ManagedCluster>(),
        def::<ServiceIdentity>(),
        def::<GlobalRole>(),
        def::<GlobalRoleBinding>(),
        def::<AuthToken>(),
    ]
}

/// All owned CRDs as a multi-document YAML stream
pub fn crd_yaml() -> anyhow::Result<String> {
    let mut docs = Vec::new();
    for def in owned_crds() {
        let yaml = serde_yaml::to_string(&def.crd)
            .map_err(|e| anyhow::anyhow!("failed to serialize {} CRD: {}", def.name, e))?;
        docs.push(yaml);
    }
    Ok(docs.join("---\n"))
}

/// Install or update every owned CRD using server-side apply
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in owned_crds() {
        tracing::info!(crd = def.name, "installing CRD");
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }
    tracing::info!("ballast CRDs installed/updated");
    Ok(())
}
