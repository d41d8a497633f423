//! Kubeconfig secret the autoscaler agent uses to reach the management cluster
//!
//! The secret lives next to the ManagedCluster and is annotated for the
//! secret syncer, which copies it into the downstream cluster's `kube-system`
//! namespace as `mgmt-kubeconfig`. Creation is first-write-wins; only token
//! rotation rewrites an existing secret.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tracing::info;

use ballast_common::crd::ManagedCluster;
use ballast_common::kube_utils::is_not_found;
use ballast_common::naming;
use ballast_common::settings::AutoscalerSettings;
use ballast_common::{
    Error, AUTHORIZED_FOR_CLUSTERS_ANNOTATION, DOWNSTREAM_KUBECONFIG_SECRET, DOWNSTREAM_NAMESPACE,
    SYNC_TARGET_NAMESPACE_ANNOTATION, SYNC_TARGET_NAME_ANNOTATION,
};

use crate::client::AutoscalerClient;
use crate::credentials::cluster_labels;

/// Secret data key holding the serialized kubeconfig
pub const VALUE_KEY: &str = "value";
/// Secret data key holding the raw bearer token
pub const TOKEN_KEY: &str = "token";

const CONTEXT_NAME: &str = "management";

/// Agent kubeconfig: one management-cluster entry, one bearer user, one
/// context joining them
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    /// Always `v1`
    pub api_version: String,
    /// Always `Config`
    pub kind: String,
    /// The management API server, as a single entry
    pub clusters: Vec<KubeconfigCluster>,
    /// The agent's bearer credential, as a single entry
    pub users: Vec<KubeconfigUser>,
    /// The one context, named `management`
    pub contexts: Vec<KubeconfigContext>,
    /// Always the `management` context
    pub current_context: String,
}

/// Named management API server entry
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct KubeconfigCluster {
    /// Entry name the context refers to
    pub name: String,
    /// Where the agent connects
    pub cluster: ClusterConfig,
}

/// Management API endpoint and the CA it is verified against
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    /// Management API server URL from the operator settings
    pub server: String,
    /// Base64 of the configured PEM bundle; absent when no CA file is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
}

/// Named credential for the agent's service identity
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct KubeconfigUser {
    /// Entry name the context refers to
    pub name: String,
    /// The bearer credential
    pub user: UserConfig,
}

/// Bearer-only credential; no client certificates or exec plugins
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct UserConfig {
    /// `identity:secret` as issued for the autoscaler identity
    pub token: String,
}

/// The `management` context
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct KubeconfigContext {
    /// Context name
    pub name: String,
    /// Server and user this context selects
    pub context: ContextConfig,
}

/// Server and user names selected by the context
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ContextConfig {
    /// Name of the [`KubeconfigCluster`] entry
    pub cluster: String,
    /// Name of the [`KubeconfigUser`] entry
    pub user: String,
}

impl Kubeconfig {
    /// Single-context kubeconfig authenticating with `bearer`
    pub fn for_bearer(server: &str, ca_pem: Option<&str>, bearer: &str) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            clusters: vec![KubeconfigCluster {
                name: CONTEXT_NAME.to_string(),
                cluster: ClusterConfig {
                    server: server.to_string(),
                    certificate_authority_data: ca_pem
                        .map(str::trim)
                        .filter(|pem| !pem.is_empty())
                        .map(|pem| STANDARD.encode(pem)),
                },
            }],
            users: vec![KubeconfigUser {
                name: CONTEXT_NAME.to_string(),
                user: UserConfig {
                    token: bearer.to_string(),
                },
            }],
            contexts: vec![KubeconfigContext {
                name: CONTEXT_NAME.to_string(),
                context: ContextConfig {
                    cluster: CONTEXT_NAME.to_string(),
                    user: CONTEXT_NAME.to_string(),
                },
            }],
            current_context: CONTEXT_NAME.to_string(),
        }
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::serialization_for_kind("Kubeconfig", e.to_string()))
    }
}

fn secret_data(
    settings: &AutoscalerSettings,
    bearer: &str,
) -> Result<BTreeMap<String, ByteString>, Error> {
    let kubeconfig =
        Kubeconfig::for_bearer(&settings.server_url, settings.ca_cert.as_deref(), bearer)
            .to_yaml()?;
    Ok(BTreeMap::from([
        (VALUE_KEY.to_string(), ByteString(kubeconfig.into_bytes())),
        (TOKEN_KEY.to_string(), ByteString(bearer.as_bytes().to_vec())),
    ]))
}

fn secret_name(cluster: &ManagedCluster) -> (String, String) {
    let ns = cluster.namespace().unwrap_or_default();
    let name = naming::kubeconfig_secret_name(&ns, &cluster.name_any());
    (ns, name)
}

/// Fetch the cluster's kubeconfig secret, if it exists
pub async fn get_kubeconfig(
    client: &dyn AutoscalerClient,
    cluster: &ManagedCluster,
) -> Result<Option<Secret>, Error> {
    let (ns, name) = secret_name(cluster);
    client.get_secret(&ns, &name).await
}

/// Create the kubeconfig secret for `bearer`
pub async fn create_kubeconfig(
    client: &dyn AutoscalerClient,
    settings: &AutoscalerSettings,
    cluster: &ManagedCluster,
    bearer: &str,
) -> Result<Secret, Error> {
    let (ns, name) = secret_name(cluster);
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(ns.clone()),
            labels: Some(cluster_labels(cluster)),
            annotations: Some(BTreeMap::from([
                (
                    SYNC_TARGET_NAMESPACE_ANNOTATION.to_string(),
                    DOWNSTREAM_NAMESPACE.to_string(),
                ),
                (
                    SYNC_TARGET_NAME_ANNOTATION.to_string(),
                    DOWNSTREAM_KUBECONFIG_SECRET.to_string(),
                ),
                (
                    AUTHORIZED_FOR_CLUSTERS_ANNOTATION.to_string(),
                    cluster.name_any(),
                ),
            ])),
            ..Default::default()
        },
        data: Some(secret_data(settings, bearer)?),
        ..Default::default()
    };
    let created = client.create_secret(&ns, &secret).await?;
    info!(secret = %name, "created autoscaler kubeconfig secret");
    Ok(created)
}

/// Ensure the kubeconfig secret exists. An existing secret is returned unchanged.
pub async fn ensure_kubeconfig(
    client: &dyn AutoscalerClient,
    settings: &AutoscalerSettings,
    cluster: &ManagedCluster,
    bearer: &str,
) -> Result<Secret, Error> {
    match get_kubeconfig(client, cluster).await? {
        Some(secret) => Ok(secret),
        None => create_kubeconfig(client, settings, cluster, bearer).await,
    }
}

/// Rewrite the `value` and `token` keys of the existing secret for a new bearer.
///
/// Other data keys, labels and annotations are left untouched. Returns the
/// updated secret so callers can use its new resourceVersion.
pub async fn update_kubeconfig(
    client: &dyn AutoscalerClient,
    settings: &AutoscalerSettings,
    cluster: &ManagedCluster,
    bearer: &str,
) -> Result<Secret, Error> {
    let (ns, name) = secret_name(cluster);
    let mut secret = client.get_secret(&ns, &name).await?.ok_or_else(|| {
        Error::internal_with_context(
            "kubeconfig",
            format!("kubeconfig secret {}/{} does not exist", ns, name),
        )
    })?;

    secret
        .data
        .get_or_insert_with(BTreeMap::new)
        .extend(secret_data(settings, bearer)?);

    let updated = client.update_secret(&ns, &secret).await?;
    info!(secret = %name, "rotated token in autoscaler kubeconfig secret");
    Ok(updated)
}

/// Delete the kubeconfig secret. A missing secret is not an error.
pub async fn delete_kubeconfig(
    client: &dyn AutoscalerClient,
    cluster: &ManagedCluster,
) -> Result<(), Error> {
    let (ns, name) = secret_name(cluster);
    match client.delete_secret(&ns, &name).await {
        Ok(()) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e),
    }
}
