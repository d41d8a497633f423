//! Kubernetes access for the autoscaler reconcilers
//!
//! Every API call the subsystem makes goes through [`AutoscalerClient`] so the
//! reconcilers can be exercised against mocks. Lookups return `Ok(None)` on
//! 404; create, replace and delete surface API errors unchanged so callers
//! can decide which ones are benign.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

use ballast_common::crd::{
    AuthToken, Bundle, CapiCluster, Condition, GlobalRole, GlobalRoleBinding, Machine,
    MachineDeployment, ManagedCluster, RkeControlPlane, ServiceIdentity,
};
use ballast_common::kube_utils::{optional, FIELD_MANAGER};
use ballast_common::{Error, AUTOSCALER_TOKEN_SELECTOR, CAPI_CLUSTER_NAME_LABEL};

/// Trait abstracting the Kubernetes operations of the autoscaler subsystem
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AutoscalerClient: Send + Sync {
    /// Fetch a ManagedCluster
    async fn get_cluster(&self, namespace: &str, name: &str)
        -> Result<Option<ManagedCluster>, Error>;

    /// List ManagedClusters in every namespace
    async fn list_clusters(&self) -> Result<Vec<ManagedCluster>, Error>;

    /// Replace a ManagedCluster; the object's resourceVersion guards the write
    async fn replace_cluster(&self, cluster: &ManagedCluster) -> Result<ManagedCluster, Error>;

    /// Merge-patch `status.conditions` on a ManagedCluster
    ///
    /// The patch carries the cluster's resourceVersion, so a write computed
    /// from a stale copy fails with 409 instead of dropping other conditions.
    async fn patch_conditions(
        &self,
        cluster: &ManagedCluster,
        conditions: Vec<Condition>,
    ) -> Result<(), Error>;

    /// MachineDeployments labelled with the CAPI cluster name
    async fn list_machine_deployments(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<MachineDeployment>, Error>;

    /// Machines labelled with the CAPI cluster name
    async fn list_machines(&self, namespace: &str, cluster_name: &str)
        -> Result<Vec<Machine>, Error>;

    /// Fetch the CAPI Cluster object
    async fn get_capi_cluster(&self, namespace: &str, name: &str)
        -> Result<Option<CapiCluster>, Error>;

    /// Fetch an RKE control plane
    async fn get_rke_control_plane(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RkeControlPlane>, Error>;

    /// Fetch any control-plane object by reference
    async fn get_control_plane(
        &self,
        reference: &ObjectReference,
    ) -> Result<Option<DynamicObject>, Error>;

    /// Fetch a service identity
    async fn get_identity(&self, name: &str) -> Result<Option<ServiceIdentity>, Error>;
    /// Create a service identity
    async fn create_identity(&self, identity: &ServiceIdentity) -> Result<ServiceIdentity, Error>;
    /// Delete a service identity
    async fn delete_identity(&self, name: &str) -> Result<(), Error>;

    /// Fetch a global role
    async fn get_role(&self, name: &str) -> Result<Option<GlobalRole>, Error>;
    /// Create a global role
    async fn create_role(&self, role: &GlobalRole) -> Result<GlobalRole, Error>;
    /// Replace a global role
    async fn update_role(&self, role: &GlobalRole) -> Result<GlobalRole, Error>;
    /// Delete a global role
    async fn delete_role(&self, name: &str) -> Result<(), Error>;

    /// Fetch a global role binding
    async fn get_role_binding(&self, name: &str) -> Result<Option<GlobalRoleBinding>, Error>;
    /// Create a global role binding
    async fn create_role_binding(
        &self,
        binding: &GlobalRoleBinding,
    ) -> Result<GlobalRoleBinding, Error>;
    /// Replace a global role binding
    async fn update_role_binding(
        &self,
        binding: &GlobalRoleBinding,
    ) -> Result<GlobalRoleBinding, Error>;
    /// Delete a global role binding
    async fn delete_role_binding(&self, name: &str) -> Result<(), Error>;

    /// Fetch a token
    async fn get_token(&self, name: &str) -> Result<Option<AuthToken>, Error>;
    /// Create a token
    async fn create_token(&self, token: &AuthToken) -> Result<AuthToken, Error>;
    /// Delete a token
    async fn delete_token(&self, name: &str) -> Result<(), Error>;
    /// All tokens issued to autoscaler identities
    async fn list_autoscaler_tokens(&self) -> Result<Vec<AuthToken>, Error>;

    /// Fetch a secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;
    /// Create a secret
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, Error>;
    /// Replace a secret
    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, Error>;
    /// Delete a secret
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Fetch a Fleet bundle
    async fn get_bundle(&self, namespace: &str, name: &str) -> Result<Option<Bundle>, Error>;
    /// Create a Fleet bundle
    async fn create_bundle(&self, namespace: &str, bundle: &Bundle) -> Result<Bundle, Error>;
    /// Replace a Fleet bundle
    async fn update_bundle(&self, namespace: &str, bundle: &Bundle) -> Result<Bundle, Error>;
    /// Delete a Fleet bundle
    async fn delete_bundle(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Real implementation of [`AutoscalerClient`] backed by the API server
pub struct AutoscalerClientImpl {
    client: Client,
}

impl AutoscalerClientImpl {
    /// Create a new AutoscalerClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn all<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::ClusterResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

/// Split `group/version` (or core `version`) into its parts
fn parse_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Lowercase plural for a control-plane kind
fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') {
        format!("{}es", lower)
    } else {
        format!("{}s", lower)
    }
}

/// Status merge patch guarded by the cluster's resourceVersion
fn conditions_patch(cluster: &ManagedCluster, conditions: &[Condition]) -> serde_json::Value {
    let mut patch = serde_json::json!({
        "status": { "conditions": conditions }
    });
    if let Some(rv) = cluster.resource_version() {
        patch["metadata"] = serde_json::json!({ "resourceVersion": rv });
    }
    patch
}

fn cluster_selector(cluster_name: &str) -> ListParams {
    ListParams::default().labels(&format!("{}={}", CAPI_CLUSTER_NAME_LABEL, cluster_name))
}

#[async_trait]
impl AutoscalerClient for AutoscalerClientImpl {
    async fn get_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedCluster>, Error> {
        optional(self.namespaced::<ManagedCluster>(namespace).get(name).await)
    }

    async fn list_clusters(&self) -> Result<Vec<ManagedCluster>, Error> {
        let api: Api<ManagedCluster> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn replace_cluster(&self, cluster: &ManagedCluster) -> Result<ManagedCluster, Error> {
        let namespace = cluster.namespace().unwrap_or_default();
        Ok(self
            .namespaced::<ManagedCluster>(&namespace)
            .replace(&cluster.name_any(), &post_params(), cluster)
            .await?)
    }

    async fn patch_conditions(
        &self,
        cluster: &ManagedCluster,
        conditions: Vec<Condition>,
    ) -> Result<(), Error> {
        let patch = conditions_patch(cluster, &conditions);
        self.namespaced::<ManagedCluster>(&cluster.namespace().unwrap_or_default())
            .patch_status(
                &cluster.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }

    async fn list_machine_deployments(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<MachineDeployment>, Error> {
        Ok(self
            .namespaced::<MachineDeployment>(namespace)
            .list(&cluster_selector(cluster_name))
            .await?
            .items)
    }

    async fn list_machines(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<Machine>, Error> {
        Ok(self
            .namespaced::<Machine>(namespace)
            .list(&cluster_selector(cluster_name))
            .await?
            .items)
    }

    async fn get_capi_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CapiCluster>, Error> {
        optional(self.namespaced::<CapiCluster>(namespace).get(name).await)
    }

    async fn get_rke_control_plane(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RkeControlPlane>, Error> {
        optional(self.namespaced::<RkeControlPlane>(namespace).get(name).await)
    }

    async fn get_control_plane(
        &self,
        reference: &ObjectReference,
    ) -> Result<Option<DynamicObject>, Error> {
        let (Some(api_version), Some(kind), Some(name), Some(namespace)) = (
            reference.api_version.as_deref(),
            reference.kind.as_deref(),
            reference.name.as_deref(),
            reference.namespace.as_deref(),
        ) else {
            return Err(Error::internal_with_context(
                "get_control_plane",
                "control plane reference is missing apiVersion, kind, name or namespace",
            ));
        };

        let (group, version) = parse_api_version(api_version);
        let gvk = kube::api::GroupVersionKind::gvk(group, version, kind);
        let ar = ApiResource::from_gvk_with_plural(&gvk, &pluralize_kind(kind));
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        optional(api.get(name).await)
    }

    async fn get_identity(&self, name: &str) -> Result<Option<ServiceIdentity>, Error> {
        optional(self.all::<ServiceIdentity>().get(name).await)
    }

    async fn create_identity(&self, identity: &ServiceIdentity) -> Result<ServiceIdentity, Error> {
        Ok(self
            .all::<ServiceIdentity>()
            .create(&post_params(), identity)
            .await?)
    }

    async fn delete_identity(&self, name: &str) -> Result<(), Error> {
        self.all::<ServiceIdentity>()
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_role(&self, name: &str) -> Result<Option<GlobalRole>, Error> {
        optional(self.all::<GlobalRole>().get(name).await)
    }

    async fn create_role(&self, role: &GlobalRole) -> Result<GlobalRole, Error> {
        Ok(self.all::<GlobalRole>().create(&post_params(), role).await?)
    }

    async fn update_role(&self, role: &GlobalRole) -> Result<GlobalRole, Error> {
        Ok(self
            .all::<GlobalRole>()
            .replace(&role.name_any(), &post_params(), role)
            .await?)
    }

    async fn delete_role(&self, name: &str) -> Result<(), Error> {
        self.all::<GlobalRole>()
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_role_binding(&self, name: &str) -> Result<Option<GlobalRoleBinding>, Error> {
        optional(self.all::<GlobalRoleBinding>().get(name).await)
    }

    async fn create_role_binding(
        &self,
        binding: &GlobalRoleBinding,
    ) -> Result<GlobalRoleBinding, Error> {
        Ok(self
            .all::<GlobalRoleBinding>()
            .create(&post_params(), binding)
            .await?)
    }

    async fn update_role_binding(
        &self,
        binding: &GlobalRoleBinding,
    ) -> Result<GlobalRoleBinding, Error> {
        Ok(self
            .all::<GlobalRoleBinding>()
            .replace(&binding.name_any(), &post_params(), binding)
            .await?)
    }

    async fn delete_role_binding(&self, name: &str) -> Result<(), Error> {
        self.all::<GlobalRoleBinding>()
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_token(&self, name: &str) -> Result<Option<AuthToken>, Error> {
        optional(self.all::<AuthToken>().get(name).await)
    }

    async fn create_token(&self, token: &AuthToken) -> Result<AuthToken, Error> {
        Ok(self.all::<AuthToken>().create(&post_params(), token).await?)
    }

    async fn delete_token(&self, name: &str) -> Result<(), Error> {
        self.all::<AuthToken>()
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn list_autoscaler_tokens(&self) -> Result<Vec<AuthToken>, Error> {
        let params = ListParams::default().labels(AUTOSCALER_TOKEN_SELECTOR);
        Ok(self.all::<AuthToken>().list(&params).await?.items)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        optional(self.namespaced::<Secret>(namespace).get(name).await)
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, Error> {
        Ok(self
            .namespaced::<Secret>(namespace)
            .create(&post_params(), secret)
            .await?)
    }

    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, Error> {
        Ok(self
            .namespaced::<Secret>(namespace)
            .replace(&secret.name_any(), &post_params(), secret)
            .await?)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.namespaced::<Secret>(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_bundle(&self, namespace: &str, name: &str) -> Result<Option<Bundle>, Error> {
        optional(self.namespaced::<Bundle>(namespace).get(name).await)
    }

    async fn create_bundle(&self, namespace: &str, bundle: &Bundle) -> Result<Bundle, Error> {
        Ok(self
            .namespaced::<Bundle>(namespace)
            .create(&post_params(), bundle)
            .await?)
    }

    async fn update_bundle(&self, namespace: &str, bundle: &Bundle) -> Result<Bundle, Error> {
        Ok(self
            .namespaced::<Bundle>(namespace)
            .replace(&bundle.name_any(), &post_params(), bundle)
            .await?)
    }

    async fn delete_bundle(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.namespaced::<Bundle>(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}
