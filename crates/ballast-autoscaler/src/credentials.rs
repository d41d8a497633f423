//! Credential provisioning for the autoscaler agent
//!
//! Each autoscaled cluster gets a service identity, a global role scoped to
//! that cluster's CAPI objects, a binding between the two, and a long-lived
//! token. All four are named from the cluster's namespace and name and are
//! owner-referenced to the cluster.
//!
//! Every `ensure_*` function is idempotent: when the stored object already
//! matches what would be written, no write is issued.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, TimeDelta, Utc};
use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use ballast_common::crd::{
    AuthToken, AuthTokenSpec, GlobalRole, GlobalRoleBinding, GlobalRoleBindingSpec,
    GlobalRoleSpec, Machine, MachineDeployment, ManagedCluster, ServiceIdentity,
    ServiceIdentitySpec,
};
use ballast_common::kube_utils::is_not_found;
use ballast_common::naming;
use ballast_common::settings::AutoscalerSettings;
use ballast_common::{
    Error, CLUSTER_NAMESPACE_LABEL, CLUSTER_NAME_LABEL, TOKEN_KIND_AUTOSCALER, TOKEN_KIND_LABEL,
};

use crate::client::AutoscalerClient;
use crate::token::{bearer, TokenSecret};

const CAPI_GROUP: &str = "cluster.x-k8s.io";

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Controller owner reference pointing at the cluster; blocks the cluster's
/// foreground deletion until the dependent is gone
pub fn cluster_owner_ref(cluster: &ManagedCluster) -> Result<OwnerReference, Error> {
    let owner = cluster.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context(
            "owner_reference",
            format!("cluster {} has no uid", cluster.key()),
        )
    })?;
    Ok(OwnerReference {
        block_owner_deletion: Some(true),
        ..owner
    })
}

/// Labels correlating a derived object back to its cluster
pub fn cluster_labels(cluster: &ManagedCluster) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CLUSTER_NAME_LABEL.to_string(), cluster.name_any()),
        (
            CLUSTER_NAMESPACE_LABEL.to_string(),
            cluster.namespace().unwrap_or_default(),
        ),
    ])
}

fn owned_meta(cluster: &ManagedCluster, name: String) -> Result<ObjectMeta, Error> {
    Ok(ObjectMeta {
        name: Some(name),
        labels: Some(cluster_labels(cluster)),
        owner_references: Some(vec![cluster_owner_ref(cluster)?]),
        ..Default::default()
    })
}

/// Ensure the cluster's service identity exists. Found identities are returned as-is.
pub async fn ensure_identity(
    client: &dyn AutoscalerClient,
    cluster: &ManagedCluster,
) -> Result<ServiceIdentity, Error> {
    let ns = cluster.namespace().unwrap_or_default();
    let name = naming::identity_name(&ns, &cluster.name_any());

    if let Some(identity) = client.get_identity(&name).await? {
        return Ok(identity);
    }

    let identity = ServiceIdentity {
        metadata: owned_meta(cluster, name.clone())?,
        spec: ServiceIdentitySpec {
            display_name: name.clone(),
            description: Some(format!("cluster autoscaler for {}", cluster.key())),
        },
    };
    let created = client.create_identity(&identity).await?;
    info!(identity = %name, "created autoscaler service identity");
    Ok(created)
}

/// Rules granting the agent access to exactly this cluster's scalable objects.
///
/// Returns the cluster-wide read rule and the namespaced write rules keyed by
/// the cluster namespace. Write rules are restricted by `resourceNames`; a
/// rule with no names would grant access to every object, so kinds with no
/// current objects get no write rule at all.
pub fn desired_role_rules(
    cluster: &ManagedCluster,
    deployments: &[MachineDeployment],
    machines: &[Machine],
) -> (Vec<PolicyRule>, BTreeMap<String, Vec<PolicyRule>>) {
    let global = vec![PolicyRule {
        api_groups: Some(strings(&[CAPI_GROUP])),
        resources: Some(strings(&[
            "machinedeployments",
            "machinedeployments/scale",
            "machines",
        ])),
        verbs: strings(&["get", "list", "watch"]),
        ..Default::default()
    }];

    let mut md_names: Vec<String> = deployments.iter().map(|md| md.name_any()).collect();
    md_names.sort();
    md_names.dedup();
    let mut machine_names: Vec<String> = machines.iter().map(|m| m.name_any()).collect();
    machine_names.sort();
    machine_names.dedup();

    let write = |resources: &[&str], names: Vec<String>| PolicyRule {
        api_groups: Some(strings(&[CAPI_GROUP])),
        resources: Some(strings(resources)),
        resource_names: Some(names),
        verbs: strings(&["get", "update", "patch"]),
        ..Default::default()
    };

    let mut namespaced = Vec::new();
    if !md_names.is_empty() {
        namespaced.push(write(
            &["machinedeployments", "machinedeployments/scale"],
            md_names,
        ));
    }
    if !machine_names.is_empty() {
        namespaced.push(write(&["machines"], machine_names));
    }

    let mut by_namespace = BTreeMap::new();
    if !namespaced.is_empty() {
        by_namespace.insert(cluster.namespace().unwrap_or_default(), namespaced);
    }
    (global, by_namespace)
}

/// Ensure the cluster's global role exists with rules matching the current inventory.
///
/// Existing rules are overwritten, never merged, so names of deleted
/// deployments and machines drop out.
pub async fn ensure_role(
    client: &dyn AutoscalerClient,
    cluster: &ManagedCluster,
    deployments: &[MachineDeployment],
    machines: &[Machine],
) -> Result<GlobalRole, Error> {
    let ns = cluster.namespace().unwrap_or_default();
    let name = naming::role_name(&ns, &cluster.name_any());
    let (rules, namespaced_rules) = desired_role_rules(cluster, deployments, machines);

    match client.get_role(&name).await? {
        Some(role) if role.spec.rules == rules && role.spec.namespaced_rules == namespaced_rules => {
            debug!(role = %name, "autoscaler role up to date");
            Ok(role)
        }
        Some(mut role) => {
            role.spec.rules = rules;
            role.spec.namespaced_rules = namespaced_rules;
            let updated = client.update_role(&role).await?;
            info!(role = %name, "updated autoscaler role rules");
            Ok(updated)
        }
        None => {
            let role = GlobalRole {
                metadata: owned_meta(cluster, name.clone())?,
                spec: GlobalRoleSpec {
                    display_name: name.clone(),
                    rules,
                    namespaced_rules,
                },
            };
            let created = client.create_role(&role).await?;
            info!(role = %name, "created autoscaler role");
            Ok(created)
        }
    }
}

/// Ensure the binding from `identity` to `role` exists and points at both.
pub async fn ensure_role_binding(
    client: &dyn AutoscalerClient,
    cluster: &ManagedCluster,
    identity: &str,
    role: &str,
) -> Result<GlobalRoleBinding, Error> {
    let ns = cluster.namespace().unwrap_or_default();
    let name = naming::role_binding_name(&ns, &cluster.name_any());
    let desired = GlobalRoleBindingSpec {
        user_name: identity.to_string(),
        global_role_name: role.to_string(),
    };

    match client.get_role_binding(&name).await? {
        Some(binding) if binding.spec == desired => Ok(binding),
        Some(mut binding) => {
            binding.spec = desired;
            let updated = client.update_role_binding(&binding).await?;
            info!(binding = %name, "updated autoscaler role binding");
            Ok(updated)
        }
        None => {
            let binding = GlobalRoleBinding {
                metadata: owned_meta(cluster, name.clone())?,
                spec: desired,
            };
            let created = client.create_role_binding(&binding).await?;
            info!(binding = %name, "created autoscaler role binding");
            Ok(created)
        }
    }
}

/// Everything needed to (re)issue a token apart from its secret
struct TokenTemplate {
    name: String,
    user_id: String,
    labels: BTreeMap<String, String>,
    owner_references: Option<Vec<OwnerReference>>,
}

impl TokenTemplate {
    fn for_cluster(cluster: &ManagedCluster, identity: &str) -> Result<Self, Error> {
        let ns = cluster.namespace().unwrap_or_default();
        let mut labels = cluster_labels(cluster);
        labels.insert(
            TOKEN_KIND_LABEL.to_string(),
            TOKEN_KIND_AUTOSCALER.to_string(),
        );
        Ok(Self {
            name: naming::token_name(&ns, &cluster.name_any()),
            user_id: identity.to_string(),
            labels,
            owner_references: Some(vec![cluster_owner_ref(cluster)?]),
        })
    }

    fn from_existing(token: &AuthToken) -> Self {
        Self {
            name: token.name_any(),
            user_id: token.spec.user_id.clone(),
            labels: token.labels().clone(),
            owner_references: token.metadata.owner_references.clone(),
        }
    }

    /// Build the token object and return it alongside the plaintext secret
    fn build(self, settings: &AutoscalerSettings) -> Result<(AuthToken, TokenSecret), Error> {
        let secret = TokenSecret::generate()?;
        let ttl = TimeDelta::from_std(settings.token_ttl).map_err(|e| {
            Error::config(format!("token TTL {:?} out of range: {}", settings.token_ttl, e))
        })?;
        let expires_at = (Utc::now() + ttl).to_rfc3339_opts(SecondsFormat::Secs, true);
        let (value, hashed) = if settings.token_hashing {
            (secret.hash(), true)
        } else {
            (secret.as_str().to_string(), false)
        };

        let token = AuthToken {
            metadata: ObjectMeta {
                name: Some(self.name),
                labels: Some(self.labels),
                owner_references: self.owner_references,
                ..Default::default()
            },
            spec: AuthTokenSpec {
                user_id: self.user_id,
                token: value,
                hashed,
                ttl_millis: ttl.num_milliseconds(),
                expires_at: Some(expires_at),
                description: Some("cluster autoscaler".to_string()),
            },
        };
        Ok((token, secret))
    }
}

async fn issue(
    client: &dyn AutoscalerClient,
    settings: &AutoscalerSettings,
    template: TokenTemplate,
) -> Result<String, Error> {
    let (token, secret) = template.build(settings)?;
    let created = client.create_token(&token).await?;
    info!(token = %created.name_any(), user = %created.spec.user_id, "issued autoscaler token");
    Ok(bearer(&created.spec.user_id, secret.as_str()))
}

async fn replace(
    client: &dyn AutoscalerClient,
    settings: &AutoscalerSettings,
    template: TokenTemplate,
) -> Result<String, Error> {
    match client.delete_token(&template.name).await {
        Ok(()) => {}
        Err(e) if is_not_found(&e) => {}
        Err(e) => return Err(e),
    }
    issue(client, settings, template).await
}

/// Ensure the identity has a token, returning its `identity:secret` bearer value.
///
/// Returns `None` when a token exists but only its hash is stored: the
/// plaintext is gone and the caller must reissue if it needs the value.
pub async fn ensure_token(
    client: &dyn AutoscalerClient,
    settings: &AutoscalerSettings,
    cluster: &ManagedCluster,
    identity: &str,
) -> Result<Option<String>, Error> {
    let template = TokenTemplate::for_cluster(cluster, identity)?;
    match client.get_token(&template.name).await? {
        Some(token) if token.spec.hashed => Ok(None),
        Some(token) => Ok(Some(bearer(&token.spec.user_id, &token.spec.token))),
        None => issue(client, settings, template).await.map(Some),
    }
}

/// Delete the cluster's token (if any) and issue a fresh one
pub async fn reissue_token(
    client: &dyn AutoscalerClient,
    settings: &AutoscalerSettings,
    cluster: &ManagedCluster,
    identity: &str,
) -> Result<String, Error> {
    replace(client, settings, TokenTemplate::for_cluster(cluster, identity)?).await
}

/// Replace `previous` with a fresh token for the same user, labels and owner
pub async fn renew_token(
    client: &dyn AutoscalerClient,
    settings: &AutoscalerSettings,
    previous: &AuthToken,
) -> Result<String, Error> {
    replace(client, settings, TokenTemplate::from_existing(previous)).await
}

/// Delete token, binding, role and identity. Missing objects are fine.
pub async fn cleanup_credentials(
    client: &dyn AutoscalerClient,
    cluster: &ManagedCluster,
) -> Result<(), Error> {
    let ns = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let mut errors = Vec::new();

    let token = naming::token_name(&ns, &name);
    if let Err(e) = client.delete_token(&token).await {
        if !is_not_found(&e) {
            errors.push(format!("token {}: {}", token, e));
        }
    }
    let binding = naming::role_binding_name(&ns, &name);
    if let Err(e) = client.delete_role_binding(&binding).await {
        if !is_not_found(&e) {
            errors.push(format!("role binding {}: {}", binding, e));
        }
    }
    let role = naming::role_name(&ns, &name);
    if let Err(e) = client.delete_role(&role).await {
        if !is_not_found(&e) {
            errors.push(format!("role {}: {}", role, e));
        }
    }
    let identity = naming::identity_name(&ns, &name);
    if let Err(e) = client.delete_identity(&identity).await {
        if !is_not_found(&e) {
            errors.push(format!("identity {}: {}", identity, e));
        }
    }

    Error::aggregate(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockAutoscalerClient;
    use crate::test_support::{api_error, sample_cluster, sample_md};
    use ballast_common::crd::MachineSpec;
    use std::sync::{Arc, Mutex};

    fn settings() -> AutoscalerSettings {
        AutoscalerSettings::new("https://charts.example", "https://mgmt.example:6443")
    }

    /// Story: first reconcile creates the identity owned by the cluster
    #[tokio::test]
    async fn story_identity_is_created_once_with_owner_reference() {
        let cluster = sample_cluster();
        let mut mock = MockAutoscalerClient::new();
        mock.expect_get_identity().returning(|_| Ok(None));
        mock.expect_create_identity()
            .times(1)
            .returning(|i| Ok(i.clone()));

        let identity = ensure_identity(&mock, &cluster).await.unwrap();
        assert_eq!(identity.name_any(), "ns1-c1-autoscaler");
        let owner = &identity.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "ManagedCluster");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.block_owner_deletion, Some(true));
    }

    /// Story: an existing identity is never rewritten
    #[tokio::test]
    async fn story_existing_identity_is_returned_without_writes() {
        let cluster = sample_cluster();
        let mut mock = MockAutoscalerClient::new();
        mock.expect_get_identity().returning(|name| {
            Ok(Some(ServiceIdentity::new(name, ServiceIdentitySpec::default())))
        });
        mock.expect_create_identity().never();

        ensure_identity(&mock, &cluster).await.unwrap();
    }

    #[test]
    fn story_role_rules_name_exactly_the_current_inventory() {
        let cluster = sample_cluster();
        let mds = vec![sample_md("worker", Some(3)), sample_md("gpu", Some(1))];
        let machines = vec![Machine::new("c1-worker-abc", MachineSpec::default())];

        let (global, namespaced) = desired_role_rules(&cluster, &mds, &machines);

        assert_eq!(global.len(), 1);
        assert_eq!(global[0].verbs, strings(&["get", "list", "watch"]));

        let rules = &namespaced["ns1"];
        assert_eq!(
            rules[0].resource_names,
            Some(strings(&["c1-gpu", "c1-worker"]))
        );
        assert_eq!(rules[1].resource_names, Some(strings(&["c1-worker-abc"])));
        assert_eq!(rules[1].verbs, strings(&["get", "update", "patch"]));
    }

    #[test]
    fn story_empty_inventory_grants_no_write_access() {
        let (_, namespaced) = desired_role_rules(&sample_cluster(), &[], &[]);
        assert!(namespaced.is_empty());
    }

    /// Story: a role whose rules already match is not rewritten
    #[tokio::test]
    async fn story_matching_role_is_not_updated() {
        let cluster = sample_cluster();
        let mds = vec![sample_md("worker", Some(3))];
        let (rules, namespaced_rules) = desired_role_rules(&cluster, &mds, &[]);

        let mut mock = MockAutoscalerClient::new();
        mock.expect_get_role().returning(move |name| {
            Ok(Some(GlobalRole::new(
                name,
                GlobalRoleSpec {
                    display_name: name.to_string(),
                    rules: rules.clone(),
                    namespaced_rules: namespaced_rules.clone(),
                },
            )))
        });
        mock.expect_update_role().never();
        mock.expect_create_role().never();

        ensure_role(&mock, &cluster, &mds, &[]).await.unwrap();
    }

    /// Story: stale resource names are replaced wholesale, not merged
    #[tokio::test]
    async fn story_stale_role_rules_are_overwritten() {
        let cluster = sample_cluster();
        let old = vec![sample_md("deleted-pool", Some(1))];
        let (rules, namespaced_rules) = desired_role_rules(&cluster, &old, &[]);

        let written = Arc::new(Mutex::new(None));
        let capture = written.clone();
        let mut mock = MockAutoscalerClient::new();
        mock.expect_get_role().returning(move |name| {
            Ok(Some(GlobalRole::new(
                name,
                GlobalRoleSpec {
                    display_name: name.to_string(),
                    rules: rules.clone(),
                    namespaced_rules: namespaced_rules.clone(),
                },
            )))
        });
        mock.expect_update_role().times(1).returning(move |role| {
            *capture.lock().unwrap() = Some(role.clone());
            Ok(role.clone())
        });

        let current = vec![sample_md("worker", Some(3))];
        ensure_role(&mock, &cluster, &current, &[]).await.unwrap();

        let role = written.lock().unwrap().take().unwrap();
        assert_eq!(
            role.spec.namespaced_rules["ns1"][0].resource_names,
            Some(strings(&["c1-worker"]))
        );
    }

    #[tokio::test]
    async fn story_binding_is_repointed_when_role_differs() {
        let cluster = sample_cluster();
        let mut mock = MockAutoscalerClient::new();
        mock.expect_get_role_binding().returning(|name| {
            Ok(Some(GlobalRoleBinding::new(
                name,
                GlobalRoleBindingSpec {
                    user_name: "ns1-c1-autoscaler".to_string(),
                    global_role_name: "something-else".to_string(),
                },
            )))
        });
        mock.expect_update_role_binding()
            .times(1)
            .returning(|b| Ok(b.clone()));

        let binding = ensure_role_binding(
            &mock,
            &cluster,
            "ns1-c1-autoscaler",
            "ns1-c1-autoscaler-global-role",
        )
        .await
        .unwrap();
        assert_eq!(binding.spec.global_role_name, "ns1-c1-autoscaler-global-role");
    }

    #[tokio::test]
    async fn story_matching_binding_is_a_no_op() {
        let cluster = sample_cluster();
        let mut mock = MockAutoscalerClient::new();
        mock.expect_get_role_binding().returning(|name| {
            Ok(Some(GlobalRoleBinding::new(
                name,
                GlobalRoleBindingSpec {
                    user_name: "ns1-c1-autoscaler".to_string(),
                    global_role_name: "ns1-c1-autoscaler-global-role".to_string(),
                },
            )))
        });
        mock.expect_update_role_binding().never();
        mock.expect_create_role_binding().never();

        ensure_role_binding(
            &mock,
            &cluster,
            "ns1-c1-autoscaler",
            "ns1-c1-autoscaler-global-role",
        )
        .await
        .unwrap();
    }

    /// Story: a new token carries the 30 day TTL, labels and owner
    #[tokio::test]
    async fn story_new_token_is_labelled_and_owned() {
        let cluster = sample_cluster();
        let created = Arc::new(Mutex::new(None));
        let capture = created.clone();

        let mut mock = MockAutoscalerClient::new();
        mock.expect_get_token().returning(|_| Ok(None));
        mock.expect_create_token().times(1).returning(move |t| {
            *capture.lock().unwrap() = Some(t.clone());
            Ok(t.clone())
        });

        let bearer = ensure_token(&mock, &settings(), &cluster, "ns1-c1-autoscaler")
            .await
            .unwrap()
            .unwrap();

        let token = created.lock().unwrap().take().unwrap();
        assert_eq!(token.name_any(), "ns1-c1-autoscaler-token");
        assert_eq!(token.spec.user_id, "ns1-c1-autoscaler");
        assert_eq!(token.spec.ttl_millis, 30 * 24 * 60 * 60 * 1000);
        assert!(!token.spec.hashed);
        assert_eq!(bearer, format!("ns1-c1-autoscaler:{}", token.spec.token));

        let labels = token.labels();
        assert_eq!(labels[TOKEN_KIND_LABEL], "autoscaler");
        assert_eq!(labels[CLUSTER_NAME_LABEL], "c1");
        assert_eq!(labels[CLUSTER_NAMESPACE_LABEL], "ns1");
        assert!(token.expires_at().unwrap() > Utc::now() + TimeDelta::days(29));
        assert!(token.metadata.owner_references.is_some());
    }

    /// Story: with hashing enabled only the digest is stored
    #[tokio::test]
    async fn story_hashed_token_stores_digest_and_returns_plaintext() {
        let cluster = sample_cluster();
        let mut settings = settings();
        settings.token_hashing = true;

        let created = Arc::new(Mutex::new(None));
        let capture = created.clone();
        let mut mock = MockAutoscalerClient::new();
        mock.expect_get_token().returning(|_| Ok(None));
        mock.expect_create_token().returning(move |t| {
            *capture.lock().unwrap() = Some(t.clone());
            Ok(t.clone())
        });

        let bearer = ensure_token(&mock, &settings, &cluster, "ns1-c1-autoscaler")
            .await
            .unwrap()
            .unwrap();
        let token = created.lock().unwrap().take().unwrap();
        let plaintext = bearer.strip_prefix("ns1-c1-autoscaler:").unwrap();

        assert!(token.spec.hashed);
        assert_eq!(token.spec.token, crate::token::hash_token(plaintext));
    }

    #[tokio::test]
    async fn story_existing_token_is_reused() {
        let cluster = sample_cluster();
        let mut mock = MockAutoscalerClient::new();
        mock.expect_get_token().returning(|name| {
            Ok(Some(AuthToken::new(
                name,
                AuthTokenSpec {
                    user_id: "ns1-c1-autoscaler".to_string(),
                    token: "s3cret".to_string(),
                    ..Default::default()
                },
            )))
        });
        mock.expect_create_token().never();

        let bearer = ensure_token(&mock, &settings(), &cluster, "ns1-c1-autoscaler")
            .await
            .unwrap();
        assert_eq!(bearer.as_deref(), Some("ns1-c1-autoscaler:s3cret"));
    }

    #[tokio::test]
    async fn story_existing_hashed_token_has_no_recoverable_bearer() {
        let cluster = sample_cluster();
        let mut mock = MockAutoscalerClient::new();
        mock.expect_get_token().returning(|name| {
            Ok(Some(AuthToken::new(
                name,
                AuthTokenSpec {
                    user_id: "ns1-c1-autoscaler".to_string(),
                    token: "digest".to_string(),
                    hashed: true,
                    ..Default::default()
                },
            )))
        });
        mock.expect_create_token().never();

        let bearer = ensure_token(&mock, &settings(), &cluster, "ns1-c1-autoscaler")
            .await
            .unwrap();
        assert_eq!(bearer, None);
    }

    /// Story: reissue tolerates the old token being gone already
    #[tokio::test]
    async fn story_reissue_tolerates_missing_token() {
        let cluster = sample_cluster();
        let mut mock = MockAutoscalerClient::new();
        mock.expect_delete_token()
            .times(1)
            .returning(|_| Err(api_error(404)));
        mock.expect_create_token()
            .times(1)
            .returning(|t| Ok(t.clone()));

        let bearer = reissue_token(&mock, &settings(), &cluster, "ns1-c1-autoscaler")
            .await
            .unwrap();
        assert!(bearer.starts_with("ns1-c1-autoscaler:"));
    }

    #[tokio::test]
    async fn story_reissue_stops_on_delete_failure() {
        let cluster = sample_cluster();
        let mut mock = MockAutoscalerClient::new();
        mock.expect_delete_token().returning(|_| Err(api_error(500)));
        mock.expect_create_token().never();

        assert!(reissue_token(&mock, &settings(), &cluster, "ns1-c1-autoscaler")
            .await
            .is_err());
    }

    /// Story: renewal keeps the user, labels and owner of the old token
    #[tokio::test]
    async fn story_renewal_preserves_token_identity() {
        let mut previous = AuthToken::new(
            "ns1-c1-autoscaler-token",
            AuthTokenSpec {
                user_id: "ns1-c1-autoscaler".to_string(),
                token: "old".to_string(),
                ttl_millis: 1,
                ..Default::default()
            },
        );
        previous.metadata.labels = Some(BTreeMap::from([(
            TOKEN_KIND_LABEL.to_string(),
            TOKEN_KIND_AUTOSCALER.to_string(),
        )]));

        let mut mock = MockAutoscalerClient::new();
        mock.expect_delete_token().times(1).returning(|_| Ok(()));
        mock.expect_create_token().times(1).returning(|t| {
            assert_eq!(t.name_any(), "ns1-c1-autoscaler-token");
            assert_eq!(t.spec.user_id, "ns1-c1-autoscaler");
            assert_eq!(t.labels()[TOKEN_KIND_LABEL], "autoscaler");
            assert_ne!(t.spec.token, "old");
            Ok(t.clone())
        });

        renew_token(&mock, &settings(), &previous).await.unwrap();
    }

    #[tokio::test]
    async fn story_cleanup_tolerates_missing_and_aggregates_failures() {
        let cluster = sample_cluster();
        let mut mock = MockAutoscalerClient::new();
        mock.expect_delete_token().returning(|_| Err(api_error(404)));
        mock.expect_delete_role_binding().returning(|_| Ok(()));
        mock.expect_delete_role().returning(|_| Err(api_error(500)));
        mock.expect_delete_identity()
            .returning(|_| Err(api_error(403)));

        let err = cleanup_credentials(&mock, &cluster).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("encountered 2 errors during cleanup"));
        assert!(msg.contains("role ns1-c1-autoscaler-global-role"));
        assert!(msg.contains("identity ns1-c1-autoscaler"));
    }
}
