//! Background rotation of autoscaler tokens
//!
//! A sweep runs once per `renewal_check_interval`. Tokens issued by this
//! subsystem that expire within `renewal_threshold` are replaced, the new
//! bearer is written into the owning cluster's kubeconfig secret, and the
//! bundle is re-converged with the secret's new resourceVersion so the agent
//! restarts with the fresh credential.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use ballast_common::crd::{AuthToken, ManagedCluster};
use ballast_common::settings::AutoscalerSettings;
use ballast_common::{Error, CLUSTER_NAMESPACE_LABEL, CLUSTER_NAME_LABEL};

use crate::client::AutoscalerClient;
use crate::{credentials, deployment, kubeconfig};

/// Counts reported by one sweep
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tokens whose renewal was attempted
    pub processed: usize,
    /// Renewals that failed
    pub failed: usize,
}

/// Periodically renews autoscaler tokens nearing expiry
pub struct TokenRotationService {
    client: Arc<dyn AutoscalerClient>,
    settings: Arc<AutoscalerSettings>,
}

impl TokenRotationService {
    /// Create a rotation service
    pub fn new(client: Arc<dyn AutoscalerClient>, settings: Arc<AutoscalerSettings>) -> Self {
        Self { client, settings }
    }

    /// Start the sweep loop. It stops when `cancel` fires; a renewal in
    /// flight is allowed to finish first.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.renewal_check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            interval_secs = self.settings.renewal_check_interval.as_secs(),
            "token rotation started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("token rotation stopped");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        error!(error = %e, "token rotation sweep failed");
                    }
                }
            }
        }
    }

    /// Renew every autoscaler token that expires within the threshold of `now`.
    ///
    /// A token with a malformed expiry aborts the sweep. A failed renewal is
    /// counted and the sweep moves on; the first such error is returned once
    /// every candidate has been tried.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, Error> {
        let tokens = self.client.list_autoscaler_tokens().await?;
        let threshold = chrono::Duration::from_std(self.settings.renewal_threshold)
            .map_err(|e| Error::config(format!("renewal threshold out of range: {}", e)))?;

        let mut report = SweepReport::default();
        let mut first_error = None;

        for token in tokens {
            if !token.expires() {
                continue;
            }
            let expires_at = token.expires_at()?;
            if expires_at - now >= threshold {
                continue;
            }

            report.processed += 1;
            if let Err(e) = self.renew(&token).await {
                warn!(token = %token.name_any(), error = %e, "token renewal failed");
                report.failed += 1;
                first_error.get_or_insert(e);
            }
        }

        info!(
            processed = report.processed,
            failed = report.failed,
            "token rotation sweep finished"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    #[instrument(skip(self, token), fields(token = %token.name_any()))]
    async fn renew(&self, token: &AuthToken) -> Result<(), Error> {
        let client = self.client.as_ref();
        let bearer = credentials::renew_token(client, &self.settings, token).await?;

        let cluster = owning_cluster(client, token).await?;
        let secret = kubeconfig::update_kubeconfig(client, &self.settings, &cluster, &bearer).await?;
        let version = secret.resource_version().unwrap_or_default();
        deployment::converge(client, &self.settings, &cluster, &version).await?;

        info!(cluster = %cluster.key(), "renewed autoscaler token");
        Ok(())
    }
}

/// Find the single cluster a token's labels point at, searching every namespace
async fn owning_cluster(
    client: &dyn AutoscalerClient,
    token: &AuthToken,
) -> Result<ManagedCluster, Error> {
    let labels = token.labels();
    let name = labels.get(CLUSTER_NAME_LABEL).cloned().unwrap_or_default();
    let namespace = labels
        .get(CLUSTER_NAMESPACE_LABEL)
        .cloned()
        .unwrap_or_default();

    let mut matches: Vec<ManagedCluster> = client
        .list_clusters()
        .await?
        .into_iter()
        .filter(|c| c.name_any() == name && c.namespace().unwrap_or_default() == namespace)
        .collect();

    if matches.len() != 1 {
        return Err(Error::correlation(
            format!(
                "{}={},{}={}",
                CLUSTER_NAME_LABEL, name, CLUSTER_NAMESPACE_LABEL, namespace
            ),
            matches.len(),
        ));
    }
    debug!(cluster = %format!("{}/{}", namespace, name), "resolved token owner");
    matches.pop().ok_or_else(|| Error::correlation(name, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockAutoscalerClient;
    use crate::credentials::cluster_labels;
    use crate::test_support::{api_error, sample_cluster};
    use ballast_common::crd::AuthTokenSpec;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn settings() -> Arc<AutoscalerSettings> {
        Arc::new(AutoscalerSettings::new(
            "https://charts.example",
            "https://mgmt.example:6443",
        ))
    }

    fn token(name: &str, ttl_millis: i64, expires_at: Option<&str>) -> AuthToken {
        let mut token = AuthToken::new(
            name,
            AuthTokenSpec {
                user_id: "ns1-c1-autoscaler".to_string(),
                token: "old".to_string(),
                ttl_millis,
                expires_at: expires_at.map(str::to_string),
                ..Default::default()
            },
        );
        token.metadata.labels = Some(cluster_labels(&sample_cluster()));
        token
    }

    fn kubeconfig_secret(rv: &str) -> Secret {
        let mut secret = Secret {
            data: Some(BTreeMap::from([(
                "value".to_string(),
                ByteString(b"old".to_vec()),
            )])),
            ..Default::default()
        };
        secret.metadata.name = Some("ns1-c1-autoscaler-kubeconfig".to_string());
        secret.metadata.namespace = Some("ns1".to_string());
        secret.metadata.resource_version = Some(rv.to_string());
        secret
    }

    /// Wire up a mock that accepts one complete renewal
    fn expect_renewal(mock: &mut MockAutoscalerClient, renewals: Arc<AtomicU32>) {
        mock.expect_delete_token().returning(|_| Ok(()));
        mock.expect_create_token().returning(move |t| {
            renewals.fetch_add(1, Ordering::SeqCst);
            Ok(t.clone())
        });
        mock.expect_list_clusters()
            .returning(|| Ok(vec![sample_cluster()]));
        mock.expect_get_secret()
            .returning(|_, _| Ok(Some(kubeconfig_secret("100"))));
        mock.expect_update_secret().returning(|_, s| {
            let mut s = s.clone();
            s.metadata.resource_version = Some("101".to_string());
            Ok(s)
        });
        mock.expect_get_capi_cluster().returning(|_, _| Ok(None));
        mock.expect_get_bundle().returning(|_, _| Ok(None));
        mock.expect_create_bundle().returning(|_, b| Ok(b.clone()));
    }

    /// Story: an expired token with a TTL is renewed exactly once; a TTL-0 token never is
    #[tokio::test]
    async fn story_expired_token_is_renewed_once_and_ttl_zero_is_skipped() {
        let renewals = Arc::new(AtomicU32::new(0));
        let mut mock = MockAutoscalerClient::new();
        mock.expect_list_autoscaler_tokens().returning(|| {
            Ok(vec![
                token("expired", 1000, Some("2020-01-01T00:00:00Z")),
                token("forever", 0, Some("2020-01-01T00:00:00Z")),
                token("fresh", 1000, Some("2099-01-01T00:00:00Z")),
            ])
        });
        expect_renewal(&mut mock, renewals.clone());

        let service = TokenRotationService::new(Arc::new(mock), settings());
        let report = service.sweep(Utc::now()).await.unwrap();

        assert_eq!(report, SweepReport { processed: 1, failed: 0 });
        assert_eq!(renewals.load(Ordering::SeqCst), 1);
    }

    /// Story: the bundle is re-converged with the rotated secret's resourceVersion
    #[tokio::test]
    async fn story_renewal_rolls_the_agent_with_the_new_secret_version() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let capture = seen.clone();

        let mut mock = MockAutoscalerClient::new();
        mock.expect_list_autoscaler_tokens()
            .returning(|| Ok(vec![token("expired", 1000, Some("2020-01-01T00:00:00Z"))]));
        mock.expect_delete_token().returning(|_| Err(api_error(404)));
        mock.expect_create_token().returning(|t| Ok(t.clone()));
        mock.expect_list_clusters()
            .returning(|| Ok(vec![sample_cluster()]));
        mock.expect_get_secret()
            .returning(|_, _| Ok(Some(kubeconfig_secret("100"))));
        mock.expect_update_secret().returning(|_, s| {
            let mut s = s.clone();
            s.metadata.resource_version = Some("101".to_string());
            Ok(s)
        });
        mock.expect_get_capi_cluster().returning(|_, _| Ok(None));
        mock.expect_get_bundle().returning(|_, _| Ok(None));
        mock.expect_create_bundle().returning(move |_, b| {
            *capture.lock().unwrap() = Some(b.clone());
            Ok(b.clone())
        });

        let service = TokenRotationService::new(Arc::new(mock), settings());
        service.sweep(Utc::now()).await.unwrap();

        let bundle = seen.lock().unwrap().take().unwrap();
        let annotations = deployment::pod_annotations(&bundle);
        assert_eq!(
            annotations
                .get(ballast_common::KUBECONFIG_VERSION_ANNOTATION)
                .map(String::as_str),
            Some("101")
        );
    }

    #[tokio::test]
    async fn story_malformed_expiry_aborts_the_sweep() {
        let mut mock = MockAutoscalerClient::new();
        mock.expect_list_autoscaler_tokens().returning(|| {
            Ok(vec![
                token("broken", 1000, Some("yesterday")),
                token("expired", 1000, Some("2020-01-01T00:00:00Z")),
            ])
        });
        mock.expect_delete_token().never();
        mock.expect_create_token().never();

        let service = TokenRotationService::new(Arc::new(mock), settings());
        let err = service.sweep(Utc::now()).await.unwrap_err();
        assert!(err.to_string().contains("yesterday"));
    }

    /// Story: a token whose cluster cannot be pinned down is reported with key and count
    #[tokio::test]
    async fn story_ambiguous_owner_is_a_correlation_error() {
        let mut mock = MockAutoscalerClient::new();
        mock.expect_list_autoscaler_tokens()
            .returning(|| Ok(vec![token("expired", 1000, Some("2020-01-01T00:00:00Z"))]));
        mock.expect_delete_token().returning(|_| Ok(()));
        mock.expect_create_token().returning(|t| Ok(t.clone()));
        mock.expect_list_clusters()
            .returning(|| Ok(vec![sample_cluster(), sample_cluster()]));
        mock.expect_update_secret().never();

        let service = TokenRotationService::new(Arc::new(mock), settings());
        let err = service.sweep(Utc::now()).await.unwrap_err();

        match err {
            Error::Correlation { key, count } => {
                assert_eq!(
                    key,
                    "ballast.dev/cluster-name=c1,ballast.dev/cluster-namespace=ns1"
                );
                assert_eq!(count, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn story_missing_owner_counts_zero_matches() {
        let mut mock = MockAutoscalerClient::new();
        mock.expect_list_clusters().returning(|| Ok(Vec::new()));

        let err = owning_cluster(&mock, &token("t", 1000, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Correlation { count: 0, .. }));
    }

    /// Story: one failed renewal does not starve the others; the first error is returned
    #[tokio::test]
    async fn story_failed_renewal_is_counted_and_sweep_continues() {
        let renewals = Arc::new(AtomicU32::new(0));
        let counter = renewals.clone();

        let mut mock = MockAutoscalerClient::new();
        mock.expect_list_autoscaler_tokens().returning(|| {
            Ok(vec![
                token("first", 1000, Some("2020-01-01T00:00:00Z")),
                token("second", 1000, Some("2020-01-01T00:00:00Z")),
            ])
        });
        mock.expect_delete_token().returning(|name| {
            if name == "first" {
                Err(api_error(500))
            } else {
                Ok(())
            }
        });
        mock.expect_create_token().returning(move |t| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(t.clone())
        });
        mock.expect_list_clusters()
            .returning(|| Ok(vec![sample_cluster()]));
        mock.expect_get_secret()
            .returning(|_, _| Ok(Some(kubeconfig_secret("100"))));
        mock.expect_update_secret().returning(|_, s| Ok(s.clone()));
        mock.expect_get_capi_cluster().returning(|_, _| Ok(None));
        mock.expect_get_bundle().returning(|_, _| Ok(None));
        mock.expect_create_bundle().returning(|_, b| Ok(b.clone()));

        let service = TokenRotationService::new(Arc::new(mock), settings());
        let err = service.sweep(Utc::now()).await.unwrap_err();

        assert!(matches!(err, Error::Kube { .. }));
        assert_eq!(renewals.load(Ordering::SeqCst), 1);
    }

    /// Story: cancelling the token stops the loop promptly
    #[tokio::test(start_paused = true)]
    async fn story_cancellation_stops_the_loop() {
        let mut mock = MockAutoscalerClient::new();
        mock.expect_list_autoscaler_tokens()
            .returning(|| Ok(Vec::new()));

        let mut settings = AutoscalerSettings::new("https://charts.example", "https://x");
        settings.renewal_check_interval = Duration::from_secs(60);
        let service = TokenRotationService::new(Arc::new(mock), Arc::new(settings));

        let cancel = CancellationToken::new();
        let handle = service.spawn(cancel.clone());
        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
    }
}
