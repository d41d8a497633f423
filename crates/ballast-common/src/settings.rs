//! Runtime settings for the autoscaler subsystem
//!
//! Built once at startup from CLI flags / environment by the operator binary
//! and shared read-only by every reconciler.

use std::time::Duration;

use crate::Error;

/// Chart deployed to every autoscaled cluster
pub const DEFAULT_CHART_NAME: &str = "cluster-autoscaler";

/// Chart version used when none is configured
pub const DEFAULT_CHART_VERSION: &str = "9.46.6";

/// Upstream image repository for the autoscaler agent
pub const DEFAULT_IMAGE_REPOSITORY: &str = "registry.k8s.io/autoscaling/cluster-autoscaler";

/// Lifetime of every issued token
pub const TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Tokens closer than this to expiry are rotated
pub const RENEWAL_THRESHOLD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// How often the rotation service sweeps tokens
pub const RENEWAL_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// A container image reference split into repository and optional tag
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    /// Repository including registry host
    pub repository: String,
    /// Tag, if the reference carried one
    pub tag: Option<String>,
}

impl ImageRef {
    /// Parse `repository[:tag]`.
    ///
    /// A colon before the last `/` is a registry port, not a tag separator.
    pub fn parse(reference: &str) -> Result<Self, Error> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(Error::config("image reference is empty"));
        }
        let last_slash = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
        match reference[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let (repo, tag) = (&reference[..split], &reference[split + 1..]);
                if repo.is_empty() || tag.is_empty() {
                    return Err(Error::config(format!(
                        "invalid image reference {:?}",
                        reference
                    )));
                }
                Ok(Self {
                    repository: repo.to_string(),
                    tag: Some(tag.to_string()),
                })
            }
            None => Ok(Self {
                repository: reference.to_string(),
                tag: None,
            }),
        }
    }
}

/// Settings the autoscaler reconcilers run with
#[derive(Clone, Debug)]
pub struct AutoscalerSettings {
    /// Helm repository serving the autoscaler chart
    pub chart_repo: String,
    /// Chart version to deploy
    pub chart_version: String,
    /// Replaces the image table's repository, and its tag when one is given
    pub image_override: Option<ImageRef>,
    /// Management API server URL written into kubeconfigs
    pub server_url: String,
    /// PEM CA bundle for the management API server
    pub ca_cert: Option<String>,
    /// Store only a SHA-256 of issued tokens
    pub token_hashing: bool,
    /// Lifetime of issued tokens
    pub token_ttl: Duration,
    /// Rotate tokens expiring within this window
    pub renewal_threshold: Duration,
    /// Interval between rotation sweeps
    pub renewal_check_interval: Duration,
}

impl AutoscalerSettings {
    /// Settings with defaults for everything except the chart repository and server URL
    pub fn new(chart_repo: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            chart_repo: chart_repo.into(),
            chart_version: DEFAULT_CHART_VERSION.to_string(),
            image_override: None,
            server_url: server_url.into(),
            ca_cert: None,
            token_hashing: false,
            token_ttl: TOKEN_TTL,
            renewal_threshold: RENEWAL_THRESHOLD,
            renewal_check_interval: RENEWAL_CHECK_INTERVAL,
        }
    }

    /// Reject settings the reconcilers cannot work with
    pub fn validate(&self) -> Result<(), Error> {
        if self.chart_repo.trim().is_empty() {
            return Err(Error::config("chart repository is empty"));
        }
        if self.server_url.trim().is_empty() {
            return Err(Error::config("server URL is empty"));
        }
        if self.renewal_threshold >= self.token_ttl {
            return Err(Error::config(
                "renewal threshold must be shorter than the token TTL",
            ));
        }
        if self.renewal_check_interval.is_zero() {
            return Err(Error::config("renewal check interval must be non-zero"));
        }
        Ok(())
    }
}
