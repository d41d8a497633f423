//! Identity store kinds: service identities, global roles, bindings and tokens
//!
//! All four are cluster-scoped. The autoscaler subsystem creates one of each
//! per managed cluster, owner-referenced to the cluster so they are garbage
//! collected with it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::rbac::v1::PolicyRule;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// A non-human principal tokens can be issued to
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "iam.ballast.dev",
    version = "v1",
    kind = "ServiceIdentity",
    plural = "serviceidentities"
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceIdentitySpec {
    /// Human readable name shown in UIs
    #[serde(default)]
    pub display_name: String,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A set of permissions spanning the management cluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "iam.ballast.dev",
    version = "v1",
    kind = "GlobalRole",
    plural = "globalroles"
)]
#[serde(rename_all = "camelCase")]
pub struct GlobalRoleSpec {
    /// Human readable name shown in UIs
    #[serde(default)]
    pub display_name: String,

    /// Rules applied cluster-wide
    #[serde(default)]
    pub rules: Vec<PolicyRule>,

    /// Rules applied only within the keyed namespace
    #[serde(default)]
    pub namespaced_rules: BTreeMap<String, Vec<PolicyRule>>,
}

/// Grants a [`GlobalRole`] to an identity
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "iam.ballast.dev",
    version = "v1",
    kind = "GlobalRoleBinding",
    plural = "globalrolebindings"
)]
#[serde(rename_all = "camelCase")]
pub struct GlobalRoleBindingSpec {
    /// Name of the bound identity
    pub user_name: String,
    /// Name of the bound role
    pub global_role_name: String,
}

/// A bearer credential issued to an identity
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "iam.ballast.dev",
    version = "v1",
    kind = "AuthToken",
    plural = "authtokens",
    printcolumn = r#"{"name":"User","type":"string","jsonPath":".spec.userId"}"#,
    printcolumn = r#"{"name":"Expires","type":"string","jsonPath":".spec.expiresAt"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokenSpec {
    /// Identity the token authenticates as
    pub user_id: String,

    /// Token secret, or its SHA-256 when `hashed` is set
    pub token: String,

    /// Whether `token` holds a hash rather than the plaintext
    #[serde(default)]
    pub hashed: bool,

    /// Lifetime in milliseconds; 0 never expires
    #[serde(default)]
    pub ttl_millis: i64,

    /// RFC 3339 expiry timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AuthToken {
    /// Tokens with a zero TTL never expire and are never rotated
    pub fn expires(&self) -> bool {
        self.spec.ttl_millis != 0
    }

    /// Parse `expiresAt`, failing when it is missing or malformed
    pub fn expires_at(&self) -> Result<DateTime<Utc>, Error> {
        let raw = self.spec.expires_at.as_deref().ok_or_else(|| {
            Error::serialization_for_kind("AuthToken", "expiresAt is not set")
        })?;
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                Error::serialization_for_kind(
                    "AuthToken",
                    format!("invalid expiresAt {:?}: {}", raw, e),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(ttl_millis: i64, expires_at: Option<&str>) -> AuthToken {
        AuthToken::new(
            "t",
            AuthTokenSpec {
                user_id: "ns1-c1-autoscaler".to_string(),
                token: "secret".to_string(),
                ttl_millis,
                expires_at: expires_at.map(str::to_string),
                ..Default::default()
            },
        )
    }

    #[test]
    fn zero_ttl_never_expires() {
        assert!(!token(0, None).expires());
        assert!(token(1, None).expires());
    }

    #[test]
    fn negative_ttl_is_still_an_expiring_token() {
        assert!(token(-1, Some("2026-01-02T03:04:05Z")).expires());
    }

    #[test]
    fn expires_at_parses_rfc3339() {
        let t = token(1, Some("2026-01-02T03:04:05Z"));
        assert_eq!(
            t.expires_at().unwrap().to_rfc3339(),
            "2026-01-02T03:04:05+00:00"
        );
    }

    #[test]
    fn malformed_expiry_is_an_error() {
        assert!(token(1, Some("tomorrow")).expires_at().is_err());
        assert!(token(1, None).expires_at().is_err());
    }

    #[test]
    fn token_spec_uses_camel_case() {
        let json = serde_json::to_value(&token(5, Some("2026-01-01T00:00:00Z")).spec).unwrap();
        assert_eq!(json["userId"], "ns1-c1-autoscaler");
        assert_eq!(json["ttlMillis"], 5);
        assert_eq!(json["expiresAt"], "2026-01-01T00:00:00Z");
    }
}
