//! Deterministic names for everything the autoscaler subsystem creates
//!
//! Every derived name is a pure function of the cluster's namespace and name.
//! Nothing here is persisted: reconcilers recompute the names on every pass,
//! so there is no mapping table that can drift from the objects it points at.

use crate::kube_utils::deterministic_hash;

/// Longest name accepted for label values and most object kinds
pub const MAX_NAME_LEN: usize = 63;

const HASH_LEN: usize = 5;

/// Join `parts` with `-`, shortening with a hash suffix past 63 characters.
///
/// Long names keep their first 57 characters followed by `-` and five hex
/// characters of the SHA-256 of the full joined name, so distinct inputs stay
/// distinct after truncation.
pub fn safe_concat(parts: &[&str]) -> String {
    let full = parts.join("-");
    if full.len() <= MAX_NAME_LEN {
        return full;
    }

    let hash = deterministic_hash(&full, HASH_LEN);
    let mut prefix_len = MAX_NAME_LEN - HASH_LEN - 1;
    while !full.is_char_boundary(prefix_len) {
        prefix_len -= 1;
    }
    let prefix = full[..prefix_len].trim_end_matches(['-', '.']);
    format!("{}-{}", prefix, hash)
}

/// Service identity the autoscaler authenticates as
pub fn identity_name(namespace: &str, name: &str) -> String {
    safe_concat(&[namespace, name, "autoscaler"])
}

/// Global role granting the identity access to this cluster's CAPI objects
pub fn role_name(namespace: &str, name: &str) -> String {
    safe_concat(&[namespace, name, "autoscaler", "global-role"])
}

/// Binding between [`identity_name`] and [`role_name`]
pub fn role_binding_name(namespace: &str, name: &str) -> String {
    safe_concat(&[namespace, name, "autoscaler", "global-rolebinding"])
}

/// Long-lived token issued to the identity
pub fn token_name(namespace: &str, name: &str) -> String {
    safe_concat(&[namespace, name, "autoscaler", "token"])
}

/// Secret holding the management-cluster kubeconfig for the agent
pub fn kubeconfig_secret_name(namespace: &str, name: &str) -> String {
    safe_concat(&[namespace, name, "autoscaler", "kubeconfig"])
}

/// Fleet bundle that deploys the cluster-autoscaler chart
pub fn release_name(namespace: &str, name: &str) -> String {
    safe_concat(&["autoscaler", namespace, name])
}
