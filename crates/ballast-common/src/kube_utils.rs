//! Kubernetes helpers shared by every ballast controller

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::Error;

/// Field manager used for every write the operator makes
pub const FIELD_MANAGER: &str = "ballast-controller";

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

fn api_code(err: &Error) -> Option<u16> {
    match err {
        Error::Kube {
            source: kube::Error::Api(ae),
        } => Some(ae.code),
        _ => None,
    }
}

/// True when the error is an API 404
pub fn is_not_found(err: &Error) -> bool {
    api_code(err) == Some(404)
}

/// True when the error is an API 409 (optimistic-concurrency conflict or already exists)
pub fn is_conflict(err: &Error) -> bool {
    api_code(err) == Some(409)
}

/// Turn a kube "get" result into `Ok(None)` on 404
pub fn optional<T>(result: Result<T, kube::Error>) -> Result<Option<T>, Error> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Check whether a label or annotation map has `key` set to `"true"`
pub fn is_true(map: Option<&BTreeMap<String, String>>, key: &str) -> bool {
    map.and_then(|m| m.get(key))
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Compute a deterministic SHA-256 hex digest of `input`, truncated to `len` chars.
///
/// `DefaultHasher` is not stable across Rust releases, so anything persisted
/// into object names goes through this instead.
pub fn deterministic_hash(input: &str, len: usize) -> String {
    use aws_lc_rs::digest;
    use std::fmt::Write;

    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    let mut hex = hash
        .as_ref()
        .iter()
        .fold(String::with_capacity(64), |mut s, b| {
            let _ = write!(s, "{:02x}", b);
            s
        });
    hex.truncate(len);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: String::new(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn classifies_api_errors() {
        assert!(is_not_found(&api(404).into()));
        assert!(!is_not_found(&api(409).into()));
        assert!(is_conflict(&api(409).into()));
        assert!(!is_conflict(&Error::internal("409")));
    }

    #[test]
    fn optional_maps_not_found_to_none() {
        assert_eq!(optional(Ok::<_, kube::Error>(7)).unwrap(), Some(7));
        assert_eq!(optional::<i32>(Err(api(404))).unwrap(), None);
        assert!(optional::<i32>(Err(api(500))).is_err());
    }

    #[test]
    fn is_true_accepts_only_true() {
        let map = BTreeMap::from([
            ("a".to_string(), "true".to_string()),
            ("b".to_string(), "TRUE".to_string()),
            ("c".to_string(), "yes".to_string()),
        ]);
        assert!(is_true(Some(&map), "a"));
        assert!(is_true(Some(&map), "b"));
        assert!(!is_true(Some(&map), "c"));
        assert!(!is_true(Some(&map), "missing"));
        assert!(!is_true(None, "a"));
    }

    #[test]
    fn deterministic_hash_is_stable() {
        assert_eq!(deterministic_hash("abc", 8), "ba7816bf");
        assert_eq!(deterministic_hash("abc", 5).len(), 5);
    }
}
