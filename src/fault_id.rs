//! Deterministic Fault ID derivation (spec §3, §6).
//!
//! `sha2` is already part of the ecosystem this crate's sibling services
//! reach for when they need a stable content hash (see the `sha2`
//! dependency pulled in by `GHActionsRustTest`'s Kubernetes service crates);
//! we use it the same way here: hash a canonical string, truncate to a
//! fixed-width hex id.

use sha2::{Digest, Sha256};

/// Build the 16-character lowercase-hex Fault ID for a condition.
///
/// `hex(SHA-256(cluster ":" faultType ":" resourceUID ":" containerName))[0:16]`.
/// Stable forever for identical inputs; distinct across `faultType`,
/// `resourceUID`, `containerName`, or `cluster` (spec §6, §8 "Fault condition identity").
pub fn fault_id(cluster: &str, fault_type: &str, resource_uid: &str, container_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cluster.as_bytes());
    hasher.update(b":");
    hasher.update(fault_type.as_bytes());
    hasher.update(b":");
    hasher.update(resource_uid.as_bytes());
    hasher.update(b":");
    hasher.update(container_name.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_across_reemission() {
        let a = fault_id("dev", "CrashLoop", "pod-uid-abc", "app");
        let b = fault_id("dev", "CrashLoop", "pod-uid-abc", "app");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn distinct_across_container_and_uid() {
        let base = fault_id("dev", "CrashLoop", "pod-uid-abc", "app");
        assert_ne!(base, fault_id("dev", "CrashLoop", "pod-uid-abc", "sidecar"));
        assert_ne!(base, fault_id("dev", "CrashLoop", "pod-uid-xyz", "app"));
    }

    #[test]
    fn distinct_across_cluster() {
        let dev = fault_id("dev", "CrashLoop", "pod-uid-abc", "app");
        let prod = fault_id("prod", "CrashLoop", "pod-uid-abc", "app");
        assert_ne!(dev, prod);
    }

    #[test]
    fn matches_known_vector() {
        // hex(sha256("dev:CrashLoop:pod-uid-abc:app"))[0:16]
        let expected = {
            let mut hasher = Sha256::new();
            hasher.update(b"dev:CrashLoop:pod-uid-abc:app");
            hex::encode(&hasher.finalize()[..8])
        };
        assert_eq!(fault_id("dev", "CrashLoop", "pod-uid-abc", "app"), expected);
    }
}
