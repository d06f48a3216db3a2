//! RK-004: Construct paths and logical id derivation.
//!
//! A logical id is the construct path with non-alphanumerics stripped,
//! followed by the first 8 hex digits (uppercase) of the BLAKE3 hash of the
//! `/`-joined path. Two constructs with different paths never collide even
//! when their stripped names do.

use crate::core::hasher;

/// Position of a construct within its stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    path: Vec<String>,
}

impl Scope {
    pub fn root(id: &str) -> Self {
        Self {
            path: vec![id.to_string()],
        }
    }

    pub fn child(&self, id: &str) -> Self {
        let mut path = self.path.clone();
        path.push(id.to_string());
        Self { path }
    }

    pub fn path(&self) -> String {
        self.path.join("/")
    }

    pub fn logical_id(&self) -> String {
        let human: String = self
            .path
            .iter()
            .flat_map(|p| p.chars())
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let digest = hasher::digest_hex(&self.path());
        format!("{}{}", human, digest[..8].to_ascii_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rk004_path_join() {
        let s = Scope::root("VPCResources").child("VPC").child("ServerPublicSubnet1");
        assert_eq!(s.path(), "VPCResources/VPC/ServerPublicSubnet1");
    }

    #[test]
    fn test_rk004_logical_id_shape() {
        let id = Scope::root("ECSResources").child("Cluster").logical_id();
        assert!(id.starts_with("ECSResourcesCluster"));
        assert_eq!(id.len(), "ECSResourcesCluster".len() + 8);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_rk004_logical_id_deterministic() {
        let a = Scope::root("A").child("B").logical_id();
        let b = Scope::root("A").child("B").logical_id();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rk004_stripped_collision_disambiguated() {
        let a = Scope::root("a-b").child("c").logical_id();
        let b = Scope::root("ab").child("c").logical_id();
        assert_ne!(a, b);
        assert_eq!(&a[..3], "abc");
        assert_eq!(&b[..3], "abc");
    }
}
