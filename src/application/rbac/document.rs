//! Persisted form of an RBAC namespace

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::application::errors::StorageError;

use super::manager::{PermissionLists, Principal, RbacManager};

/// Lists of one role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEntry {
    #[serde(default)]
    pub white: Vec<String>,
    #[serde(default)]
    pub black: Vec<String>,
}

/// Lists and roles of one principal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalEntry {
    #[serde(default)]
    pub white: Vec<String>,
    #[serde(default)]
    pub black: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Everything needed to rebuild an [`RbacManager`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbacDocument {
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub default_role: Option<String>,
    #[serde(default)]
    pub roles: BTreeMap<String, RoleEntry>,
    #[serde(default)]
    pub users: BTreeMap<String, PrincipalEntry>,
    #[serde(default)]
    pub trie_paths: Vec<String>,
    #[serde(default)]
    pub role_inheritance: BTreeMap<String, Vec<String>>,
}

impl RbacDocument {
    /// Read a document; `None` if the file does not exist
    pub async fn read_from(path: impl AsRef<Path>) -> Result<Option<Self>, StorageError> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_to(&self, path: impl AsRef<Path>) -> Result<(), StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

impl RbacManager {
    pub fn to_document(&self) -> RbacDocument {
        RbacDocument {
            case_sensitive: self.case_sensitive(),
            default_role: self.default_role().map(str::to_string),
            roles: self
                .roles()
                .iter()
                .map(|(name, lists)| {
                    (
                        name.clone(),
                        RoleEntry {
                            white: lists.white.clone(),
                            black: lists.black.clone(),
                        },
                    )
                })
                .collect(),
            users: self
                .principals()
                .iter()
                .map(|(name, p)| {
                    (
                        name.clone(),
                        PrincipalEntry {
                            white: p.lists.white.clone(),
                            black: p.lists.black.clone(),
                            roles: p.roles.clone(),
                        },
                    )
                })
                .collect(),
            trie_paths: self.paths(),
            role_inheritance: self
                .inheritance()
                .iter()
                .filter(|(_, parents)| !parents.is_empty())
                .map(|(role, parents)| (role.clone(), parents.clone()))
                .collect(),
        }
    }

    /// Rebuild a manager, silently dropping anything no longer valid
    ///
    /// Invalid trie paths, list entries that match no stored path, role
    /// references to unknown roles and inheritance edges that would be
    /// self-referencing or cyclic are all skipped.
    pub fn from_document(doc: RbacDocument) -> Self {
        let mut manager = RbacManager::new(doc.case_sensitive, doc.default_role.clone());

        {
            let trie = manager.trie_mut();
            for raw in &doc.trie_paths {
                if let Err(e) = trie.add(raw) {
                    tracing::debug!("Skipping stored path '{}': {}", raw, e);
                }
            }
        }

        let keep_valid = |manager: &RbacManager, list: &[String]| -> Vec<String> {
            list.iter()
                .filter(|p| manager.path_exists(p))
                .filter_map(|p| manager.trie().normalize(p).ok())
                .map(|p| p.to_string())
                .collect()
        };

        for (name, entry) in &doc.roles {
            let lists = PermissionLists {
                white: keep_valid(&manager, &entry.white),
                black: keep_valid(&manager, &entry.black),
            };
            manager.restore_role(name, lists);
        }

        for (role, parents) in &doc.role_inheritance {
            for parent in parents {
                if let Err(e) = manager.set_inheritance(role, parent) {
                    tracing::debug!("Skipping stored inheritance {} -> {}: {}", role, parent, e);
                }
            }
        }

        for (name, entry) in &doc.users {
            let principal = Principal {
                lists: PermissionLists {
                    white: keep_valid(&manager, &entry.white),
                    black: keep_valid(&manager, &entry.black),
                },
                roles: entry
                    .roles
                    .iter()
                    .filter(|r| manager.role_exists(r))
                    .cloned()
                    .collect(),
            };
            manager.restore_principal(name, principal);
        }

        manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::PermissionMode::{Black, White};

    fn sample() -> RbacManager {
        let mut m = RbacManager::new(false, None);
        for p in ["shop.buy", "shop.sell", "bank.loan"] {
            m.add_permission_path(p).unwrap();
        }
        m.add_role("user", false).unwrap();
        m.add_role("vip", false).unwrap();
        m.set_inheritance("vip", "user").unwrap();
        m.assign_permission_to_role("user", "shop.buy", White).unwrap();
        m.assign_permission_to_role("vip", "bank.*", White).unwrap();
        m.add_principal("u1", false).unwrap();
        m.assign_role("u1", "vip").unwrap();
        m.assign_permission_to_principal("u1", "shop.sell", Black).unwrap();
        m
    }

    #[test]
    fn test_round_trip_preserves_decisions() {
        let mut original = sample();
        let doc = original.to_document();
        let json = serde_json::to_string(&doc).unwrap();
        let mut restored = RbacManager::from_document(serde_json::from_str(&json).unwrap());

        for path in ["shop.buy", "shop.sell", "bank.loan", "bank.other"] {
            assert_eq!(
                original.check_permission("u1", path, false).unwrap(),
                restored.check_permission("u1", path, false).unwrap(),
                "{}",
                path
            );
        }
        assert_eq!(restored.inheritance()["vip"], vec!["user".to_string()]);
    }

    #[test]
    fn test_restore_drops_invalid_references() {
        let mut doc = sample().to_document();
        doc.trie_paths.push("bad..path".into());
        doc.roles.get_mut("user").unwrap().white.push("gone.path".into());
        doc.users.get_mut("u1").unwrap().roles.push("ghost".into());
        doc.role_inheritance.insert("user".into(), vec!["user".into(), "ghost".into()]);

        let restored = RbacManager::from_document(doc);
        assert_eq!(restored.roles()["user"].white, vec!["shop.buy".to_string()]);
        assert_eq!(restored.principals()["u1"].roles, vec!["vip".to_string()]);
        assert!(restored.inheritance().get("user").map_or(true, |p| p.is_empty()));
        assert!(restored.inherits("vip", "user"));
    }

    #[test]
    fn test_document_shape() {
        let doc = sample().to_document();
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["case_sensitive"], serde_json::json!(false));
        assert_eq!(value["users"]["u1"]["roles"], serde_json::json!(["vip"]));
        assert_eq!(value["roles"]["user"]["white"], serde_json::json!(["shop.buy"]));
        assert!(value["trie_paths"].as_array().unwrap().contains(&serde_json::json!("bank.loan")));
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let found = RbacDocument::read_from(dir.path().join("none.json")).await.unwrap();
        assert!(found.is_none());

        let path = dir.path().join("nested").join("users_access.json");
        sample().to_document().write_to(&path).await.unwrap();
        let loaded = RbacDocument::read_from(&path).await.unwrap().unwrap();
        assert_eq!(loaded, sample().to_document());
    }
}
