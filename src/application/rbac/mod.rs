//! Role based access control
//!
//! - Trie: the set of valid permission paths
//! - Manager: roles, principals and the decision rule for one namespace
//! - Document: the persisted form of a namespace
//! - Access: the user and group namespaces combined

pub mod access;
pub mod document;
pub mod manager;
pub mod trie;

pub use access::{
    AccessController, AccessSettings, SharedAccessController, ADMIN_ROLE, ROOT_GROUP, ROOT_ROLE, USER_ROLE,
};
pub use document::RbacDocument;
pub use manager::{EffectivePermissions, PermissionLists, Principal, RbacManager};
pub use trie::PermissionTrie;
