//! RBAC manager
//!
//! One namespace of roles and principals over one permission trie. Role
//! structure is plain data; everything expensive (the inheritance closure)
//! is memoized per principal and invalidated on mutation.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::application::errors::RbacError;
use crate::domain::entities::{PermissionMode, PermissionPath};

use super::trie::PermissionTrie;

const ROLE: &str = "role";
const PRINCIPAL: &str = "principal";
const PATH: &str = "permission path";

/// White and black lists of a role or principal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionLists {
    pub white: Vec<String>,
    pub black: Vec<String>,
}

impl PermissionLists {
    pub fn get(&self, mode: PermissionMode) -> &Vec<String> {
        match mode {
            PermissionMode::White => &self.white,
            PermissionMode::Black => &self.black,
        }
    }

    fn get_mut(&mut self, mode: PermissionMode) -> &mut Vec<String> {
        match mode {
            PermissionMode::White => &mut self.white,
            PermissionMode::Black => &mut self.black,
        }
    }

    fn insert(&mut self, mode: PermissionMode, path: String) {
        let list = self.get_mut(mode);
        if !list.contains(&path) {
            list.push(path);
        }
    }

    fn remove(&mut self, mode: PermissionMode, path: &str) -> bool {
        let list = self.get_mut(mode);
        let before = list.len();
        list.retain(|p| p != path);
        list.len() != before
    }

    /// Drop entries the trie no longer holds; returns how many went
    ///
    /// Any reachable node is still a valid path: growing a subtree under a
    /// granted path must not revoke the grant.
    fn prune(&mut self, trie: &PermissionTrie) -> usize {
        let before = self.white.len() + self.black.len();
        self.white.retain(|p| trie.exists(p, false));
        self.black.retain(|p| trie.exists(p, false));
        before - self.white.len() - self.black.len()
    }
}

/// A user or group inside one namespace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    pub lists: PermissionLists,
    pub roles: Vec<String>,
}

/// Union of a principal's own lists and those of every reachable role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectivePermissions {
    pub white: BTreeSet<PermissionPath>,
    pub black: BTreeSet<PermissionPath>,
}

impl EffectivePermissions {
    fn extend(&mut self, lists: &PermissionLists, case_sensitive: bool) {
        let parse = |raw: &String| PermissionPath::normalized(raw, case_sensitive).ok();
        self.white.extend(lists.white.iter().filter_map(parse));
        self.black.extend(lists.black.iter().filter_map(parse));
    }
}

/// Roles and principals of one namespace
#[derive(Debug, Clone)]
pub struct RbacManager {
    default_role: Option<String>,
    trie: PermissionTrie,
    roles: BTreeMap<String, PermissionLists>,
    principals: BTreeMap<String, Principal>,
    /// role -> roles it inherits from
    inheritance: BTreeMap<String, Vec<String>>,
    cache: HashMap<String, EffectivePermissions>,
}

impl RbacManager {
    pub fn new(case_sensitive: bool, default_role: Option<String>) -> Self {
        Self {
            default_role,
            trie: PermissionTrie::new(case_sensitive),
            roles: BTreeMap::new(),
            principals: BTreeMap::new(),
            inheritance: BTreeMap::new(),
            cache: HashMap::new(),
        }
    }

    pub fn case_sensitive(&self) -> bool {
        self.trie.case_sensitive()
    }

    pub fn default_role(&self) -> Option<&str> {
        self.default_role.as_deref()
    }

    pub fn trie(&self) -> &PermissionTrie {
        &self.trie
    }

    /// Every stored leaf path
    pub fn paths(&self) -> Vec<String> {
        self.trie.paths()
    }

    pub fn roles(&self) -> &BTreeMap<String, PermissionLists> {
        &self.roles
    }

    pub fn principals(&self) -> &BTreeMap<String, Principal> {
        &self.principals
    }

    pub fn inheritance(&self) -> &BTreeMap<String, Vec<String>> {
        &self.inheritance
    }

    pub fn role_exists(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    pub fn principal_exists(&self, name: &str) -> bool {
        self.principals.contains_key(name)
    }

    /// Whether `raw` is usable in a list: it must match a complete stored path
    /// Whether `raw` names a node of the trie, leaf or not
    pub fn path_exists(&self, raw: &str) -> bool {
        self.trie.exists(raw, false)
    }

    // --- permission paths ---

    pub fn add_permission_path(&mut self, raw: &str) -> Result<(), RbacError> {
        self.trie.add(raw)?;
        self.cache.clear();
        Ok(())
    }

    /// Remove a path from the trie; list entries pointing at it are pruned
    /// lazily on the next lookup
    pub fn delete_permission_path(&mut self, raw: &str) -> Result<bool, RbacError> {
        let removed = self.trie.delete(raw, true)?;
        self.cache.clear();
        Ok(removed)
    }

    // --- roles ---

    /// Create a role; `force` resets an existing one
    pub fn add_role(&mut self, role: &str, force: bool) -> Result<(), RbacError> {
        if !force && self.role_exists(role) {
            return Err(RbacError::already_exists(ROLE, role));
        }
        self.invalidate_role(role);
        self.roles.insert(role.to_string(), PermissionLists::default());
        Ok(())
    }

    /// Delete a role and every reference to it
    pub fn delete_role(&mut self, role: &str) -> Result<(), RbacError> {
        if !self.role_exists(role) {
            return Err(RbacError::not_found(ROLE, role));
        }
        self.invalidate_role(role);
        self.inheritance.remove(role);
        for parents in self.inheritance.values_mut() {
            parents.retain(|p| p != role);
        }
        for principal in self.principals.values_mut() {
            principal.roles.retain(|r| r != role);
        }
        self.roles.remove(role);
        Ok(())
    }

    pub fn assign_permission_to_role(
        &mut self,
        role: &str,
        raw: &str,
        mode: PermissionMode,
    ) -> Result<(), RbacError> {
        if !self.role_exists(role) {
            return Err(RbacError::not_found(ROLE, role));
        }
        let path = self.valid_list_entry(raw)?;
        self.invalidate_role(role);
        if let Some(lists) = self.roles.get_mut(role) {
            lists.insert(mode, path);
        }
        Ok(())
    }

    /// Returns whether the entry was present
    pub fn unassign_permission_from_role(
        &mut self,
        role: &str,
        raw: &str,
        mode: PermissionMode,
    ) -> Result<bool, RbacError> {
        if !self.role_exists(role) {
            return Err(RbacError::not_found(ROLE, role));
        }
        let path = self.trie.normalize(raw)?.to_string();
        self.invalidate_role(role);
        Ok(self
            .roles
            .get_mut(role)
            .map(|lists| lists.remove(mode, &path))
            .unwrap_or(false))
    }

    /// Make `role` inherit every permission of `parent`
    ///
    /// Rejected before anything changes when the edge would close a cycle.
    pub fn set_inheritance(&mut self, role: &str, parent: &str) -> Result<(), RbacError> {
        if !self.role_exists(role) {
            return Err(RbacError::not_found(ROLE, role));
        }
        if !self.role_exists(parent) {
            return Err(RbacError::not_found(ROLE, parent));
        }
        if role == parent {
            return Err(RbacError::SelfInheritance(role.to_string()));
        }
        if self.inherits(parent, role) {
            return Err(RbacError::CircularInheritance {
                role: role.to_string(),
                parent: parent.to_string(),
            });
        }

        let parents = self.inheritance.entry(role.to_string()).or_default();
        if !parents.iter().any(|p| p == parent) {
            parents.push(parent.to_string());
            self.invalidate_role(role);
        }
        Ok(())
    }

    /// Returns whether the edge existed
    pub fn remove_inheritance(&mut self, role: &str, parent: &str) -> bool {
        let removed = match self.inheritance.get_mut(role) {
            Some(parents) => {
                let before = parents.len();
                parents.retain(|p| p != parent);
                parents.len() != before
            }
            None => false,
        };
        if removed {
            self.invalidate_role(role);
        }
        removed
    }

    /// Whether `role` reaches `ancestor` through inheritance (or is it)
    pub fn inherits(&self, role: &str, ancestor: &str) -> bool {
        let mut stack = vec![role];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == ancestor {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(parents) = self.inheritance.get(current) {
                stack.extend(parents.iter().map(String::as_str));
            }
        }
        false
    }

    // --- principals ---

    /// Create a principal holding the default role, if one is set
    pub fn add_principal(&mut self, name: &str, force: bool) -> Result<(), RbacError> {
        if !force && self.principal_exists(name) {
            return Err(RbacError::already_exists(PRINCIPAL, name));
        }
        self.cache.remove(name);
        let roles = self.default_role.iter().cloned().collect();
        self.principals.insert(
            name.to_string(),
            Principal {
                lists: PermissionLists::default(),
                roles,
            },
        );
        Ok(())
    }

    pub fn delete_principal(&mut self, name: &str) -> Result<(), RbacError> {
        if self.principals.remove(name).is_none() {
            return Err(RbacError::not_found(PRINCIPAL, name));
        }
        self.cache.remove(name);
        Ok(())
    }

    pub fn assign_permission_to_principal(
        &mut self,
        name: &str,
        raw: &str,
        mode: PermissionMode,
    ) -> Result<(), RbacError> {
        if !self.principal_exists(name) {
            return Err(RbacError::not_found(PRINCIPAL, name));
        }
        let path = self.valid_list_entry(raw)?;
        self.cache.remove(name);
        if let Some(principal) = self.principals.get_mut(name) {
            principal.lists.insert(mode, path);
        }
        Ok(())
    }

    /// Returns whether the entry was present
    pub fn unassign_permission_from_principal(
        &mut self,
        name: &str,
        raw: &str,
        mode: PermissionMode,
    ) -> Result<bool, RbacError> {
        if !self.principal_exists(name) {
            return Err(RbacError::not_found(PRINCIPAL, name));
        }
        let path = self.trie.normalize(raw)?.to_string();
        self.cache.remove(name);
        Ok(self
            .principals
            .get_mut(name)
            .map(|p| p.lists.remove(mode, &path))
            .unwrap_or(false))
    }

    pub fn assign_role(&mut self, name: &str, role: &str) -> Result<(), RbacError> {
        if !self.role_exists(role) {
            return Err(RbacError::not_found(ROLE, role));
        }
        let principal = self
            .principals
            .get_mut(name)
            .ok_or_else(|| RbacError::not_found(PRINCIPAL, name))?;
        if !principal.roles.iter().any(|r| r == role) {
            principal.roles.push(role.to_string());
        }
        self.cache.remove(name);
        Ok(())
    }

    /// Returns whether the principal held the role
    pub fn unassign_role(&mut self, name: &str, role: &str) -> Result<bool, RbacError> {
        if !self.role_exists(role) {
            return Err(RbacError::not_found(ROLE, role));
        }
        let principal = self
            .principals
            .get_mut(name)
            .ok_or_else(|| RbacError::not_found(PRINCIPAL, name))?;
        let before = principal.roles.len();
        principal.roles.retain(|r| r != role);
        let removed = principal.roles.len() != before;
        self.cache.remove(name);
        Ok(removed)
    }

    /// Whether the role is directly assigned to the principal
    pub fn has_role(&self, name: &str, role: &str) -> bool {
        self.principals
            .get(name)
            .map(|p| p.roles.iter().any(|r| r == role))
            .unwrap_or(false)
    }

    // --- decisions ---

    /// Memoized union of the principal's lists and its roles' lists
    ///
    /// Entries whose path left the trie are removed from the stored lists
    /// before the result is cached.
    pub fn effective_permissions(&mut self, name: &str) -> Result<EffectivePermissions, RbacError> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(cached.clone());
        }

        let reachable = match self.principals.get(name) {
            Some(principal) => self.reachable_roles(&principal.roles),
            None => return Err(RbacError::not_found(PRINCIPAL, name)),
        };

        let case_sensitive = self.trie.case_sensitive();
        let trie = &self.trie;
        let mut effective = EffectivePermissions::default();

        if let Some(principal) = self.principals.get_mut(name) {
            let pruned = principal.lists.prune(trie);
            if pruned > 0 {
                tracing::debug!("Pruned {} stale entries from {}", pruned, name);
            }
            effective.extend(&principal.lists, case_sensitive);
        }
        for role in &reachable {
            if let Some(lists) = self.roles.get_mut(role) {
                let pruned = lists.prune(trie);
                if pruned > 0 {
                    tracing::debug!("Pruned {} stale entries from role {}", pruned, role);
                }
                effective.extend(lists, case_sensitive);
            }
        }

        self.cache.insert(name.to_string(), effective.clone());
        Ok(effective)
    }

    /// Decide whether `name` may use `raw`
    ///
    /// Exact black, exact white, then (unless `strict`) black patterns
    /// covering the path, then white patterns. Anything else is denied.
    pub fn check_permission(&mut self, name: &str, raw: &str, strict: bool) -> Result<bool, RbacError> {
        let target = self.trie.normalize(raw)?;
        let effective = self.effective_permissions(name)?;

        if effective.black.contains(&target) {
            return Ok(false);
        }
        if effective.white.contains(&target) {
            return Ok(true);
        }
        if strict {
            return Ok(false);
        }
        if effective.black.iter().any(|pattern| pattern.covers(&target)) {
            return Ok(false);
        }
        Ok(effective.white.iter().any(|pattern| pattern.covers(&target)))
    }

    // --- internals ---

    fn valid_list_entry(&self, raw: &str) -> Result<String, RbacError> {
        let path = self.trie.normalize(raw)?;
        if !self.trie.exists_path(&path, false) {
            return Err(RbacError::not_found(PATH, raw));
        }
        Ok(path.to_string())
    }

    /// Depth-first walk over inheritance, each role visited once
    fn reachable_roles(&self, start: &[String]) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<&str> = start.iter().rev().map(String::as_str).collect();
        while let Some(role) = stack.pop() {
            if !visited.insert(role) {
                continue;
            }
            order.push(role.to_string());
            if let Some(parents) = self.inheritance.get(role) {
                stack.extend(parents.iter().rev().map(String::as_str));
            }
        }
        order
    }

    /// Drop cached results of every principal whose closure contains `role`
    fn invalidate_role(&mut self, role: &str) {
        let affected: Vec<String> = self
            .principals
            .iter()
            .filter(|(_, p)| p.roles.iter().any(|r| self.inherits(r, role)))
            .map(|(name, _)| name.clone())
            .collect();
        for name in affected {
            self.cache.remove(&name);
        }
    }

    pub(crate) fn restore_role(&mut self, role: &str, lists: PermissionLists) {
        self.roles.insert(role.to_string(), lists);
    }

    pub(crate) fn restore_principal(&mut self, name: &str, principal: Principal) {
        self.principals.insert(name.to_string(), principal);
    }

    pub(crate) fn trie_mut(&mut self) -> &mut PermissionTrie {
        self.cache.clear();
        &mut self.trie
    }

    #[cfg(test)]
    pub(crate) fn is_cached(&self, name: &str) -> bool {
        self.cache.contains_key(name)
    }
}
