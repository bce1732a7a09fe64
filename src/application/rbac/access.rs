//! Access controller
//!
//! Two RBAC namespaces, users and groups, kept in lock-step for role and
//! path structure. A decision passes only when both the sender and the
//! group it came from are allowed.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::application::errors::{RbacError, StorageError};
use crate::domain::entities::{EventSource, PermissionMode};

use super::document::RbacDocument;
use super::manager::RbacManager;

/// Base roles created at bootstrap
pub const ROOT_ROLE: &str = "root";
pub const ADMIN_ROLE: &str = "admin";
pub const USER_ROLE: &str = "user";

/// Group scope that raised checks and private messages are evaluated in
pub const ROOT_GROUP: &str = "root";

/// File names of the two persisted namespaces
pub const USERS_DOCUMENT: &str = "users_access.json";
pub const GROUPS_DOCUMENT: &str = "groups_access.json";

const USER_PREFIX: &str = "user-";
const GROUP_PREFIX: &str = "group-";

/// How the controller is set up
#[derive(Debug, Clone, Default)]
pub struct AccessSettings {
    /// User id granted the root role at startup
    pub root: Option<String>,
    pub case_sensitive: bool,
    /// Where the two documents live; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
}

/// Combined user and group access decisions
#[derive(Debug, Clone)]
pub struct AccessController {
    users: RbacManager,
    groups: RbacManager,
    settings: AccessSettings,
}

impl AccessController {
    /// Fresh controller with the base roles and root principals
    pub fn new(settings: AccessSettings) -> Result<Self, RbacError> {
        Self::from_documents(settings, None, None)
    }

    /// Controller restored from documents, then bootstrapped
    pub fn from_documents(
        settings: AccessSettings,
        users: Option<RbacDocument>,
        groups: Option<RbacDocument>,
    ) -> Result<Self, RbacError> {
        let restore = |doc: Option<RbacDocument>| match doc {
            Some(doc) if doc.case_sensitive == settings.case_sensitive => RbacManager::from_document(doc),
            Some(_) => {
                tracing::warn!("Stored access document disagrees on case sensitivity, starting empty");
                RbacManager::new(settings.case_sensitive, None)
            }
            None => RbacManager::new(settings.case_sensitive, None),
        };

        let users = restore(users);
        let groups = restore(groups);
        let mut controller = Self {
            users,
            groups,
            settings,
        };
        controller.bootstrap()?;
        Ok(controller)
    }

    /// Load both documents from the data directory, if one is configured
    ///
    /// Missing documents are not an error: the namespace starts empty.
    pub async fn open(settings: AccessSettings) -> Result<Self, StorageError> {
        let (users, groups) = match &settings.data_dir {
            Some(dir) => (
                load_document(&dir.join(USERS_DOCUMENT)).await?,
                load_document(&dir.join(GROUPS_DOCUMENT)).await?,
            ),
            None => (None, None),
        };
        Self::from_documents(settings, users, groups)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn bootstrap(&mut self) -> Result<(), RbacError> {
        self.create_role(ROOT_ROLE, true)?;
        self.create_role(ADMIN_ROLE, true)?;
        self.create_role(USER_ROLE, true)?;
        self.set_role_inheritance(ROOT_ROLE, ADMIN_ROLE, false)?;
        self.set_role_inheritance(ADMIN_ROLE, USER_ROLE, false)?;
        self.assign_permissions_to_role(ROOT_ROLE, "**", PermissionMode::White, false)?;

        self.create_group(ROOT_GROUP)?;
        self.assign_role_to_group(ROOT_GROUP, ROOT_ROLE)?;
        if let Some(root) = self.settings.root.clone().filter(|r| !r.is_empty()) {
            self.create_user(&root)?;
            self.assign_role_to_user(&root, ROOT_ROLE)?;
            tracing::debug!("Root user is {}", root);
        }
        Ok(())
    }

    pub fn settings(&self) -> &AccessSettings {
        &self.settings
    }

    pub fn users(&self) -> &RbacManager {
        &self.users
    }

    pub fn groups(&self) -> &RbacManager {
        &self.groups
    }

    /// Serializable state of both namespaces
    pub fn documents(&self) -> (RbacDocument, RbacDocument) {
        (self.users.to_document(), self.groups.to_document())
    }

    // --- permission paths ---

    pub fn permission_path_exists(&self, path: &str) -> bool {
        self.users.path_exists(path)
    }

    pub fn create_permission_path(&mut self, path: &str, ignore_exist: bool) -> Result<(), RbacError> {
        if self.permission_path_exists(path) {
            if ignore_exist {
                return Ok(());
            }
            return Err(RbacError::already_exists("permission path", path));
        }
        self.users.add_permission_path(path)?;
        self.groups.add_permission_path(path)?;
        Ok(())
    }

    pub fn delete_permission_path(&mut self, path: &str) -> Result<bool, RbacError> {
        let removed = self.users.delete_permission_path(path)?;
        self.groups.delete_permission_path(path)?;
        Ok(removed)
    }

    fn ensure_path(&mut self, path: &str, create: bool) -> Result<(), RbacError> {
        if self.permission_path_exists(path) {
            return Ok(());
        }
        if create {
            self.create_permission_path(path, true)
        } else {
            Err(RbacError::not_found("permission path", path))
        }
    }

    // --- roles ---

    pub fn role_exists(&self, role: &str) -> bool {
        self.users.role_exists(role)
    }

    pub fn create_role(&mut self, role: &str, ignore_exist: bool) -> Result<(), RbacError> {
        if self.role_exists(role) {
            if ignore_exist {
                return Ok(());
            }
            return Err(RbacError::already_exists("role", role));
        }
        self.users.add_role(role, false)?;
        self.groups.add_role(role, false)?;
        Ok(())
    }

    pub fn delete_role(&mut self, role: &str) -> Result<(), RbacError> {
        self.users.delete_role(role)?;
        self.groups.delete_role(role)?;
        Ok(())
    }

    /// `child` inherits `parent`; with `create`, missing roles are created
    pub fn set_role_inheritance(&mut self, child: &str, parent: &str, create: bool) -> Result<(), RbacError> {
        for role in [child, parent] {
            if !self.role_exists(role) {
                if !create {
                    return Err(RbacError::not_found("role", role));
                }
                self.create_role(role, true)?;
            }
        }
        // Both namespaces hold the same graph, so the second call cannot fail
        // where the first succeeded
        self.users.set_inheritance(child, parent)?;
        self.groups.set_inheritance(child, parent)?;
        Ok(())
    }

    pub fn remove_role_inheritance(&mut self, child: &str, parent: &str) -> bool {
        let removed = self.users.remove_inheritance(child, parent);
        self.groups.remove_inheritance(child, parent);
        removed
    }

    pub fn assign_permissions_to_role(
        &mut self,
        role: &str,
        path: &str,
        mode: PermissionMode,
        create_path: bool,
    ) -> Result<(), RbacError> {
        if !self.role_exists(role) {
            return Err(RbacError::not_found("role", role));
        }
        self.ensure_path(path, create_path)?;
        self.users.assign_permission_to_role(role, path, mode)?;
        self.groups.assign_permission_to_role(role, path, mode)?;
        Ok(())
    }

    pub fn unassign_permissions_from_role(
        &mut self,
        role: &str,
        path: &str,
        mode: PermissionMode,
    ) -> Result<bool, RbacError> {
        let removed = self.users.unassign_permission_from_role(role, path, mode)?;
        self.groups.unassign_permission_from_role(role, path, mode)?;
        Ok(removed)
    }

    pub fn add_white_list_to_role(&mut self, role: &str, path: &str, create_path: bool) -> Result<(), RbacError> {
        self.replace_role_entry(role, path, PermissionMode::White, create_path)
    }

    pub fn add_black_list_to_role(&mut self, role: &str, path: &str, create_path: bool) -> Result<(), RbacError> {
        self.replace_role_entry(role, path, PermissionMode::Black, create_path)
    }

    fn replace_role_entry(
        &mut self,
        role: &str,
        path: &str,
        mode: PermissionMode,
        create_path: bool,
    ) -> Result<(), RbacError> {
        if !self.role_exists(role) {
            return Err(RbacError::not_found("role", role));
        }
        self.ensure_path(path, create_path)?;
        self.unassign_permissions_from_role(role, path, mode.opposite())?;
        self.assign_permissions_to_role(role, path, mode, false)
    }

    // --- principals ---

    pub fn user_exists(&self, user_id: &str) -> bool {
        self.users.principal_exists(&user_key(user_id))
    }

    pub fn group_exists(&self, group_id: &str) -> bool {
        self.groups.principal_exists(&group_key(group_id))
    }

    /// Create a user holding the `user` role; existing users are kept
    pub fn create_user(&mut self, user_id: &str) -> Result<(), RbacError> {
        create_principal(&mut self.users, &user_key(user_id))
    }

    /// Create a group holding the `user` role; existing groups are kept
    pub fn create_group(&mut self, group_id: &str) -> Result<(), RbacError> {
        create_principal(&mut self.groups, &group_key(group_id))
    }

    pub fn user_has_role(&self, user_id: &str, role: &str) -> bool {
        self.users.has_role(&user_key(user_id), role)
    }

    pub fn group_has_role(&self, group_id: &str, role: &str) -> bool {
        self.groups.has_role(&group_key(group_id), role)
    }

    pub fn assign_role_to_user(&mut self, user_id: &str, role: &str) -> Result<(), RbacError> {
        self.create_user(user_id)?;
        self.users.assign_role(&user_key(user_id), role)
    }

    pub fn unassign_role_from_user(&mut self, user_id: &str, role: &str) -> Result<bool, RbacError> {
        self.create_user(user_id)?;
        self.users.unassign_role(&user_key(user_id), role)
    }

    pub fn assign_role_to_group(&mut self, group_id: &str, role: &str) -> Result<(), RbacError> {
        self.create_group(group_id)?;
        self.groups.assign_role(&group_key(group_id), role)
    }

    pub fn unassign_role_from_group(&mut self, group_id: &str, role: &str) -> Result<bool, RbacError> {
        self.create_group(group_id)?;
        self.groups.unassign_role(&group_key(group_id), role)
    }

    pub fn assign_permissions_to_user(
        &mut self,
        user_id: &str,
        path: &str,
        mode: PermissionMode,
        create_path: bool,
    ) -> Result<(), RbacError> {
        self.ensure_path(path, create_path)?;
        self.create_user(user_id)?;
        self.users.assign_permission_to_principal(&user_key(user_id), path, mode)
    }

    pub fn unassign_permissions_from_user(
        &mut self,
        user_id: &str,
        path: &str,
        mode: PermissionMode,
    ) -> Result<bool, RbacError> {
        self.create_user(user_id)?;
        self.users.unassign_permission_from_principal(&user_key(user_id), path, mode)
    }

    pub fn assign_permissions_to_group(
        &mut self,
        group_id: &str,
        path: &str,
        mode: PermissionMode,
        create_path: bool,
    ) -> Result<(), RbacError> {
        self.ensure_path(path, create_path)?;
        self.create_group(group_id)?;
        self.groups.assign_permission_to_principal(&group_key(group_id), path, mode)
    }

    pub fn unassign_permissions_from_group(
        &mut self,
        group_id: &str,
        path: &str,
        mode: PermissionMode,
    ) -> Result<bool, RbacError> {
        self.create_group(group_id)?;
        self.groups.unassign_permission_from_principal(&group_key(group_id), path, mode)
    }

    pub fn add_white_list_to_user(&mut self, user_id: &str, path: &str, create_path: bool) -> Result<(), RbacError> {
        self.ensure_path(path, create_path)?;
        self.unassign_permissions_from_user(user_id, path, PermissionMode::Black)?;
        self.assign_permissions_to_user(user_id, path, PermissionMode::White, false)
    }

    pub fn add_black_list_to_user(&mut self, user_id: &str, path: &str, create_path: bool) -> Result<(), RbacError> {
        self.ensure_path(path, create_path)?;
        self.unassign_permissions_from_user(user_id, path, PermissionMode::White)?;
        self.assign_permissions_to_user(user_id, path, PermissionMode::Black, false)
    }

    pub fn add_white_list_to_group(&mut self, group_id: &str, path: &str, create_path: bool) -> Result<(), RbacError> {
        self.ensure_path(path, create_path)?;
        self.unassign_permissions_from_group(group_id, path, PermissionMode::Black)?;
        self.assign_permissions_to_group(group_id, path, PermissionMode::White, false)
    }

    pub fn add_black_list_to_group(&mut self, group_id: &str, path: &str, create_path: bool) -> Result<(), RbacError> {
        self.ensure_path(path, create_path)?;
        self.unassign_permissions_from_group(group_id, path, PermissionMode::White)?;
        self.assign_permissions_to_group(group_id, path, PermissionMode::Black, false)
    }

    // --- decisions ---

    pub fn with_user_permission(&mut self, path: &str, user_id: &str) -> Result<bool, RbacError> {
        self.create_user(user_id)?;
        self.users.check_permission(&user_key(user_id), path, false)
    }

    pub fn with_group_permission(&mut self, path: &str, group_id: &str) -> Result<bool, RbacError> {
        self.create_group(group_id)?;
        self.groups.check_permission(&group_key(group_id), path, false)
    }

    /// Both the sender and its group must be allowed
    ///
    /// With `permission_raise` the group side is checked in the root scope,
    /// so a group's own restrictions do not apply. Private messages always
    /// use the root scope.
    pub fn with_permission(
        &mut self,
        path: &str,
        source: &EventSource,
        permission_raise: bool,
    ) -> Result<bool, RbacError> {
        let group = match (&source.group_id, permission_raise) {
            (Some(group), false) => group.clone(),
            _ => ROOT_GROUP.to_string(),
        };
        Ok(self.with_user_permission(path, &source.user_id)?
            && self.with_group_permission(path, &group)?)
    }
}

fn user_key(id: &str) -> String {
    format!("{}{}", USER_PREFIX, id)
}

fn group_key(id: &str) -> String {
    format!("{}{}", GROUP_PREFIX, id)
}

fn create_principal(manager: &mut RbacManager, key: &str) -> Result<(), RbacError> {
    if manager.principal_exists(key) {
        return Ok(());
    }
    manager.add_principal(key, false)?;
    if manager.role_exists(USER_ROLE) {
        manager.assign_role(key, USER_ROLE)?;
    }
    Ok(())
}

async fn load_document(path: &Path) -> Result<Option<RbacDocument>, StorageError> {
    let doc = RbacDocument::read_from(path).await?;
    if doc.is_none() {
        tracing::warn!("Access document {} not found, starting empty", path.display());
    }
    Ok(doc)
}

/// The single controller shared by the event bus and the loader
#[derive(Debug, Clone)]
pub struct SharedAccessController(Arc<Mutex<AccessController>>);

impl SharedAccessController {
    pub fn new(controller: AccessController) -> Self {
        Self(Arc::new(Mutex::new(controller)))
    }

    /// Lock the controller; a poisoned lock is recovered
    ///
    /// Never hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, AccessController> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write both documents to the data directory, if configured
    pub async fn save(&self) -> Result<(), StorageError> {
        let (dir, users, groups) = {
            let controller = self.lock();
            let dir = match &controller.settings().data_dir {
                Some(dir) => dir.clone(),
                None => return Ok(()),
            };
            let (users, groups) = controller.documents();
            (dir, users, groups)
        };
        users.write_to(dir.join(USERS_DOCUMENT)).await?;
        groups.write_to(dir.join(GROUPS_DOCUMENT)).await?;
        tracing::info!("Saved access documents to {}", dir.display());
        Ok(())
    }
}
