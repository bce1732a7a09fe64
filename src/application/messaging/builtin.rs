//! Built-in funcs - Admin commands every runtime carries
//!
//! - `sm <user>`: toggle a user's admin role (root only)
//! - `plg [name]`: list loaded plugins
//! - `acs [-g] <ban|grant> <id> <path>`: edit user or group lists
//! - `cfg <key> <value>`: change a plugin conf

use std::sync::{Arc, Weak};

use serde_json::{Map, Value};

use super::bus::{EventBus, CONF_PATH_PREFIX, FRAMEWORK_NAME};
use crate::application::errors::{BotError, PluginError};
use crate::application::rbac::{ADMIN_ROLE, ROOT_ROLE};
use crate::domain::entities::{Func, FuncCall};

/// Created at startup so the `whisker.cfg` subtree exists before any conf
pub const CONF_PLACEHOLDER_PATH: &str = "whisker.cfg.main.placeholder";

/// Pattern matching `<prefix><name>` followed by whitespace or the end
pub fn command_pattern(prefix: &str, name: &str) -> String {
    format!(r"^{}{}(\s|$)", regex_lite::escape(prefix), regex_lite::escape(name))
}

pub(crate) fn builtin_funcs(bus: &Arc<EventBus>) -> Result<Vec<Func>, PluginError> {
    bus.access()
        .lock()
        .create_permission_path(CONF_PLACEHOLDER_PATH, true)?;

    let prefix = bus.parser().prefix().to_string();
    let reply = bus.settings().reply_on_denial;
    let weak = Arc::downgrade(bus);

    let sm = {
        let weak = weak.clone();
        Func::builder(FRAMEWORK_NAME, "sm")
            .regex(command_pattern(&prefix, "sm"))
            .permission(ROOT_ROLE)
            .permission_raise(true)
            .reply_on_denial(reply)
            .description("Grant or revoke the admin role of a user")
            .usage(format!("{}sm <user_id>", prefix))
            .handler(move |call| toggle_admin(weak.clone(), call))
            .build()?
    };

    let plg = {
        let weak = weak.clone();
        Func::builder(FRAMEWORK_NAME, "plg")
            .regex(command_pattern(&prefix, "plg"))
            .permission(ADMIN_ROLE)
            .permission_raise(true)
            .reply_on_denial(reply)
            .description("Show loaded plugins")
            .usage(format!("{}plg [name]", prefix))
            .handler(move |call| show_plugins(weak.clone(), call))
            .build()?
    };

    let acs = {
        let weak = weak.clone();
        Func::builder(FRAMEWORK_NAME, "acs")
            .regex(command_pattern(&prefix, "acs"))
            .permission(ADMIN_ROLE)
            .permission_raise(true)
            .reply_on_denial(reply)
            .description("Ban or grant a permission path for a user or group")
            .usage(format!("{}acs [-g] <ban|grant> <id> <path>", prefix))
            .handler(move |call| edit_access(weak.clone(), call))
            .build()?
    };

    let cfg = Func::builder(FRAMEWORK_NAME, "cfg")
        .regex(command_pattern(&prefix, "cfg"))
        .permission(ADMIN_ROLE)
        .permission_raise(true)
        .reply_on_denial(reply)
        .grant(format!("{}.**", CONF_PATH_PREFIX))
        .description("Change a plugin setting")
        .usage(format!("{}cfg <key> <value>", prefix))
        .handler(move |call| set_conf(weak.clone(), call))
        .build()?;

    Ok(vec![sm, plg, acs, cfg])
}

fn upgrade(bus: &Weak<EventBus>) -> Result<Arc<EventBus>, BotError> {
    bus.upgrade()
        .ok_or_else(|| BotError::Internal("event bus is gone".to_string()))
}

async fn toggle_admin(bus: Weak<EventBus>, call: FuncCall) -> Result<(), BotError> {
    let bus = upgrade(&bus)?;
    let args = call.args();
    if args.len() != 1 {
        return call
            .reply(format!("Usage: {}sm <user_id>", bus.parser().prefix()))
            .await;
    }

    let user = args[0];
    let text = {
        let mut access = bus.access().lock();
        if access.user_has_role(user, ADMIN_ROLE) {
            access.unassign_role_from_user(user, ADMIN_ROLE)?;
            format!("User {} is no longer an admin", user)
        } else {
            access.assign_role_to_user(user, ADMIN_ROLE)?;
            format!("User {} is now an admin", user)
        }
    };
    tracing::info!("{}", text);
    call.reply(text).await
}

async fn show_plugins(bus: Weak<EventBus>, call: FuncCall) -> Result<(), BotError> {
    let bus = upgrade(&bus)?;
    let plugins = bus.plugins();
    let args = call.args();

    let text = match args.first() {
        Some(name) => match plugins.iter().find(|(n, _)| n == name) {
            Some((n, v)) => format!("{}-{}", n, v),
            None => format!("Plugin {} is not loaded", name),
        },
        None if plugins.is_empty() => "No plugins loaded".to_string(),
        None => plugins
            .iter()
            .map(|(n, v)| format!("{}-{}", n, v))
            .collect::<Vec<_>>()
            .join("\n"),
    };
    call.reply(text).await
}

/// Paths `acs` may touch: nothing rooted at a wildcard, and inside the
/// framework namespace only the conf and plugin subtrees
fn editable_path(path: &str) -> bool {
    if path.starts_with('*') {
        return false;
    }
    let mut segments = path.split('.');
    match segments.next() {
        Some(first) if first.eq_ignore_ascii_case(FRAMEWORK_NAME) => matches!(
            segments.next().map(|s| s.to_ascii_lowercase()).as_deref(),
            Some("cfg") | Some("plg")
        ),
        _ => true,
    }
}

async fn edit_access(bus: Weak<EventBus>, call: FuncCall) -> Result<(), BotError> {
    let bus = upgrade(&bus)?;
    let usage = format!("Usage: {}acs [-g] <ban|grant> <id> <path>", bus.parser().prefix());

    let command = match bus.parser().parse(&call.message.raw_message) {
        Some(command) => command,
        None => return call.reply(usage).await,
    };
    let positional = command.positional();
    let is_group = command.has_flag("-g");
    if positional.len() != 3 || command.args.len() > 4 {
        return call.reply(usage).await;
    }

    let (option, target, path) = (positional[0], positional[1], positional[2]);
    let ban = match option {
        "ban" => true,
        "grant" => false,
        _ => return call.reply(usage).await,
    };
    if !editable_path(path) {
        return call
            .reply(format!("Path {} cannot be changed with acs", path))
            .await;
    }

    let kind = if is_group { "Group" } else { "User" };
    let text = {
        let mut access = bus.access().lock();
        let protected = if is_group {
            access.group_has_role(target, ADMIN_ROLE)
        } else {
            access.user_has_role(target, ADMIN_ROLE)
        };
        if !access.permission_path_exists(path) {
            format!("Permission path {} does not exist", path)
        } else if protected {
            format!("{} {} is an admin and cannot be changed", kind, target)
        } else {
            match (is_group, ban) {
                (true, true) => access.add_black_list_to_group(target, path, false)?,
                (true, false) => access.add_white_list_to_group(target, path, false)?,
                (false, true) => access.add_black_list_to_user(target, path, false)?,
                (false, false) => access.add_white_list_to_user(target, path, false)?,
            }
            let verb = if ban { "banned from" } else { "granted" };
            format!("{} {} {} {}", kind, target, verb, path)
        }
    };
    call.reply(text).await
}

async fn set_conf(bus: Weak<EventBus>, call: FuncCall) -> Result<(), BotError> {
    let bus = upgrade(&bus)?;
    let args = call.args();
    if args.len() != 2 {
        return call
            .reply(format!("Usage: {}cfg <key> <value>", bus.parser().prefix()))
            .await;
    }

    let full_key = match bus.resolve_conf_key(args[0]) {
        Ok(key) => key,
        Err(text) => return call.reply(text).await,
    };
    let path = format!("{}.{}", CONF_PATH_PREFIX, full_key);
    if !bus.check(&path, &call.source(), true) {
        return call
            .reply(format!("You may not change {}", full_key))
            .await;
    }

    let registered = match bus.conf(&full_key) {
        Some(registered) => registered,
        None => return call.reply(format!("Conf {} does not exist", full_key)).await,
    };
    let value = match registered.conf.parse_value(args[1]) {
        Ok(value) => value,
        Err(e) => return call.reply(format!("Cannot set {}: {}", full_key, e)).await,
    };

    {
        let mut data = registered.data.lock().await;
        let config = data
            .entry("config")
            .or_insert_with(|| Value::Object(Map::new()));
        if !config.is_object() {
            *config = Value::Object(Map::new());
        }
        if let Some(config) = config.as_object_mut() {
            config.insert(registered.conf.key.clone(), value.clone());
        }
    }
    tracing::info!("Conf {} set to {}", full_key, value);

    if let Some(hook) = &registered.conf.on_change {
        if let Err(e) = hook(value.clone(), call.clone()).await {
            tracing::warn!("Change hook of {} failed: {}", full_key, e);
        }
    }
    call.reply(format!("Conf {} set to {}", full_key, value)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_pattern() {
        let re = regex_lite::Regex::new(&command_pattern("/", "sm")).unwrap();
        assert!(re.is_match("/sm 42"));
        assert!(re.is_match("/sm"));
        assert!(!re.is_match("/smile"));

        let re = regex_lite::Regex::new(&command_pattern("$.", "cfg")).unwrap();
        assert!(re.is_match("$.cfg a 1"));
        assert!(!re.is_match("x.cfg a 1"));
    }

    #[test]
    fn test_editable_path() {
        assert!(editable_path("shop.buy"));
        assert!(editable_path("whisker.cfg.shop.limit"));
        assert!(editable_path("whisker.plg"));
        assert!(!editable_path("whisker.sm"));
        assert!(!editable_path("*.buy"));
        assert!(!editable_path("**"));
    }
}
