//! Access control integration tests
//! Run with: cargo test --test access_test

mod common;

use whisker::application::rbac::{
    AccessController, AccessSettings, SharedAccessController, ADMIN_ROLE, USER_ROLE,
};
use whisker::domain::entities::{EventSource, PermissionMode};
use whisker::RbacError;

fn controller() -> AccessController {
    common::ensure_init();
    AccessController::new(AccessSettings {
        root: Some("root".to_string()),
        ..AccessSettings::default()
    })
    .unwrap()
}

#[test]
fn test_role_grant_reaches_user() {
    let mut ac = controller();
    ac.create_role("vip", false).unwrap();
    ac.add_white_list_to_role("vip", "shop.buy", true).unwrap();
    ac.create_user("u1").unwrap();
    ac.assign_role_to_user("u1", "vip").unwrap();

    assert!(ac.with_user_permission("shop.buy", "u1").unwrap());
    assert!(!ac.with_user_permission("shop.sell", "u1").unwrap());
    assert!(!ac.with_user_permission("shop.buy", "u2").unwrap());
}

#[test]
fn test_user_black_list_beats_role_pattern() {
    let mut ac = controller();
    for path in ["shop.buy", "shop.sell"] {
        ac.create_permission_path(path, false).unwrap();
    }
    ac.add_white_list_to_role(USER_ROLE, "shop.*", false).unwrap();
    ac.add_black_list_to_user("u1", "shop.sell", false).unwrap();

    assert!(ac.with_user_permission("shop.buy", "u1").unwrap());
    assert!(!ac.with_user_permission("shop.sell", "u1").unwrap());
    assert!(ac.with_user_permission("shop.sell", "u2").unwrap());

    // Granting again swaps the entry back to the white list
    ac.add_white_list_to_user("u1", "shop.sell", false).unwrap();
    assert!(ac.with_user_permission("shop.sell", "u1").unwrap());
}

#[test]
fn test_sender_and_group_must_both_pass() {
    let mut ac = controller();
    ac.add_white_list_to_role(USER_ROLE, "game.play", true).unwrap();
    ac.add_black_list_to_group("quiet", "game.play", false).unwrap();

    assert!(ac
        .with_permission("game.play", &EventSource::group("u1", "loud"), false)
        .unwrap());
    assert!(!ac
        .with_permission("game.play", &EventSource::group("u1", "quiet"), false)
        .unwrap());
    assert!(ac
        .with_permission("game.play", &EventSource::group("u1", "quiet"), true)
        .unwrap());
    assert!(ac
        .with_permission("game.play", &EventSource::private("u1"), false)
        .unwrap());
}

#[test]
fn test_failed_inheritance_leaves_roles_unchanged() {
    let mut ac = controller();
    ac.set_role_inheritance("gold", "silver", true).unwrap();
    ac.set_role_inheritance("silver", "bronze", true).unwrap();
    let users = ac.users().inheritance().clone();
    let groups = ac.groups().inheritance().clone();

    let err = ac.set_role_inheritance("bronze", "gold", false).unwrap_err();
    assert!(matches!(err, RbacError::CircularInheritance { .. }));
    assert_eq!(ac.users().inheritance(), &users);
    assert_eq!(ac.groups().inheritance(), &groups);

    assert!(matches!(
        ac.set_role_inheritance("gold", "platinum", false),
        Err(RbacError::NotFound { .. })
    ));
    assert!(!ac.role_exists("platinum"));
}

#[test]
fn test_deleted_path_no_longer_grants() {
    let mut ac = controller();
    ac.add_white_list_to_user("u1", "shop.buy", true).unwrap();
    assert!(ac.with_user_permission("shop.buy", "u1").unwrap());

    assert!(ac.delete_permission_path("shop.buy").unwrap());
    assert!(!ac.permission_path_exists("shop.buy"));
    assert!(!ac.with_user_permission("shop.buy", "u1").unwrap());

    // The stale entry was pruned, so recreating the path grants nothing
    ac.create_permission_path("shop.buy", false).unwrap();
    assert!(!ac.with_user_permission("shop.buy", "u1").unwrap());
}

#[test]
fn test_granting_a_child_path_keeps_the_parent() {
    let mut ac = controller();
    ac.create_role("vip", false).unwrap();
    ac.add_white_list_to_role("vip", "shop.buy", true).unwrap();
    ac.assign_role_to_user("u1", "vip").unwrap();
    assert!(ac.with_user_permission("shop.buy", "u1").unwrap());

    ac.assign_permissions_to_role("vip", "shop.buy.bulk", PermissionMode::White, true)
        .unwrap();

    assert!(ac.permission_path_exists("shop.buy"));
    assert!(ac.with_user_permission("shop.buy", "u1").unwrap());
    assert!(ac.with_user_permission("shop.buy.bulk", "u1").unwrap());
    assert_eq!(ac.users().roles()["vip"].white, vec!["shop.buy", "shop.buy.bulk"]);
    assert_eq!(ac.groups().roles()["vip"].white, vec!["shop.buy", "shop.buy.bulk"]);
}

#[test]
fn test_root_and_admin_roles() {
    let mut ac = controller();
    ac.create_permission_path("anything.at.all", false).unwrap();
    assert!(ac.with_user_permission("anything.at.all", "root").unwrap());

    ac.assign_role_to_user("boss", ADMIN_ROLE).unwrap();
    assert!(ac.user_has_role("boss", ADMIN_ROLE));
    assert!(!ac.with_user_permission("anything.at.all", "boss").unwrap());
    assert!(ac.unassign_role_from_user("boss", ADMIN_ROLE).unwrap());
    assert!(!ac.user_has_role("boss", ADMIN_ROLE));
}

#[tokio::test]
async fn test_documents_survive_restart() {
    common::ensure_init();
    let dir = tempfile::tempdir().unwrap();
    let settings = AccessSettings {
        root: Some("root".to_string()),
        case_sensitive: false,
        data_dir: Some(dir.path().to_path_buf()),
    };

    let shared = SharedAccessController::new(AccessController::open(settings.clone()).await.unwrap());
    {
        let mut ac = shared.lock();
        ac.create_role("vip", false).unwrap();
        ac.add_white_list_to_role("vip", "shop.buy", true).unwrap();
        ac.assign_role_to_user("u1", "vip").unwrap();
        ac.add_black_list_to_group("g1", "shop.buy", false).unwrap();
    }
    shared.save().await.unwrap();

    let mut reopened = AccessController::open(settings.clone()).await.unwrap();
    assert!(reopened.user_has_role("u1", "vip"));
    assert!(reopened
        .with_permission("shop.buy", &EventSource::private("u1"), false)
        .unwrap());
    assert!(!reopened
        .with_permission("shop.buy", &EventSource::group("u1", "g1"), false)
        .unwrap());

    // Documents written case-insensitively are not reused case-sensitively
    let strict = AccessController::open(AccessSettings {
        case_sensitive: true,
        ..settings
    })
    .await
    .unwrap();
    assert!(!strict.role_exists("vip"));
    assert!(strict.user_has_role("root", whisker::application::rbac::ROOT_ROLE));
}
