//! Event bus and built-in func integration tests
//! Run with: cargo test --test bus_test

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use whisker::application::messaging::{handler_fn, BusSettings, EventHandler};
use whisker::application::rbac::{AccessSettings, ADMIN_ROLE};
use whisker::domain::entities::{Conf, Event, EventData, Func, HandlerOutcome, Message, ReplyTarget};
use whisker::domain::traits::SharedData;
use whisker::BotError;

use common::{harness, harness_with, Harness};

fn tag(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Arc<dyn EventHandler> {
    let log = Arc::clone(log);
    handler_fn(move |_event| {
        let log = Arc::clone(&log);
        Box::pin(async move {
            log.lock().unwrap().push(name.to_string());
            Ok(())
        })
    })
}

async fn say(h: &Harness, user: &str, text: &str) -> Vec<HandlerOutcome> {
    h.bus
        .publish_sync(Event::from_message(Message::private(user, text)))
        .await
}

fn func(plugin: &str, name: &str, prefix: Option<&str>, log: &Arc<Mutex<Vec<String>>>) -> Func {
    let log = Arc::clone(log);
    let entry = format!("{}.{}", plugin, name);
    let mut builder = Func::builder(plugin, name).handler(move |_call| {
        let log = Arc::clone(&log);
        let entry = entry.clone();
        async move {
            log.lock().unwrap().push(entry);
            Ok::<(), BotError>(())
        }
    });
    if let Some(prefix) = prefix {
        builder = builder.prefix(prefix);
    }
    builder.build().unwrap()
}

#[tokio::test]
async fn test_dispatch_order() {
    let h = harness();
    let log = Arc::new(Mutex::new(Vec::new()));
    h.bus.subscribe("re:shop\\..*", tag(&log, "pattern"), 100, "a").unwrap();
    h.bus.subscribe("shop.buy", tag(&log, "low"), 1, "a").unwrap();
    h.bus.subscribe("shop.buy", tag(&log, "high-b"), 5, "b").unwrap();
    h.bus.subscribe("shop.buy", tag(&log, "high-a"), 5, "a").unwrap();
    h.bus.subscribe("shop.sell", tag(&log, "other"), 50, "a").unwrap();

    h.bus.publish_sync(Event::new("shop.buy", EventData::Empty)).await;
    assert_eq!(
        *log.lock().unwrap(),
        vec!["high-a", "high-b", "low", "pattern"]
    );
}

#[tokio::test]
async fn test_failing_handler_does_not_stop_dispatch() {
    let h = harness();
    let log = Arc::new(Mutex::new(Vec::new()));
    let failing = handler_fn(|_event| {
        Box::pin(async { Err::<(), BotError>(BotError::Internal("broken".to_string())) })
    });
    h.bus.subscribe("job", failing, 10, "bad").unwrap();
    h.bus.subscribe("job", tag(&log, "good"), 1, "good").unwrap();

    let results = h.bus.publish_sync(Event::new("job", EventData::Empty)).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].is_error());
    assert_eq!(*log.lock().unwrap(), vec!["good"]);
}

#[tokio::test]
async fn test_async_events_keep_order_per_type() {
    let h = harness();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = handler_fn(move |event| {
        let sink = Arc::clone(&sink);
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let n = event.data.json().and_then(|v| v.as_i64()).unwrap_or(-1);
            sink.lock().unwrap().push(n);
            Ok(())
        })
    });
    h.bus.subscribe("tick", handler, 0, "clock").unwrap();

    let first = h.bus.publish_async(Event::new("tick", EventData::Json(json!(0))));
    assert!(first.is_some());
    for n in 1..4 {
        assert!(h
            .bus
            .publish_async(Event::new("tick", EventData::Json(json!(n))))
            .is_none());
    }
    assert_eq!(h.bus.pending("tick"), 4);

    first.unwrap().await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(h.bus.pending("tick"), 0);

    // The consumer is gone, so the next event starts a new one
    let again = h.bus.publish_async(Event::new("tick", EventData::Json(json!(4))));
    again.unwrap().await.unwrap();
    assert_eq!(seen.lock().unwrap().last(), Some(&4));
}

#[tokio::test]
async fn test_panicking_handler_does_not_stall_its_type() {
    let h = harness();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let panicking = handler_fn(|event| {
        let n = event.data.json().and_then(|v| v.as_i64()).unwrap_or(-1);
        Box::pin(async move {
            if n == 0 {
                panic!("tick {} exploded", n);
            }
            Ok::<(), BotError>(())
        })
    });
    let recorder = handler_fn(move |event| {
        let sink = Arc::clone(&sink);
        Box::pin(async move {
            let n = event.data.json().and_then(|v| v.as_i64()).unwrap_or(-1);
            sink.lock().unwrap().push(n);
            Ok(())
        })
    });
    h.bus.subscribe("tick", panicking, 5, "bad").unwrap();
    h.bus.subscribe("tick", recorder, 1, "clock").unwrap();

    let failures = Arc::new(Mutex::new(Vec::new()));
    let failed = Arc::clone(&failures);
    h.bus.add_error_observer(move |_event, outcome| {
        if let HandlerOutcome::Error { message, .. } = outcome {
            failed.lock().unwrap().push(message.clone());
        }
    });

    let first = h.bus.publish_async(Event::new("tick", EventData::Json(json!(0))));
    assert!(h
        .bus
        .publish_async(Event::new("tick", EventData::Json(json!(1))))
        .is_none());

    first.unwrap().await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    assert_eq!(h.bus.pending("tick"), 0);
    assert_eq!(failures.lock().unwrap().len(), 1);
    assert!(failures.lock().unwrap()[0].contains("tick 0 exploded"));

    let again = h.bus.publish_async(Event::new("tick", EventData::Json(json!(2))));
    again.unwrap().await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_panicking_func_is_recorded() {
    let h = harness();
    let log = Arc::new(Mutex::new(Vec::new()));
    let crash = Func::builder("shop", "crash")
        .prefix("/crash")
        .handler(|call| async move {
            if !call.args().contains(&"safely") {
                panic!("func exploded");
            }
            Ok::<(), BotError>(())
        })
        .build()
        .unwrap();
    h.bus.register_func(crash).unwrap();
    h.bus.register_func(func("bank", "save", Some("/crash"), &log)).unwrap();

    let results = say(&h, "u1", "/crash").await;
    match results.as_slice() {
        [HandlerOutcome::Error { owner, subscription, message }] => {
            assert_eq!(owner, "shop");
            assert!(subscription.is_none());
            assert!(message.contains("func exploded"));
        }
        other => panic!("unexpected results {:?}", other),
    }
    assert_eq!(*log.lock().unwrap(), vec!["bank.save"]);
}

#[tokio::test]
async fn test_blocking_handler_gets_a_copy() {
    let h = harness();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    h.bus
        .subscribe_blocking(
            "report",
            move |event: Event| {
                tx.send(event.event_type.clone())
                    .map_err(|e| BotError::Internal(e.to_string()))
            },
            0,
            "reports",
        )
        .unwrap();

    let results = h.bus.publish_sync(Event::new("report", EventData::Empty)).await;
    assert!(results.is_empty());
    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert_eq!(received.as_deref(), Some("report"));
}

#[tokio::test]
async fn test_default_func_runs_only_when_nothing_else_did() {
    let h = harness();
    let log = Arc::new(Mutex::new(Vec::new()));
    h.bus.register_func(func("shop", "default", None, &log)).unwrap();
    h.bus.register_func(func("shop", "buy", Some("/buy"), &log)).unwrap();
    h.bus.register_func(func("game", "play", Some("/play"), &log)).unwrap();

    say(&h, "u1", "/buy apple").await;
    say(&h, "u1", "hello").await;
    say(&h, "u1", "/play").await;
    assert_eq!(
        *log.lock().unwrap(),
        vec!["shop.buy", "shop.default", "game.play", "shop.default"]
    );

    // A built-in func that ran suppresses every default func
    log.lock().unwrap().clear();
    h.bus.access().lock().assign_role_to_user("boss", ADMIN_ROLE).unwrap();
    say(&h, "boss", "/plg").await;
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(h.replier.texts(), vec!["No plugins loaded"]);
}

#[tokio::test]
async fn test_func_failure_is_recorded() {
    let h = harness();
    let log = Arc::new(Mutex::new(Vec::new()));
    let failing = Func::builder("shop", "buy")
        .prefix("/buy")
        .handler(|_call| async { Err::<(), BotError>(BotError::InvalidArgs("no money".to_string())) })
        .build()
        .unwrap();
    h.bus.register_func(failing).unwrap();
    h.bus.register_func(func("bank", "save", Some("/buy"), &log)).unwrap();

    let results = say(&h, "u1", "/buy").await;
    match results.as_slice() {
        [HandlerOutcome::Error { owner, subscription, .. }] => {
            assert_eq!(owner, "shop");
            assert!(subscription.is_none());
        }
        other => panic!("unexpected results {:?}", other),
    }
    assert_eq!(*log.lock().unwrap(), vec!["bank.save"]);
}

#[tokio::test]
async fn test_denied_func_replies_when_asked() {
    let h = harness();
    let log = Arc::new(Mutex::new(Vec::new()));
    h.bus.access().lock().create_role("vip", false).unwrap();
    let lounge = Func::builder("club", "lounge")
        .prefix("/lounge")
        .permission("vip")
        .reply_on_denial(true)
        .handler(|call| async move { call.reply("welcome").await })
        .build()
        .unwrap();
    h.bus.register_func(lounge).unwrap();
    h.bus.register_func(func("club", "default", None, &log)).unwrap();

    say(&h, "u1", "/lounge").await;
    assert_eq!(h.replier.texts(), vec!["Permission denied"]);
    // Denied funcs do not count as activated
    assert_eq!(*log.lock().unwrap(), vec!["club.default"]);

    h.bus.access().lock().assign_role_to_user("u1", "vip").unwrap();
    say(&h, "u1", "/lounge").await;
    assert_eq!(h.replier.texts(), vec!["Permission denied", "welcome"]);
}

#[tokio::test]
async fn test_sm_toggles_admin() {
    let h = harness_with(
        AccessSettings {
            root: Some("root".to_string()),
            ..AccessSettings::default()
        },
        BusSettings {
            reply_on_denial: true,
            ..BusSettings::default()
        },
    );

    say(&h, "root", "/sm 42").await;
    assert!(h.bus.access().lock().user_has_role("42", ADMIN_ROLE));

    // Admins may not appoint admins
    say(&h, "42", "/sm 43").await;
    assert!(!h.bus.access().lock().user_has_role("43", ADMIN_ROLE));

    say(&h, "root", "/sm 42").await;
    assert!(!h.bus.access().lock().user_has_role("42", ADMIN_ROLE));

    assert_eq!(
        h.replier.sent(),
        vec![
            (ReplyTarget::User("root".to_string()), "User 42 is now an admin".to_string()),
            (ReplyTarget::User("42".to_string()), "Permission denied".to_string()),
            (ReplyTarget::User("root".to_string()), "User 42 is no longer an admin".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_acs_edits_lists() {
    let h = harness();
    {
        let mut access = h.bus.access().lock();
        access.create_permission_path("shop.buy", false).unwrap();
        access.add_white_list_to_role("user", "shop.buy", false).unwrap();
        access.assign_role_to_user("boss", ADMIN_ROLE).unwrap();
    }

    say(&h, "boss", "/acs ban u1 shop.buy").await;
    say(&h, "boss", "/acs -g grant -100 shop.buy").await;
    say(&h, "boss", "/acs ban boss shop.buy").await;
    say(&h, "boss", "/acs ban u1 shop.sell").await;
    say(&h, "boss", "/acs ban u1 whisker.sm").await;
    say(&h, "u1", "/acs grant u1 shop.buy").await;

    assert_eq!(
        h.replier.texts(),
        vec![
            "User u1 banned from shop.buy",
            "Group -100 granted shop.buy",
            "User boss is an admin and cannot be changed",
            "Permission path shop.sell does not exist",
            "Path whisker.sm cannot be changed with acs",
        ]
    );

    let mut access = h.bus.access().lock();
    assert!(!access.with_user_permission("shop.buy", "u1").unwrap());
    assert!(access.with_user_permission("shop.buy", "u2").unwrap());
}

#[tokio::test]
async fn test_cfg_changes_conf() {
    let h = harness();
    h.bus.access().lock().assign_role_to_user("boss", ADMIN_ROLE).unwrap();

    let data: SharedData = Arc::new(tokio::sync::Mutex::new(serde_json::Map::new()));
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    let conf = Conf::new("shop", "limit", 3).on_change(move |value, _call| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(value);
            Ok::<(), BotError>(())
        }
    });
    h.bus.register_conf(conf, Arc::clone(&data)).await.unwrap();
    assert_eq!(data.lock().await["config"]["limit"], json!(3));

    say(&h, "boss", "/cfg limit 5").await;
    say(&h, "boss", "/cfg shop.limit many").await;
    say(&h, "boss", "/cfg ghost 1").await;
    say(&h, "u1", "/cfg limit 9").await;

    assert_eq!(data.lock().await["config"]["limit"], json!(5));
    assert_eq!(*changes.lock().unwrap(), vec![json!(5)]);
    let texts = h.replier.texts();
    assert_eq!(texts.len(), 3);
    assert_eq!(texts[0], "Conf shop.limit set to 5");
    assert!(texts[1].starts_with("Cannot set shop.limit"));
    assert_eq!(texts[2], "Conf ghost does not exist");
}
