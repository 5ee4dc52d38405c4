//! Event delivery through a [`SyncContext`].

mod common;

use serde_json::json;
use std::sync::Arc;

use attrsync_common::Error;
use attrsync_sync::executor::services;
use attrsync_sync::SyncConfig;

use common::{context, OfflineExecutor, ScriptedExecutor};

#[tokio::test]
async fn flush_delivers_tracked_events() {
    let executor = ScriptedExecutor::new();
    let (ctx, _store) = context(SyncConfig::default(), executor.clone());

    let id = ctx.track("purchase", json!({ "amount": 12 }));
    ctx.track("_install", json!({}));
    ctx.flush().await.unwrap();

    let bodies = executor.bodies(services::EVENTS_TRACK);
    assert_eq!(bodies.len(), 1);
    let events = bodies[0]["payload"]["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["name"], json!("_install"));
    assert_eq!(events[1]["id"], json!(id.to_string()));
    assert_eq!(events[1]["params"], json!({ "amount": 12 }));
    assert!(events[1]["date"].is_string());
    assert!(ctx.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn offline_events_stay_buffered() {
    let (ctx, _store) = context(SyncConfig::default(), Arc::new(OfflineExecutor));

    ctx.track("purchase", json!({}));
    let result = ctx.flush().await;

    assert!(matches!(result, Err(Error::Network(_))));
    assert_eq!(ctx.events().len(), 1);
}

#[tokio::test]
async fn rejected_key_stops_retrying() {
    let executor = ScriptedExecutor::new();
    executor.script(
        services::EVENTS_TRACK,
        Err(Error::Http {
            status: 403,
            message: "forbidden".to_string(),
        }),
    );
    let (ctx, _store) = context(SyncConfig::default(), executor.clone());

    ctx.track("purchase", json!({}));
    let result = ctx.flush().await;

    assert!(matches!(result, Err(ref e) if e.is_auth_error()));
    assert_eq!(executor.bodies(services::EVENTS_TRACK).len(), 1);
    assert_eq!(ctx.events().len(), 1);

    ctx.flush().await.unwrap();
    assert!(ctx.events().is_empty());
}
