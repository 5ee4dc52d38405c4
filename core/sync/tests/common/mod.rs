//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use attrsync_common::{Error, Result};
use attrsync_storage::MemoryStore;
use attrsync_sync::executor::services;
use attrsync_sync::{ProbationKind, RequestExecutor, SyncConfig, SyncContext, WebserviceRequest};

/// Executor answering from per-service scripts.
///
/// When a service has no scripted answer left, sends are acknowledged with
/// the version they carried, checks answer `OK` and tracks succeed.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<&'static str, VecDeque<Result<Value>>>>,
    requests: Mutex<Vec<WebserviceRequest>>,
}

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the next answer for `service`.
    pub fn script(&self, service: &'static str, answer: Result<Value>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(service)
            .or_default()
            .push_back(answer);
    }

    pub fn requests(&self) -> Vec<WebserviceRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Bodies of the requests sent to `service`.
    pub fn bodies(&self, service: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r.service == service)
            .map(|r| r.body)
            .collect()
    }

    /// Versions carried by the sends so far.
    pub fn sent_versions(&self) -> Vec<u64> {
        self.bodies(services::ATTRIBUTES_SEND)
            .iter()
            .filter_map(|body| body["payload"]["ver"].as_u64())
            .collect()
    }

    fn default_answer(request: &WebserviceRequest) -> Result<Value> {
        match request.service {
            services::ATTRIBUTES_SEND => {
                let version = request.body["payload"]["ver"].clone();
                Ok(json!({ "trid": format!("tx-{}", version), "ver": version }))
            }
            services::ATTRIBUTES_CHECK => Ok(json!({ "action": "OK" })),
            _ => Ok(Value::Null),
        }
    }
}

#[async_trait]
impl RequestExecutor for ScriptedExecutor {
    async fn post(&self, request: WebserviceRequest) -> Result<Value> {
        self.requests.lock().unwrap().push(request.clone());

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(request.service)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Self::default_answer(&request))
    }
}

/// Executor whose every request fails at the network level.
pub struct OfflineExecutor;

#[async_trait]
impl RequestExecutor for OfflineExecutor {
    async fn post(&self, _request: WebserviceRequest) -> Result<Value> {
        Err(Error::Network("offline".to_string()))
    }
}

/// A started context over a fresh memory store.
pub fn context(config: SyncConfig, executor: Arc<dyn RequestExecutor>) -> (SyncContext, MemoryStore) {
    let store = MemoryStore::new();
    let ctx = SyncContext::new(config, Arc::new(store.clone()), executor);
    ctx.start();
    (ctx, store)
}

/// Leave push probation and let the exit handler run.
pub async fn leave_probation(ctx: &SyncContext) {
    ctx.exit_probation(ProbationKind::Push).await.unwrap();
    ctx.flush().await.ok();
}
