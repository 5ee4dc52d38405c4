//! Attribute and event webservices.
//!
//! These wrap a [`RequestExecutor`] with the payload layout and response
//! validation of each service.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use attrsync_common::{Error, Result};

use crate::attributes::{attributes_to_wire, tags_to_wire, AttributeState, TagState};
use crate::events::{EventSender, QueuedEvent};
use crate::executor::{services, RequestExecutor, WebserviceRequest};
use crate::probation::{ProbationGate, ProbationKind};

/// Acknowledgment of an attribute send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResponse {
    pub transaction_id: String,
    pub version: u64,
}

/// What the server wants after a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckAction {
    /// The server is up to date.
    Ok,
    /// The server has a newer version; bump past it and resend.
    Bump,
    /// The server lost the transaction; resend.
    Resend,
    /// The server is not ready yet; nothing to do until the next trigger.
    Recheck,
}

impl CheckAction {
    fn parse(raw: &str) -> Result<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "OK" => Ok(CheckAction::Ok),
            "BUMP" => Ok(CheckAction::Bump),
            "RESEND" => Ok(CheckAction::Resend),
            "RECHECK" => Ok(CheckAction::Recheck),
            _ => Err(Error::Protocol(format!("Unknown check action '{}'", raw))),
        }
    }
}

/// Result of an attribute check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResponse {
    pub action: CheckAction,
    /// Server-side version, sent along with `BUMP`.
    pub version: Option<u64>,
    pub project_key: Option<String>,
}

/// Client of the `attributes/send` and `attributes/check` services.
pub struct AttributesWebservice {
    executor: Arc<dyn RequestExecutor>,
    probation: Arc<ProbationGate>,
}

impl AttributesWebservice {
    pub fn new(executor: Arc<dyn RequestExecutor>, probation: Arc<ProbationGate>) -> Self {
        Self {
            executor,
            probation,
        }
    }

    /// Send the full snapshot for `version`.
    pub async fn send(
        &self,
        attributes: &AttributeState,
        tags: &TagState,
        version: u64,
    ) -> Result<SendResponse> {
        let body = json!({
            "payload": {
                "attrs": attributes_to_wire(attributes),
                "tags": tags_to_wire(tags),
                "ver": version,
            }
        });
        let response = self.post(services::ATTRIBUTES_SEND, body).await?;

        let transaction_id = response
            .get("trid")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("Send response has no 'trid'".to_string()))?;
        let version = response
            .get("ver")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Protocol("Send response has no 'ver'".to_string()))?;

        Ok(SendResponse {
            transaction_id: transaction_id.to_string(),
            version,
        })
    }

    /// Ask the server whether `transaction_id` for `version` was applied.
    pub async fn check(&self, transaction_id: &str, version: u64) -> Result<CheckResponse> {
        let body = json!({
            "payload": {
                "trid": transaction_id,
                "ver": version,
            }
        });
        let response = self.post(services::ATTRIBUTES_CHECK, body).await?;

        let action = response
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("Check response has no 'action'".to_string()))
            .and_then(CheckAction::parse)?;

        Ok(CheckResponse {
            action,
            version: response.get("ver").and_then(Value::as_u64),
            project_key: response
                .get("project_key")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }

    async fn post(&self, service: &'static str, body: Value) -> Result<Value> {
        let request = WebserviceRequest {
            service,
            body,
            profile_probation: !self.probation.is_out_of_probation(ProbationKind::Profile).await,
        };
        let response = self.executor.post(request).await?;
        debug!("{} answered {}", service, response);
        Ok(response)
    }
}

/// Client of the `events/track` service.
pub struct TrackWebservice {
    executor: Arc<dyn RequestExecutor>,
    probation: Arc<ProbationGate>,
}

impl TrackWebservice {
    pub fn new(executor: Arc<dyn RequestExecutor>, probation: Arc<ProbationGate>) -> Self {
        Self {
            executor,
            probation,
        }
    }
}

#[async_trait]
impl EventSender for TrackWebservice {
    async fn send_events(&self, events: &[QueuedEvent]) -> Result<()> {
        let body = json!({ "payload": { "events": events } });
        let request = WebserviceRequest {
            service: services::EVENTS_TRACK,
            body,
            profile_probation: !self.probation.is_out_of_probation(ProbationKind::Profile).await,
        };
        self.executor.post(request).await.map(|_| ())
    }
}
