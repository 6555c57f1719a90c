//! JSON bodies of the Pub/Sub v1 REST API.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pubsub_api::{Attributes, BackendError, InboundMessage, OutgoingMessage, SubscriptionInfo, short_name};

// ═══════════════════════════════════════════════════════════════
//  Resources
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTopicsResponse {
    #[serde(default)]
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub next_page_token: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_deadline_seconds: Option<u64>,
    #[serde(default)]
    pub retain_acked_messages: bool,
}

impl From<Subscription> for SubscriptionInfo {
    fn from(s: Subscription) -> Self {
        SubscriptionInfo {
            name: short_name(&s.name).to_string(),
            topic: short_name(&s.topic).to_string(),
            ack_deadline: Duration::from_secs(s.ack_deadline_seconds.unwrap_or(10)),
            retain_acked_messages: s.retain_acked_messages,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSubscriptionsResponse {
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    #[serde(default)]
    pub next_page_token: String,
}

// ═══════════════════════════════════════════════════════════════
//  Publish
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct PublishRequest {
    pub messages: Vec<PubsubMessageOut>,
}

#[derive(Debug, Serialize)]
pub struct PubsubMessageOut {
    pub data: String,
    #[serde(skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl From<OutgoingMessage> for PubsubMessageOut {
    fn from(m: OutgoingMessage) -> Self {
        Self { data: STANDARD.encode(&m.data), attributes: m.attributes }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    #[serde(default)]
    pub message_ids: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════
//  Pull / ack
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub max_messages: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    #[serde(default)]
    pub received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message: PubsubMessageIn,
    #[serde(default)]
    pub delivery_attempt: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessageIn {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub attributes: Attributes,
    pub message_id: String,
    pub publish_time: DateTime<Utc>,
    #[serde(default)]
    pub ordering_key: String,
}

impl ReceivedMessage {
    /// Split into the ack id and the decoded message.
    pub fn into_parts(self) -> Result<(String, InboundMessage), BackendError> {
        let m = self.message;
        let data = STANDARD.decode(m.data.as_bytes())?;
        let message = InboundMessage {
            id: m.message_id,
            publish_time: m.publish_time,
            data,
            attributes: m.attributes,
            ordering_key: m.ordering_key,
            delivery_attempt: self.delivery_attempt,
        };
        Ok((self.ack_id, message))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest<'a> {
    pub ack_ids: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyAckDeadlineRequest<'a> {
    pub ack_ids: &'a [String],
    pub ack_deadline_seconds: u32,
}

/// `{"error": {"message": ...}}` body returned with non-2xx statuses.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: String,
}
