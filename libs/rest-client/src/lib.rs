//! Backend for the managed Pub/Sub service over its v1 REST API. Also talks
//! to the local emulator when `emulator_host` is configured.

mod client;
mod delivery;
mod wire;

use std::sync::Arc;

use reqwest::Method;

use pubsub_api::{
    Admin, BackendError, BoxFuture, Delivery, OutgoingMessage, Publisher, ReceiveSettings, Subscriber,
    SubscriptionInfo, short_name,
};

pub use client::{DEFAULT_ENDPOINT, DEFAULT_TIMEOUT, RestConfig};
pub use delivery::RestDelivery;

use client::RestClient;
use wire::{ListSubscriptionsResponse, ListTopicsResponse, PublishRequest, PublishResponse, Subscription};

/// Empty JSON object, used as request body and to discard responses.
#[derive(serde::Serialize, serde::Deserialize)]
struct Empty {}

#[derive(Clone)]
pub struct RestBackend {
    client: Arc<RestClient>,
}

impl RestBackend {
    /// Validate `config` and build the HTTP client. No request is sent.
    pub fn new(config: &RestConfig) -> Result<Self, BackendError> {
        Ok(Self { client: Arc::new(RestClient::new(config)?) })
    }

    async fn exists(&self, path: &str) -> Result<bool, BackendError> {
        match self.client.call::<Empty, serde_json::Value>(Method::GET, path, None).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), BackendError> {
        self.client.call::<Empty, Empty>(Method::DELETE, path, None).await?;
        Ok(())
    }

    async fn topics(&self) -> Result<Vec<String>, BackendError> {
        let mut names = Vec::new();
        let mut token = String::new();
        loop {
            let path = page(&format!("{}/topics", self.client.project_path()), &token);
            let resp: ListTopicsResponse = self.client.call::<Empty, _>(Method::GET, &path, None).await?;
            names.extend(resp.topics.into_iter().map(|t| short_name(&t.name).to_string()));
            if resp.next_page_token.is_empty() {
                return Ok(names);
            }
            token = resp.next_page_token;
        }
    }

    async fn subscriptions(&self) -> Result<Vec<SubscriptionInfo>, BackendError> {
        let mut infos = Vec::new();
        let mut token = String::new();
        loop {
            let path = page(&format!("{}/subscriptions", self.client.project_path()), &token);
            let resp: ListSubscriptionsResponse = self.client.call::<Empty, _>(Method::GET, &path, None).await?;
            infos.extend(resp.subscriptions.into_iter().map(SubscriptionInfo::from));
            if resp.next_page_token.is_empty() {
                return Ok(infos);
            }
            token = resp.next_page_token;
        }
    }
}

fn page(base: &str, token: &str) -> String {
    if token.is_empty() {
        base.to_string()
    } else {
        format!("{base}?pageToken={token}")
    }
}

// ═══════════════════════════════════════════════════════════════
//  Backend contract
// ═══════════════════════════════════════════════════════════════

impl Publisher for RestBackend {
    fn publish(&self, topic: &str, message: OutgoingMessage) -> BoxFuture<'_, Result<String, BackendError>> {
        let path = format!("{}:publish", self.client.topic_path(topic));
        Box::pin(async move {
            let body = PublishRequest { messages: vec![message.into()] };
            let resp: PublishResponse = self.client.call(Method::POST, &path, Some(&body)).await?;
            resp.message_ids
                .into_iter()
                .next()
                .ok_or_else(|| BackendError::format_err("publish response carried no message id"))
        })
    }
}

impl Admin for RestBackend {
    fn topic_exists(&self, topic: &str) -> BoxFuture<'_, Result<bool, BackendError>> {
        let path = self.client.topic_path(topic);
        Box::pin(async move { self.exists(&path).await })
    }

    fn create_topic(&self, topic: &str) -> BoxFuture<'_, Result<(), BackendError>> {
        let path = self.client.topic_path(topic);
        Box::pin(async move {
            self.client.call::<_, Empty>(Method::PUT, &path, Some(&Empty {})).await?;
            tracing::debug!(topic = %path, "created topic");
            Ok(())
        })
    }

    fn delete_topic(&self, topic: &str) -> BoxFuture<'_, Result<(), BackendError>> {
        let path = self.client.topic_path(topic);
        Box::pin(async move { self.delete(&path).await })
    }

    fn list_topics(&self) -> BoxFuture<'_, Result<Vec<String>, BackendError>> {
        Box::pin(self.topics())
    }

    fn subscription_exists(&self, subscription: &str) -> BoxFuture<'_, Result<bool, BackendError>> {
        let path = self.client.subscription_path(subscription);
        Box::pin(async move { self.exists(&path).await })
    }

    fn create_subscription(&self, subscription: &str, topic: &str) -> BoxFuture<'_, Result<(), BackendError>> {
        let path = self.client.subscription_path(subscription);
        let body = Subscription { topic: self.client.topic_path(topic), ..Default::default() };
        Box::pin(async move {
            self.client.call::<_, Empty>(Method::PUT, &path, Some(&body)).await?;
            tracing::debug!(subscription = %path, topic = %body.topic, "created subscription");
            Ok(())
        })
    }

    fn delete_subscription(&self, subscription: &str) -> BoxFuture<'_, Result<(), BackendError>> {
        let path = self.client.subscription_path(subscription);
        Box::pin(async move { self.delete(&path).await })
    }

    fn list_subscriptions(&self) -> BoxFuture<'_, Result<Vec<SubscriptionInfo>, BackendError>> {
        Box::pin(self.subscriptions())
    }

    fn subscription_info(&self, subscription: &str) -> BoxFuture<'_, Result<SubscriptionInfo, BackendError>> {
        let path = self.client.subscription_path(subscription);
        Box::pin(async move {
            let sub: Subscription = self.client.call::<Empty, _>(Method::GET, &path, None).await?;
            Ok(sub.into())
        })
    }
}

impl Subscriber for RestBackend {
    fn open_subscription(
        &self,
        subscription: &str,
        settings: ReceiveSettings,
    ) -> BoxFuture<'_, Result<Arc<dyn Delivery>, BackendError>> {
        let path = self.client.subscription_path(subscription);
        Box::pin(async move {
            tracing::debug!(
                subscription = %path,
                max_outstanding = settings.max_outstanding,
                workers = settings.workers,
                "opened subscription"
            );
            Ok(Arc::new(RestDelivery::new(self.client.clone(), path, settings)) as Arc<dyn Delivery>)
        })
    }
}
