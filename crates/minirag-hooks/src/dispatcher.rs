use std::time::Duration;

use minirag_store::types::Webhook;
use minirag_store::MetaStore;
use tracing::{debug, warn};

pub const EVENT_SOURCE_INGESTED: &str = "source.ingested";
pub const EVENT_SOURCE_FAILED: &str = "source.failed";
pub const EVENT_CHAT_MESSAGE: &str = "chat.message";
/// Sent by the webhook test endpoint; signed exactly like real deliveries.
pub const EVENT_PING: &str = "ping";

/// Hex HMAC-SHA256 of the serialized payload, keyed by the webhook secret.
/// Receivers recompute this over the raw body to authenticate the delivery.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    minirag_crypto::hmac_sign(secret.as_bytes(), body)
}

/// Fans platform events out to the tenant's subscribed webhooks.
#[derive(Clone)]
pub struct WebhookDispatcher {
    store: MetaStore,
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookDispatcher {
    pub fn new(store: MetaStore, timeout: Duration) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Deliver `event` to every active, subscribed webhook of the tenant.
    /// Returns immediately; each POST runs on its own task with a bounded
    /// timeout, and all outcomes are logged.
    pub fn dispatch(&self, tenant_id: &str, event: &str, payload: serde_json::Value) {
        let hooks = match self.store.webhooks_for_event(tenant_id, event) {
            Ok(hooks) => hooks,
            Err(e) => {
                warn!(tenant_id, event, "webhook lookup failed: {e}");
                return;
            }
        };

        for hook in hooks {
            self.dispatch_to(hook, event, payload.clone());
        }
    }

    /// Deliver to a single webhook regardless of its subscriptions. Also the
    /// path behind the `test` endpoint's ping.
    pub fn dispatch_to(&self, hook: Webhook, event: &str, payload: serde_json::Value) {
        let client = self.client.clone();
        let timeout = self.timeout;
        let event = event.to_string();

        tokio::spawn(async move {
            let body = match serde_json::to_vec(&payload) {
                Ok(body) => body,
                Err(e) => {
                    warn!(webhook_id = %hook.id, "webhook payload serialization failed: {e}");
                    return;
                }
            };
            let signature = sign_body(&hook.secret, &body);

            let result = client
                .post(&hook.url)
                .timeout(timeout)
                .header("Content-Type", "application/json")
                .header("X-MiniRAG-Event", &event)
                .header("X-MiniRAG-Signature", &signature)
                .body(body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(webhook_id = %hook.id, event = %event, "webhook delivered");
                }
                Ok(resp) => {
                    warn!(
                        webhook_id = %hook.id,
                        event = %event,
                        status = resp.status().as_u16(),
                        "webhook delivery rejected"
                    );
                }
                Err(e) => {
                    warn!(webhook_id = %hook.id, event = %event, "webhook delivery failed: {e}");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_reference_hmac() {
        let body = br#"{"source_id":"s1","chunk_count":3}"#;
        let sig = sign_body("whs_secret", body);
        assert_eq!(sig, minirag_crypto::hmac_sign(b"whs_secret", body));
        assert_eq!(sig.len(), 64);

        // Different secret or body, different signature.
        assert_ne!(sig, sign_body("other", body));
        assert_ne!(sig, sign_body("whs_secret", b"{}"));
    }

    #[tokio::test]
    async fn dispatch_without_subscribers_is_a_noop() {
        let store = MetaStore::open_in_memory().unwrap();
        let tenant = store.create_tenant("Acme", "acme", "free").unwrap();
        let dispatcher = WebhookDispatcher::new(store, Duration::from_secs(10));
        // No webhooks registered: must not panic or block.
        dispatcher.dispatch(&tenant.id, EVENT_SOURCE_INGESTED, serde_json::json!({}));
    }
}
