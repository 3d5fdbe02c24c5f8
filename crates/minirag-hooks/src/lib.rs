//! Webhook dispatcher: HMAC-signed, fire-and-forget HTTP notifications.
//! Delivery outcomes are logged and never propagated; a failing receiver
//! cannot fail the operation that triggered the event.

pub mod dispatcher;

pub use dispatcher::{sign_body, WebhookDispatcher, EVENT_CHAT_MESSAGE, EVENT_PING,
    EVENT_SOURCE_FAILED, EVENT_SOURCE_INGESTED};
