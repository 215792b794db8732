// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Messages and Envelopes
//!
//! A `Message` is what callers hand to a publisher: it borrows the body, the
//! header map and the request id. An `Envelope` is the owned, fully stamped
//! form of a single publish that travels through the broker seam.

use crate::{
    exchange::{DeadLetterRoute, ExchangeBinding},
    headers::{self, Headers},
};
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A message to publish.
///
/// The body may be empty. The request id correlates log lines and is not
/// used for deduplication.
#[derive(Debug, Clone, Copy)]
pub struct Message<'m> {
    pub(crate) request_id: &'m str,
    pub(crate) body: &'m [u8],
    pub(crate) headers: Option<&'m Headers>,
}

impl<'m> Message<'m> {
    /// Creates a new message without headers.
    ///
    /// # Parameters
    /// * `request_id` - Identifier of the logical operation
    /// * `body` - Opaque payload
    pub fn new(request_id: &'m str, body: &'m [u8]) -> Message<'m> {
        Message {
            request_id,
            body,
            headers: None,
        }
    }

    /// Attaches a header map. The map is never modified by the publisher.
    pub fn headers(mut self, headers: &'m Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn request_id(&self) -> &str {
        self.request_id
    }

    pub fn body(&self) -> &[u8] {
        self.body
    }
}

/// One fully described publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub exchange: String,
    pub routing_keys: Vec<String>,
    pub body: Vec<u8>,
    pub headers: Headers,
    pub request_id: String,
    pub message_id: String,
    pub content_type: String,
    pub persistent: bool,
    pub mandatory: bool,
}

impl Envelope {
    /// Builds the persistent envelope for `msg` on `binding`.
    ///
    /// The caller's headers are copied and stamped with the request id here,
    /// once, so every attempt built from this envelope is identical.
    pub(crate) fn stamped(binding: &ExchangeBinding, msg: &Message<'_>) -> Envelope {
        let stamped = match msg.headers {
            Some(h) => headers::stamp(h, msg.request_id),
            None => headers::stamp(&Headers::new(), msg.request_id),
        };

        Envelope {
            exchange: binding.exchange.clone(),
            routing_keys: binding.routing_keys.clone(),
            body: msg.body.to_vec(),
            headers: stamped,
            request_id: msg.request_id.to_owned(),
            message_id: Uuid::new_v4().to_string(),
            content_type: JSON_CONTENT_TYPE.to_owned(),
            persistent: true,
            mandatory: false,
        }
    }

    pub(crate) fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Copy of this envelope addressed to the dead-letter route.
    ///
    /// Body, headers and ids are kept; the copy is persistent and not mandatory.
    pub(crate) fn reroute(&self, route: &DeadLetterRoute) -> Envelope {
        Envelope {
            exchange: route.exchange.clone(),
            routing_keys: vec![route.routing_key.clone()],
            mandatory: false,
            persistent: true,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::{HeaderValue, REQUEST_ID_HEADER};

    #[test]
    fn should_stamp_envelope_without_caller_headers() {
        let binding = ExchangeBinding::new("billing").routing_key("invoice.paid");
        let msg = Message::new("req-1", b"");

        let env = Envelope::stamped(&binding, &msg);

        assert_eq!(env.exchange, "billing");
        assert_eq!(env.routing_keys, vec!["invoice.paid".to_owned()]);
        assert!(env.body.is_empty());
        assert!(env.persistent);
        assert!(!env.mandatory);
        assert_eq!(env.content_type, JSON_CONTENT_TYPE);
        assert_eq!(env.headers[REQUEST_ID_HEADER].as_str(), Some("req-1"));
    }

    #[test]
    fn should_keep_headers_when_rerouting() {
        let mut caller = Headers::new();
        caller.insert("source".to_owned(), HeaderValue::from("api"));
        let binding = ExchangeBinding::new("billing").routing_key("a").routing_key("b");
        let msg = Message::new("req-2", b"{}").headers(&caller);

        let env = Envelope::stamped(&binding, &msg).mandatory();
        let dlq = env.reroute(&DeadLetterRoute::new("dlq_billing", "billing.dead"));

        assert!(env.mandatory);
        assert!(!dlq.mandatory);
        assert!(dlq.persistent);
        assert_eq!(dlq.exchange, "dlq_billing");
        assert_eq!(dlq.routing_keys, vec!["billing.dead".to_owned()]);
        assert_eq!(dlq.headers, env.headers);
        assert_eq!(dlq.message_id, env.message_id);
        assert_eq!(dlq.body, b"{}".to_vec());
        assert!(!caller.contains_key(REQUEST_ID_HEADER));
    }
}
