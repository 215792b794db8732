// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Propagates the caller's trace context through outgoing message headers so
//! consumers can continue the trace.

use crate::headers::{HeaderValue, Headers};
use opentelemetry::{global, propagation::Injector, Context};

/// An adapter for injecting OpenTelemetry context into message headers.
pub(crate) struct HeadersTracePropagator<'a> {
    headers: &'a mut Headers,
}

impl<'a> HeadersTracePropagator<'a> {
    pub(crate) fn new(headers: &'a mut Headers) -> Self {
        Self { headers }
    }
}

impl Injector for HeadersTracePropagator<'_> {
    /// Sets a trace context key-value pair in the message headers.
    ///
    /// Keys are lowercased so they match what AMQP consumers extract.
    fn set(&mut self, key: &str, value: String) {
        self.headers
            .insert(key.to_lowercase(), HeaderValue::String(value));
    }
}

/// Injects `ctx` into `headers` with the globally configured propagator.
pub(crate) fn inject(ctx: &Context, headers: &mut Headers) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut HeadersTracePropagator::new(headers))
    });
}
