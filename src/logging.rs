// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Logging Setup
//!
//! Installs the global `tracing` subscriber: readable lines in the `dev`
//! environment and one JSON object per line everywhere else, ready for log
//! shippers. Every line carries the `env` field. `RUST_LOG` overrides the
//! configured level.

use crate::{config::LoggingConfigs, errors::AmqpError};
use serde_json::{Map, Value};
use std::fmt::{self, Write as _};
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    fmt::{
        format::{self, FormatEvent, FormatFields, JsonFields, Writer},
        FmtContext,
    },
    registry::LookupSpan,
    EnvFilter,
};

const DEV_ENV: &str = "dev";
const ENV_FIELD: &str = "env";

/// Installs the global subscriber.
///
/// # Returns
/// Ok(()) or AmqpError::InternalError when a subscriber is already installed
pub fn init(cfg: &LoggingConfigs) -> Result<(), AmqpError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&cfg.level)));

    let result = if cfg.env == DEV_ENV {
        let text = base_format().with_file(true).with_line_number(true);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .event_format(EnvStamp::text(text, &cfg.env))
            .try_init()
    } else {
        let json = base_format()
            .json()
            .flatten_event(true)
            .with_file(true)
            .with_line_number(true);
        tracing_subscriber::fmt()
            .fmt_fields(JsonFields::new())
            .with_env_filter(filter)
            .event_format(EnvStamp::json(json, &cfg.env))
            .try_init()
    };

    result.map_err(|err| AmqpError::InternalError(err.to_string()))
}

fn base_format() -> format::Format {
    format::Format::default()
}

/// Event formatter adding the environment name to every line written by the
/// wrapped formatter.
struct EnvStamp<F> {
    inner: F,
    env: String,
    json: bool,
}

impl<F> EnvStamp<F> {
    fn text(inner: F, env: &str) -> Self {
        EnvStamp {
            inner,
            env: env.to_owned(),
            json: false,
        }
    }

    fn json(inner: F, env: &str) -> Self {
        EnvStamp {
            inner,
            env: env.to_owned(),
            json: true,
        }
    }

    fn stamp(&self, line: &str) -> String {
        if self.json {
            return self.stamp_json(line).unwrap_or_else(|| line.to_owned());
        }

        match line.strip_suffix('\n') {
            Some(body) => format!("{body} {ENV_FIELD}={}\n", self.env),
            None => format!("{line} {ENV_FIELD}={}", self.env),
        }
    }

    fn stamp_json(&self, line: &str) -> Option<String> {
        let mut object: Map<String, Value> = serde_json::from_str(line).ok()?;
        object.insert(ENV_FIELD.to_owned(), Value::String(self.env.clone()));

        let mut stamped = serde_json::to_string(&object).ok()?;
        stamped.push('\n');
        Some(stamped)
    }
}

impl<S, N, F> FormatEvent<S, N> for EnvStamp<F>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    F: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut line = String::new();
        self.inner.format_event(ctx, Writer::new(&mut line), event)?;
        writer.write_str(&self.stamp(&line))
    }
}

/// Unknown levels fall back to `info`.
fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn output(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn should_map_levels() {
        assert_eq!(level_directive("DEBUG"), "debug");
        assert_eq!(level_directive(" warn "), "warn");
        assert_eq!(level_directive("verbose"), "info");
    }

    #[test]
    fn should_stamp_env_on_json_lines() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .fmt_fields(JsonFields::new())
            .with_writer(move || writer.clone())
            .event_format(EnvStamp::json(base_format().json().flatten_event(true), "prod"))
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(request_id = "req-1", "message confirmed by RabbitMQ");
        });

        let line: Value = serde_json::from_str(capture.output().trim()).unwrap();
        assert_eq!(line["env"], "prod");
        assert_eq!(line["request_id"], "req-1");
        assert_eq!(line["message"], "message confirmed by RabbitMQ");
    }

    #[test]
    fn should_stamp_env_on_text_lines() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .event_format(EnvStamp::text(base_format(), "dev"))
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(attempt = 2, "publish attempt failed");
        });

        let output = capture.output();
        assert!(output.ends_with(" env=dev\n"));
        assert!(output.contains("publish attempt failed"));
    }

    #[test]
    fn should_keep_unparsable_json_line() {
        let stamp = EnvStamp::json((), "prod");
        assert_eq!(stamp.stamp("not json\n"), "not json\n");
    }

    #[test]
    fn should_refuse_second_subscriber() {
        let cfg = LoggingConfigs {
            env: "prod".to_owned(),
            level: "error".to_owned(),
        };

        let _ = init(&cfg);
        assert!(init(&cfg).is_err());
    }
}
