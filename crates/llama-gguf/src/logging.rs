//! Stderr tracing output for the CLI.
//!
//! [`StderrLayer`] prints each event as `HH:MM:SS LEVEL message {k=v, ...}`.
//! Stdout stays reserved for model output so it can be piped.

use std::io::Write;

use chrono::Local;
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

/// Most verbose level shown for a `-v` count.
pub fn level_for_verbosity(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install [`StderrLayer`] as the global subscriber. Later calls are no-ops.
pub fn init(verbosity: u8) {
    let layer = StderrLayer::new(level_for_verbosity(verbosity));
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

/// A [`tracing_subscriber::Layer`] that writes events to stderr.
pub struct StderrLayer {
    max_level: Level,
}

impl StderrLayer {
    pub fn new(max_level: Level) -> Self {
        Self { max_level }
    }

    fn enabled_for(&self, level: &Level) -> bool {
        // Level ordering: TRACE > DEBUG > ... > ERROR.
        *level <= self.max_level
    }
}

impl<S: Subscriber + for<'a> LookupSpan<'a>> Layer<S> for StderrLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if !self.enabled_for(&level) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let line = format_line(
            &Local::now().format("%H:%M:%S").to_string(),
            level,
            &visitor.message,
            &visitor.fields,
        );
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }
}

fn format_line(time: &str, level: Level, message: &str, fields: &[(String, String)]) -> String {
    let mut line = format!("{time} {:<5} {message}", level.as_str());
    if !fields.is_empty() {
        let extras: Vec<String> = fields.iter().map(|(k, v)| format!("{k}={v}")).collect();
        if message.is_empty() {
            line.push_str(&extras.join(" "));
        } else {
            line.push_str(&format!(" {{{}}}", extras.join(", ")));
        }
    }
    line
}

/// Collects the message and extra fields of an event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let raw = format!("{value:?}");
        if field.name() == "message" {
            self.message = raw
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .map(str::to_string)
                .unwrap_or(raw);
        } else {
            self.fields.push((field.name().to_string(), raw));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }
}
