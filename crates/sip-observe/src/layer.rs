// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt::{self, Write as _};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::log::{LogLevel, LogSink};

/// `tracing` layer writing events into a [`LogSink`].
///
/// Targets ending in `network`, `system` or `sql` select that category;
/// everything else maps by severity.
#[derive(Debug, Clone)]
pub struct LogLayer {
    sink: Arc<LogSink>,
}

impl LogLayer {
    pub fn new(sink: Arc<LogSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<LogSink> {
        &self.sink
    }
}

pub fn classify(target: &str, level: &Level) -> LogLevel {
    if target.ends_with("network") {
        LogLevel::NETWORK
    } else if target.ends_with("system") {
        LogLevel::SYSTEM
    } else if target.ends_with("sql") {
        LogLevel::SQL
    } else if *level <= Level::WARN {
        // tracing orders ERROR as the least verbose level
        LogLevel::ERROR
    } else if *level == Level::INFO {
        LogLevel::INFO
    } else {
        LogLevel::DEBUG
    }
}

fn thread_label() -> String {
    let current = std::thread::current();
    match current.name() {
        Some(name) => name.to_string(),
        None => {
            let id = format!("{:?}", current.id());
            id.trim_start_matches("ThreadId(").trim_end_matches(')').to_string()
        }
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }

    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), format_args!("{}", value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            self.push_field(field.name(), format_args!("{:?}", value));
        }
    }
}

impl<S: Subscriber> Layer<S> for LogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let level = classify(meta.target(), meta.level());
        if !self.sink.is_enabled(level) {
            return;
        }
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        // the sink cannot report its own failures anywhere else
        let _ = self.sink.write(level, &thread_label(), &visitor.finish());
    }
}
