//! E-mail reports of the errors logged during a run

use anyhow::{Context, Result};
use lettre::{
    message::{header::ContentType, Mailbox},
    Message, SmtpTransport, Transport,
};
use parking_lot::Mutex;
use std::{
    fmt::{self, Write},
    sync::Arc,
};
use tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_subscriber::{layer::Context as LayerContext, Layer};

/// Collects error events so they can be sent in a single report
#[derive(Clone, Default)]
pub struct ErrorCollector {
    messages: Arc<Mutex<Vec<String>>>,
}

impl ErrorCollector {
    /// Remove and return every collected message
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock())
    }
}

impl<S: Subscriber> Layer<S> for ErrorCollector {
    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.messages.lock().push(visitor.finish());
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        format!("{}{}", self.message, self.fields)
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_owned();
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}

/// Sends reports over plain SMTP
pub struct Mailer {
    from: Mailbox,
    to: Mailbox,
    transport: SmtpTransport,
}

impl Mailer {
    pub fn new(from: &str, to: &str, host: &str, port: u16) -> Result<Self> {
        Ok(Mailer {
            from: from.parse().context("invalid sender address")?,
            to: to.parse().context("invalid report address")?,
            transport: SmtpTransport::builder_dangerous(host).port(port).build(),
        })
    }

    /// Send one e-mail listing every message, blocking until the server accepted it
    pub fn send(&self, messages: &[String]) -> Result<()> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject(messages))
            .header(ContentType::TEXT_PLAIN)
            .body(messages.join("\n"))?;

        self.transport
            .send(&email)
            .context("failed to send the report")?;
        Ok(())
    }
}

fn subject(messages: &[String]) -> String {
    let first = messages.first().map(String::as_str).unwrap_or_default();
    format!("LE cert update error: {first}")
}

#[cfg(test)]
mod tests {
    use super::{subject, ErrorCollector, Mailer};
    use tracing::{error, info, warn};
    use tracing_subscriber::prelude::*;

    #[test]
    fn collects_only_errors() {
        let collector = ErrorCollector::default();
        let subscriber = tracing_subscriber::registry().with(collector.clone());

        tracing::subscriber::with_default(subscriber, || {
            info!("starting");
            warn!("slow");
            error!(domain = "example.com", "validation failed");
            error!("giving up");
        });

        assert_eq!(
            collector.take(),
            vec!["validation failed domain=example.com", "giving up"]
        );
        assert!(collector.take().is_empty());
    }

    #[test]
    fn subject_uses_first_message() {
        let messages = vec!["first".to_owned(), "second".to_owned()];
        assert_eq!(subject(&messages), "LE cert update error: first");
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!(Mailer::new("admin@example.com", "not an address", "localhost", 25).is_err());
        assert!(Mailer::new("admin@example.com", "ops@example.com", "localhost", 25).is_ok());
    }
}
