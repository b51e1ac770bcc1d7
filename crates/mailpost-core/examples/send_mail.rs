#![allow(clippy::doc_markdown)]
//! Example: send one message using SMTP_* environment variables
//!
//! ## Running
//!
//! ```bash
//! SMTP_HOST=smtp.example.com SMTP_USER=me@example.com SMTP_PASS=app-password \
//! SMTP_FROM="Me <me@example.com>" \
//! cargo run --package mailpost-core --example send_mail -- \
//!     "alice@example.com, bob@example.org" "Hello" "Plain text body" "<p>HTML body</p>"
//! ```
//!
//! The HTML body is optional. Set `RUST_LOG=mailpost_smtp=debug` to see the
//! SMTP dialogue (credentials are redacted).

use anyhow::{Context, bail};
use mailpost_core::{Mailer, OutboundMessage, TransportConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailpost_core=info,mailpost_smtp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(to), Some(subject), Some(text)) = (args.next(), args.next(), args.next()) else {
        bail!("usage: send_mail <to> <subject> <text> [html]");
    };

    let config = TransportConfig::from_env().context("reading SMTP_* configuration")?;
    let mut message = OutboundMessage::new(&to, subject, text);
    if let Some(html) = args.next() {
        message = message.with_html(html);
    }

    let delivery = Mailer::new(config)
        .send(&message)
        .await
        .context("sending message")?;

    println!(
        "Accepted {} via {} after {} attempt(s): {}",
        delivery.message_id,
        delivery.security,
        delivery.attempts,
        delivery.reply.message_text()
    );
    Ok(())
}
