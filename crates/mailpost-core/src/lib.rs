//! # mailpost-core
//!
//! Sends one message per call through an SMTP submission server.
//!
//! This crate ties the pieces together:
//! - [`TransportConfig`]: server, credentials and sender, from code or from
//!   `SMTP_*` environment variables
//! - [`OutboundMessage`]: recipients, subject, text and optional HTML body
//! - [`Mailer`]: validates addresses, composes the MIME document, runs the
//!   SMTP dialogue and falls back to the other encryption mode once if the
//!   server expected it
//!
//! ```no_run
//! use mailpost_core::{Mailer, OutboundMessage, TransportConfig};
//!
//! # async fn run() -> mailpost_core::Result<()> {
//! let config = TransportConfig::from_env()?;
//! let message = OutboundMessage::new("alice@example.com", "Hello", "Plain text")
//!     .with_html("<p>HTML</p>");
//!
//! let delivery = Mailer::new(config).send(&message).await?;
//! println!("sent {}", delivery.message_id);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod message;
pub mod service;

pub use config::{DEFAULT_CLIENT_ID, TransportConfig, TransportConfigBuilder};
pub use error::{Error, Result};
pub use mailpost_smtp::{ErrorKind, Security};
pub use message::{Envelope, OutboundMessage, split_recipients};
pub use service::{Delivery, Mailer, send_mail};
