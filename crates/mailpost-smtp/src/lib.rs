//! # mailpost-smtp
//!
//! A small SMTP submission client (RFC 5321) for sending one message per
//! connection.
//!
//! ## Features
//!
//! - **Half-duplex connection**: one reply awaited at a time, multi-line
//!   replies assembled from arbitrary read boundaries
//! - **Type-state client**: EHLO, STARTTLS, AUTH LOGIN, MAIL FROM, RCPT TO
//!   and DATA can only be issued in a valid order
//! - **TLS**: implicit TLS (port 465) or STARTTLS, via rustls and the
//!   Mozilla root store
//! - **Timeouts**: every connect, read and write is bounded
//!
//! ## Quick Start
//!
//! ```no_run
//! use mailpost_smtp::{Address, Client, Config, Connection, TcpConnector};
//!
//! # async fn run() -> mailpost_smtp::Result<()> {
//! let connector = TcpConnector::new();
//! let config = Config::new("smtp.example.com", 587);
//! let mut conn = Connection::open(&connector, &config).await?;
//!
//! let outcome = async {
//!     let client = Client::new(&mut conn)?
//!         .ehlo("client.example.com")
//!         .await?
//!         .starttls(&connector, "smtp.example.com", "client.example.com")
//!         .await?
//!         .auth_login("user@example.com", "password")
//!         .await?;
//!
//!     let from = Address::new("sender@example.com")?;
//!     let to = Address::new("recipient@example.com")?;
//!     let client = client.mail_from(&from).await?.rcpt_to(&to).await?;
//!     client
//!         .data()
//!         .await?
//!         .send_message(b"Subject: Test\r\n\r\nHello, World!\r\n")
//!         .await
//!         .map(|(_, reply)| reply)
//! }
//! .await;
//!
//! conn.close().await;
//! outcome?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! Connecting ── greeting ──→ Greeted ⇄ Negotiating (STARTTLS)
//!                               │
//!                          auth_login()
//!                               ↓
//!                         Authenticated ── mail_from() ──→ InEnvelope
//!                               ↑                             │
//!                               └──── send_message() ── InData ┘ data()
//! ```
//!
//! ## Modules
//!
//! - [`command`]: SMTP command builders
//! - [`connection`]: Connection, connectors and the type-state client
//! - [`parser`]: Reply parser
//! - [`types`]: Core SMTP types (addresses, extensions, replies)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use connection::{
    Authenticated, Client, Config, ConfigBuilder, Connection, Connector, Data, Greeted,
    IMPLICIT_TLS_PORT, MailTransaction, RecipientAdded, SUBMISSION_PORT, Security, ServerInfo,
    SmtpStream, State, TcpConnector,
};
pub use error::{Error, ErrorKind, Result};
pub use types::{Address, AuthMechanism, Extension, Mailbox, Reply, ReplyCode};
