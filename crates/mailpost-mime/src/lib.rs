//! # mailpost-mime
//!
//! Composer for outbound RFC 5322 / MIME messages.
//!
//! ## Features
//!
//! - **Single part or alternative**: `text/plain`, or `multipart/alternative`
//!   with a text and an HTML part
//! - **Base64 bodies**: wrapped at 76 characters, CRLF line endings
//! - **SMTP transparency**: dot-stuffed output, ready for `DATA`
//! - **Header safety**: CR/LF stripped from every header value, non-ASCII
//!   subjects RFC 2047 encoded
//!
//! ## Quick Start
//!
//! ```
//! use mailpost_mime::MessageBuilder;
//!
//! let document = MessageBuilder::new()
//!     .from("Mailer <noreply@example.com>")
//!     .to("recipient@example.com")
//!     .subject("Test")
//!     .text_body("Plain text version")
//!     .html_body("<h1>HTML version</h1>")
//!     .build()?;
//!
//! assert!(document.boundary().is_some());
//! assert!(document.as_str().contains("multipart/alternative"));
//! # Ok::<(), mailpost_mime::Error>(())
//! ```
//!
//! ### Encoding helpers
//!
//! ```
//! use mailpost_mime::encoding::{decode_base64_body, encode_base64_body, encode_rfc2047};
//!
//! let body = encode_base64_body("Hello\nWorld");
//! assert_eq!(decode_base64_body(&body)?, "Hello\r\nWorld");
//!
//! let subject = encode_rfc2047("Héllo", "utf-8");
//! assert!(subject.starts_with("=?utf-8?B?"));
//! # Ok::<(), mailpost_mime::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod content_type;
mod error;
mod header;
mod message;

pub mod encoding;

pub use content_type::ContentType;
pub use error::{Error, Result};
pub use header::{Headers, sanitize_value};
pub use message::{ComposedDocument, MessageBuilder};
