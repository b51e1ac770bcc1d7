//! Sending services.
//!
//! [`session`] runs one SMTP transaction over one connection; [`Mailer`]
//! decides which encryption mode to start with and retries once with the
//! other mode when the first guess was wrong.

mod policy;
pub mod session;

pub use policy::{Delivery, Mailer, send_mail};
