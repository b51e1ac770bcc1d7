//! End-to-end delivery tests.
//!
//! A scripted connector hands out fake servers that answer one reply per
//! command, so the full dialogue runs without a network.

#![allow(clippy::unwrap_used, clippy::similar_names)]

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use mailpost_core::{Error, ErrorKind, Mailer, OutboundMessage, Security, TransportConfig};
use mailpost_smtp::Connector;

const GREETING: &[u8] = b"220 smtp.example.com ESMTP ready\r\n";
const EHLO_PLAIN: &[u8] = b"250-smtp.example.com\r\n250-STARTTLS\r\n250 AUTH LOGIN PLAIN\r\n";
const STARTTLS_READY: &[u8] = b"220 2.0.0 Ready to start TLS\r\n";
const EHLO_SECURE: &[u8] = b"250-smtp.example.com\r\n250-SIZE 35882577\r\n250 AUTH LOGIN PLAIN\r\n";
const USERNAME_PROMPT: &[u8] = b"334 VXNlcm5hbWU6\r\n";
const PASSWORD_PROMPT: &[u8] = b"334 UGFzc3dvcmQ6\r\n";
const AUTH_OK: &[u8] = b"235 2.7.0 Authentication successful\r\n";
const SENDER_OK: &[u8] = b"250 2.1.0 Sender OK\r\n";
const RECIPIENT_OK: &[u8] = b"250 2.1.5 Recipient OK\r\n";
const START_DATA: &[u8] = b"354 Start mail input; end with <CRLF>.<CRLF>\r\n";
const QUEUED: &[u8] = b"250 2.0.0 Ok: queued as 4F2A\r\n";

/// Server side of one connection.
///
/// The greeting is readable immediately; every further reply is released
/// only once the client has sent a complete command (or, after `DATA`, the
/// end-of-data marker).
struct FakeServer {
    replies: VecDeque<&'static [u8]>,
    outgoing: Vec<u8>,
    inbound: Vec<u8>,
    in_data: bool,
    silent: bool,
    hang_up: Option<&'static str>,
    transcript: Arc<Mutex<Vec<u8>>>,
}

impl FakeServer {
    fn new(replies: &[&'static [u8]], transcript: &Arc<Mutex<Vec<u8>>>) -> Self {
        let mut server = Self {
            replies: replies.iter().copied().collect(),
            outgoing: Vec::new(),
            inbound: Vec::new(),
            in_data: false,
            silent: false,
            hang_up: None,
            transcript: Arc::clone(transcript),
        };
        server.release();
        server
    }

    /// A server that accepts the connection and never says anything, like
    /// an implicit TLS port waiting for a ClientHello.
    fn silent(transcript: &Arc<Mutex<Vec<u8>>>) -> Self {
        let mut server = Self::new(&[], transcript);
        server.silent = true;
        server
    }

    /// A server that drops the connection with a read error once its
    /// replies run out.
    fn hanging_up(
        replies: &[&'static [u8]],
        error: &'static str,
        transcript: &Arc<Mutex<Vec<u8>>>,
    ) -> Self {
        let mut server = Self::new(replies, transcript);
        server.hang_up = Some(error);
        server
    }

    fn release(&mut self) {
        if let Some(reply) = self.replies.pop_front() {
            self.outgoing.extend_from_slice(reply);
        }
    }

    fn absorb(&mut self, data: &[u8]) {
        self.transcript.lock().unwrap().extend_from_slice(data);
        self.inbound.extend_from_slice(data);
        loop {
            if self.in_data {
                let Some(end) = find(&self.inbound, b"\r\n.\r\n") else {
                    break;
                };
                self.inbound.drain(..end + 5);
                self.in_data = false;
            } else {
                let Some(end) = find(&self.inbound, b"\r\n") else {
                    break;
                };
                let line: Vec<u8> = self.inbound.drain(..end + 2).collect();
                self.in_data = line == b"DATA\r\n";
            }
            self.release();
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

impl AsyncRead for FakeServer {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.outgoing.is_empty() {
            return if this.silent {
                Poll::Pending
            } else if let Some(error) = this.hang_up {
                Poll::Ready(Err(io::Error::new(io::ErrorKind::UnexpectedEof, error)))
            } else {
                Poll::Ready(Ok(()))
            };
        }
        let n = this.outgoing.len().min(buf.remaining());
        buf.put_slice(&this.outgoing[..n]);
        this.outgoing.drain(..n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for FakeServer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().absorb(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// What the connector does on its next connect.
enum Attempt {
    Serve(FakeServer),
    Refuse(mailpost_smtp::Error),
}

/// Connector that plays back one [`Attempt`] per connect and records the
/// calls it received.
struct ScriptedConnector {
    attempts: Mutex<VecDeque<Attempt>>,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedConnector {
    fn new(attempts: Vec<Attempt>) -> Self {
        Self {
            attempts: Mutex::new(attempts.into()),
            calls: Mutex::default(),
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn next(&self, call: &'static str) -> mailpost_smtp::Result<FakeServer> {
        self.calls.lock().unwrap().push(call);
        match self.attempts.lock().unwrap().pop_front() {
            Some(Attempt::Serve(server)) => Ok(server),
            Some(Attempt::Refuse(error)) => Err(error),
            None => Err(mailpost_smtp::Error::ConnectionClosed),
        }
    }
}

impl Connector for ScriptedConnector {
    type Stream = FakeServer;

    async fn connect_plain(&self, _host: &str, _port: u16) -> mailpost_smtp::Result<FakeServer> {
        self.next("plain")
    }

    async fn connect_tls(&self, _host: &str, _port: u16) -> mailpost_smtp::Result<FakeServer> {
        self.next("tls")
    }

    async fn upgrade(&self, stream: FakeServer, _host: &str) -> mailpost_smtp::Result<FakeServer> {
        self.calls.lock().unwrap().push("upgrade");
        Ok(stream)
    }
}

fn config(port: u16) -> TransportConfig {
    TransportConfig::builder("smtp.example.com")
        .port(port)
        .credentials("user@example.com", "secret")
        .from("Example <noreply@example.com>")
        .client_id("matrix.local")
        .connect_timeout(Duration::from_secs(2))
        .io_timeout(Duration::from_millis(300))
        .build()
        .unwrap()
}

fn starttls_dialogue() -> Vec<&'static [u8]> {
    vec![
        GREETING,
        EHLO_PLAIN,
        STARTTLS_READY,
        EHLO_SECURE,
        USERNAME_PROMPT,
        PASSWORD_PROMPT,
        AUTH_OK,
        SENDER_OK,
        RECIPIENT_OK,
        START_DATA,
        QUEUED,
    ]
}

fn implicit_dialogue() -> Vec<&'static [u8]> {
    vec![
        GREETING,
        EHLO_SECURE,
        USERNAME_PROMPT,
        PASSWORD_PROMPT,
        AUTH_OK,
        SENDER_OK,
        RECIPIENT_OK,
        START_DATA,
        QUEUED,
    ]
}

/// Splits a transcript into the command lines before DATA, the message
/// data, and whatever followed the end-of-data marker.
fn split_transcript(transcript: &[u8]) -> (Vec<String>, String, String) {
    let text = String::from_utf8(transcript.to_vec()).unwrap();
    let Some(data_start) = text.find("DATA\r\n") else {
        let commands = text.split_terminator("\r\n").map(str::to_string).collect();
        return (commands, String::new(), String::new());
    };
    let commands = text[..data_start + 4]
        .split_terminator("\r\n")
        .map(str::to_string)
        .collect();
    let rest = &text[data_start + 6..];
    let end = rest.find("\r\n.\r\n").unwrap();
    (
        commands,
        rest[..end].to_string(),
        rest[end + 5..].to_string(),
    )
}

#[tokio::test]
async fn test_starttls_delivery_runs_full_dialogue() {
    let transcript = Arc::default();
    let connector = ScriptedConnector::new(vec![Attempt::Serve(FakeServer::new(
        &starttls_dialogue(),
        &transcript,
    ))]);
    let mailer = Mailer::with_connector(config(587), connector);

    let message = OutboundMessage::new("Alice <alice@example.com>", "Hello", "Hi Alice,\n.\nBye");
    let delivery = mailer.send(&message).await.unwrap();

    assert_eq!(delivery.security, Security::StartTls);
    assert_eq!(delivery.attempts, 1);
    assert_eq!(delivery.reply.message_text(), "2.0.0 Ok: queued as 4F2A");

    let (commands, data, after) = split_transcript(&transcript.lock().unwrap());
    assert_eq!(
        commands,
        vec![
            "EHLO matrix.local",
            "STARTTLS",
            "EHLO matrix.local",
            "AUTH LOGIN",
            "dXNlckBleGFtcGxlLmNvbQ==",
            "c2VjcmV0",
            "MAIL FROM:<noreply@example.com>",
            "RCPT TO:<alice@example.com>",
            "DATA",
        ]
    );
    assert!(data.starts_with("From: Example <noreply@example.com>\r\n"));
    assert!(data.contains("To: Alice <alice@example.com>\r\n"));
    assert!(data.contains("Subject: Hello\r\n"));
    assert!(data.contains(&format!("Message-ID: {}\r\n", delivery.message_id)));
    assert!(data.contains("Content-Transfer-Encoding: base64\r\n"));
    assert_eq!(after, "QUIT\r\n");

    assert_eq!(mailer_calls(&mailer), vec!["plain", "upgrade"]);
}

#[tokio::test]
async fn test_implicit_tls_delivery_skips_starttls() {
    let transcript = Arc::default();
    let connector = ScriptedConnector::new(vec![Attempt::Serve(FakeServer::new(
        &implicit_dialogue(),
        &transcript,
    ))]);
    let mailer = Mailer::with_connector(config(465), connector);

    let message = OutboundMessage::new("alice@example.com", "Hello", "text")
        .with_html("<p>html</p>")
        .with_reply_to("support@example.com");
    let delivery = mailer.send(&message).await.unwrap();
    assert_eq!(delivery.security, Security::Implicit);

    let (commands, data, _) = split_transcript(&transcript.lock().unwrap());
    assert_eq!(commands[0], "EHLO matrix.local");
    assert!(!commands.iter().any(|c| c == "STARTTLS"));
    assert!(data.contains("multipart/alternative"));
    assert!(data.contains("Reply-To: support@example.com\r\n"));
    assert_eq!(mailer_calls(&mailer), vec!["tls"]);
}

#[tokio::test]
async fn test_rejected_recipient_aborts_before_data() {
    let transcript = Arc::default();
    let replies = [
        GREETING,
        EHLO_PLAIN,
        STARTTLS_READY,
        EHLO_SECURE,
        USERNAME_PROMPT,
        PASSWORD_PROMPT,
        AUTH_OK,
        SENDER_OK,
        b"550 5.1.1 <nobody@example.com>: Recipient address rejected\r\n".as_slice(),
    ];
    let connector = ScriptedConnector::new(vec![Attempt::Serve(FakeServer::new(
        &replies,
        &transcript,
    ))]);
    let mailer = Mailer::with_connector(config(587), connector);

    let err = mailer
        .send(&OutboundMessage::new("nobody@example.com", "Hello", "text"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.smtp_code(), Some(550));
    assert!(err.to_string().contains("Recipient address rejected"));

    let transcript = String::from_utf8(transcript.lock().unwrap().clone()).unwrap();
    assert!(!transcript.contains("DATA"));
    assert!(transcript.ends_with("RCPT TO:<nobody@example.com>\r\nQUIT\r\n"));
    assert_eq!(mailer_calls(&mailer), vec!["plain", "upgrade"]);
}

#[tokio::test]
async fn test_any_rejected_recipient_fails_the_send() {
    let transcript = Arc::default();
    let replies = [
        GREETING,
        EHLO_SECURE,
        USERNAME_PROMPT,
        PASSWORD_PROMPT,
        AUTH_OK,
        SENDER_OK,
        RECIPIENT_OK,
        b"550 5.1.1 Unknown user\r\n".as_slice(),
    ];
    let connector = ScriptedConnector::new(vec![Attempt::Serve(FakeServer::new(
        &replies,
        &transcript,
    ))]);
    let mailer = Mailer::with_connector(config(465), connector);

    let err = mailer
        .send(&OutboundMessage::new(
            "alice@example.com, ghost@example.com",
            "Hello",
            "text",
        ))
        .await
        .unwrap_err();
    assert_eq!(err.smtp_code(), Some(550));
    assert!(!String::from_utf8_lossy(&transcript.lock().unwrap()).contains("DATA"));
}

#[tokio::test]
async fn test_handshake_mismatch_retries_with_starttls() {
    let transcript = Arc::default();
    let connector = ScriptedConnector::new(vec![
        Attempt::Refuse(mailpost_smtp::Error::TlsHandshake(
            "received corrupt message of type InvalidContentType".into(),
        )),
        Attempt::Serve(FakeServer::new(&starttls_dialogue(), &transcript)),
    ]);
    let mailer = Mailer::with_connector(config(465), connector);

    let delivery = mailer
        .send(&OutboundMessage::new("alice@example.com", "Hello", "text"))
        .await
        .unwrap();

    assert_eq!(delivery.attempts, 2);
    assert_eq!(delivery.security, Security::StartTls);
    assert_eq!(mailer_calls(&mailer), vec!["tls", "plain", "upgrade"]);
}

#[tokio::test]
async fn test_silent_greeting_retries_with_implicit_tls() {
    let silent = Arc::default();
    let transcript = Arc::default();
    let connector = ScriptedConnector::new(vec![
        Attempt::Serve(FakeServer::silent(&silent)),
        Attempt::Serve(FakeServer::new(&implicit_dialogue(), &transcript)),
    ]);
    let mailer = Mailer::with_connector(config(587), connector);

    let delivery = mailer
        .send(&OutboundMessage::new("alice@example.com", "Hello", "text"))
        .await
        .unwrap();

    assert_eq!(delivery.attempts, 2);
    assert_eq!(delivery.security, Security::Implicit);
    assert_eq!(mailer_calls(&mailer), vec!["plain", "tls"]);
    assert!(silent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_retry_happens_only_once() {
    let connector = ScriptedConnector::new(vec![
        Attempt::Refuse(mailpost_smtp::Error::TlsHandshake("wrong version number".into())),
        Attempt::Refuse(mailpost_smtp::Error::TlsHandshake("wrong version number".into())),
        Attempt::Refuse(mailpost_smtp::Error::TlsHandshake("wrong version number".into())),
    ]);
    let mailer = Mailer::with_connector(config(465), connector);

    let err = mailer
        .send(&OutboundMessage::new("alice@example.com", "Hello", "text"))
        .await
        .unwrap_err();
    assert!(err.is_tls_mismatch());
    assert_eq!(mailer_calls(&mailer), vec!["tls", "plain"]);
}

#[tokio::test]
async fn test_authentication_failure_is_not_retried() {
    let transcript = Arc::default();
    let replies = [
        GREETING,
        EHLO_SECURE,
        USERNAME_PROMPT,
        PASSWORD_PROMPT,
        b"535 5.7.8 Authentication credentials invalid\r\n".as_slice(),
    ];
    let connector = ScriptedConnector::new(vec![Attempt::Serve(FakeServer::new(
        &replies,
        &transcript,
    ))]);
    let mailer = Mailer::with_connector(config(465), connector);

    let err = mailer
        .send(&OutboundMessage::new("alice@example.com", "Hello", "text"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(matches!(
        err,
        Error::Smtp(mailpost_smtp::Error::AuthFailed { code: 535, .. })
    ));
    assert_eq!(mailer_calls(&mailer), vec!["tls"]);
}

#[tokio::test]
async fn test_connection_dropped_mid_dialogue() {
    let transcript = Arc::default();
    let replies = [GREETING, EHLO_SECURE, USERNAME_PROMPT];
    let connector = ScriptedConnector::new(vec![Attempt::Serve(FakeServer::new(
        &replies,
        &transcript,
    ))]);
    let mailer = Mailer::with_connector(config(465), connector);

    let err = mailer
        .send(&OutboundMessage::new("alice@example.com", "Hello", "text"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Smtp(mailpost_smtp::Error::ConnectionClosed)
    ));
    assert_eq!(err.kind(), ErrorKind::Transport);

    // no QUIT once the connection has failed
    let transcript = String::from_utf8(transcript.lock().unwrap().clone()).unwrap();
    assert!(!transcript.contains("QUIT"));
}

#[tokio::test]
async fn test_tls_session_dropped_after_data_is_not_retried() {
    let transcript = Arc::default();
    let fallback_transcript = Arc::default();
    let mut replies = implicit_dialogue();
    replies.pop();
    let connector = ScriptedConnector::new(vec![
        Attempt::Serve(FakeServer::hanging_up(
            &replies,
            "peer closed connection without sending TLS close_notify",
            &transcript,
        )),
        Attempt::Serve(FakeServer::new(&starttls_dialogue(), &fallback_transcript)),
    ]);
    let mailer = Mailer::with_connector(config(465), connector);

    let err = mailer
        .send(&OutboundMessage::new("alice@example.com", "Hello", "text"))
        .await
        .unwrap_err();
    assert!(!err.is_tls_mismatch());
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(
        matches!(err, Error::Smtp(mailpost_smtp::Error::Io(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof),
        "{err:?}"
    );
    assert_eq!(mailer_calls(&mailer), vec!["tls"]);

    let (commands, data, _) = split_transcript(&transcript.lock().unwrap());
    assert_eq!(commands.iter().filter(|c| *c == "DATA").count(), 1);
    assert!(data.contains("Subject: Hello"));
    assert!(fallback_transcript.lock().unwrap().is_empty());
}

fn mailer_calls(mailer: &Mailer<ScriptedConnector>) -> Vec<&'static str> {
    mailer.connector().calls()
}
