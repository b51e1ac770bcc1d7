//! Half-duplex SMTP connection.
//!
//! A [`Connection`] owns one byte stream, writes command lines and turns
//! the bytes coming back into complete [`Reply`] values. At most one reply
//! may be awaited at a time; SMTP without pipelining is strictly
//! request/response.

use std::fmt;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use super::config::{Config, Security};
use super::stream::Connector;
use super::ServerInfo;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{self, MAX_REPLY_LINE};
use crate::types::{Reply, ReplyCode};

/// Bytes requested from the stream per read.
const READ_CHUNK: usize = 4096;

/// Dialogue state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// No stream.
    Closed,
    /// Stream open, greeting not yet received.
    Connecting,
    /// Greeting (or EHLO) accepted.
    Greeted,
    /// TLS upgrade in progress.
    Negotiating,
    /// Credentials accepted.
    Authenticated,
    /// MAIL FROM accepted, recipients being added.
    InEnvelope,
    /// DATA accepted, message being transferred.
    InData,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Connecting => "awaiting greeting",
            Self::Greeted => "greeted",
            Self::Negotiating => "negotiating TLS",
            Self::Authenticated => "authenticated",
            Self::InEnvelope => "in envelope",
            Self::InData => "in data",
        })
    }
}

/// One SMTP connection over a stream `S`.
pub struct Connection<S> {
    stream: Option<S>,
    read_buf: BytesMut,
    /// Codes accepted by the reply currently awaited.
    pending: Option<Vec<ReplyCode>>,
    /// First transport failure; the connection is unusable once set.
    failure: Option<String>,
    state: State,
    server_info: ServerInfo,
    last_reply: Option<Reply>,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already connected stream; the greeting is still unread.
    pub fn from_stream(stream: S) -> Self {
        Self {
            stream: Some(stream),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            pending: None,
            failure: None,
            state: State::Connecting,
            server_info: ServerInfo::default(),
            last_reply: None,
            connect_timeout: Config::DEFAULT_CONNECT_TIMEOUT,
            io_timeout: Config::DEFAULT_IO_TIMEOUT,
        }
    }

    /// Sets the timeouts used for upgrades and for each read or write.
    #[must_use]
    pub fn with_timeouts(mut self, connect_timeout: Duration, io_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.io_timeout = io_timeout;
        self
    }

    /// Connects using `config.security` and reads the greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer cannot be reached, the TLS handshake
    /// fails, or the greeting is not 220.
    pub async fn open<C>(connector: &C, config: &Config) -> Result<Self>
    where
        C: Connector<Stream = S>,
    {
        Self::establish(connector, config, config.security).await
    }

    /// Connects in plaintext and reads the greeting.
    ///
    /// # Errors
    ///
    /// See [`Connection::open`].
    pub async fn open_plain<C>(connector: &C, config: &Config) -> Result<Self>
    where
        C: Connector<Stream = S>,
    {
        Self::establish(connector, config, Security::StartTls).await
    }

    /// Connects with implicit TLS and reads the greeting.
    ///
    /// # Errors
    ///
    /// See [`Connection::open`].
    pub async fn open_encrypted<C>(connector: &C, config: &Config) -> Result<Self>
    where
        C: Connector<Stream = S>,
    {
        Self::establish(connector, config, Security::Implicit).await
    }

    async fn establish<C>(connector: &C, config: &Config, security: Security) -> Result<Self>
    where
        C: Connector<Stream = S>,
    {
        tracing::debug!(host = %config.host, port = config.port, %security, "Connecting to SMTP server");

        let connect = async {
            match security {
                Security::Implicit => connector.connect_tls(&config.host, config.port).await,
                Security::StartTls => connector.connect_plain(&config.host, config.port).await,
            }
        };
        let stream = timeout(config.connect_timeout, connect)
            .await
            .map_err(|_| Error::Timeout {
                state: State::Closed,
                after: config.connect_timeout,
            })??;

        let mut connection =
            Self::from_stream(stream).with_timeouts(config.connect_timeout, config.io_timeout);
        connection.read_greeting().await?;
        Ok(connection)
    }

    /// Reads the 220 greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the greeting is missing, malformed or not 220.
    pub async fn read_greeting(&mut self) -> Result<Reply> {
        if self.state != State::Connecting {
            return Err(Error::InvalidState(format!(
                "greeting already read ({})",
                self.state
            )));
        }

        let reply = self.await_reply(&[ReplyCode::SERVICE_READY]).await?;
        self.server_info.hostname = reply
            .message
            .first()
            .and_then(|line| line.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        self.state = State::Greeted;
        Ok(reply)
    }

    /// Writes one command line; CRLF is appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the line contains CR or LF, a reply is pending,
    /// or the write fails.
    pub async fn send(&mut self, line: &str) -> Result<()> {
        check_line(line)?;
        tracing::debug!(command = line, "SMTP >");
        self.write_line(line).await
    }

    /// Writes a command, redacting credentials in the log.
    ///
    /// # Errors
    ///
    /// See [`Connection::send`].
    pub async fn send_command(&mut self, command: &Command) -> Result<()> {
        let line = command.line();
        check_line(&line)?;
        tracing::debug!(%command, "SMTP >");
        self.write_line(&line).await
    }

    /// Writes bytes verbatim (message data).
    ///
    /// # Errors
    ///
    /// Returns an error if a reply is pending or the write fails.
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        tracing::debug!(bytes = data.len(), "SMTP > message data");
        self.write_bytes(data).await
    }

    /// Waits for the next complete reply.
    ///
    /// Resolves with the reply if its code is in `acceptable`; otherwise
    /// fails with [`Error::SmtpError`] carrying the code and text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReplyPending`] if another wait was started and never
    /// finished, a transport error if the stream fails or closes, and
    /// [`Error::Timeout`] if no reply arrives within the I/O timeout.
    pub async fn await_reply(&mut self, acceptable: &[ReplyCode]) -> Result<Reply> {
        self.ensure_usable()?;
        self.pending = Some(acceptable.to_vec());

        let state = self.state;
        let after = self.io_timeout;
        let result = match timeout(after, self.read_reply()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout { state, after }),
        };
        self.pending = None;

        let reply = result.map_err(|e| self.fail(e))?;
        tracing::debug!(code = reply.code.as_u16(), lines = reply.message.len(), "SMTP <");
        self.last_reply = Some(reply.clone());

        if acceptable.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(reply.into_error())
        }
    }

    /// Sends a command and waits for its reply.
    ///
    /// # Errors
    ///
    /// See [`Connection::send_command`] and [`Connection::await_reply`].
    pub async fn command(&mut self, command: &Command, acceptable: &[ReplyCode]) -> Result<Reply> {
        self.send_command(command).await?;
        self.await_reply(acceptable).await
    }

    /// Replaces the plaintext stream with a TLS stream.
    ///
    /// Bytes already buffered from the plaintext phase are discarded and
    /// the capabilities learned so far are forgotten.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails or times out; the connection
    /// is unusable afterwards.
    pub async fn upgrade<C>(&mut self, connector: &C, host: &str) -> Result<()>
    where
        C: Connector<Stream = S>,
    {
        self.ensure_usable()?;
        let Some(stream) = self.stream.take() else {
            return Err(Error::InvalidState("connection is closed".into()));
        };

        if !self.read_buf.is_empty() {
            tracing::warn!(
                discarded = self.read_buf.len(),
                "Discarding bytes received before TLS upgrade"
            );
        }
        self.read_buf.clear();
        self.server_info.extensions.clear();
        self.state = State::Negotiating;

        let after = self.connect_timeout;
        match timeout(after, connector.upgrade(stream, host)).await {
            Ok(Ok(stream)) => {
                self.stream = Some(stream);
                self.state = State::Greeted;
                tracing::debug!(host, "Connection upgraded to TLS");
                Ok(())
            }
            Ok(Err(e)) => Err(self.fail(e)),
            Err(_) => Err(self.fail(Error::Timeout {
                state: State::Negotiating,
                after,
            })),
        }
    }

    /// Sends QUIT without waiting for the reply and closes the stream.
    ///
    /// QUIT is skipped if the connection already failed. Calling this more
    /// than once is harmless.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if self.failure.is_none() {
                tracing::debug!(command = "QUIT", "SMTP >");
                let quit = Command::Quit.serialize();
                let _ = timeout(self.io_timeout, async {
                    stream.write_all(&quit).await?;
                    stream.flush().await
                })
                .await;
            }
            let _ = timeout(self.io_timeout, stream.shutdown()).await;
        }
        self.read_buf.clear();
        self.pending = None;
        self.state = State::Closed;
    }

    /// Returns the current dialogue state.
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    pub(crate) const fn set_state(&mut self, state: State) {
        self.state = state;
    }

    /// Returns what the server announced so far.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    pub(crate) const fn server_info_mut(&mut self) -> &mut ServerInfo {
        &mut self.server_info
    }

    /// Returns the most recent reply, accepted or not.
    #[must_use]
    pub const fn last_reply(&self) -> Option<&Reply> {
        self.last_reply.as_ref()
    }

    /// Returns the recorded transport failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn ensure_usable(&self) -> Result<()> {
        if let Some(failure) = &self.failure {
            return Err(Error::Broken(failure.clone()));
        }
        if self.pending.is_some() {
            return Err(Error::ReplyPending);
        }
        if self.stream.is_none() {
            return Err(Error::InvalidState("connection is closed".into()));
        }
        Ok(())
    }

    fn fail(&mut self, error: Error) -> Error {
        if self.failure.is_none() {
            self.failure = Some(error.to_string());
        }
        tracing::debug!(state = %self.state, %error, "Connection failed");
        error
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.write_bytes(&data).await
    }

    async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_usable()?;
        let state = self.state;
        let after = self.io_timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::InvalidState("connection is closed".into()));
        };

        let result = match timeout(after, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await
        {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Timeout { state, after }),
        };
        result.map_err(|e| self.fail(e))
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                continue;
            }
            let last = parser::is_last_reply_line(&line)?;
            lines.push(line);
            if last {
                return parser::parse_reply(&lines);
            }
        }
    }

    /// Reads one line; CRLF and bare LF both terminate it.
    async fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(pos) = self.read_buf.iter().position(|&b| b == b'\n') {
                let raw = self.read_buf.split_to(pos + 1);
                let mut line = &raw[..pos];
                if let Some(stripped) = line.strip_suffix(b"\r") {
                    line = stripped;
                }
                return Ok(String::from_utf8_lossy(line).into_owned());
            }

            if self.read_buf.len() > MAX_REPLY_LINE + 2 {
                return Err(Error::Protocol(format!(
                    "Reply line exceeds {MAX_REPLY_LINE} bytes"
                )));
            }

            let Some(stream) = self.stream.as_mut() else {
                return Err(Error::ConnectionClosed);
            };
            self.read_buf.reserve(READ_CHUNK);
            if stream.read_buf(&mut self.read_buf).await? == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }
}

fn check_line(line: &str) -> Result<()> {
    if line.contains(['\r', '\n']) {
        return Err(Error::InvalidCommand(
            "command line contains CR or LF".into(),
        ));
    }
    Ok(())
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("open", &self.stream.is_some())
            .field("buffered", &self.read_buf.len())
            .field("pending", &self.pending)
            .field("failure", &self.failure)
            .field("server_info", &self.server_info)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use tokio_test::io::{Builder, Mock};

    /// Connector whose "TLS upgrade" hands the same scripted stream back.
    struct ScriptedUpgrade;

    impl Connector for ScriptedUpgrade {
        type Stream = Mock;

        async fn connect_plain(&self, _host: &str, _port: u16) -> Result<Mock> {
            Err(Error::InvalidState("not used".into()))
        }

        async fn connect_tls(&self, _host: &str, _port: u16) -> Result<Mock> {
            Err(Error::InvalidState("not used".into()))
        }

        async fn upgrade(&self, stream: Mock, _host: &str) -> Result<Mock> {
            Ok(stream)
        }
    }

    #[tokio::test]
    async fn test_read_greeting() {
        let mock = Builder::new()
            .read(b"220-smtp.example.com ESMTP\r\n220 ready\r\n")
            .build();
        let mut conn = Connection::from_stream(mock);

        let reply = conn.read_greeting().await.unwrap();
        assert_eq!(reply.code, ReplyCode::SERVICE_READY);
        assert_eq!(reply.message.len(), 2);
        assert_eq!(conn.state(), State::Greeted);
        assert_eq!(conn.server_info().hostname, "smtp.example.com");
    }

    #[tokio::test]
    async fn test_reply_split_across_reads() {
        let mock = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"EHLO client\r\n")
            .read(b"250-first\r\n250-sec")
            .read(b"ond\n250 last\r\n")
            .build();
        let mut conn = Connection::from_stream(mock);
        conn.read_greeting().await.unwrap();

        conn.send("EHLO client").await.unwrap();
        let reply = conn.await_reply(&[ReplyCode::OK]).await.unwrap();
        assert_eq!(reply.message, vec!["first", "second", "last"]);
    }

    #[tokio::test]
    async fn test_unacceptable_code_is_smtp_error() {
        let mock = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"RCPT TO:<nobody@example.com>\r\n")
            .read(b"550 5.1.1 No such user\r\n")
            .write(b"QUIT\r\n")
            .build();
        let mut conn = Connection::from_stream(mock);
        conn.read_greeting().await.unwrap();

        conn.send("RCPT TO:<nobody@example.com>").await.unwrap();
        let err = conn.await_reply(&[ReplyCode::OK, ReplyCode::FORWARD]).await.unwrap_err();
        match err {
            Error::SmtpError { code, message } => {
                assert_eq!(code, 550);
                assert_eq!(message, "5.1.1 No such user");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(conn.failure().is_none());
        assert_eq!(conn.last_reply().unwrap().code, ReplyCode::MAILBOX_UNAVAILABLE);

        conn.close().await;
        assert_eq!(conn.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_send_refuses_line_breaks() {
        let mock = Builder::new().read(b"220 ready\r\n").build();
        let mut conn = Connection::from_stream(mock);
        conn.read_greeting().await.unwrap();

        let err = conn
            .send("MAIL FROM:<a@b.com>\r\nRCPT TO:<c@d.com>")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCommand(_)));
    }

    #[tokio::test]
    async fn test_close_while_waiting_poisons_connection() {
        let mock = Builder::new().read(b"220 ready\r\n").build();
        let mut conn = Connection::from_stream(mock);
        conn.read_greeting().await.unwrap();

        let err = conn.await_reply(&[ReplyCode::OK]).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));

        let err = conn.send("NOOP").await.unwrap_err();
        assert!(matches!(err, Error::Broken(_)));
        let err = conn.await_reply(&[ReplyCode::OK]).await.unwrap_err();
        assert!(matches!(err, Error::Broken(_)));

        // no QUIT on a failed connection
        conn.close().await;
    }

    #[tokio::test]
    async fn test_malformed_reply_is_protocol_error() {
        let mock = Builder::new().read(b"hello there\r\n").build();
        let mut conn = Connection::from_stream(mock);

        let err = conn.read_greeting().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(conn.failure().is_some());
    }

    #[tokio::test]
    async fn test_overlong_line_is_rejected() {
        let long = vec![b'2'; MAX_REPLY_LINE + 3];
        let mock = Builder::new().read(&long).build();
        let mut conn = Connection::from_stream(mock);

        let err = conn.read_greeting().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_second_wait_fails_fast() {
        let (client, _server) = tokio::io::duplex(64);
        let mut conn = Connection::from_stream(client);

        {
            let mut first = tokio_test::task::spawn(conn.await_reply(&[ReplyCode::SERVICE_READY]));
            assert!(first.poll().is_pending());
        }

        let err = conn.await_reply(&[ReplyCode::OK]).await.unwrap_err();
        assert!(matches!(err, Error::ReplyPending));
        let err = conn.send("NOOP").await.unwrap_err();
        assert!(matches!(err, Error::ReplyPending));
    }

    #[tokio::test]
    async fn test_greeting_timeout() {
        let (client, _server) = tokio::io::duplex(64);
        let mut conn = Connection::from_stream(client)
            .with_timeouts(Duration::from_millis(50), Duration::from_millis(50));

        let err = conn.read_greeting().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                state: State::Connecting,
                ..
            }
        ));
        assert!(err.is_tls_mismatch());
    }

    #[tokio::test]
    async fn test_upgrade_discards_buffered_plaintext() {
        let mock = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"STARTTLS\r\n")
            .read(b"220 go ahead\r\n250 injected\r\n")
            .write(b"EHLO client\r\n")
            .read(b"250 real\r\n")
            .write(b"QUIT\r\n")
            .build();
        let mut conn = Connection::from_stream(mock);
        conn.read_greeting().await.unwrap();

        conn.command(&Command::StartTls, &[ReplyCode::SERVICE_READY])
            .await
            .unwrap();
        conn.upgrade(&ScriptedUpgrade, "smtp.example.com").await.unwrap();
        assert_eq!(conn.state(), State::Greeted);

        let reply = conn
            .command(
                &Command::Ehlo {
                    hostname: "client".into(),
                },
                &[ReplyCode::OK],
            )
            .await
            .unwrap();
        assert_eq!(reply.message, vec!["real"]);

        conn.close().await;
        conn.close().await;
        assert_eq!(conn.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_commands() {
        let mock = Builder::new().read(b"220 ready\r\n").write(b"QUIT\r\n").build();
        let mut conn = Connection::from_stream(mock);
        conn.read_greeting().await.unwrap();
        conn.close().await;

        let err = conn.send("NOOP").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }
}
