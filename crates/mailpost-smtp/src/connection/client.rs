//! Type-state SMTP client.
//!
//! Each step of the dialogue consumes the client and returns it in the
//! next state, so commands can only be issued in a valid order. The client
//! borrows its [`Connection`]; when a step fails the caller still owns the
//! connection and can close it.

use std::marker::PhantomData;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncRead, AsyncWrite};

use super::framed::{Connection, State};
use super::stream::Connector;
use super::ServerInfo;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode};

/// Type-state marker: greeting received, EHLO may be (re)issued.
#[derive(Debug)]
pub struct Greeted;

/// Type-state marker for authenticated state.
#[derive(Debug)]
pub struct Authenticated;

/// Type-state marker for mail transaction started.
#[derive(Debug)]
pub struct MailTransaction;

/// Type-state marker for recipient added.
#[derive(Debug)]
pub struct RecipientAdded;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// SMTP client with type-state pattern.
#[derive(Debug)]
pub struct Client<'c, S, St> {
    conn: &'c mut Connection<S>,
    _state: PhantomData<St>,
}

impl<'c, S, St> Client<'c, S, St>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Returns the server information.
    #[must_use]
    pub fn server_info(&self) -> &ServerInfo {
        self.conn.server_info()
    }

    fn transition<Next>(self, state: State) -> Client<'c, S, Next> {
        self.conn.set_state(state);
        Client {
            conn: self.conn,
            _state: PhantomData,
        }
    }
}

impl<'c, S> Client<'c, S, Greeted>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Starts a dialogue on a connection whose greeting has been read.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is in any other state.
    pub fn new(conn: &'c mut Connection<S>) -> Result<Self> {
        if conn.state() != State::Greeted {
            return Err(Error::InvalidState(format!(
                "expected a greeted connection, found {}",
                conn.state()
            )));
        }
        Ok(Self {
            conn,
            _state: PhantomData,
        })
    }

    /// Sends EHLO and records the announced extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the EHLO command fails.
    pub async fn ehlo(self, client_id: &str) -> Result<Self> {
        let command = Command::Ehlo {
            hostname: client_id.to_string(),
        };
        let reply = self.conn.command(&command, &[ReplyCode::OK]).await?;

        // first line is the server's greeting text
        self.conn.server_info_mut().extensions = reply
            .message
            .iter()
            .skip(1)
            .map(|line| Extension::parse(line))
            .collect();
        Ok(self)
    }

    /// Upgrades the connection with STARTTLS and repeats EHLO.
    ///
    /// # Errors
    ///
    /// Returns an error if the server refuses STARTTLS, the handshake
    /// fails, or the second EHLO fails.
    pub async fn starttls<C>(self, connector: &C, host: &str, client_id: &str) -> Result<Self>
    where
        C: Connector<Stream = S>,
    {
        self.conn
            .command(&Command::StartTls, &[ReplyCode::SERVICE_READY])
            .await?;
        self.conn.upgrade(connector, host).await?;
        self.ehlo(client_id).await
    }

    /// Authenticates with `AUTH LOGIN`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthFailed`] if the server answers any step with an
    /// unexpected code, or a transport error.
    pub async fn auth_login(
        self,
        username: &str,
        password: &str,
    ) -> Result<Client<'c, S, Authenticated>> {
        let steps = [
            (
                Command::Auth {
                    mechanism: AuthMechanism::Login,
                },
                ReplyCode::AUTH_CONTINUE,
            ),
            (
                Command::AuthResponse {
                    payload: STANDARD.encode(username),
                },
                ReplyCode::AUTH_CONTINUE,
            ),
            (
                Command::AuthResponse {
                    payload: STANDARD.encode(password),
                },
                ReplyCode::AUTH_SUCCESS,
            ),
        ];

        for (command, expected) in &steps {
            self.conn
                .command(command, &[*expected])
                .await
                .map_err(auth_error)?;
        }

        Ok(self.transition(State::Authenticated))
    }
}

impl<'c, S> Client<'c, S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(self, from: &Address) -> Result<Client<'c, S, MailTransaction>> {
        let command = Command::MailFrom { from: from.clone() };
        self.conn.command(&command, &[ReplyCode::OK]).await?;
        Ok(self.transition(State::InEnvelope))
    }
}

impl<'c, S> Client<'c, S, MailTransaction>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Adds the first recipient.
    ///
    /// # Errors
    ///
    /// Returns an error unless the server answers 250 or 251.
    pub async fn rcpt_to(self, to: &Address) -> Result<Client<'c, S, RecipientAdded>> {
        add_recipient(self.conn, to).await?;
        Ok(self.transition(State::InEnvelope))
    }
}

impl<'c, S> Client<'c, S, RecipientAdded>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Adds another recipient.
    ///
    /// # Errors
    ///
    /// Returns an error unless the server answers 250 or 251.
    pub async fn rcpt_to(self, to: &Address) -> Result<Self> {
        add_recipient(self.conn, to).await?;
        Ok(self)
    }

    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error unless the server answers 354.
    pub async fn data(self) -> Result<Client<'c, S, Data>> {
        self.conn
            .command(&Command::Data, &[ReplyCode::START_DATA])
            .await?;
        Ok(self.transition(State::InData))
    }
}

impl<'c, S> Client<'c, S, Data>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Sends the message and the end-of-data marker.
    ///
    /// The document must already be CRLF-normalized and dot-stuffed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the server does not accept
    /// the message with 250.
    pub async fn send_message(
        self,
        document: &[u8],
    ) -> Result<(Client<'c, S, Authenticated>, Reply)> {
        let terminator: &[u8] = if document.is_empty() || document.ends_with(b"\r\n") {
            b".\r\n"
        } else {
            b"\r\n.\r\n"
        };

        self.conn.send_raw(document).await?;
        self.conn.send_raw(terminator).await?;
        let reply = self.conn.await_reply(&[ReplyCode::OK]).await?;

        Ok((self.transition(State::Authenticated), reply))
    }
}

async fn add_recipient<S>(conn: &mut Connection<S>, to: &Address) -> Result<Reply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let command = Command::RcptTo { to: to.clone() };
    conn.command(&command, &[ReplyCode::OK, ReplyCode::FORWARD])
        .await
}

fn auth_error(error: Error) -> Error {
    match error {
        Error::SmtpError { code, message } => Error::AuthFailed { code, message },
        other => other,
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

    fn address(addr: &str) -> Address {
        Address::new(addr).unwrap()
    }

    #[tokio::test]
    async fn test_full_dialogue() {
        let mock = Builder::new()
            .read(b"220 smtp.example.com ESMTP\r\n")
            .write(b"EHLO matrix.local\r\n")
            .read(b"250-smtp.example.com\r\n250-STARTTLS\r\n250 SIZE 1000\r\n")
            .write(b"STARTTLS\r\n")
            .read(b"220 2.0.0 Ready to start TLS\r\n")
            .write(b"EHLO matrix.local\r\n")
            .read(b"250-smtp.example.com\r\n250 AUTH LOGIN PLAIN\r\n")
            .write(b"AUTH LOGIN\r\n")
            .read(b"334 VXNlcm5hbWU6\r\n")
            .write(b"dXNlckBleGFtcGxlLmNvbQ==\r\n")
            .read(b"334 UGFzc3dvcmQ6\r\n")
            .write(b"c2VjcmV0\r\n")
            .read(b"235 2.7.0 Accepted\r\n")
            .write(b"MAIL FROM:<user@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<alice@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<bob@example.org>\r\n")
            .read(b"251 Will forward\r\n")
            .write(b"DATA\r\n")
            .read(b"354 Go ahead\r\n")
            .write(b"Subject: hi\r\n\r\nbody")
            .write(b"\r\n.\r\n")
            .read(b"250 2.0.0 queued as 1234\r\n")
            .write(b"QUIT\r\n")
            .build();

        let mut conn = Connection::from_stream(mock);
        conn.read_greeting().await.unwrap();

        let client = Client::new(&mut conn).unwrap();
        let client = client.ehlo("matrix.local").await.unwrap();
        assert!(client.server_info().supports_starttls());

        let client = client
            .starttls(&ScriptedUpgrade, "smtp.example.com", "matrix.local")
            .await
            .unwrap();
        assert!(!client.server_info().supports_starttls());
        assert_eq!(client.server_info().auth_mechanisms().len(), 2);

        let client = client
            .auth_login("user@example.com", "secret")
            .await
            .unwrap();
        let client = client
            .mail_from(&address("user@example.com"))
            .await
            .unwrap();
        let client = client.rcpt_to(&address("alice@example.com")).await.unwrap();
        let client = client.rcpt_to(&address("bob@example.org")).await.unwrap();
        let client = client.data().await.unwrap();
        let (_client, reply) = client.send_message(b"Subject: hi\r\n\r\nbody").await.unwrap();
        assert_eq!(reply.message_text(), "2.0.0 queued as 1234");

        assert_eq!(conn.state(), State::Authenticated);
        conn.close().await;
    }

    #[tokio::test]
    async fn test_auth_rejection_is_auth_failed() {
        let mock = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"AUTH LOGIN\r\n")
            .read(b"334 VXNlcm5hbWU6\r\n")
            .write(b"dXNlckBleGFtcGxlLmNvbQ==\r\n")
            .read(b"334 UGFzc3dvcmQ6\r\n")
            .write(b"c2VjcmV0\r\n")
            .read(b"535 5.7.8 Authentication credentials invalid\r\n")
            .write(b"QUIT\r\n")
            .build();

        let mut conn = Connection::from_stream(mock);
        conn.read_greeting().await.unwrap();

        let err = Client::new(&mut conn)
            .unwrap()
            .auth_login("user@example.com", "secret")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthFailed { code: 535, .. }), "{err:?}");
        assert_eq!(conn.state(), State::Greeted);
        conn.close().await;
    }

    #[tokio::test]
    async fn test_auth_mechanism_unsupported() {
        let mock = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"AUTH LOGIN\r\n")
            .read(b"504 5.5.4 Unrecognized authentication type\r\n")
            .write(b"QUIT\r\n")
            .build();

        let mut conn = Connection::from_stream(mock);
        conn.read_greeting().await.unwrap();

        let err = Client::new(&mut conn)
            .unwrap()
            .auth_login("u", "p")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthFailed { code: 504, .. }));
        conn.close().await;
    }

    #[tokio::test]
    async fn test_starttls_refused() {
        let mock = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"STARTTLS\r\n")
            .read(b"454 4.7.0 TLS not available\r\n")
            .write(b"QUIT\r\n")
            .build();

        let mut conn = Connection::from_stream(mock);
        conn.read_greeting().await.unwrap();

        let err = Client::new(&mut conn)
            .unwrap()
            .starttls(&ScriptedUpgrade, "smtp.example.com", "matrix.local")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SmtpError { code: 454, .. }));
        assert!(!err.is_tls_mismatch());
        conn.close().await;
    }

    #[tokio::test]
    async fn test_client_requires_greeting() {
        let (stream, _server) = tokio::io::duplex(64);
        let mut conn = Connection::from_stream(stream);
        assert!(matches!(
            Client::new(&mut conn),
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_message_ending_in_crlf_gets_short_terminator() {
        let mock = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"AUTH LOGIN\r\n")
            .read(b"334 VXNlcm5hbWU6\r\n")
            .write(b"dQ==\r\n")
            .read(b"334 UGFzc3dvcmQ6\r\n")
            .write(b"cA==\r\n")
            .read(b"235 ok\r\n")
            .write(b"MAIL FROM:<a@b.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<c@d.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go\r\n")
            .write(b"line\r\n")
            .write(b".\r\n")
            .read(b"250 ok\r\n")
            .write(b"QUIT\r\n")
            .build();

        let mut conn = Connection::from_stream(mock);
        conn.read_greeting().await.unwrap();

        let client = Client::new(&mut conn)
            .unwrap()
            .auth_login("u", "p")
            .await
            .unwrap()
            .mail_from(&address("a@b.com"))
            .await
            .unwrap()
            .rcpt_to(&address("c@d.com"))
            .await
            .unwrap()
            .data()
            .await
            .unwrap();
        client.send_message(b"line\r\n").await.unwrap();
        conn.close().await;
    }
}
