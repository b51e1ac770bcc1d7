//! One SMTP transaction over one connection.

use mailpost_mime::ComposedDocument;
use mailpost_smtp::{Client, Connection, Connector, Reply, Security};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::TransportConfig;
use crate::error::Result;
use crate::message::Envelope;

/// Connects with `security`, runs the full dialogue and closes the
/// connection whatever the outcome.
///
/// # Errors
///
/// Returns the first failure: connecting, EHLO, STARTTLS, authentication,
/// any rejected envelope address, or the server refusing the data.
pub async fn deliver<C>(
    connector: &C,
    config: &TransportConfig,
    security: Security,
    envelope: &Envelope,
    document: &ComposedDocument,
) -> Result<Reply>
where
    C: Connector,
{
    let mut conn = Connection::open(connector, &config.connection_config(security)).await?;
    let outcome = transact(&mut conn, connector, config, security, envelope, document).await;
    conn.close().await;
    outcome
}

async fn transact<C, S>(
    conn: &mut Connection<S>,
    connector: &C,
    config: &TransportConfig,
    security: Security,
    envelope: &Envelope,
    document: &ComposedDocument,
) -> Result<Reply>
where
    C: Connector<Stream = S>,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut client = Client::new(conn)?.ehlo(&config.client_id).await?;

    if security == Security::StartTls {
        client = client
            .starttls(connector, &config.host, &config.client_id)
            .await?;
    }

    let client = client
        .auth_login(&config.username, &config.password)
        .await?
        .mail_from(&envelope.from)
        .await?;

    let (first, rest) = envelope
        .recipients
        .split_first()
        .ok_or_else(|| crate::Error::Validation("no recipient email provided".into()))?;
    let mut client = client.rcpt_to(first).await?;
    for recipient in rest {
        client = client.rcpt_to(recipient).await?;
    }

    let (_, reply) = client
        .data()
        .await?
        .send_message(document.as_bytes())
        .await?;
    Ok(reply)
}
