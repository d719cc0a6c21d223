//! Type-state SMTP client.

use std::marker::PhantomData;

use afd_auth::AuthType;
use afd_net::Connection;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::ServerInfo;
use crate::body::{self, BodyWriter};
use crate::command::Command;
use crate::config::{SmtpConfig, SmtpCredentials};
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Reply, ReplyCode, SmtpCapabilities};

/// Upper bound on lines in one reply.
const MAX_REPLY_LINES: usize = 512;

/// Type-state marker for connected state.
#[derive(Debug)]
pub struct Connected;

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
pub struct Client<State> {
    conn: Connection,
    server_info: ServerInfo,
    ehlo_name: String,
    body: BodyWriter,
    _state: PhantomData<State>,
}

/// Connection trait for all states.
pub trait SmtpConnection {
    /// Returns the server information.
    fn server_info(&self) -> &ServerInfo;

    /// Returns the capability flags.
    fn capabilities(&self) -> SmtpCapabilities {
        self.server_info().capabilities
    }
}

impl<S> SmtpConnection for Client<S> {
    fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }
}

impl Client<Connected> {
    /// Connects, reads the banner and greets with EHLO, then upgrades with
    /// STARTTLS if the configuration asks for it.
    ///
    /// # Errors
    ///
    /// Transport errors, a banner other than 220, or a failed greeting.
    pub async fn connect(config: &SmtpConfig) -> Result<Self> {
        let conn =
            Connection::connect(&config.host, config.port, config.connect_options()).await?;
        let client = Self::from_connection(conn).await?;
        let client = client.ehlo(&config.client_hostname).await?;
        if config.starttls && !client.conn.tls_active() {
            if client.server_info.capabilities.starttls {
                return client.starttls().await;
            }
            tracing::warn!(host = %config.host, "STARTTLS requested but not offered by server");
        }
        Ok(client)
    }

    /// Creates a client on an open connection and reads the server banner.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the banner fails or if it is not 220.
    pub async fn from_connection(mut conn: Connection) -> Result<Self> {
        let greeting = read_reply(&mut conn).await?;
        if greeting.code != ReplyCode::SERVICE_READY {
            return Err(reply_error(&greeting));
        }

        let hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        tracing::debug!(server = %hostname, "SMTP banner received");

        let ssl_enabled = conn.tls_active();
        Ok(Self {
            conn,
            server_info: ServerInfo {
                hostname,
                capabilities: SmtpCapabilities {
                    ssl_enabled,
                    ..SmtpCapabilities::default()
                },
                ..ServerInfo::default()
            },
            ehlo_name: String::new(),
            body: BodyWriter::new(),
            _state: PhantomData,
        })
    }

    /// Sends EHLO and discovers server capabilities; falls back to HELO if
    /// the server rejects EHLO.
    ///
    /// # Errors
    ///
    /// Returns an error if both greetings fail.
    pub async fn ehlo(mut self, client_hostname: &str) -> Result<Self> {
        self.ehlo_name = client_hostname.to_string();
        let reply = self
            .send_command(&Command::Ehlo {
                hostname: client_hostname.to_string(),
            })
            .await?;

        if reply.is_success() {
            let ssl = self.conn.tls_active();
            self.server_info
                .update(reply.message.iter().skip(1).map(String::as_str), ssl);
            return Ok(self);
        }
        if !reply.code.is_permanent() {
            return Err(reply_error(&reply));
        }

        tracing::info!(code = %reply.code, "EHLO rejected, falling back to HELO");
        let reply = self
            .send_command(&Command::Helo {
                hostname: client_hostname.to_string(),
            })
            .await?;
        if !reply.is_success() {
            return Err(reply_error(&reply));
        }
        let ssl = self.conn.tls_active();
        self.server_info.update(std::iter::empty(), ssl);
        Ok(self)
    }

    /// Upgrades the connection to TLS using STARTTLS and greets again.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not offered, refused, or the
    /// handshake fails.
    pub async fn starttls(mut self) -> Result<Self> {
        if self.conn.tls_active() {
            return Err(Error::InvalidState("TLS is already active".into()));
        }
        if !self.server_info.capabilities.starttls {
            return Err(Error::NotSupported("STARTTLS".into()));
        }

        let reply = self.send_command(&Command::StartTls).await?;
        if reply.code != ReplyCode::SERVICE_READY {
            return Err(reply_error(&reply));
        }

        let info = self.conn.start_tls().await?;
        tracing::info!(
            host = %self.conn.host(),
            version = %info.version,
            cipher = %info.cipher,
            "STARTTLS negotiated"
        );

        let name = std::mem::take(&mut self.ehlo_name);
        self.ehlo(&name).await
    }

    /// Authenticates with the scheme in `credentials`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] for a non-SMTP auth type, otherwise as the
    /// chosen mechanism.
    pub async fn authenticate(
        self,
        credentials: &SmtpCredentials,
    ) -> Result<Client<Authenticated>> {
        match credentials.auth_type {
            AuthType::SmtpAuthLogin => {
                self.auth_login(&credentials.user, &credentials.passwd).await
            }
            AuthType::SmtpAuthPlain => {
                self.auth_plain(&credentials.user, &credentials.passwd).await
            }
            other => Err(Error::InvalidState(format!(
                "{other:?} is not an SMTP authentication scheme"
            ))),
        }
    }

    /// Authenticates using the LOGIN mechanism.
    ///
    /// # Errors
    ///
    /// [`Error::NotSupported`] if the server does not offer LOGIN, or the
    /// reply error.
    pub async fn auth_login(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        if !self.server_info.capabilities.auth_login {
            return Err(Error::NotSupported("AUTH LOGIN".into()));
        }

        let reply = self
            .send_command(&Command::Auth {
                mechanism: AuthMechanism::Login,
                initial_response: None,
            })
            .await?;
        expect(&reply, ReplyCode::AUTH_CONTINUE)?;

        self.conn.write_secret(&STANDARD.encode(username)).await?;
        let reply = read_reply(&mut self.conn).await?;
        expect(&reply, ReplyCode::AUTH_CONTINUE)?;

        self.conn.write_secret(&STANDARD.encode(password)).await?;
        let reply = read_reply(&mut self.conn).await?;
        expect(&reply, ReplyCode::AUTH_SUCCEEDED)?;

        tracing::info!(user = username, "SMTP AUTH LOGIN succeeded");
        Ok(self.transition())
    }

    /// Authenticates using the PLAIN mechanism with an initial response.
    ///
    /// # Errors
    ///
    /// [`Error::NotSupported`] if the server does not offer PLAIN, or the
    /// reply error.
    pub async fn auth_plain(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        if !self.server_info.capabilities.auth_plain {
            return Err(Error::NotSupported("AUTH PLAIN".into()));
        }

        let credentials = format!("\0{username}\0{password}");
        let reply = self
            .send_command(&Command::Auth {
                mechanism: AuthMechanism::Plain,
                initial_response: Some(STANDARD.encode(credentials.as_bytes())),
            })
            .await?;
        expect(&reply, ReplyCode::AUTH_SUCCEEDED)?;

        tracing::info!(user = username, "SMTP AUTH PLAIN succeeded");
        Ok(self.transition())
    }

    /// Starts a mail transaction without authentication.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(self, from: Address) -> Result<Client<MailTransaction>> {
        self.start_transaction(from).await
    }
}

impl Client<Authenticated> {
    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(self, from: Address) -> Result<Client<MailTransaction>> {
        self.start_transaction(from).await
    }
}

impl Client<MailTransaction> {
    /// Adds the first recipient.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Client<RecipientAdded>> {
        self.add_recipient(to).await?;
        Ok(self.transition())
    }

    /// Aborts the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RSET command fails.
    pub async fn reset(mut self) -> Result<Client<Connected>> {
        self.rset().await?;
        Ok(self.transition())
    }
}

impl Client<RecipientAdded> {
    /// Adds another recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Self> {
        self.add_recipient(to).await?;
        Ok(self)
    }

    /// Sends DATA and waits for 354.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not accept DATA.
    pub async fn data(mut self) -> Result<Client<Data>> {
        let reply = self.send_command(&Command::Data).await?;
        expect(&reply, ReplyCode::START_DATA)?;
        self.body = BodyWriter::new();
        Ok(self.transition())
    }

    /// Aborts the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RSET command fails.
    pub async fn reset(mut self) -> Result<Client<Connected>> {
        self.rset().await?;
        Ok(self.transition())
    }
}

impl Client<Data> {
    /// Writes the `Subject:` header, RFC 2047 encoded unless it is 7-bit.
    ///
    /// # Errors
    ///
    /// Timeout or reset.
    pub async fn write_subject(&mut self, subject: &[u8], charset: Option<&str>) -> Result<()> {
        let line = body::encode_subject(subject, charset);
        self.conn.write(line.as_bytes()).await?;
        self.body.note_raw(line.as_bytes());
        Ok(())
    }

    /// Writes one block of the message with CRLF promotion and
    /// dot-stuffing.
    ///
    /// # Errors
    ///
    /// Timeout or reset.
    pub async fn write(&mut self, block: &[u8]) -> Result<()> {
        let mut out = Vec::with_capacity(block.len() * 2);
        self.body.encode(block, &mut out);
        self.conn.write(&out).await?;
        Ok(())
    }

    /// Remaps following blocks from code page 437 to ISO 8859-1.
    pub const fn use_iso8859(&mut self, on: bool) {
        self.body.set_cp437_remap(on);
    }

    /// Terminates the data with a lone `.` and waits for 250.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the message.
    pub async fn finish(mut self) -> Result<Client<Connected>> {
        self.conn.write(self.body.terminator()).await?;
        let reply = read_reply(&mut self.conn).await?;
        if !reply.is_success() {
            return Err(reply_error(&reply));
        }
        tracing::info!(reply = %reply, "message accepted");
        self.body = BodyWriter::new();
        Ok(self.transition())
    }

    /// Sends a complete message and completes the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if sending the message fails or the server rejects
    /// it.
    pub async fn send_message(mut self, message: &[u8]) -> Result<Client<Connected>> {
        self.write(message).await?;
        self.finish().await
    }
}

// Common implementation for all states
impl<S> Client<S> {
    /// Returns the underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Sends NOOP.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not answer 250.
    pub async fn noop(&mut self) -> Result<Reply> {
        let reply = self.send_command(&Command::Noop).await?;
        if !reply.is_success() {
            return Err(reply_error(&reply));
        }
        Ok(reply)
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// QUIT is skipped when the connection already timed out or was reset.
    /// The connection is closed on every path.
    ///
    /// # Errors
    ///
    /// Returns an error if the server answers QUIT with something other
    /// than 221.
    pub async fn quit(mut self) -> Result<()> {
        let result = if self.conn.is_healthy() {
            match self.send_command(&Command::Quit).await {
                Ok(reply) if reply.code == ReplyCode::CLOSING => Ok(()),
                Ok(reply) => Err(reply_error(&reply)),
                Err(err) => Err(err),
            }
        } else {
            tracing::debug!(host = %self.conn.host(), "connection broken, skipping QUIT");
            Ok(())
        };
        self.conn.close().await;
        result
    }

    async fn send_command(&mut self, cmd: &Command) -> Result<Reply> {
        let line = cmd.to_line();
        if cmd.is_secret() {
            self.conn.write_secret(&line).await?;
        } else {
            self.conn.write_command(&line).await?;
        }
        let reply = read_reply(&mut self.conn).await?;
        tracing::debug!(command = cmd.verb(), code = %reply.code, text = %reply.folded(), "SMTP reply");
        Ok(reply)
    }

    async fn start_transaction(mut self, from: Address) -> Result<Client<MailTransaction>> {
        let reply = self
            .send_command(&Command::MailFrom { from, size: None })
            .await?;
        if !reply.is_success() {
            return Err(reply_error(&reply));
        }
        Ok(self.transition())
    }

    async fn add_recipient(&mut self, to: Address) -> Result<()> {
        let reply = self.send_command(&Command::RcptTo { to }).await?;
        if !reply.is_success() {
            return Err(reply_error(&reply));
        }
        Ok(())
    }

    async fn rset(&mut self) -> Result<()> {
        let reply = self.send_command(&Command::Rset).await?;
        if !reply.is_success() {
            return Err(reply_error(&reply));
        }
        Ok(())
    }

    fn transition<T>(self) -> Client<T> {
        Client {
            conn: self.conn,
            server_info: self.server_info,
            ehlo_name: self.ehlo_name,
            body: self.body,
            _state: PhantomData,
        }
    }
}

async fn read_reply(conn: &mut Connection) -> Result<Reply> {
    let mut lines = Vec::new();
    loop {
        let line = conn.read_line().await?.text();
        if line.is_empty() {
            continue;
        }
        let is_last = is_last_reply_line(&line);
        lines.push(line);
        if is_last {
            break;
        }
        if lines.len() >= MAX_REPLY_LINES {
            return Err(Error::Protocol(format!(
                "reply exceeds {MAX_REPLY_LINES} lines"
            )));
        }
    }
    parse_reply(&lines)
}

fn expect(reply: &Reply, code: ReplyCode) -> Result<()> {
    if reply.code == code {
        Ok(())
    } else {
        Err(reply_error(reply))
    }
}

fn reply_error(reply: &Reply) -> Error {
    tracing::warn!(code = %reply.code, reply = %reply.folded(), "SMTP command failed");
    reply.to_error()
}
