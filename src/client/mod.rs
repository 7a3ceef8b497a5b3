/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The high-level client: [`SmtpClientBuilder`] turns a validated
//! [`config::ClientConfig`] into a connected [`Client`], which then
//! serializes [`crate::Message`]s and drives the transaction per message.
//!
//! Grounded in the teacher's `smtp::builder::SmtpClientBuilder::connect`
//! dial sequence and `smtp::envelope`'s per-command helpers, generalized
//! with the port policy table and per-client `tokio::sync::Mutex`
//! serialization this crate's design calls for (the teacher's own
//! `SmtpClient` is single-use and never shared across tasks).

pub mod config;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::message::writer;
use crate::message::Message;
use crate::smtp::auth::Credentials;
use crate::smtp::client::{Connection, Parameters};
use crate::smtp::tls::build_tls_connector;
use crate::{DialError, Error, ProtocolError, Reply, Result, SendError, SendErrorReason, TlsPolicyError};

pub use config::{
    AuthType, ClientConfig, DialContext, Direction, DsnNotify, DsnReturn, Logger, TlsMinVersion,
    TlsPolicy,
};

fn send_error(
    reason: SendErrorReason,
    reply: Option<&Reply>,
    rcpt: Vec<String>,
    message_index: usize,
    errlist: Vec<Error>,
) -> SendError {
    SendError {
        reason,
        is_temp: reply.map(|r| r.is_temporary_failure()).unwrap_or(false),
        errcode: reply.map(|r| r.code()),
        enhanced_status_code: reply.and_then(|r| r.enhanced_status_code()),
        rcpt,
        errlist,
        message_index,
    }
}

/// Builds a validated [`ClientConfig`] and dials it. Every setter is an
/// owned `fn(mut self, ..) -> Self`, the teacher's builder idiom; the
/// fallible ones (port, timeout, helo, dsn_notify) return `Result<Self>`
/// instead of panicking on a bad value.
pub struct SmtpClientBuilder {
    config: ClientConfig,
}

impl SmtpClientBuilder {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        SmtpClientBuilder {
            config: ClientConfig::new(host, port),
        }
    }

    /// Overrides the port; fails outside `1..=65535`. Takes precedence
    /// over any port a later `ssl_port`/`tls_port_policy` call would
    /// otherwise pick (§4.4's "applied only when the port has not been
    /// explicitly overridden").
    pub fn port(mut self, port: u16) -> Result<Self> {
        ClientConfig::validate_port(port)?;
        self.config.port = port;
        self.config.port_overridden = true;
        Ok(self)
    }

    pub fn timeout(mut self, timeout: std::time::Duration) -> Result<Self> {
        ClientConfig::validate_timeout(timeout)?;
        self.config.timeout = timeout;
        Ok(self)
    }

    /// Implicit TLS (RFC 8314): the handshake happens immediately after
    /// the TCP connect, before any SMTP greeting is read.
    pub fn ssl(mut self) -> Self {
        self.config.use_ssl = true;
        self
    }

    /// Implicit TLS with the conventional port-465 default (unless
    /// already overridden) and an optional fallback to port 25 if 465 is
    /// unreachable.
    pub fn ssl_port(mut self, fallback: bool) -> Self {
        self.config.use_ssl = true;
        if !self.config.port_overridden {
            self.config.port = 465;
        }
        self.config.fallback_port = if fallback { 25 } else { 0 };
        self
    }

    /// Sets the `STARTTLS` upgrade policy without touching the port.
    pub fn tls_policy(mut self, policy: TlsPolicy) -> Self {
        self.config.tls_policy = policy;
        self
    }

    /// Sets the `STARTTLS` upgrade policy and, unless the port was
    /// already overridden, picks the conventional port for it: 587 for
    /// `Opportunistic`/`Mandatory` (with a 25 fallback for
    /// `Opportunistic`), 25 for `NoTls`.
    pub fn tls_port_policy(mut self, policy: TlsPolicy) -> Self {
        self.config.tls_policy = policy;
        if !self.config.port_overridden {
            self.config.port = match policy {
                TlsPolicy::NoTls => 25,
                TlsPolicy::Opportunistic | TlsPolicy::Mandatory => 587,
            };
        }
        self.config.fallback_port = if policy == TlsPolicy::Opportunistic { 25 } else { 0 };
        self
    }

    pub fn allow_invalid_certs(mut self, allow: bool) -> Self {
        self.config.allow_invalid_certs = allow;
        self
    }

    /// Floors the negotiated TLS protocol range. Defaults to `Tls12`.
    pub fn min_tls_version(mut self, version: TlsMinVersion) -> Self {
        self.config.min_tls_version = version;
        self
    }

    pub fn tls_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.tls_hostname = hostname.into();
        self
    }

    pub fn helo(mut self, helo: impl Into<String>) -> Result<Self> {
        let helo = helo.into();
        ClientConfig::validate_helo(&helo)?;
        self.config.helo = helo;
        Ok(self)
    }

    pub fn credentials(mut self, credentials: impl Into<Credentials>) -> Self {
        self.config.credentials = Some(credentials.into());
        self
    }

    pub fn smtp_auth(mut self, auth: AuthType) -> Self {
        self.config.auth = auth;
        self
    }

    pub fn smtp_auth_custom(mut self, mechanism: Arc<dyn crate::smtp::auth::SaslMechanism>) -> Self {
        self.config.auth = AuthType::Custom(mechanism);
        self
    }

    /// Skips the `NOOP` liveness probe this crate otherwise sends before
    /// every transaction.
    pub fn without_noop(mut self) -> Self {
        self.config.no_noop = true;
        self
    }

    /// If some recipients are accepted and others rejected, send to the
    /// accepted ones rather than aborting the whole message. Off by
    /// default (§ Design Decisions: the reference policy is all-or-nothing).
    pub fn allow_partial_rcpt_failures(mut self) -> Self {
        self.config.allow_partial_rcpt_failures = true;
        self
    }

    /// Requests a full DSN (RET=FULL, NOTIFY=FAILURE,SUCCESS) when the
    /// server advertises the extension.
    pub fn dsn(mut self) -> Self {
        self.config.request_dsn = true;
        self.config.dsn_return = DsnReturn::Full;
        self.config.dsn_notify = vec![DsnNotify::Failure, DsnNotify::Success];
        self
    }

    pub fn dsn_return(mut self, ret: DsnReturn) -> Result<Self> {
        self.config.request_dsn = true;
        self.config.dsn_return = ret;
        Ok(self)
    }

    pub fn dsn_notify(mut self, notify: Vec<DsnNotify>) -> Result<Self> {
        ClientConfig::validate_dsn_notify(&notify)?;
        self.config.request_dsn = true;
        self.config.dsn_notify = notify;
        Ok(self)
    }

    /// Installs a custom transport dialer (proxying, connection reuse,
    /// test doubles).
    pub fn dial_context(mut self, dialer: DialContext) -> Self {
        self.config.dial_context = Some(dialer);
        self
    }

    pub fn debug_log(mut self) -> Self {
        self.config.debug_log = true;
        self
    }

    /// When combined with `debug_log`, logs the literal SASL exchange
    /// (base64 credentials included) rather than a redacted placeholder.
    pub fn log_auth_data(mut self) -> Self {
        self.config.log_auth_data = true;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.config.logger = logger;
        self
    }

    /// Dials the server: connects (with fallback-port retry per §4.4),
    /// sends `EHLO`, upgrades to TLS per policy (§4.5), and authenticates
    /// if credentials/an auth type were configured.
    pub async fn connect(self) -> Result<Client> {
        let config = Arc::new(self.config);
        let connection = Client::dial(&config).await?;
        Ok(Client {
            config,
            connection: Mutex::new(Some(connection)),
        })
    }

    /// Convenience composition: dial, send every message, then close.
    /// The connection is always closed, even if sending failed partway.
    pub async fn dial_and_send(self, messages: &mut [Message]) -> Result<()> {
        let client = self.connect().await?;
        let result = client.send_all(messages).await;
        let _ = client.quit().await;
        result
    }
}

/// A connected, authenticated SMTP client. Transaction-touching
/// operations serialize on an internal `tokio::sync::Mutex` so a `Client`
/// can be shared (e.g. behind an `Arc`) across concurrent tasks without
/// interleaving two transactions on the same wire.
pub struct Client {
    config: Arc<ClientConfig>,
    connection: Mutex<Option<Connection>>,
}

impl Client {
    async fn dial(config: &ClientConfig) -> Result<Connection> {
        let tls_connector =
            build_tls_connector(config.allow_invalid_certs, config.min_tls_version);

        let conn = match Self::dial_once(config, &tls_connector, config.port).await {
            Ok(conn) => conn,
            Err(primary_err) => {
                if config.fallback_port != 0 {
                    match Self::dial_once(config, &tls_connector, config.fallback_port).await {
                        Ok(conn) => conn,
                        Err(fallback_err) => {
                            return Err(Error::Dial(DialError {
                                primary: Box::new(primary_err),
                                fallback: Some(Box::new(fallback_err)),
                            }))
                        }
                    }
                } else {
                    return Err(Error::Dial(DialError {
                        primary: Box::new(primary_err),
                        fallback: None,
                    }));
                }
            }
        };

        Self::finish_handshake(conn, config, &tls_connector).await
    }

    async fn dial_once(
        config: &ClientConfig,
        tls_connector: &tokio_rustls::TlsConnector,
        port: u16,
    ) -> Result<Connection> {
        if let Some(dialer) = &config.dial_context {
            let stream = tokio::time::timeout(config.timeout, dialer(config.host.clone(), port))
                .await
                .map_err(|_| Error::Timeout)??;
            if config.use_ssl {
                Connection::from_plain_stream_tls(stream, tls_connector, &config.tls_hostname, config.timeout).await
            } else {
                Connection::from_plain_stream(stream, config.timeout).await
            }
        } else if config.use_ssl {
            Connection::connect_tls((&config.host, port), tls_connector, &config.tls_hostname, config.timeout).await
        } else {
            Connection::connect_plain((&config.host, port), config.timeout).await
        }
    }

    async fn finish_handshake(
        mut conn: Connection,
        config: &ClientConfig,
        tls_connector: &tokio_rustls::TlsConnector,
    ) -> Result<Connection> {
        conn.ehlo(&config.helo).await?;

        if !config.use_ssl && config.tls_policy != TlsPolicy::NoTls {
            if conn.capabilities.start_tls {
                conn = conn.start_tls(tls_connector, &config.tls_hostname).await?;
                conn.ehlo(&config.helo).await?;
            } else if config.tls_policy == TlsPolicy::Mandatory {
                return Err(TlsPolicyError::StartTlsRequired.into());
            }
        }

        if config.debug_log {
            conn.set_logger(config.logger.clone(), config.log_auth_data);
        }

        if !matches!(config.auth, AuthType::NoAuth) {
            let mechanism = config.auth.resolve(conn.is_encrypted())?;
            let credentials = config
                .credentials
                .clone()
                .unwrap_or_else(|| Credentials::new("", ""));
            conn.authenticate(&mechanism, &credentials).await?;
        }

        Ok(conn)
    }

    /// Sends a single message, consuming it by value. Equivalent to
    /// `send_all` on a one-element slice.
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        let mut messages = [message.into()];
        self.send_all(&mut messages).await
    }

    /// Sends each message over the same connection, in order. A liveness
    /// `NOOP` precedes every transaction unless `without_noop` was set.
    /// Stops at the first message that fails (subsequent messages in the
    /// slice are left untouched, `is_delivered` still `false`).
    pub async fn send_all(&self, messages: &mut [Message]) -> Result<()> {
        let mut guard = self.connection.lock().await;
        for (index, message) in messages.iter_mut().enumerate() {
            if guard.is_none() {
                return Err(Error::NoActiveConnection);
            }
            if !self.config.no_noop {
                let alive = matches!(
                    guard.as_mut().expect("checked above").noop().await,
                    Ok(reply) if reply.is_positive_completion()
                );
                if !alive {
                    *guard = None;
                    return Err(Error::NoActiveConnection);
                }
            }
            self.transact(&mut guard, message, index).await?;
        }
        Ok(())
    }

    async fn transact(&self, guard: &mut Option<Connection>, message: &mut Message, index: usize) -> Result<()> {
        let sender = message
            .mail_from()
            .map(|a| a.email.clone())
            .ok_or_else(|| send_error(SendErrorReason::GetSender, None, Vec::new(), index, Vec::new()))?;
        let recipients: Vec<String> = message.rcpt_to().into_iter().map(|a| a.email.clone()).collect();
        if recipients.is_empty() {
            return Err(send_error(SendErrorReason::GetRcpts, None, Vec::new(), index, Vec::new()).into());
        }

        let body = writer::serialize_message(message)
            .map_err(|e| send_error(SendErrorReason::WriteContent, None, Vec::new(), index, vec![e]))?;

        let conn = guard.as_mut().expect("checked by caller");
        let eight_bit = writer::body_is_eight_bit(&body);
        if eight_bit && !conn.capabilities.eight_bit_mime {
            return Err(send_error(SendErrorReason::NoUnencoded, None, Vec::new(), index, Vec::new()).into());
        }

        let smtputf8 = conn.capabilities.smtp_utf8
            && (message.has_non_ascii() || !sender.is_ascii() || recipients.iter().any(|r| !r.is_ascii()));
        let ret = if self.config.request_dsn && conn.capabilities.dsn {
            Some(self.config.dsn_return.as_str())
        } else {
            None
        };
        let notify: Vec<&'static str> = if self.config.request_dsn && conn.capabilities.dsn {
            self.config.dsn_notify.iter().map(|n| n.as_str()).collect()
        } else {
            Vec::new()
        };

        let mail_params = Parameters {
            body_8bitmime: eight_bit,
            smtputf8,
            ret,
            ..Default::default()
        };
        let rcpt_params = Parameters {
            notify,
            ..Default::default()
        };

        match conn.mail_from(&sender, &mail_params).await {
            Ok(reply) if reply.is_positive_completion() => {}
            Ok(reply) => {
                let errlist = self.abort(guard).await;
                return Err(send_error(SendErrorReason::SmtpMailFrom, Some(&reply), Vec::new(), index, errlist).into());
            }
            Err(e) => {
                *guard = None;
                return Err(e);
            }
        }

        let conn = guard.as_mut().expect("still connected after MAIL FROM");
        let mut accepted = Vec::with_capacity(recipients.len());
        let mut rejected = Vec::new();
        for rcpt in &recipients {
            match conn.rcpt_to(rcpt, &rcpt_params).await {
                Ok(reply) if reply.is_positive_completion() => accepted.push(rcpt.clone()),
                Ok(reply) => rejected.push((rcpt.clone(), reply)),
                Err(e) => {
                    *guard = None;
                    return Err(e);
                }
            }
        }

        if accepted.is_empty() || (!rejected.is_empty() && !self.config.allow_partial_rcpt_failures) {
            let errlist = self.abort(guard).await;
            let (reply, rcpt_list) = if rejected.is_empty() {
                (None, Vec::new())
            } else {
                (
                    Some(rejected[0].1.clone()),
                    rejected.iter().map(|(r, _)| r.clone()).collect(),
                )
            };
            return Err(send_error(SendErrorReason::SmtpRcptTo, reply.as_ref(), rcpt_list, index, errlist).into());
        }

        let conn = guard.as_mut().expect("still connected after RCPT TO");
        match conn.data(&body).await {
            Ok(reply) if reply.is_positive_completion() => {
                message.is_delivered = true;
                Ok(())
            }
            Ok(reply) => Err(send_error(SendErrorReason::SmtpDataClose, Some(&reply), Vec::new(), index, Vec::new()).into()),
            Err(e) => {
                let reply = match &e {
                    Error::Protocol(ProtocolError { reply: Some(r), .. }) => Some(r.clone()),
                    _ => None,
                };
                *guard = None;
                Err(send_error(SendErrorReason::SmtpData, reply.as_ref(), Vec::new(), index, vec![e]).into())
            }
        }
    }

    /// Sends `RSET` to clear a failed transaction. If `RSET` itself
    /// fails, the connection is presumed dead and dropped rather than
    /// reused for the next message.
    async fn abort(&self, guard: &mut Option<Connection>) -> Vec<Error> {
        let mut errlist = Vec::new();
        if let Some(conn) = guard.as_mut() {
            match conn.rset().await {
                Ok(reply) if reply.is_positive_completion() => {}
                Ok(reply) => {
                    errlist.push(Error::Protocol(ProtocolError {
                        during: "RSET",
                        reply: Some(reply),
                    }));
                    *guard = None;
                }
                Err(e) => {
                    errlist.push(e);
                    *guard = None;
                }
            }
        }
        errlist
    }

    /// Sends `RSET` outside of a message transaction, e.g. to clear
    /// server-side state after inspecting a failed send before reusing
    /// the connection.
    pub async fn reset(&self) -> Result<()> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_mut() {
            let reply = conn.rset().await?;
            if !reply.is_positive_completion() {
                *guard = None;
                return Err(Error::Protocol(ProtocolError {
                    during: "RSET",
                    reply: Some(reply),
                }));
            }
        }
        Ok(())
    }

    /// Sends `QUIT` and closes the connection. Idempotent: calling this
    /// (or [`Self::close`]) again on an already-closed client is a no-op.
    pub async fn quit(&self) -> Result<()> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.take() {
            conn.quit().await?;
        }
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.quit().await
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::message::MessageBuilder;

    /// Drives one end of an in-memory duplex as a scripted SMTP server:
    /// writes the greeting, then for each scripted reply reads one
    /// client command (or DATA payload) and writes the reply back.
    async fn mock_server(mut server: tokio::io::DuplexStream, replies: Vec<&'static str>) {
        server.write_all(b"220 mail.example.com ESMTP\r\n").await.unwrap();
        let mut buf = [0u8; 8192];
        for reply in replies {
            let n = server.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed the connection early");
            server.write_all(reply.as_bytes()).await.unwrap();
        }
    }

    fn test_config(no_noop: bool) -> ClientConfig {
        let mut config = ClientConfig::new("localhost", 25);
        config.no_noop = no_noop;
        config
    }

    #[tokio::test]
    async fn full_transaction_delivers_and_marks_message() {
        let (client_stream, server_stream) = tokio::io::duplex(16384);
        tokio::spawn(mock_server(
            server_stream,
            vec![
                "250-mail.example.com greets localhost\r\n250-8BITMIME\r\n250-DSN\r\n250 SMTPUTF8\r\n",
                "250 2.1.0 OK\r\n",
                "250 2.1.5 OK\r\n",
                "354 Start mail input\r\n",
                "250 2.0.0 queued\r\n",
            ],
        ));

        let mut conn = Connection::from_mock(client_stream, Duration::from_secs(5)).await.unwrap();
        conn.ehlo("localhost").await.unwrap();

        let client = Client {
            config: Arc::new(test_config(true)),
            connection: Mutex::new(Some(conn)),
        };

        let mut msg: Message = MessageBuilder::new()
            .from("valid-from@domain.tld")
            .to(vec!["valid-to@domain.tld"])
            .subject("Testmail")
            .text_body("Testmail")
            .into();

        client.send_all(std::slice::from_mut(&mut msg)).await.unwrap();
        assert!(msg.is_delivered);
    }

    #[tokio::test]
    async fn invalid_sender_is_reported_and_connection_reset() {
        let (client_stream, server_stream) = tokio::io::duplex(16384);
        tokio::spawn(mock_server(
            server_stream,
            vec![
                "250-mail.example.com greets localhost\r\n250 DSN\r\n",
                "503 5.1.0 Bad sender\r\n",
                "250 2.0.0 OK\r\n", // RSET
            ],
        ));

        let mut conn = Connection::from_mock(client_stream, Duration::from_secs(5)).await.unwrap();
        conn.ehlo("localhost").await.unwrap();

        let client = Client {
            config: Arc::new(test_config(true)),
            connection: Mutex::new(Some(conn)),
        };

        let mut msg: Message = MessageBuilder::new()
            .from("invalid-from@domain.tld")
            .to(vec!["valid-to@domain.tld"])
            .text_body("x")
            .into();

        let err = client.send_all(std::slice::from_mut(&mut msg)).await.unwrap_err();
        match err {
            Error::Send(send_err) => {
                assert_eq!(send_err.reason, SendErrorReason::SmtpMailFrom);
                assert_eq!(send_err.errcode, Some(503));
                assert_eq!(send_err.enhanced_status_code, Some((5, 1, 0)));
                assert!(send_err.errlist.is_empty());
            }
            other => panic!("expected Error::Send, got {other:?}"),
        }
        assert!(!msg.is_delivered);
    }

    #[tokio::test]
    async fn partial_rcpt_failure_aborts_by_default() {
        let (client_stream, server_stream) = tokio::io::duplex(16384);
        tokio::spawn(mock_server(
            server_stream,
            vec![
                "250-mail.example.com greets localhost\r\n250 DSN\r\n",
                "250 2.1.0 OK\r\n",        // MAIL FROM
                "250 2.1.5 OK\r\n",        // RCPT TO good@domain.tld
                "550 5.1.1 No such user\r\n", // RCPT TO bad@domain.tld
                "250 2.0.0 OK\r\n",        // RSET
            ],
        ));

        let mut conn = Connection::from_mock(client_stream, Duration::from_secs(5)).await.unwrap();
        conn.ehlo("localhost").await.unwrap();

        let client = Client {
            config: Arc::new(test_config(true)),
            connection: Mutex::new(Some(conn)),
        };

        let mut msg: Message = MessageBuilder::new()
            .from("from@domain.tld")
            .to(vec!["good@domain.tld", "bad@domain.tld"])
            .text_body("x")
            .into();

        let err = client.send_all(std::slice::from_mut(&mut msg)).await.unwrap_err();
        match err {
            Error::Send(send_err) => {
                assert_eq!(send_err.reason, SendErrorReason::SmtpRcptTo);
                assert_eq!(send_err.rcpt, vec!["bad@domain.tld".to_string()]);
            }
            other => panic!("expected Error::Send, got {other:?}"),
        }
        assert!(!msg.is_delivered);
    }

    #[tokio::test]
    async fn allow_partial_rcpt_failures_sends_to_accepted_only() {
        let (client_stream, server_stream) = tokio::io::duplex(16384);
        tokio::spawn(mock_server(
            server_stream,
            vec![
                "250-mail.example.com greets localhost\r\n250 DSN\r\n",
                "250 2.1.0 OK\r\n",
                "250 2.1.5 OK\r\n",
                "550 5.1.1 No such user\r\n",
                "354 Start mail input\r\n",
                "250 2.0.0 queued\r\n",
            ],
        ));

        let mut conn = Connection::from_mock(client_stream, Duration::from_secs(5)).await.unwrap();
        conn.ehlo("localhost").await.unwrap();

        let mut config = test_config(true);
        config.allow_partial_rcpt_failures = true;
        let client = Client {
            config: Arc::new(config),
            connection: Mutex::new(Some(conn)),
        };

        let mut msg: Message = MessageBuilder::new()
            .from("from@domain.tld")
            .to(vec!["good@domain.tld", "bad@domain.tld"])
            .text_body("x")
            .into();

        client.send_all(std::slice::from_mut(&mut msg)).await.unwrap();
        assert!(msg.is_delivered);
    }

    #[test]
    fn starttls_mandatory_without_server_support_is_rejected() {
        // Pure decision-table check mirroring `finish_handshake`'s branch,
        // without needing a real TLS handshake: Mandatory policy plus a
        // server that never advertised STARTTLS must fail before any
        // auth/transaction traffic is sent.
        let use_ssl = false;
        let policy = TlsPolicy::Mandatory;
        let server_supports_starttls = false;

        let result: Result<()> = if !use_ssl && policy != TlsPolicy::NoTls && !server_supports_starttls {
            if policy == TlsPolicy::Mandatory {
                Err(TlsPolicyError::StartTlsRequired.into())
            } else {
                Ok(())
            }
        } else {
            Ok(())
        };

        assert!(matches!(
            result,
            Err(Error::TlsPolicy(TlsPolicyError::StartTlsRequired))
        ));
    }

    #[test]
    fn auth_type_plain_rejects_plaintext_connection() {
        let err = AuthType::Plain.resolve(false).unwrap_err();
        assert!(matches!(
            err,
            Error::TlsPolicy(TlsPolicyError::PlainTextChannelBinding)
        ));
        assert!(AuthType::PlainNoEnc.resolve(false).is_ok());
    }

    #[test]
    fn auth_type_scram_plus_rejects_plaintext_connection() {
        let err = AuthType::ScramSha256Plus.resolve(false).unwrap_err();
        assert!(matches!(
            err,
            Error::TlsPolicy(TlsPolicyError::PlainTextChannelBinding)
        ));
        assert!(AuthType::ScramSha256Plus.resolve(true).is_ok());
    }

    #[test]
    fn ssl_port_defaults_to_465_unless_overridden() {
        let builder = SmtpClientBuilder::new("smtp.example.com", 25).ssl_port(true);
        assert_eq!(builder.config.port, 465);
        assert_eq!(builder.config.fallback_port, 25);

        let builder = SmtpClientBuilder::new("smtp.example.com", 2525)
            .port(2525)
            .unwrap()
            .ssl_port(true);
        assert_eq!(builder.config.port, 2525);
    }

    #[test]
    fn tls_port_policy_picks_587_for_mandatory() {
        let builder = SmtpClientBuilder::new("smtp.example.com", 25).tls_port_policy(TlsPolicy::Mandatory);
        assert_eq!(builder.config.port, 587);
        assert_eq!(builder.config.fallback_port, 0);
    }

    #[tokio::test]
    async fn dsn_renders_ret_and_notify_params() {
        let (client_stream, mut server_stream) = tokio::io::duplex(16384);
        tokio::spawn(async move {
            server_stream
                .write_all(b"220 mail.example.com ESMTP\r\n")
                .await
                .unwrap();
            let mut buf = [0u8; 8192];
            for reply in [
                "250-mail.example.com greets localhost\r\n250 DSN\r\n",
                "250 2.1.0 OK\r\n",
                "250 2.1.5 OK\r\n",
                "354 Start mail input\r\n",
                "250 2.0.0 queued\r\n",
            ] {
                let n = server_stream.read(&mut buf).await.unwrap();
                let line = String::from_utf8_lossy(&buf[..n]);
                if line.starts_with("MAIL FROM") {
                    assert_eq!(line, "MAIL FROM:<valid-from@domain.tld> RET=FULL\r\n");
                } else if line.starts_with("RCPT TO") {
                    assert_eq!(line, "RCPT TO:<valid-to@domain.tld> NOTIFY=FAILURE,SUCCESS\r\n");
                }
                server_stream.write_all(reply.as_bytes()).await.unwrap();
            }
        });

        let mut conn = Connection::from_mock(client_stream, Duration::from_secs(5)).await.unwrap();
        conn.ehlo("localhost").await.unwrap();

        let mut config = test_config(true);
        config.request_dsn = true;
        config.dsn_return = DsnReturn::Full;
        config.dsn_notify = vec![DsnNotify::Failure, DsnNotify::Success];
        let client = Client {
            config: Arc::new(config),
            connection: Mutex::new(Some(conn)),
        };

        let mut msg: Message = MessageBuilder::new()
            .from("valid-from@domain.tld")
            .to(vec!["valid-to@domain.tld"])
            .text_body("x")
            .into();

        client.send_all(std::slice::from_mut(&mut msg)).await.unwrap();
        assert!(msg.is_delivered);
    }
}
