/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The low-level SMTP protocol driver: one reply at a time, one command
//! at a time. [`crate::client::Client`] owns the policy (which port, which
//! TLS mode, which SASL mechanism); `Connection` just speaks the wire
//! protocol over whatever [`SmtpStream`] it was handed.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::client::config::{Direction, Logger};
use crate::smtp::capability::Capabilities;
use crate::smtp::reply::{ParseError, Reply, ReplyParser};
use crate::smtp::stream::SmtpStream;
use crate::smtp::tls::connect_tls;

use super::auth::{ChannelBinding, Credentials, Mechanism, Step};

/// A DSN/transaction parameter list appended to `MAIL FROM`/`RCPT TO`
/// (RFC 1891). Rendered with a leading space before each `KEY=VALUE`.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    pub body_8bitmime: bool,
    pub smtputf8: bool,
    pub size: Option<usize>,
    pub ret: Option<&'static str>,
    pub envid: Option<String>,
    pub notify: Vec<&'static str>,
    pub orcpt: Option<String>,
}

impl std::fmt::Display for Parameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.body_8bitmime {
            write!(f, " BODY=8BITMIME")?;
        }
        if self.smtputf8 {
            write!(f, " SMTPUTF8")?;
        }
        if let Some(size) = self.size {
            write!(f, " SIZE={size}")?;
        }
        if let Some(ret) = self.ret {
            write!(f, " RET={ret}")?;
        }
        if let Some(envid) = &self.envid {
            write!(f, " ENVID={envid}")?;
        }
        if !self.notify.is_empty() {
            write!(f, " NOTIFY={}", self.notify.join(","))?;
        }
        if let Some(orcpt) = &self.orcpt {
            write!(f, " ORCPT={orcpt}")?;
        }
        Ok(())
    }
}

/// A live connection to an SMTP server, somewhere between `Connected` and
/// `Ready` in the lifecycle `SmtpClientBuilder::dial` drives it through.
pub struct Connection {
    stream: SmtpStream,
    parser: ReplyParser,
    pub(crate) timeout: Duration,
    pub capabilities: Capabilities,
    logger: Option<Arc<dyn Logger>>,
    log_auth_data: bool,
}

impl Connection {
    pub async fn connect_plain(addr: (&str, u16), timeout: Duration) -> crate::Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| crate::Error::Timeout)??;
        Self::from_plain_stream(stream, timeout).await
    }

    /// As [`Self::connect_plain`], but over an already-connected socket —
    /// the entry point used when a caller supplies its own dialer.
    pub async fn from_plain_stream(stream: TcpStream, timeout: Duration) -> crate::Result<Self> {
        let mut conn = Connection {
            stream: SmtpStream::Plain(stream),
            parser: ReplyParser::new(),
            timeout,
            capabilities: Capabilities::default(),
            logger: None,
            log_auth_data: false,
        };
        conn.read().await?.assert_positive_completion("connect")?;
        Ok(conn)
    }

    pub async fn connect_tls(
        addr: (&str, u16),
        tls_connector: &TlsConnector,
        tls_hostname: &str,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| crate::Error::Timeout)??;
        Self::from_plain_stream_tls(stream, tls_connector, tls_hostname, timeout).await
    }

    /// As [`Self::connect_tls`], but over an already-connected socket.
    pub async fn from_plain_stream_tls(
        stream: TcpStream,
        tls_connector: &TlsConnector,
        tls_hostname: &str,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let tls = connect_tls(tls_connector, stream, tls_hostname, timeout).await?;
        let mut conn = Connection {
            stream: SmtpStream::Tls(Box::new(tls)),
            parser: ReplyParser::new(),
            timeout,
            capabilities: Capabilities::default(),
            logger: None,
            log_auth_data: false,
        };
        conn.read().await?.assert_positive_completion("connect")?;
        Ok(conn)
    }

    /// Installs a transcript sink; when `log_auth_data` is `false`, SASL
    /// exchange lines are redacted before being logged.
    pub fn set_logger(&mut self, logger: Arc<dyn Logger>, log_auth_data: bool) {
        self.logger = Some(logger);
        self.log_auth_data = log_auth_data;
    }

    fn log_sent(&self, line: &str) {
        if let Some(logger) = &self.logger {
            logger.log(Direction::Sent, line.trim_end());
        }
    }

    fn log_received(&self, reply: &Reply) {
        if let Some(logger) = &self.logger {
            logger.log(Direction::Received, &reply.to_string());
        }
    }

    /// Wraps an in-memory duplex half as a plaintext connection and reads
    /// the server's greeting, for driving the high-level [`crate::client::Client`]
    /// against a scripted mock server in tests.
    #[cfg(test)]
    pub(crate) async fn from_mock(
        stream: tokio::io::DuplexStream,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let mut conn = Connection {
            stream: SmtpStream::Mock(stream),
            parser: ReplyParser::new(),
            timeout,
            capabilities: Capabilities::default(),
            logger: None,
            log_auth_data: false,
        };
        conn.read().await?.assert_positive_completion("connect")?;
        Ok(conn)
    }

    pub fn is_encrypted(&self) -> bool {
        self.stream.is_encrypted()
    }

    /// The TLS connection, if any, for channel-binding extraction.
    pub fn tls_connection(&self) -> Option<&rustls::ClientConnection> {
        match &self.stream {
            SmtpStream::Tls(tls) => Some(tls.get_ref().1),
            _ => None,
        }
    }

    async fn read(&mut self) -> crate::Result<Reply> {
        let mut buf = [0u8; 4096];
        loop {
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(crate::Error::Protocol(crate::ProtocolError {
                    during: "read",
                    reply: None,
                }));
            }
            match self.parser.parse(&buf[..n]) {
                Ok(reply) => return Ok(reply),
                Err(ParseError::NeedsMoreData) => continue,
                Err(_) => {
                    return Err(crate::Error::Protocol(crate::ProtocolError {
                        during: "parse reply",
                        reply: None,
                    }))
                }
            }
        }
    }

    /// Sends a command and waits for its reply, both bounded by the
    /// connection's deadline.
    pub async fn cmd(&mut self, cmd: impl AsRef<[u8]>) -> crate::Result<Reply> {
        self.log_sent(&String::from_utf8_lossy(cmd.as_ref()));
        let reply = tokio::time::timeout(self.timeout, async {
            self.stream.write_all(cmd.as_ref()).await?;
            self.stream.flush().await?;
            self.read().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)??;
        self.log_received(&reply);
        Ok(reply)
    }

    /// Like [`Self::cmd`], but for SASL exchange lines: the line is only
    /// logged verbatim when `log_auth_data` is set, otherwise a redacted
    /// placeholder is logged in its place.
    async fn cmd_auth(&mut self, line: &str) -> crate::Result<Reply> {
        if self.log_auth_data {
            self.log_sent(line);
        } else if self.logger.is_some() {
            let verb = line.split_whitespace().next().unwrap_or("AUTH");
            self.log_sent(&format!("{verb} <redacted>"));
        }
        let reply = tokio::time::timeout(self.timeout, async {
            self.stream.write_all(format!("{line}\r\n").as_bytes()).await?;
            self.stream.flush().await?;
            self.read().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)??;
        self.log_received(&reply);
        Ok(reply)
    }

    pub async fn ehlo(&mut self, local_host: &str) -> crate::Result<()> {
        let reply = self.cmd(format!("EHLO {local_host}\r\n").as_bytes()).await?;
        if reply.is_positive_completion() {
            self.capabilities = Capabilities::parse(&reply)?;
            return Ok(());
        }
        // Fall back to HELO, per RFC 5321 §3.2: EHLO is mandatory for
        // extended capability discovery, but legacy servers may not
        // implement it at all.
        let helo = self.cmd(format!("HELO {local_host}\r\n").as_bytes()).await?;
        let helo = helo.assert_positive_completion("HELO")?;
        self.capabilities = Capabilities {
            hostname: helo.message().first().cloned().unwrap_or_default(),
            ..Default::default()
        };
        Ok(())
    }

    pub async fn start_tls(
        self,
        tls_connector: &TlsConnector,
        tls_hostname: &str,
    ) -> crate::Result<Self> {
        let Connection {
            mut stream,
            timeout,
            logger,
            log_auth_data,
            ..
        } = self;
        let plain = match stream {
            SmtpStream::Plain(s) => s,
            _ => {
                return Err(crate::Error::Protocol(crate::ProtocolError {
                    during: "STARTTLS",
                    reply: None,
                }))
            }
        };
        stream = SmtpStream::Plain(plain);
        let mut conn = Connection {
            stream,
            parser: ReplyParser::new(),
            timeout,
            capabilities: Capabilities::default(),
            logger: logger.clone(),
            log_auth_data,
        };
        conn.cmd(b"STARTTLS\r\n")
            .await?
            .assert_positive_completion("STARTTLS")?;
        let plain = match conn.stream {
            SmtpStream::Plain(s) => s,
            _ => unreachable!(),
        };
        let tls = connect_tls(tls_connector, plain, tls_hostname, timeout).await?;
        Ok(Connection {
            stream: SmtpStream::Tls(Box::new(tls)),
            parser: ReplyParser::new(),
            timeout,
            capabilities: Capabilities::default(),
            logger,
            log_auth_data,
        })
    }

    pub async fn authenticate(
        &mut self,
        mechanism: &Mechanism,
        credentials: &Credentials,
    ) -> crate::Result<()> {
        let binding = ChannelBinding::from_tls(self.tls_connection());
        let sasl = mechanism.resolve(credentials, &self.capabilities, &binding)?;

        let mut reply = if let Some(initial) = sasl.initial_response() {
            self.cmd_auth(&format!(
                "AUTH {} {}",
                sasl.name(),
                super::auth::encode_response(&initial)
            ))
            .await?
        } else {
            self.cmd_auth(&format!("AUTH {}", sasl.name())).await?
        };

        loop {
            match reply.code() {
                334 => {
                    let challenge = super::auth::decode_challenge(&reply.text())?;
                    match sasl.challenge(&challenge)? {
                        Step::Respond(response) => {
                            reply = self
                                .cmd_auth(&super::auth::encode_response(&response))
                                .await?;
                        }
                        Step::Done => {
                            // RFC 4954 §4: an empty SASL response is sent
                            // as a literal "=", not a blank line.
                            reply = self.cmd_auth("=").await?;
                        }
                    }
                }
                235 => return Ok(()),
                _ => return Err(crate::Error::AuthFailed(reply)),
            }
        }
    }

    pub async fn mail_from(&mut self, addr: &str, params: &Parameters) -> crate::Result<Reply> {
        self.cmd(format!("MAIL FROM:<{addr}>{params}\r\n").as_bytes())
            .await
    }

    pub async fn rcpt_to(&mut self, addr: &str, params: &Parameters) -> crate::Result<Reply> {
        self.cmd(format!("RCPT TO:<{addr}>{params}\r\n").as_bytes())
            .await
    }

    pub async fn data(&mut self, message: &[u8]) -> crate::Result<Reply> {
        self.cmd(b"DATA\r\n").await?.assert_code(354, "DATA")?;
        tokio::time::timeout(self.timeout, async {
            self.stream.write_dot_stuffed(message).await?;
            self.stream.flush().await?;
            self.read().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }

    pub async fn rset(&mut self) -> crate::Result<Reply> {
        self.cmd(b"RSET\r\n").await
    }

    pub async fn noop(&mut self) -> crate::Result<Reply> {
        self.cmd(b"NOOP\r\n").await
    }

    pub async fn quit(mut self) -> crate::Result<()> {
        self.cmd(b"QUIT\r\n").await?;
        Ok(())
    }
}
