/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! [`SmtpClientBuilder`]'s validated, immutable configuration
//! (§3 "Client configuration"), plus the pluggable logging sink consulted
//! when `debug_log`/`log_auth_data` are enabled.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::smtp::auth::{Credentials, Mechanism, SaslMechanism};
use crate::{ConfigurationError, Result};

/// How (and whether) to negotiate TLS on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPolicy {
    NoTls,
    Opportunistic,
    Mandatory,
}

/// Floor of the negotiated TLS protocol range (§3 "Client configuration").
/// Defaults to `Tls12`, matching the RFC 8314/common-MTA baseline; `Tls13`
/// excludes TLS 1.2 entirely from the handshake's `ClientHello`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMinVersion {
    Tls12,
    Tls13,
}

/// `RET` parameter of a DSN-enabled `MAIL FROM` (RFC 1891 §5.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsnReturn {
    Hdrs,
    Full,
}

impl DsnReturn {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            DsnReturn::Hdrs => "HDRS",
            DsnReturn::Full => "FULL",
        }
    }
}

/// One flag of the `NOTIFY` parameter of a DSN-enabled `RCPT TO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsnNotify {
    Never,
    Success,
    Failure,
    Delay,
}

impl DsnNotify {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            DsnNotify::Never => "NEVER",
            DsnNotify::Success => "SUCCESS",
            DsnNotify::Failure => "FAILURE",
            DsnNotify::Delay => "DELAY",
        }
    }
}

/// The SASL mechanism to use, mirroring the Design Notes' tagged-variant
/// dispatch: every built-in combination the spec names is its own variant,
/// and `Custom` is the one non-`Copy` escape hatch.
pub enum AuthType {
    NoAuth,
    AutoDiscover,
    Plain,
    PlainNoEnc,
    Login,
    LoginNoEnc,
    CramMd5,
    XOAuth2,
    ScramSha1,
    ScramSha256,
    ScramSha1Plus,
    ScramSha256Plus,
    Custom(Arc<dyn SaslMechanism>),
}

impl std::fmt::Debug for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AuthType::NoAuth => "NoAuth",
            AuthType::AutoDiscover => "AutoDiscover",
            AuthType::Plain => "Plain",
            AuthType::PlainNoEnc => "PlainNoEnc",
            AuthType::Login => "Login",
            AuthType::LoginNoEnc => "LoginNoEnc",
            AuthType::CramMd5 => "CramMd5",
            AuthType::XOAuth2 => "XOAuth2",
            AuthType::ScramSha1 => "ScramSha1",
            AuthType::ScramSha256 => "ScramSha256",
            AuthType::ScramSha1Plus => "ScramSha1Plus",
            AuthType::ScramSha256Plus => "ScramSha256Plus",
            AuthType::Custom(_) => "Custom",
        })
    }
}

fn require_encrypted(is_encrypted: bool) -> Result<()> {
    if is_encrypted {
        Ok(())
    } else {
        Err(crate::TlsPolicyError::PlainTextChannelBinding.into())
    }
}

impl AuthType {
    /// Maps a configured auth choice onto the concrete [`Mechanism`] to
    /// drive, rejecting the plaintext-sensitive variants (everything but
    /// the `*NoEnc` escape hatches and `CramMd5`/`XOAuth2`) before a single
    /// byte of the exchange is sent when the connection isn't encrypted.
    pub(crate) fn resolve(&self, is_encrypted: bool) -> Result<Mechanism> {
        Ok(match self {
            AuthType::NoAuth => unreachable!("caller checks for NoAuth before resolving"),
            AuthType::AutoDiscover => Mechanism::AutoDiscover,
            AuthType::Plain => {
                require_encrypted(is_encrypted)?;
                Mechanism::Plain
            }
            AuthType::PlainNoEnc => Mechanism::Plain,
            AuthType::Login => {
                require_encrypted(is_encrypted)?;
                Mechanism::Login
            }
            AuthType::LoginNoEnc => Mechanism::Login,
            AuthType::CramMd5 => Mechanism::CramMd5,
            AuthType::XOAuth2 => Mechanism::XOAuth2,
            AuthType::ScramSha1 => Mechanism::ScramSha1,
            AuthType::ScramSha256 => Mechanism::ScramSha256,
            AuthType::ScramSha1Plus => {
                require_encrypted(is_encrypted)?;
                Mechanism::ScramSha1Plus
            }
            AuthType::ScramSha256Plus => {
                require_encrypted(is_encrypted)?;
                Mechanism::ScramSha256Plus
            }
            AuthType::Custom(mechanism) => Mechanism::Custom(mechanism.clone()),
        })
    }
}

/// Direction of a logged line, passed to [`Logger::log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

/// A pluggable sink for protocol tracing (`debug_log`) and, when
/// `log_auth_data` is also set, the literal SASL exchange. The default
/// sink forwards to `tracing`.
pub trait Logger: Send + Sync {
    fn log(&self, direction: Direction, line: &str);
}

/// Forwards every line to `tracing::debug!`, matching the teacher's own
/// reliance on `tracing` for protocol-level diagnostics.
#[derive(Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, direction: Direction, line: &str) {
        match direction {
            Direction::Sent => tracing::debug!(target: "mail_send::smtp", "-> {line}"),
            Direction::Received => tracing::debug!(target: "mail_send::smtp", "<- {line}"),
        }
    }
}

/// A user-supplied transport dialer, for callers that need custom
/// connection pooling, a SOCKS proxy, or test doubles. Returns an
/// already-connected socket; cancellation is the returned future's to
/// provide (the client still wraps it in its own `timeout`).
pub type DialContext = Arc<
    dyn Fn(String, u16) -> Pin<Box<dyn Future<Output = std::io::Result<TcpStream>> + Send>>
        + Send
        + Sync,
>;

/// Validated configuration backing a connected [`crate::Client`]. Built
/// once by [`crate::SmtpClientBuilder::connect`] and shared (via `Arc`)
/// with every `Connection` it dials, including reconnects.
pub struct ClientConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) port_overridden: bool,
    pub(crate) fallback_port: u16,
    pub(crate) timeout: Duration,
    pub(crate) tls_policy: TlsPolicy,
    pub(crate) use_ssl: bool,
    pub(crate) allow_invalid_certs: bool,
    pub(crate) min_tls_version: TlsMinVersion,
    pub(crate) tls_hostname: String,
    pub(crate) helo: String,
    pub(crate) auth: AuthType,
    pub(crate) credentials: Option<Credentials>,
    pub(crate) no_noop: bool,
    pub(crate) request_dsn: bool,
    pub(crate) dsn_return: DsnReturn,
    pub(crate) dsn_notify: Vec<DsnNotify>,
    pub(crate) debug_log: bool,
    pub(crate) log_auth_data: bool,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) dial_context: Option<DialContext>,
    pub(crate) allow_partial_rcpt_failures: bool,
}

impl ClientConfig {
    pub(crate) fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        ClientConfig {
            tls_hostname: host.clone(),
            host,
            port,
            port_overridden: false,
            fallback_port: 0,
            timeout: Duration::from_secs(60),
            tls_policy: TlsPolicy::Opportunistic,
            use_ssl: false,
            allow_invalid_certs: false,
            min_tls_version: TlsMinVersion::Tls12,
            helo: gethostname::gethostname()
                .to_str()
                .unwrap_or("localhost")
                .to_string(),
            auth: AuthType::NoAuth,
            credentials: None,
            no_noop: false,
            request_dsn: false,
            dsn_return: DsnReturn::Full,
            dsn_notify: Vec::new(),
            debug_log: false,
            log_auth_data: false,
            logger: Arc::new(TracingLogger),
            dial_context: None,
            allow_partial_rcpt_failures: false,
        }
    }

    pub(crate) fn validate_port(port: u16) -> Result<()> {
        if port == 0 {
            Err(ConfigurationError::InvalidPort.into())
        } else {
            Ok(())
        }
    }

    pub(crate) fn validate_timeout(timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            Err(ConfigurationError::InvalidTimeout.into())
        } else {
            Ok(())
        }
    }

    pub(crate) fn validate_helo(helo: &str) -> Result<()> {
        if helo.is_empty() {
            Err(ConfigurationError::InvalidHelo.into())
        } else {
            Ok(())
        }
    }

    pub(crate) fn validate_dsn_notify(notify: &[DsnNotify]) -> Result<()> {
        if notify.contains(&DsnNotify::Never) && notify.len() > 1 {
            Err(ConfigurationError::IncompatibleDsnNotify.into())
        } else {
            Ok(())
        }
    }
}
